/// Rolling baseline estimation
pub mod estimator;

pub use estimator::{Baseline, BaselineEstimator, RecomputeOutcome, WindowStats};
