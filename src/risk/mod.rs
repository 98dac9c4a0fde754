/// Risk scoring over a run's anomalies
pub mod scorer;

pub use scorer::{RiskCategory, RiskScore, RiskScorer};
