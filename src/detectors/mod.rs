/// Anomaly records, the detector registry and built-in strategies
pub mod anomaly;
pub mod detector_engine;
pub mod strategies;

pub use anomaly::{Anomaly, AnomalyStatus, AnomalyType};
pub use detector_engine::{DetectionContext, DetectionOutcome, Detector, DetectorEngine};
pub use strategies::{DeviationDetector, DriftDetector, PatternDetector, VolumeDetector};
