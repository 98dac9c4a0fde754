use crate::config::DetectionConfig;
use crate::detectors::strategies::{DeviationDetector, DriftDetector, PatternDetector, VolumeDetector};
use crate::detectors::{Anomaly, AnomalyType};
use crate::error::DetectionError;
use crate::events::{ObservationEvent, Severity, SubjectKind, SubjectRef, Timestamp};
use crate::store::CareStore;
use log::{debug, error, info};
use std::collections::{BTreeSet, HashSet};
use std::panic::{self, AssertUnwindSafe};
use uuid::Uuid;

/// Strategy that turns observations and baselines into anomalies
///
/// Implementations must be pure with respect to storage: they read observations
/// and baselines through the context and return anomalies; the pipeline persists them.
pub trait Detector: Send + Sync {
    /// Human-readable name used in logs
    fn name(&self) -> &str;

    /// Evaluate the context and return any anomalies found
    fn detect(&self, ctx: &DetectionContext<'_>) -> Result<Vec<Anomaly>, DetectionError>;
}

/// Everything a detector may look at during one run
pub struct DetectionContext<'a> {
    pub tenant_id: &'a str,
    pub run_id: Uuid,
    pub now: Timestamp,
    /// Observations that are new in this run
    pub fresh: &'a [ObservationEvent],
    pub store: &'a dyn CareStore,
    pub config: &'a DetectionConfig,
}

impl<'a> DetectionContext<'a> {
    /// Subjects that received new observations in this run
    pub fn fresh_subjects(&self, kind: SubjectKind) -> BTreeSet<SubjectRef> {
        self.fresh
            .iter()
            .filter(|event| event.subject.kind == kind)
            .map(|event| event.subject.clone())
            .collect()
    }

    /// Start an anomaly stamped with this run's tenant, run id and clock
    pub fn anomaly(
        &self,
        subject: &SubjectRef,
        anomaly_type: AnomalyType,
        subtype: impl Into<String>,
        severity: Severity,
        window: (Timestamp, Timestamp),
    ) -> Anomaly {
        Anomaly::new(
            self.tenant_id,
            self.run_id,
            Some(subject.clone()),
            anomaly_type,
            subtype,
            severity,
            window,
            self.now,
        )
    }
}

/// Result of running every registered detector once
#[derive(Debug, Default)]
pub struct DetectionOutcome {
    pub anomalies: Vec<Anomaly>,
    /// Names of detectors that failed this cycle
    pub failed: Vec<String>,
    /// Anomalies dropped because their key was already covered in this run
    pub duplicates: usize,
}

/// Registry of independent detector strategies
pub struct DetectorEngine {
    detectors: Vec<Box<dyn Detector>>,
}

impl Default for DetectorEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorEngine {
    /// Create an engine with no detectors
    pub fn new() -> Self {
        Self {
            detectors: Vec::new(),
        }
    }

    /// Create an engine with the four built-in strategies
    pub fn with_defaults() -> Self {
        let mut engine = Self::new();
        engine.add_detector(Box::new(DeviationDetector));
        engine.add_detector(Box::new(PatternDetector));
        engine.add_detector(Box::new(VolumeDetector));
        engine.add_detector(Box::new(DriftDetector));
        engine
    }

    pub fn add_detector(&mut self, detector: Box<dyn Detector>) {
        self.detectors.push(detector);
    }

    pub fn detector_count(&self) -> usize {
        self.detectors.len()
    }

    /// Run every detector, isolating failures and dropping run-scoped duplicates
    ///
    /// A detector that errors or panics is logged and skipped; the others still run.
    /// No detector suppresses another: keys are only compared against anomalies
    /// already accepted in this run.
    pub fn run(&self, ctx: &DetectionContext<'_>) -> DetectionOutcome {
        let mut outcome = DetectionOutcome::default();
        let mut seen: HashSet<String> = HashSet::new();

        for detector in &self.detectors {
            let result = panic::catch_unwind(AssertUnwindSafe(|| detector.detect(ctx)));

            let anomalies = match result {
                Ok(Ok(anomalies)) => anomalies,
                Ok(Err(e)) => {
                    error!(
                        "Detector {} failed for tenant {}: {}",
                        detector.name(),
                        ctx.tenant_id,
                        e
                    );
                    outcome.failed.push(detector.name().to_string());
                    continue;
                }
                Err(_) => {
                    error!(
                        "Detector {} panicked for tenant {}",
                        detector.name(),
                        ctx.tenant_id
                    );
                    outcome.failed.push(detector.name().to_string());
                    continue;
                }
            };

            let found = anomalies.len();
            for anomaly in anomalies {
                if seen.insert(anomaly.dedup_key.clone()) {
                    outcome.anomalies.push(anomaly);
                } else {
                    debug!("Dropping duplicate anomaly {}", anomaly.dedup_key);
                    outcome.duplicates += 1;
                }
            }

            if found > 0 {
                info!(
                    "Detector {} found {} anomalies for tenant {}",
                    detector.name(),
                    found,
                    ctx.tenant_id
                );
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::{Duration, Utc};

    struct FixedDetector {
        name: &'static str,
        keys: Vec<&'static str>,
    }

    impl Detector for FixedDetector {
        fn name(&self) -> &str {
            self.name
        }

        fn detect(&self, ctx: &DetectionContext<'_>) -> Result<Vec<Anomaly>, DetectionError> {
            let subject = SubjectRef::resident("r-1");
            Ok(self
                .keys
                .iter()
                .map(|key| {
                    ctx.anomaly(
                        &subject,
                        AnomalyType::Custom(self.name.to_string()),
                        "fixed",
                        Severity::Low,
                        (ctx.now - Duration::hours(1), ctx.now),
                    )
                    .with_dedup_key(*key)
                })
                .collect())
        }
    }

    struct FailingDetector;

    impl Detector for FailingDetector {
        fn name(&self) -> &str {
            "failing"
        }

        fn detect(&self, _ctx: &DetectionContext<'_>) -> Result<Vec<Anomaly>, DetectionError> {
            Err(DetectionError::Failed {
                detector: "failing".to_string(),
                reason: "unexpected payload".to_string(),
            })
        }
    }

    struct PanickingDetector;

    impl Detector for PanickingDetector {
        fn name(&self) -> &str {
            "panicking"
        }

        fn detect(&self, _ctx: &DetectionContext<'_>) -> Result<Vec<Anomaly>, DetectionError> {
            panic!("detector bug");
        }
    }

    fn with_context<F: FnOnce(&DetectionContext<'_>)>(f: F) {
        let store = MemoryStore::new();
        let config = DetectionConfig::default();
        let ctx = DetectionContext {
            tenant_id: "t-1",
            run_id: Uuid::new_v4(),
            now: Utc::now(),
            fresh: &[],
            store: &store,
            config: &config,
        };
        f(&ctx);
    }

    #[test]
    fn test_default_engine_registers_four_detectors() {
        assert_eq!(DetectorEngine::with_defaults().detector_count(), 4);
        assert_eq!(DetectorEngine::new().detector_count(), 0);
    }

    #[test]
    fn test_failing_detector_does_not_block_others() {
        let mut engine = DetectorEngine::new();
        engine.add_detector(Box::new(FailingDetector));
        engine.add_detector(Box::new(PanickingDetector));
        engine.add_detector(Box::new(FixedDetector {
            name: "fixed",
            keys: vec!["a", "b"],
        }));

        with_context(|ctx| {
            let outcome = engine.run(ctx);
            assert_eq!(outcome.anomalies.len(), 2);
            assert_eq!(outcome.failed, vec!["failing", "panicking"]);
        });
    }

    #[test]
    fn test_duplicate_keys_dropped_within_run() {
        let mut engine = DetectorEngine::new();
        engine.add_detector(Box::new(FixedDetector {
            name: "first",
            keys: vec!["shared", "only-first"],
        }));
        engine.add_detector(Box::new(FixedDetector {
            name: "second",
            keys: vec!["shared", "only-second"],
        }));

        with_context(|ctx| {
            let outcome = engine.run(ctx);
            assert_eq!(outcome.anomalies.len(), 3);
            assert_eq!(outcome.duplicates, 1);
        });
    }
}
