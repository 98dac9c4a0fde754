//! One tenant's run through the five pipeline stages
//!
//! Stages run strictly in order: aggregate, baseline, detect, score, prioritize.
//! Output committed by a stage is kept even if a later stage fails; the
//! processing watermark, the store-assigned ingest sequence of the last
//! observation read, only moves once every stage has finished.

use crate::baseline::{BaselineEstimator, RecomputeOutcome};
use crate::config::{Config, DetectionConfig};
use crate::detectors::{Anomaly, DetectionContext, DetectorEngine};
use crate::error::{PipelineError, StoreError};
use crate::events::{MetricKind, ObservationEvent, SubjectRef, TenantId, Timestamp};
use crate::issues::Prioritizer;
use crate::orchestrator::CancelToken;
use crate::risk::{RiskScore, RiskScorer};
use crate::state::CareMode;
use crate::store::CareStore;
use chrono::{Duration, Utc};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Pipeline stages in execution order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Aggregate,
    Baseline,
    Detect,
    Score,
    Prioritize,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Aggregate => "aggregate",
            Stage::Baseline => "baseline",
            Stage::Detect => "detect",
            Stage::Score => "score",
            Stage::Prioritize => "prioritize",
        }
    }
}

/// Lifecycle of a tenant's run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What started a run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Scheduled,
    Backlog,
    Manual,
}

/// Records written per stage
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageCounts {
    /// Unprocessed observations picked up by the run
    pub observations_aggregated: usize,
    /// Baselines replaced; skipped recomputes are not counted
    pub baselines_recomputed: usize,
    pub anomalies_detected: usize,
    pub risks_scored: usize,
    pub issues_created: usize,
}

/// Outcome of one run, kept for audit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunReport {
    /// Identifier stamped on every anomaly, risk score and issue the run writes
    pub run_id: Uuid,
    pub tenant_id: TenantId,
    pub trigger: TriggerKind,
    /// `Completed` or `Failed` once the run has ended
    pub state: RunState,
    /// Records written so far, including by a stage that later failed
    pub counts: StageCounts,
    pub started_at: Timestamp,
    pub finished_at: Option<Timestamp>,
    /// Set when a completed run had nothing to do
    pub skip_reason: Option<String>,
    /// Error message of a failed run
    pub failure: Option<String>,
    /// Stage a failed run stopped in
    pub failed_stage: Option<String>,
    /// Detectors that errored; their absence does not fail the run
    pub failed_detectors: Vec<String>,
}

impl RunReport {
    fn start(tenant_id: &str, trigger: TriggerKind, now: Timestamp) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            trigger,
            state: RunState::Running,
            counts: StageCounts::default(),
            started_at: now,
            finished_at: None,
            skip_reason: None,
            failure: None,
            failed_stage: None,
            failed_detectors: Vec::new(),
        }
    }

    /// Failed report for a run whose worker died before producing one
    pub fn aborted(
        tenant_id: &str,
        trigger: TriggerKind,
        started_at: Timestamp,
        reason: impl Into<String>,
    ) -> Self {
        let mut report = Self::start(tenant_id, trigger, started_at);
        report.state = RunState::Failed;
        report.failure = Some(reason.into());
        report.finished_at = Some(Utc::now());
        report
    }

    /// Wall-clock duration, if the run has finished
    pub fn duration(&self) -> Option<Duration> {
        self.finished_at.map(|end| end - self.started_at)
    }
}

/// The five-stage pipeline bound to a store and configuration
pub struct Pipeline {
    store: Arc<dyn CareStore>,
    estimator: BaselineEstimator,
    engine: DetectorEngine,
    scorer: RiskScorer,
    prioritizer: Prioritizer,
    detection: DetectionConfig,
}

impl Pipeline {
    /// Create a pipeline with the built-in detectors
    pub fn new(config: &Config, store: Arc<dyn CareStore>) -> Self {
        Self::with_engine(config, store, DetectorEngine::with_defaults())
    }

    /// Create a pipeline with a caller-supplied detector registry
    pub fn with_engine(config: &Config, store: Arc<dyn CareStore>, engine: DetectorEngine) -> Self {
        let recent_window = Duration::hours(config.detection.recent_window_hours);
        Self {
            store,
            estimator: BaselineEstimator::new(config.baseline.clone(), recent_window),
            engine,
            scorer: RiskScorer::new(config.scoring.clone()),
            prioritizer: Prioritizer::new(config.priority.clone()),
            detection: config.detection.clone(),
        }
    }

    pub fn store(&self) -> &Arc<dyn CareStore> {
        &self.store
    }

    /// Execute one run for a tenant and record its report
    ///
    /// Never returns an error: failures end the run in `RunState::Failed` and
    /// are described in the report.
    pub fn run(&self, tenant_id: &str, trigger: TriggerKind, cancel: &CancelToken) -> RunReport {
        let mut report = RunReport::start(tenant_id, trigger, Utc::now());
        info!(
            "Run {} started for tenant {} ({:?})",
            report.run_id, tenant_id, trigger
        );

        match self.execute(&mut report, cancel) {
            Ok(()) => {
                report.state = RunState::Completed;
                match &report.skip_reason {
                    Some(reason) => info!("Run {} for tenant {} skipped: {}", report.run_id, tenant_id, reason),
                    None => info!(
                        "Run {} for tenant {} completed: {} observations, {} baselines, {} anomalies, {} risks, {} issues",
                        report.run_id,
                        tenant_id,
                        report.counts.observations_aggregated,
                        report.counts.baselines_recomputed,
                        report.counts.anomalies_detected,
                        report.counts.risks_scored,
                        report.counts.issues_created
                    ),
                }
            }
            Err(e) => {
                error!("Run {} for tenant {} failed: {}", report.run_id, tenant_id, e);
                report.state = RunState::Failed;
                report.failed_stage = Some(e.stage().to_string());
                report.failure = Some(e.to_string());
            }
        }

        report.finished_at = Some(Utc::now());
        if let Err(e) = self.store.record_run(report.clone()) {
            error!("Failed to record run {}: {}", report.run_id, e);
        }
        report
    }

    fn execute(&self, report: &mut RunReport, cancel: &CancelToken) -> Result<(), PipelineError> {
        let tenant_id = report.tenant_id.clone();
        let now = report.started_at;
        let store = self.store.as_ref();

        let state = store
            .care_state(&tenant_id)
            .map_err(failed(Stage::Aggregate))?;
        if state.mode == CareMode::Paused {
            report.skip_reason = Some("tenant is paused".to_string());
            return Ok(());
        }

        let watermark = store.watermark(&tenant_id).map_err(failed(Stage::Aggregate))?;
        let fresh = store
            .observations_ingested_after(&tenant_id, watermark)
            .map_err(failed(Stage::Aggregate))?;
        report.counts.observations_aggregated = fresh.len();
        // Observations committed after this read get a higher sequence
        let Some(high_water) = fresh.iter().map(|e| e.ingest_seq).max() else {
            report.skip_reason = Some("no unprocessed observations".to_string());
            return Ok(());
        };

        checkpoint(cancel, Stage::Baseline)?;
        report.counts.baselines_recomputed =
            self.recompute_baselines(&tenant_id, &fresh, now, cancel)?;

        checkpoint(cancel, Stage::Detect)?;
        let anomalies = self.detect(report, &fresh, now)?;

        checkpoint(cancel, Stage::Score)?;
        let risks = self.score(report, &anomalies, now, cancel)?;

        checkpoint(cancel, Stage::Prioritize)?;
        self.prioritize(report, &risks, now, cancel)?;

        store
            .advance_watermark(&tenant_id, high_water)
            .map_err(failed(Stage::Aggregate))?;
        Ok(())
    }

    fn recompute_baselines(
        &self,
        tenant_id: &str,
        fresh: &[ObservationEvent],
        now: Timestamp,
        cancel: &CancelToken,
    ) -> Result<usize, PipelineError> {
        let pairs: BTreeSet<(SubjectRef, MetricKind)> = fresh
            .iter()
            .flat_map(|event| {
                event
                    .metrics()
                    .into_iter()
                    .map(move |(metric, _)| (event.subject.clone(), metric))
            })
            .collect();

        let mut replaced = 0;
        for (subject, metric) in pairs {
            checkpoint(cancel, Stage::Baseline)?;
            let outcome = self
                .estimator
                .recompute(self.store.as_ref(), tenant_id, &subject, metric, now)
                .map_err(failed(Stage::Baseline))?;
            if let RecomputeOutcome::Replaced(_) = outcome {
                replaced += 1;
            }
        }
        Ok(replaced)
    }

    fn detect(
        &self,
        report: &mut RunReport,
        fresh: &[ObservationEvent],
        now: Timestamp,
    ) -> Result<Vec<Anomaly>, PipelineError> {
        let ctx = DetectionContext {
            tenant_id: &report.tenant_id,
            run_id: report.run_id,
            now,
            fresh,
            store: self.store.as_ref(),
            config: &self.detection,
        };
        let outcome = self.engine.run(&ctx);
        if outcome.duplicates > 0 {
            debug!(
                "Run {} dropped {} duplicate anomalies",
                report.run_id, outcome.duplicates
            );
        }
        report.failed_detectors = outcome.failed;

        for anomaly in &outcome.anomalies {
            self.store
                .insert_anomaly(anomaly.clone())
                .map_err(failed(Stage::Detect))?;
            report.counts.anomalies_detected += 1;
        }
        Ok(outcome.anomalies)
    }

    fn score(
        &self,
        report: &mut RunReport,
        anomalies: &[Anomaly],
        now: Timestamp,
        cancel: &CancelToken,
    ) -> Result<Vec<RiskScore>, PipelineError> {
        let mut by_subject: BTreeMap<SubjectRef, Vec<Anomaly>> = BTreeMap::new();
        for anomaly in anomalies {
            match &anomaly.subject {
                Some(subject) => by_subject
                    .entry(subject.clone())
                    .or_default()
                    .push(anomaly.clone()),
                None => debug!("Anomaly {} has no subject, not scored", anomaly.id),
            }
        }

        let mut risks = Vec::new();
        for (subject, subject_anomalies) in by_subject {
            checkpoint(cancel, Stage::Score)?;
            let Some(risk) = self.scorer.score(
                &report.tenant_id,
                report.run_id,
                &subject,
                &subject_anomalies,
                now,
            ) else {
                continue;
            };
            self.store
                .insert_risk_score(risk.clone())
                .map_err(failed(Stage::Score))?;
            report.counts.risks_scored += 1;
            risks.push(risk);
        }
        Ok(risks)
    }

    fn prioritize(
        &self,
        report: &mut RunReport,
        risks: &[RiskScore],
        now: Timestamp,
        cancel: &CancelToken,
    ) -> Result<(), PipelineError> {
        for risk in risks {
            checkpoint(cancel, Stage::Prioritize)?;
            let issue = self.prioritizer.prioritize(risk, now);
            self.store
                .insert_issue(issue)
                .map_err(failed(Stage::Prioritize))?;
            report.counts.issues_created += 1;
        }
        Ok(())
    }
}

fn failed(stage: Stage) -> impl Fn(StoreError) -> PipelineError {
    move |source| PipelineError::StageFailed {
        stage: stage.as_str(),
        source,
    }
}

fn checkpoint(cancel: &CancelToken, stage: Stage) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled {
            stage: stage.as_str(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::{AnomalyType, Detector, DeviationDetector, PatternDetector};
    use crate::error::DetectionError;
    use crate::events::Severity;
    use crate::store::MemoryStore;
    use crate::test_support::{vitals_observation, FaultyStore};

    /// Ten readings averaging 120 over the past week, then one reading of 145
    fn seed_resident(store: &dyn CareStore) {
        let now = Utc::now();
        for i in 0..10 {
            let value = if i % 2 == 0 { 115.0 } else { 125.0 };
            let at = now - Duration::hours(48 + i * 12);
            store
                .insert_observation(vitals_observation("t-1", "r-1", &format!("v-{}", i), at, value))
                .unwrap();
        }
        store
            .insert_observation(vitals_observation(
                "t-1",
                "r-1",
                "v-new",
                now - Duration::minutes(10),
                145.0,
            ))
            .unwrap();
    }

    fn pipeline(store: Arc<dyn CareStore>) -> Pipeline {
        Pipeline::new(&Config::default(), store)
    }

    #[test]
    fn test_end_to_end_single_deviation() {
        let store = Arc::new(MemoryStore::new());
        seed_resident(store.as_ref());

        let report = pipeline(store.clone()).run("t-1", TriggerKind::Manual, &CancelToken::new());

        assert_eq!(report.state, RunState::Completed);
        assert_eq!(
            report.counts,
            StageCounts {
                observations_aggregated: 11,
                baselines_recomputed: 1,
                anomalies_detected: 1,
                risks_scored: 1,
                issues_created: 1,
            }
        );

        let anomalies = store.anomalies_for_run("t-1", report.run_id).unwrap();
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].anomaly_type, AnomalyType::Deviation);
        assert_eq!(anomalies[0].severity, Severity::High);
        let deviation = anomalies[0].deviation.unwrap();
        assert!(deviation > 4.5 && deviation < 5.0, "deviation {}", deviation);

        let risk = store
            .latest_risk_score("t-1", &SubjectRef::resident("r-1"))
            .unwrap()
            .unwrap();
        assert_eq!(risk.score, 30.0);
        assert_eq!(risk.level, Severity::Low);
        assert_eq!(risk.contributing_anomalies, vec![anomalies[0].id]);

        let issues = store.issues_for_tenant("t-1").unwrap();
        assert_eq!(issues.len(), 1);
        assert!((issues[0].priority_score - 20.4).abs() < 1e-9);
        assert_eq!(issues[0].risk_score_id, risk.id);
    }

    #[test]
    fn test_completed_run_advances_watermark() {
        let store = Arc::new(MemoryStore::new());
        seed_resident(store.as_ref());
        let pipeline = pipeline(store.clone());

        pipeline.run("t-1", TriggerKind::Scheduled, &CancelToken::new());
        assert!(store.watermark("t-1").unwrap().is_some());

        let second = pipeline.run("t-1", TriggerKind::Scheduled, &CancelToken::new());
        assert_eq!(second.state, RunState::Completed);
        assert_eq!(second.counts, StageCounts::default());
        assert!(second.skip_reason.is_some());
        assert_eq!(store.issues_for_tenant("t-1").unwrap().len(), 1);
        assert_eq!(store.runs_for_tenant("t-1").unwrap().len(), 2);
    }

    #[test]
    fn test_prioritizer_failure_keeps_risk_score() {
        let store = Arc::new(FaultyStore {
            fail_issue_inserts: true,
            ..FaultyStore::default()
        });
        seed_resident(store.as_ref());

        let report = pipeline(store.clone()).run("t-1", TriggerKind::Manual, &CancelToken::new());

        assert_eq!(report.state, RunState::Failed);
        assert_eq!(report.failed_stage.as_deref(), Some("prioritize"));
        assert_eq!(report.counts.risks_scored, 1);
        assert_eq!(report.counts.issues_created, 0);
        assert!(store
            .latest_risk_score("t-1", &SubjectRef::resident("r-1"))
            .unwrap()
            .is_some());
        assert_eq!(store.anomalies_for_run("t-1", report.run_id).unwrap().len(), 1);
        // Failed runs leave the observations for the next cycle
        assert!(store.watermark("t-1").unwrap().is_none());
    }

    #[test]
    fn test_paused_tenant_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        seed_resident(store.as_ref());
        store
            .update_care_state("t-1", 0, CareMode::Paused, "director", Utc::now())
            .unwrap();

        let report = pipeline(store.clone()).run("t-1", TriggerKind::Backlog, &CancelToken::new());

        assert_eq!(report.state, RunState::Completed);
        assert_eq!(report.skip_reason.as_deref(), Some("tenant is paused"));
        assert_eq!(report.counts, StageCounts::default());
        assert!(store.watermark("t-1").unwrap().is_none());
    }

    #[test]
    fn test_cancelled_run_stops_between_stages() {
        let store = Arc::new(MemoryStore::new());
        seed_resident(store.as_ref());
        let cancel = CancelToken::new();
        cancel.cancel();

        let report = pipeline(store.clone()).run("t-1", TriggerKind::Manual, &cancel);

        assert_eq!(report.state, RunState::Failed);
        assert_eq!(report.failed_stage.as_deref(), Some("baseline"));
        assert_eq!(report.counts.observations_aggregated, 11);
        assert_eq!(report.counts.anomalies_detected, 0);
        assert!(store.issues_for_tenant("t-1").unwrap().is_empty());
    }

    #[test]
    fn test_observation_committed_late_is_picked_up_next_run() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        for i in 0..10 {
            let value = if i % 2 == 0 { 115.0 } else { 125.0 };
            let at = now - Duration::hours(48 + i * 12);
            store
                .insert_observation(vitals_observation("t-1", "r-1", &format!("v-{}", i), at, value))
                .unwrap();
        }
        // Stamped before the other reading but committed after the first run
        let mut slow = vitals_observation("t-1", "r-1", "v-slow", now - Duration::minutes(5), 160.0);
        slow.ingested_at = now - Duration::seconds(30);
        store
            .insert_observation(vitals_observation(
                "t-1",
                "r-2",
                "v-other",
                now - Duration::minutes(5),
                120.0,
            ))
            .unwrap();
        let pipeline = pipeline(store.clone());

        let first = pipeline.run("t-1", TriggerKind::Scheduled, &CancelToken::new());
        assert_eq!(first.counts.observations_aggregated, 11);
        assert_eq!(first.counts.anomalies_detected, 0);

        store.insert_observation(slow).unwrap();
        assert_eq!(
            store
                .unprocessed_count("t-1", now - Duration::hours(1))
                .unwrap(),
            1
        );

        let second = pipeline.run("t-1", TriggerKind::Backlog, &CancelToken::new());
        assert_eq!(second.state, RunState::Completed);
        assert!(second.skip_reason.is_none());
        assert_eq!(second.counts.observations_aggregated, 1);
        assert_eq!(second.counts.anomalies_detected, 1);
        let anomalies = store.anomalies_for_run("t-1", second.run_id).unwrap();
        assert_eq!(anomalies[0].severity, Severity::High);
    }

    struct BrokenDetector;

    impl Detector for BrokenDetector {
        fn name(&self) -> &str {
            "BrokenDetector"
        }

        fn detect(&self, _ctx: &DetectionContext<'_>) -> Result<Vec<Anomaly>, DetectionError> {
            Err(DetectionError::Failed {
                detector: "BrokenDetector".to_string(),
                reason: "bad data".to_string(),
            })
        }
    }

    #[test]
    fn test_detector_failure_does_not_fail_run() {
        let store = Arc::new(MemoryStore::new());
        seed_resident(store.as_ref());
        let mut engine = DetectorEngine::new();
        engine.add_detector(Box::new(BrokenDetector));
        engine.add_detector(Box::new(DeviationDetector));
        engine.add_detector(Box::new(PatternDetector));

        let report = Pipeline::with_engine(&Config::default(), store.clone(), engine).run(
            "t-1",
            TriggerKind::Manual,
            &CancelToken::new(),
        );

        assert_eq!(report.state, RunState::Completed);
        assert_eq!(report.failed_detectors, vec!["BrokenDetector".to_string()]);
        assert_eq!(report.counts.anomalies_detected, 1);
    }
}
