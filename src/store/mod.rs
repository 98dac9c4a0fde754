//! Persistence seam for the pipeline
//!
//! The pipeline only talks to storage through `CareStore`. Methods are synchronous;
//! the orchestrator runs them on blocking worker threads.

pub mod memory;

pub use memory::MemoryStore;

use crate::baseline::Baseline;
use crate::detectors::{Anomaly, AnomalyStatus};
use crate::error::StoreError;
use crate::events::{MetricKind, ObservationEvent, SourceRef, SubjectRef, Timestamp};
use crate::issues::PrioritizedIssue;
use crate::orchestrator::RunReport;
use crate::risk::RiskScore;
use crate::state::{CareMode, CareState};
use uuid::Uuid;

/// Storage operations used by the care signal pipeline
pub trait CareStore: Send + Sync {
    /// Insert a new observation and return the stored copy
    ///
    /// The store assigns `ingest_seq` while holding its write lock, so sequence
    /// order is commit order. Fails with `StoreError::Duplicate` if one already
    /// exists for the same source.
    fn insert_observation(&self, event: ObservationEvent) -> Result<ObservationEvent, StoreError>;

    fn find_by_source(&self, source: &SourceRef) -> Result<Option<ObservationEvent>, StoreError>;

    /// Observations with `ingest_seq` strictly above `after` (all of them when `None`)
    fn observations_ingested_after(
        &self,
        tenant_id: &str,
        after: Option<u64>,
    ) -> Result<Vec<ObservationEvent>, StoreError>;

    /// A subject's observations with `from <= timestamp < to`, oldest first
    fn observations_for_subject(
        &self,
        tenant_id: &str,
        subject: &SubjectRef,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<Vec<ObservationEvent>, StoreError>;

    /// Highest ingest sequence covered by a completed run
    fn watermark(&self, tenant_id: &str) -> Result<Option<u64>, StoreError>;

    /// Move the watermark forward; never moves it backwards
    fn advance_watermark(&self, tenant_id: &str, to: u64) -> Result<(), StoreError>;

    /// Observations past the watermark that were ingested at or after `since`
    fn unprocessed_count(&self, tenant_id: &str, since: Timestamp) -> Result<usize, StoreError>;

    fn baseline(
        &self,
        tenant_id: &str,
        subject: &SubjectRef,
        metric: MetricKind,
    ) -> Result<Option<Baseline>, StoreError>;

    /// Replace the baseline for its (tenant, subject, metric) wholesale
    fn replace_baseline(&self, baseline: Baseline) -> Result<(), StoreError>;

    fn insert_anomaly(&self, anomaly: Anomaly) -> Result<(), StoreError>;

    fn anomaly(&self, id: Uuid) -> Result<Option<Anomaly>, StoreError>;

    /// Overwrite an anomaly if its stored status is still `expected_status`
    ///
    /// Fails with `StoreError::StatusConflict` if another reviewer got there first.
    fn update_anomaly(
        &self,
        anomaly: Anomaly,
        expected_status: AnomalyStatus,
    ) -> Result<(), StoreError>;

    fn anomalies_for_run(&self, tenant_id: &str, run_id: Uuid) -> Result<Vec<Anomaly>, StoreError>;

    fn insert_risk_score(&self, score: RiskScore) -> Result<(), StoreError>;

    fn latest_risk_score(
        &self,
        tenant_id: &str,
        subject: &SubjectRef,
    ) -> Result<Option<RiskScore>, StoreError>;

    /// All risk scores for a subject, oldest first
    fn risk_history(
        &self,
        tenant_id: &str,
        subject: &SubjectRef,
    ) -> Result<Vec<RiskScore>, StoreError>;

    fn insert_issue(&self, issue: PrioritizedIssue) -> Result<(), StoreError>;

    fn issue(&self, id: Uuid) -> Result<Option<PrioritizedIssue>, StoreError>;

    /// Compare-and-swap update of an issue
    ///
    /// Stores `issue` with its version bumped past `expected_version` and returns
    /// the stored copy. Fails with `StoreError::VersionConflict` if the stored
    /// version has moved on.
    fn update_issue(
        &self,
        issue: PrioritizedIssue,
        expected_version: u64,
    ) -> Result<PrioritizedIssue, StoreError>;

    fn issues_for_tenant(&self, tenant_id: &str) -> Result<Vec<PrioritizedIssue>, StoreError>;

    /// Current care state; tenants never written return `CareState::initial`
    fn care_state(&self, tenant_id: &str) -> Result<CareState, StoreError>;

    /// Compare-and-swap update of the care state
    ///
    /// Fails with `StoreError::VersionConflict` if `expected_version` is stale.
    fn update_care_state(
        &self,
        tenant_id: &str,
        expected_version: u64,
        mode: CareMode,
        actor: &str,
        now: Timestamp,
    ) -> Result<CareState, StoreError>;

    fn record_run(&self, report: RunReport) -> Result<(), StoreError>;

    fn runs_for_tenant(&self, tenant_id: &str) -> Result<Vec<RunReport>, StoreError>;
}
