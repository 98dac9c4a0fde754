//! Shared fixtures for unit tests

use crate::baseline::{Baseline, WindowStats};
use crate::detectors::{Anomaly, AnomalyStatus};
use crate::error::StoreError;
use crate::events::{
    Measurement, MetricKind, ObservationEvent, SourceKind, SourceRef, SubjectRef, Timestamp,
    EVIDENCE_KEY, STAFFING, TASK_COMPLETION, VITALS,
};
use crate::issues::{IssueStatus, PrioritizedIssue};
use crate::orchestrator::RunReport;
use crate::risk::{RiskCategory, RiskScore};
use crate::state::{CareMode, CareState};
use crate::store::{CareStore, MemoryStore};
use chrono::Utc;
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

fn observation(
    tenant_id: &str,
    subject: SubjectRef,
    event_type: &str,
    subtype: Option<&str>,
    source: SourceRef,
    at: Timestamp,
    payload: BTreeMap<String, Measurement>,
) -> ObservationEvent {
    ObservationEvent {
        id: Uuid::new_v4(),
        tenant_id: tenant_id.to_string(),
        subject,
        event_type: event_type.to_string(),
        event_subtype: subtype.map(str::to_string),
        timestamp: at,
        ingested_at: Utc::now(),
        ingest_seq: 0,
        payload,
        quality_score: 100,
        source,
    }
}

/// Vitals observation carrying only a systolic reading
pub fn vitals_observation(
    tenant_id: &str,
    resident_id: &str,
    source_id: &str,
    at: Timestamp,
    systolic: f64,
) -> ObservationEvent {
    let mut payload = BTreeMap::new();
    payload.insert(
        MetricKind::BloodPressureSystolic.key().to_string(),
        Measurement::Numeric(systolic),
    );
    observation(
        tenant_id,
        SubjectRef::resident(resident_id),
        VITALS,
        None,
        SourceRef {
            kind: SourceKind::Vitals,
            id: source_id.to_string(),
        },
        at,
        payload,
    )
}

pub fn task_observation(
    tenant_id: &str,
    caregiver_id: &str,
    source_id: &str,
    at: Timestamp,
    duration_minutes: f64,
    lateness_minutes: f64,
    evidence: bool,
) -> ObservationEvent {
    let mut payload = BTreeMap::new();
    payload.insert(
        MetricKind::TaskDurationMinutes.key().to_string(),
        Measurement::Numeric(duration_minutes),
    );
    payload.insert(
        MetricKind::TaskLatenessMinutes.key().to_string(),
        Measurement::Numeric(lateness_minutes),
    );
    payload.insert(
        EVIDENCE_KEY.to_string(),
        Measurement::Categorical(if evidence { "present" } else { "missing" }.to_string()),
    );
    observation(
        tenant_id,
        SubjectRef::caregiver(caregiver_id),
        TASK_COMPLETION,
        Some("medication"),
        SourceRef {
            kind: SourceKind::TaskCompletion,
            id: source_id.to_string(),
        },
        at,
        payload,
    )
}

pub fn staffing_observation(
    tenant_id: &str,
    caregiver_id: &str,
    source_id: &str,
    at: Timestamp,
    action: &str,
) -> ObservationEvent {
    let mut payload = BTreeMap::new();
    payload.insert(
        "action".to_string(),
        Measurement::Categorical(action.to_string()),
    );
    observation(
        tenant_id,
        SubjectRef::caregiver(caregiver_id),
        STAFFING,
        Some(action),
        SourceRef {
            kind: SourceKind::StaffingAction,
            id: source_id.to_string(),
        },
        at,
        payload,
    )
}

/// Baseline whose short and long windows share the same statistics
pub fn baseline_with(
    tenant_id: &str,
    subject: SubjectRef,
    metric: MetricKind,
    stats: WindowStats,
) -> Baseline {
    Baseline {
        tenant_id: tenant_id.to_string(),
        subject,
        metric,
        short_window: stats,
        long_window: stats,
        sample_count: stats.sample_count,
        confidence: 0.7,
        computed_at: Utc::now(),
    }
}

/// A `New` resident issue with the given priority score
pub fn sample_issue(tenant_id: &str, priority_score: f64) -> PrioritizedIssue {
    PrioritizedIssue {
        id: Uuid::new_v4(),
        tenant_id: tenant_id.to_string(),
        subject: SubjectRef::resident("r-1"),
        issue_type: "resident_health_risk".to_string(),
        category: RiskCategory::ResidentHealth,
        title: "Resident r-1: low health risk".to_string(),
        description: "test issue".to_string(),
        urgency: 80.0,
        severity: 30.0,
        confidence: 0.85,
        priority_score,
        risk_score_id: Uuid::new_v4(),
        anomaly_ids: vec![Uuid::new_v4()],
        suggested_actions: Vec::new(),
        status: IssueStatus::New,
        created_at: Utc::now(),
        assigned_to: None,
        assigned_at: None,
        acknowledged_by: None,
        acknowledged_at: None,
        resolved_by: None,
        resolved_at: None,
        resolution_notes: None,
        version: 0,
    }
}

/// `MemoryStore` wrapper that can fail issue writes, stall reads or panic
#[derive(Default)]
pub struct FaultyStore {
    pub inner: MemoryStore,
    pub fail_issue_inserts: bool,
    /// Sleep applied to every unprocessed-observation read
    pub read_delay: Option<Duration>,
    /// Panic on every unprocessed-observation read
    pub panic_on_read: bool,
}

impl CareStore for FaultyStore {
    fn insert_observation(&self, event: ObservationEvent) -> Result<ObservationEvent, StoreError> {
        self.inner.insert_observation(event)
    }

    fn find_by_source(&self, source: &SourceRef) -> Result<Option<ObservationEvent>, StoreError> {
        self.inner.find_by_source(source)
    }

    fn observations_ingested_after(
        &self,
        tenant_id: &str,
        after: Option<u64>,
    ) -> Result<Vec<ObservationEvent>, StoreError> {
        if let Some(delay) = self.read_delay {
            std::thread::sleep(delay);
        }
        if self.panic_on_read {
            panic!("observation table corrupted");
        }
        self.inner.observations_ingested_after(tenant_id, after)
    }

    fn observations_for_subject(
        &self,
        tenant_id: &str,
        subject: &SubjectRef,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<Vec<ObservationEvent>, StoreError> {
        self.inner.observations_for_subject(tenant_id, subject, from, to)
    }

    fn watermark(&self, tenant_id: &str) -> Result<Option<u64>, StoreError> {
        self.inner.watermark(tenant_id)
    }

    fn advance_watermark(&self, tenant_id: &str, to: u64) -> Result<(), StoreError> {
        self.inner.advance_watermark(tenant_id, to)
    }

    fn unprocessed_count(&self, tenant_id: &str, since: Timestamp) -> Result<usize, StoreError> {
        self.inner.unprocessed_count(tenant_id, since)
    }

    fn baseline(
        &self,
        tenant_id: &str,
        subject: &SubjectRef,
        metric: MetricKind,
    ) -> Result<Option<Baseline>, StoreError> {
        self.inner.baseline(tenant_id, subject, metric)
    }

    fn replace_baseline(&self, baseline: Baseline) -> Result<(), StoreError> {
        self.inner.replace_baseline(baseline)
    }

    fn insert_anomaly(&self, anomaly: Anomaly) -> Result<(), StoreError> {
        self.inner.insert_anomaly(anomaly)
    }

    fn anomaly(&self, id: Uuid) -> Result<Option<Anomaly>, StoreError> {
        self.inner.anomaly(id)
    }

    fn update_anomaly(
        &self,
        anomaly: Anomaly,
        expected_status: AnomalyStatus,
    ) -> Result<(), StoreError> {
        self.inner.update_anomaly(anomaly, expected_status)
    }

    fn anomalies_for_run(&self, tenant_id: &str, run_id: Uuid) -> Result<Vec<Anomaly>, StoreError> {
        self.inner.anomalies_for_run(tenant_id, run_id)
    }

    fn insert_risk_score(&self, score: RiskScore) -> Result<(), StoreError> {
        self.inner.insert_risk_score(score)
    }

    fn latest_risk_score(
        &self,
        tenant_id: &str,
        subject: &SubjectRef,
    ) -> Result<Option<RiskScore>, StoreError> {
        self.inner.latest_risk_score(tenant_id, subject)
    }

    fn risk_history(
        &self,
        tenant_id: &str,
        subject: &SubjectRef,
    ) -> Result<Vec<RiskScore>, StoreError> {
        self.inner.risk_history(tenant_id, subject)
    }

    fn insert_issue(&self, issue: PrioritizedIssue) -> Result<(), StoreError> {
        if self.fail_issue_inserts {
            return Err(StoreError::Backend("issue table unavailable".to_string()));
        }
        self.inner.insert_issue(issue)
    }

    fn issue(&self, id: Uuid) -> Result<Option<PrioritizedIssue>, StoreError> {
        self.inner.issue(id)
    }

    fn update_issue(
        &self,
        issue: PrioritizedIssue,
        expected_version: u64,
    ) -> Result<PrioritizedIssue, StoreError> {
        self.inner.update_issue(issue, expected_version)
    }

    fn issues_for_tenant(&self, tenant_id: &str) -> Result<Vec<PrioritizedIssue>, StoreError> {
        self.inner.issues_for_tenant(tenant_id)
    }

    fn care_state(&self, tenant_id: &str) -> Result<CareState, StoreError> {
        self.inner.care_state(tenant_id)
    }

    fn update_care_state(
        &self,
        tenant_id: &str,
        expected_version: u64,
        mode: CareMode,
        actor: &str,
        now: Timestamp,
    ) -> Result<CareState, StoreError> {
        self.inner
            .update_care_state(tenant_id, expected_version, mode, actor, now)
    }

    fn record_run(&self, report: RunReport) -> Result<(), StoreError> {
        self.inner.record_run(report)
    }

    fn runs_for_tenant(&self, tenant_id: &str) -> Result<Vec<RunReport>, StoreError> {
        self.inner.runs_for_tenant(tenant_id)
    }
}
