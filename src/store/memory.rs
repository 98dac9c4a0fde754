use crate::baseline::Baseline;
use crate::detectors::{Anomaly, AnomalyStatus};
use crate::error::StoreError;
use crate::events::{MetricKind, ObservationEvent, SourceRef, SubjectRef, TenantId, Timestamp};
use crate::issues::PrioritizedIssue;
use crate::orchestrator::RunReport;
use crate::risk::RiskScore;
use crate::state::{CareMode, CareState};
use crate::store::CareStore;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

#[derive(Default)]
struct ObservationTable {
    events: Vec<ObservationEvent>,
    sources: HashSet<SourceRef>,
    /// Last assigned ingest sequence
    last_seq: u64,
}

type BaselineKey = (TenantId, SubjectRef, MetricKind);

/// In-memory `CareStore` adapter
///
/// Observations and baselines sit behind read-write locks so concurrent readers
/// across tenants never block each other.
#[derive(Default)]
pub struct MemoryStore {
    observations: RwLock<ObservationTable>,
    watermarks: RwLock<HashMap<TenantId, u64>>,
    baselines: RwLock<HashMap<BaselineKey, Baseline>>,
    anomalies: RwLock<Vec<Anomaly>>,
    risk_scores: RwLock<Vec<RiskScore>>,
    issues: RwLock<Vec<PrioritizedIssue>>,
    states: Mutex<HashMap<TenantId, CareState>>,
    runs: Mutex<Vec<RunReport>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total observations stored across all tenants
    pub fn observation_count(&self) -> usize {
        read(&self.observations)
            .map(|table| table.events.len())
            .unwrap_or(0)
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>, StoreError> {
    lock.read()
        .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>, StoreError> {
    lock.write()
        .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StoreError> {
    mutex
        .lock()
        .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
}

impl CareStore for MemoryStore {
    fn insert_observation(
        &self,
        mut event: ObservationEvent,
    ) -> Result<ObservationEvent, StoreError> {
        let mut table = write(&self.observations)?;
        if !table.sources.insert(event.source.clone()) {
            return Err(StoreError::Duplicate(format!(
                "{}/{}",
                event.source.kind.as_str(),
                event.source.id
            )));
        }
        table.last_seq += 1;
        event.ingest_seq = table.last_seq;
        table.events.push(event.clone());
        Ok(event)
    }

    fn find_by_source(&self, source: &SourceRef) -> Result<Option<ObservationEvent>, StoreError> {
        let table = read(&self.observations)?;
        if !table.sources.contains(source) {
            return Ok(None);
        }
        Ok(table.events.iter().find(|e| &e.source == source).cloned())
    }

    fn observations_ingested_after(
        &self,
        tenant_id: &str,
        after: Option<u64>,
    ) -> Result<Vec<ObservationEvent>, StoreError> {
        let table = read(&self.observations)?;
        Ok(table
            .events
            .iter()
            .filter(|e| e.tenant_id == tenant_id && after.map_or(true, |w| e.ingest_seq > w))
            .cloned()
            .collect())
    }

    fn observations_for_subject(
        &self,
        tenant_id: &str,
        subject: &SubjectRef,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<Vec<ObservationEvent>, StoreError> {
        let table = read(&self.observations)?;
        let mut events: Vec<ObservationEvent> = table
            .events
            .iter()
            .filter(|e| {
                e.tenant_id == tenant_id
                    && &e.subject == subject
                    && e.timestamp >= from
                    && e.timestamp < to
            })
            .cloned()
            .collect();
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }

    fn watermark(&self, tenant_id: &str) -> Result<Option<u64>, StoreError> {
        Ok(read(&self.watermarks)?.get(tenant_id).copied())
    }

    fn advance_watermark(&self, tenant_id: &str, to: u64) -> Result<(), StoreError> {
        let mut watermarks = write(&self.watermarks)?;
        let entry = watermarks.entry(tenant_id.to_string()).or_insert(to);
        if to > *entry {
            *entry = to;
        }
        Ok(())
    }

    fn unprocessed_count(&self, tenant_id: &str, since: Timestamp) -> Result<usize, StoreError> {
        let watermark = self.watermark(tenant_id)?;
        let table = read(&self.observations)?;
        Ok(table
            .events
            .iter()
            .filter(|e| {
                e.tenant_id == tenant_id
                    && e.ingested_at >= since
                    && watermark.map_or(true, |w| e.ingest_seq > w)
            })
            .count())
    }

    fn baseline(
        &self,
        tenant_id: &str,
        subject: &SubjectRef,
        metric: MetricKind,
    ) -> Result<Option<Baseline>, StoreError> {
        let key = (tenant_id.to_string(), subject.clone(), metric);
        Ok(read(&self.baselines)?.get(&key).cloned())
    }

    fn replace_baseline(&self, baseline: Baseline) -> Result<(), StoreError> {
        let key = (
            baseline.tenant_id.clone(),
            baseline.subject.clone(),
            baseline.metric,
        );
        write(&self.baselines)?.insert(key, baseline);
        Ok(())
    }

    fn insert_anomaly(&self, anomaly: Anomaly) -> Result<(), StoreError> {
        let mut anomalies = write(&self.anomalies)?;
        if anomalies.iter().any(|a| a.id == anomaly.id) {
            return Err(StoreError::Duplicate(anomaly.id.to_string()));
        }
        anomalies.push(anomaly);
        Ok(())
    }

    fn anomaly(&self, id: Uuid) -> Result<Option<Anomaly>, StoreError> {
        Ok(read(&self.anomalies)?.iter().find(|a| a.id == id).cloned())
    }

    fn update_anomaly(
        &self,
        anomaly: Anomaly,
        expected_status: AnomalyStatus,
    ) -> Result<(), StoreError> {
        let mut anomalies = write(&self.anomalies)?;
        let slot = anomalies
            .iter_mut()
            .find(|a| a.id == anomaly.id)
            .ok_or_else(|| StoreError::NotFound(anomaly.id.to_string()))?;
        if slot.status != expected_status {
            return Err(StoreError::StatusConflict {
                expected: expected_status.to_string(),
                actual: slot.status.to_string(),
            });
        }
        *slot = anomaly;
        Ok(())
    }

    fn anomalies_for_run(&self, tenant_id: &str, run_id: Uuid) -> Result<Vec<Anomaly>, StoreError> {
        Ok(read(&self.anomalies)?
            .iter()
            .filter(|a| a.tenant_id == tenant_id && a.run_id == run_id)
            .cloned()
            .collect())
    }

    fn insert_risk_score(&self, score: RiskScore) -> Result<(), StoreError> {
        write(&self.risk_scores)?.push(score);
        Ok(())
    }

    fn latest_risk_score(
        &self,
        tenant_id: &str,
        subject: &SubjectRef,
    ) -> Result<Option<RiskScore>, StoreError> {
        Ok(read(&self.risk_scores)?
            .iter()
            .rev()
            .find(|r| r.tenant_id == tenant_id && &r.subject == subject)
            .cloned())
    }

    fn risk_history(
        &self,
        tenant_id: &str,
        subject: &SubjectRef,
    ) -> Result<Vec<RiskScore>, StoreError> {
        Ok(read(&self.risk_scores)?
            .iter()
            .filter(|r| r.tenant_id == tenant_id && &r.subject == subject)
            .cloned()
            .collect())
    }

    fn insert_issue(&self, issue: PrioritizedIssue) -> Result<(), StoreError> {
        let mut issues = write(&self.issues)?;
        if issues.iter().any(|i| i.id == issue.id) {
            return Err(StoreError::Duplicate(issue.id.to_string()));
        }
        issues.push(issue);
        Ok(())
    }

    fn issue(&self, id: Uuid) -> Result<Option<PrioritizedIssue>, StoreError> {
        Ok(read(&self.issues)?.iter().find(|i| i.id == id).cloned())
    }

    fn update_issue(
        &self,
        mut issue: PrioritizedIssue,
        expected_version: u64,
    ) -> Result<PrioritizedIssue, StoreError> {
        let mut issues = write(&self.issues)?;
        let slot = issues
            .iter_mut()
            .find(|i| i.id == issue.id)
            .ok_or_else(|| StoreError::NotFound(issue.id.to_string()))?;
        if slot.version != expected_version {
            return Err(StoreError::VersionConflict {
                expected: expected_version,
                actual: slot.version,
            });
        }
        issue.version = expected_version + 1;
        *slot = issue.clone();
        Ok(issue)
    }

    fn issues_for_tenant(&self, tenant_id: &str) -> Result<Vec<PrioritizedIssue>, StoreError> {
        Ok(read(&self.issues)?
            .iter()
            .filter(|i| i.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    fn care_state(&self, tenant_id: &str) -> Result<CareState, StoreError> {
        Ok(lock(&self.states)?
            .get(tenant_id)
            .cloned()
            .unwrap_or_else(|| CareState::initial(tenant_id)))
    }

    fn update_care_state(
        &self,
        tenant_id: &str,
        expected_version: u64,
        mode: CareMode,
        actor: &str,
        now: Timestamp,
    ) -> Result<CareState, StoreError> {
        let mut states = lock(&self.states)?;
        let current = states
            .get(tenant_id)
            .cloned()
            .unwrap_or_else(|| CareState::initial(tenant_id));
        if current.version != expected_version {
            return Err(StoreError::VersionConflict {
                expected: expected_version,
                actual: current.version,
            });
        }

        let next = current.next(mode, actor, now);
        states.insert(tenant_id.to_string(), next.clone());
        Ok(next)
    }

    fn record_run(&self, report: RunReport) -> Result<(), StoreError> {
        lock(&self.runs)?.push(report);
        Ok(())
    }

    fn runs_for_tenant(&self, tenant_id: &str) -> Result<Vec<RunReport>, StoreError> {
        Ok(lock(&self.runs)?
            .iter()
            .filter(|r| r.tenant_id == tenant_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issues::IssueStatus;
    use crate::test_support::{sample_issue, vitals_observation};
    use chrono::{Duration, Utc};

    #[test]
    fn test_duplicate_source_rejected() {
        let store = MemoryStore::new();
        let obs = vitals_observation("t-1", "r-1", "v-1", Utc::now(), 120.0);
        let obs = store.insert_observation(obs).unwrap();

        let mut again = obs.clone();
        again.id = Uuid::new_v4();
        assert!(matches!(
            store.insert_observation(again),
            Err(StoreError::Duplicate(_))
        ));
        assert_eq!(store.observation_count(), 1);
        assert_eq!(store.find_by_source(&obs.source).unwrap(), Some(obs));
    }

    #[test]
    fn test_subject_range_is_half_open_and_sorted() {
        let store = MemoryStore::new();
        let now = Utc::now();
        for (i, hours) in [3, 1, 2, 5].iter().enumerate() {
            let obs = vitals_observation(
                "t-1",
                "r-1",
                &format!("v-{}", i),
                now - Duration::hours(*hours),
                120.0,
            );
            store.insert_observation(obs).unwrap();
        }

        let events = store
            .observations_for_subject(
                "t-1",
                &SubjectRef::resident("r-1"),
                now - Duration::hours(3),
                now - Duration::hours(1),
            )
            .unwrap();
        assert_eq!(events.len(), 2);
        assert!(events[0].timestamp < events[1].timestamp);
    }

    #[test]
    fn test_insert_assigns_increasing_sequence() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let first = store
            .insert_observation(vitals_observation("t-1", "r-1", "v-1", now, 120.0))
            .unwrap();
        let second = store
            .insert_observation(vitals_observation("t-2", "r-9", "v-2", now, 121.0))
            .unwrap();
        assert_eq!(first.ingest_seq, 1);
        assert_eq!(second.ingest_seq, 2);
        assert_eq!(store.find_by_source(&first.source).unwrap(), Some(first));
    }

    #[test]
    fn test_watermark_gates_unprocessed_count() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let mut first = vitals_observation("t-1", "r-1", "v-1", now, 120.0);
        first.ingested_at = now - Duration::minutes(10);
        let mut second = vitals_observation("t-1", "r-1", "v-2", now, 121.0);
        second.ingested_at = now - Duration::minutes(5);
        let first = store.insert_observation(first).unwrap();
        store.insert_observation(second).unwrap();

        let since = now - Duration::hours(1);
        assert_eq!(store.unprocessed_count("t-1", since).unwrap(), 2);

        store.advance_watermark("t-1", first.ingest_seq).unwrap();
        assert_eq!(store.unprocessed_count("t-1", since).unwrap(), 1);
        assert_eq!(
            store
                .observations_ingested_after("t-1", store.watermark("t-1").unwrap())
                .unwrap()
                .len(),
            1
        );

        // Never moves backwards
        store.advance_watermark("t-1", 0).unwrap();
        assert_eq!(store.watermark("t-1").unwrap(), Some(first.ingest_seq));
        assert_eq!(store.unprocessed_count("t-2", since).unwrap(), 0);
    }

    #[test]
    fn test_late_commit_with_earlier_stamp_stays_unprocessed() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let mut slow = vitals_observation("t-1", "r-1", "v-slow", now, 160.0);
        slow.ingested_at = now - Duration::seconds(2);
        let fast = store
            .insert_observation(vitals_observation("t-1", "r-1", "v-fast", now, 120.0))
            .unwrap();
        store.advance_watermark("t-1", fast.ingest_seq).unwrap();

        store.insert_observation(slow).unwrap();

        let pending = store
            .observations_ingested_after("t-1", store.watermark("t-1").unwrap())
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].source.id, "v-slow");
        assert_eq!(
            store
                .unprocessed_count("t-1", now - Duration::hours(1))
                .unwrap(),
            1
        );
    }

    #[test]
    fn test_care_state_compare_and_swap() {
        let store = MemoryStore::new();
        let now = Utc::now();

        let state = store.care_state("t-1").unwrap();
        assert_eq!(state.version, 0);

        let updated = store
            .update_care_state("t-1", 0, CareMode::Emergency, "director", now)
            .unwrap();
        assert_eq!(updated.version, 1);

        let stale = store.update_care_state("t-1", 0, CareMode::Paused, "other", now);
        assert_eq!(
            stale,
            Err(StoreError::VersionConflict {
                expected: 0,
                actual: 1
            })
        );
        assert_eq!(store.care_state("t-1").unwrap().mode, CareMode::Emergency);
    }

    #[test]
    fn test_update_missing_issue_is_not_found() {
        let store = MemoryStore::new();
        let issue = sample_issue("t-1", 10.0);
        assert!(matches!(
            store.update_issue(issue, 0),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_stale_issue_update_is_rejected() {
        let store = MemoryStore::new();
        let issue = sample_issue("t-1", 10.0);
        store.insert_issue(issue.clone()).unwrap();

        // Two reviewers read the same copy
        let mut resolved = issue.clone();
        resolved.status = IssueStatus::Resolved;
        resolved.resolved_by = Some("nurse-1".to_string());
        let mut dismissed = issue.clone();
        dismissed.status = IssueStatus::Dismissed;

        let stored = store.update_issue(resolved, issue.version).unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(
            store.update_issue(dismissed, issue.version),
            Err(StoreError::VersionConflict {
                expected: 0,
                actual: 1
            })
        );

        let current = store.issue(issue.id).unwrap().unwrap();
        assert_eq!(current.status, IssueStatus::Resolved);
        assert_eq!(current.resolved_by.as_deref(), Some("nurse-1"));
    }
}
