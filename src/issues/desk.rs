//! Reviewer-facing query and lifecycle interface
//!
//! Dashboards read per-subject risk and open issues here; reviewer actions on issues
//! and anomalies come back through the same desk.

use crate::detectors::{Anomaly, AnomalyStatus};
use crate::error::{LifecycleError, StoreError};
use crate::events::SubjectRef;
use crate::issues::{PrioritizedIssue, ReviewAction};
use crate::risk::RiskScore;
use crate::store::CareStore;
use chrono::Utc;
use log::info;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use uuid::Uuid;

/// Current risk and open issues for one subject
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubjectOverview {
    pub subject: SubjectRef,
    pub risk: Option<RiskScore>,
    /// Highest priority first
    pub open_issues: Vec<PrioritizedIssue>,
}

/// Reviewer decision on a single anomaly
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyReview {
    Acknowledge,
    Dismiss,
}

pub struct IssueDesk {
    store: Arc<dyn CareStore>,
}

impl IssueDesk {
    pub fn new(store: Arc<dyn CareStore>) -> Self {
        Self { store }
    }

    pub fn subject_overview(
        &self,
        tenant_id: &str,
        subject: &SubjectRef,
    ) -> Result<SubjectOverview, StoreError> {
        let risk = self.store.latest_risk_score(tenant_id, subject)?;
        let mut open_issues: Vec<PrioritizedIssue> = self
            .store
            .issues_for_tenant(tenant_id)?
            .into_iter()
            .filter(|i| &i.subject == subject && i.status.is_open())
            .collect();
        rank(&mut open_issues);

        Ok(SubjectOverview {
            subject: subject.clone(),
            risk,
            open_issues,
        })
    }

    /// All open issues for a tenant, highest priority first
    pub fn ranked_open_issues(&self, tenant_id: &str) -> Result<Vec<PrioritizedIssue>, StoreError> {
        let mut issues: Vec<PrioritizedIssue> = self
            .store
            .issues_for_tenant(tenant_id)?
            .into_iter()
            .filter(|i| i.status.is_open())
            .collect();
        rank(&mut issues);
        Ok(issues)
    }

    /// Risk scores over time for a subject, oldest first
    pub fn risk_trend(
        &self,
        tenant_id: &str,
        subject: &SubjectRef,
    ) -> Result<Vec<RiskScore>, StoreError> {
        self.store.risk_history(tenant_id, subject)
    }

    /// Apply a reviewer action to an issue
    ///
    /// The write only lands if nobody changed the issue since it was read;
    /// otherwise `LifecycleError::Store(StoreError::VersionConflict)` is returned
    /// and the reviewer should reload.
    pub fn review_issue(
        &self,
        issue_id: Uuid,
        action: ReviewAction,
        actor: &str,
        notes: Option<String>,
    ) -> Result<PrioritizedIssue, LifecycleError> {
        let mut issue = self
            .store
            .issue(issue_id)?
            .ok_or_else(|| LifecycleError::NotFound(issue_id.to_string()))?;
        let from = issue.status;
        let read_version = issue.version;

        issue.apply(action, actor, notes, Utc::now())?;
        let issue = self.store.update_issue(issue, read_version)?;
        info!(
            "Issue {} moved from {} to {} by {}",
            issue_id, from, issue.status, actor
        );
        Ok(issue)
    }

    pub fn assign_issue(
        &self,
        issue_id: Uuid,
        assignee: &str,
    ) -> Result<PrioritizedIssue, LifecycleError> {
        let mut issue = self
            .store
            .issue(issue_id)?
            .ok_or_else(|| LifecycleError::NotFound(issue_id.to_string()))?;

        let read_version = issue.version;
        issue.assign(assignee, Utc::now())?;
        Ok(self.store.update_issue(issue, read_version)?)
    }

    /// Acknowledge or dismiss a detected anomaly
    pub fn review_anomaly(
        &self,
        anomaly_id: Uuid,
        review: AnomalyReview,
        actor: &str,
    ) -> Result<Anomaly, LifecycleError> {
        let mut anomaly = self
            .store
            .anomaly(anomaly_id)?
            .ok_or_else(|| LifecycleError::NotFound(anomaly_id.to_string()))?;

        let to = match review {
            AnomalyReview::Acknowledge => AnomalyStatus::Acknowledged,
            AnomalyReview::Dismiss => AnomalyStatus::Dismissed,
        };
        let from = anomaly.status;
        if from != AnomalyStatus::Detected {
            return Err(LifecycleError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        anomaly.status = to;
        anomaly.reviewed_by = Some(actor.to_string());
        anomaly.reviewed_at = Some(Utc::now());
        self.store.update_anomaly(anomaly.clone(), from)?;
        Ok(anomaly)
    }
}

fn rank(issues: &mut [PrioritizedIssue]) {
    issues.sort_by(|a, b| {
        b.priority_score
            .partial_cmp(&a.priority_score)
            .unwrap_or(Ordering::Equal)
            .then(a.created_at.cmp(&b.created_at))
    });
}
