use crate::error::LifecycleError;
use crate::events::{SubjectRef, TenantId, Timestamp};
use crate::risk::RiskCategory;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle status of a prioritized issue
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    New,
    Acknowledged,
    Investigating,
    ActionTaken,
    Resolved,
    Dismissed,
}

impl IssueStatus {
    pub fn is_open(&self) -> bool {
        !matches!(self, IssueStatus::Resolved | IssueStatus::Dismissed)
    }

    /// Whether a reviewer may move an issue from `self` to `to`
    pub fn can_transition_to(&self, to: IssueStatus) -> bool {
        use IssueStatus::*;
        match self {
            New => to != New,
            Acknowledged => matches!(to, Investigating | ActionTaken | Resolved | Dismissed),
            Investigating => matches!(to, ActionTaken | Resolved | Dismissed),
            ActionTaken => matches!(to, Investigating | Resolved),
            Resolved | Dismissed => false,
        }
    }
}

impl fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IssueStatus::New => "new",
            IssueStatus::Acknowledged => "acknowledged",
            IssueStatus::Investigating => "investigating",
            IssueStatus::ActionTaken => "action_taken",
            IssueStatus::Resolved => "resolved",
            IssueStatus::Dismissed => "dismissed",
        };
        f.write_str(name)
    }
}

/// External reviewer action on an issue
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    Acknowledge,
    Investigate,
    RecordAction,
    Resolve,
    Dismiss,
}

impl ReviewAction {
    pub fn target_status(&self) -> IssueStatus {
        match self {
            ReviewAction::Acknowledge => IssueStatus::Acknowledged,
            ReviewAction::Investigate => IssueStatus::Investigating,
            ReviewAction::RecordAction => IssueStatus::ActionTaken,
            ReviewAction::Resolve => IssueStatus::Resolved,
            ReviewAction::Dismiss => IssueStatus::Dismissed,
        }
    }
}

/// Ranked, reviewer-facing unit of work derived from a risk score
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrioritizedIssue {
    /// Unique identifier for the issue
    pub id: Uuid,
    /// Tenant the issue belongs to
    pub tenant_id: TenantId,
    /// Resident or caregiver the issue is about
    pub subject: SubjectRef,
    /// Machine-readable kind, e.g. "resident_health_risk"
    pub issue_type: String,
    /// Risk category the issue was raised for
    pub category: RiskCategory,
    /// One-line summary shown on the review dashboard
    pub title: String,
    /// Longer explanation of why the issue was raised
    pub description: String,
    /// 0-100
    pub urgency: f64,
    /// 0-100, the originating risk score
    pub severity: f64,
    /// 0-1
    pub confidence: f64,
    /// Ranking key: urgency, severity and confidence combined
    pub priority_score: f64,
    /// Risk score the issue was derived from
    pub risk_score_id: Uuid,
    /// Anomalies behind the risk score
    pub anomaly_ids: Vec<Uuid>,
    /// Interventions carried over from the risk score
    pub suggested_actions: Vec<String>,
    /// Current lifecycle status
    pub status: IssueStatus,
    /// When the prioritizer created the issue
    pub created_at: Timestamp,
    /// Reviewer the issue is assigned to
    pub assigned_to: Option<String>,
    /// When the current assignment was made
    pub assigned_at: Option<Timestamp>,
    /// Reviewer who first moved the issue out of `New`
    pub acknowledged_by: Option<String>,
    /// When the issue first left `New`
    pub acknowledged_at: Option<Timestamp>,
    /// Reviewer who resolved or dismissed the issue
    pub resolved_by: Option<String>,
    /// When the issue reached a terminal status
    pub resolved_at: Option<Timestamp>,
    /// Notes recorded with the resolution or dismissal
    pub resolution_notes: Option<String>,
    /// Write counter; bumped by the store on every accepted update
    #[serde(default)]
    pub version: u64,
}

impl PrioritizedIssue {
    /// Apply a reviewer action, stamping actor and time
    ///
    /// # Errors
    ///
    /// Returns `LifecycleError::InvalidTransition` if the move is not allowed
    /// from the current status; the issue is left unchanged.
    pub fn apply(
        &mut self,
        action: ReviewAction,
        actor: &str,
        notes: Option<String>,
        now: Timestamp,
    ) -> Result<(), LifecycleError> {
        let to = action.target_status();
        if !self.status.can_transition_to(to) {
            return Err(LifecycleError::InvalidTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }

        if self.status == IssueStatus::New {
            self.acknowledged_by = Some(actor.to_string());
            self.acknowledged_at = Some(now);
        }
        if !to.is_open() {
            self.resolved_by = Some(actor.to_string());
            self.resolved_at = Some(now);
            self.resolution_notes = notes;
        }
        self.status = to;
        Ok(())
    }

    /// Assign the issue to a reviewer; only open issues can be assigned
    pub fn assign(&mut self, assignee: &str, now: Timestamp) -> Result<(), LifecycleError> {
        if !self.status.is_open() {
            return Err(LifecycleError::InvalidTransition {
                from: self.status.to_string(),
                to: "assigned".to_string(),
            });
        }
        self.assigned_to = Some(assignee.to_string());
        self.assigned_at = Some(now);
        Ok(())
    }
}
