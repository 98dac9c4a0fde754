use crate::config::PriorityConfig;
use crate::events::{SubjectKind, Timestamp};
use crate::issues::{IssueStatus, PrioritizedIssue};
use crate::risk::{RiskCategory, RiskScore};
use uuid::Uuid;

/// `(urgency * severity * confidence_pct) / 10000`
///
/// Pure and deterministic so ordering is explainable to a reviewer.
pub fn priority_score(urgency: f64, severity: f64, confidence: f64) -> f64 {
    let confidence_pct = confidence * 100.0;
    (urgency * severity * confidence_pct) / 10_000.0
}

/// Turns risk scores into new, traceable issues
#[derive(Debug, Clone)]
pub struct Prioritizer {
    config: PriorityConfig,
}

impl Prioritizer {
    pub fn new(config: PriorityConfig) -> Self {
        Self { config }
    }

    pub fn urgency_for(&self, category: RiskCategory) -> f64 {
        match category {
            RiskCategory::ResidentHealth => self.config.resident_health_urgency,
            RiskCategory::CaregiverPerformance => self.config.caregiver_performance_urgency,
        }
    }

    /// Create a `New` issue carrying the risk score and its anomalies
    pub fn prioritize(&self, risk: &RiskScore, now: Timestamp) -> PrioritizedIssue {
        let urgency = self.urgency_for(risk.category);
        let level = format!("{:?}", risk.level).to_lowercase();
        let title = match risk.subject.kind {
            SubjectKind::Resident => {
                format!("Resident {}: {} health risk", risk.subject.id, level)
            }
            SubjectKind::Caregiver => {
                format!("Caregiver {}: {} performance risk", risk.subject.id, level)
            }
        };
        let description = format!(
            "Risk score {:.0} ({}) from {} contributing anomalies in the latest run.",
            risk.score,
            level,
            risk.contributing_anomalies.len()
        );

        PrioritizedIssue {
            id: Uuid::new_v4(),
            tenant_id: risk.tenant_id.clone(),
            subject: risk.subject.clone(),
            issue_type: format!("{}_risk", risk.category.as_str()),
            category: risk.category,
            title,
            description,
            urgency,
            severity: risk.score,
            confidence: risk.confidence,
            priority_score: priority_score(urgency, risk.score, risk.confidence),
            risk_score_id: risk.id,
            anomaly_ids: risk.contributing_anomalies.clone(),
            suggested_actions: risk.interventions.clone(),
            status: IssueStatus::New,
            created_at: now,
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
}
