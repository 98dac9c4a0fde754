//! Weighted risk aggregation over a subject's anomalies for one run

use crate::config::ScoringConfig;
use crate::detectors::{Anomaly, AnomalyType};
use crate::events::{Severity, SubjectKind, SubjectRef, TenantId, Timestamp};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What kind of concern a risk score expresses
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RiskCategory {
    ResidentHealth,
    CaregiverPerformance,
}

impl RiskCategory {
    pub fn for_subject(kind: SubjectKind) -> Self {
        match kind {
            SubjectKind::Resident => RiskCategory::ResidentHealth,
            SubjectKind::Caregiver => RiskCategory::CaregiverPerformance,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskCategory::ResidentHealth => "resident_health",
            RiskCategory::CaregiverPerformance => "caregiver_performance",
        }
    }
}

/// Bounded aggregate of a subject's anomalies in one run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskScore {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub run_id: Uuid,
    pub subject: SubjectRef,
    pub category: RiskCategory,
    /// Always within [0, 100]
    pub score: f64,
    pub level: Severity,
    pub confidence: f64,
    pub contributing_anomalies: Vec<Uuid>,
    pub interventions: Vec<String>,
    pub computed_at: Timestamp,
}

/// Sums fixed per-type weights, capped at 100
#[derive(Debug, Clone)]
pub struct RiskScorer {
    config: ScoringConfig,
}

impl RiskScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn weight_for(&self, anomaly_type: &AnomalyType) -> f64 {
        match anomaly_type {
            AnomalyType::Deviation => self.config.deviation_weight,
            AnomalyType::Pattern => self.config.pattern_weight,
            AnomalyType::Workload => self.config.workload_weight,
            AnomalyType::Drift => self.config.drift_weight,
            AnomalyType::Custom(_) => self.config.default_weight,
        }
    }

    pub fn level_for(&self, score: f64) -> Severity {
        if score >= self.config.high_threshold {
            Severity::High
        } else if score >= self.config.medium_threshold {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    /// Fixed per-category trust in the scoring function itself
    pub fn confidence_for(&self, category: RiskCategory) -> f64 {
        match category {
            RiskCategory::ResidentHealth => self.config.resident_health_confidence,
            RiskCategory::CaregiverPerformance => self.config.caregiver_performance_confidence,
        }
    }

    /// Clamp a raw weight sum into [0, 100]
    pub fn bound(raw: f64) -> f64 {
        if raw.is_nan() {
            0.0
        } else {
            raw.clamp(0.0, 100.0)
        }
    }

    /// Score one subject's anomalies
    ///
    /// Returns `None` when there are no anomalies: absence of a row is the signal.
    pub fn score(
        &self,
        tenant_id: &str,
        run_id: Uuid,
        subject: &SubjectRef,
        anomalies: &[Anomaly],
        now: Timestamp,
    ) -> Option<RiskScore> {
        if anomalies.is_empty() {
            return None;
        }

        let raw: f64 = anomalies
            .iter()
            .map(|a| self.weight_for(&a.anomaly_type))
            .sum();
        let score = Self::bound(raw);
        let category = RiskCategory::for_subject(subject.kind);

        let mut interventions: Vec<String> = Vec::new();
        for anomaly in anomalies {
            let suggestion = intervention_for(&anomaly.anomaly_type).to_string();
            if !interventions.contains(&suggestion) {
                interventions.push(suggestion);
            }
        }

        Some(RiskScore {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            run_id,
            subject: subject.clone(),
            category,
            score,
            level: self.level_for(score),
            confidence: self.confidence_for(category),
            contributing_anomalies: anomalies.iter().map(|a| a.id).collect(),
            interventions,
            computed_at: now,
        })
    }
}

fn intervention_for(anomaly_type: &AnomalyType) -> &'static str {
    match anomaly_type {
        AnomalyType::Deviation => "Recheck the flagged vital sign and notify the attending clinician",
        AnomalyType::Pattern => "Review recent task completions and evidence with the caregiver",
        AnomalyType::Workload => "Rebalance the caregiver's assignments for the coming shifts",
        AnomalyType::Drift => "Schedule a performance check-in with the caregiver",
        AnomalyType::Custom(_) => "Review the flagged activity",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use quickcheck::{Arbitrary, Gen};
    use quickcheck_macros::quickcheck;

    fn anomaly(anomaly_type: AnomalyType, subject: &SubjectRef) -> Anomaly {
        let now = Utc::now();
        Anomaly::new(
            "t-1",
            Uuid::nil(),
            Some(subject.clone()),
            anomaly_type,
            "test",
            Severity::Medium,
            (now - Duration::hours(24), now),
            now,
        )
    }

    fn scorer() -> RiskScorer {
        RiskScorer::new(ScoringConfig::default())
    }

    #[test]
    fn test_single_deviation_scores_thirty_low() {
        let subject = SubjectRef::resident("r-1");
        let anomalies = vec![anomaly(AnomalyType::Deviation, &subject)];

        let risk = scorer()
            .score("t-1", Uuid::nil(), &subject, &anomalies, Utc::now())
            .unwrap();
        assert_eq!(risk.score, 30.0);
        assert_eq!(risk.level, Severity::Low);
        assert_eq!(risk.category, RiskCategory::ResidentHealth);
        assert_eq!(risk.confidence, 0.85);
        assert_eq!(risk.contributing_anomalies, vec![anomalies[0].id]);
        assert_eq!(risk.interventions.len(), 1);
    }

    #[test]
    fn test_caregiver_weights_and_levels() {
        let subject = SubjectRef::caregiver("c-1");
        let anomalies = vec![
            anomaly(AnomalyType::Pattern, &subject),
            anomaly(AnomalyType::Workload, &subject),
        ];

        let risk = scorer()
            .score("t-1", Uuid::nil(), &subject, &anomalies, Utc::now())
            .unwrap();
        assert_eq!(risk.score, 45.0);
        assert_eq!(risk.level, Severity::Medium);
        assert_eq!(risk.category, RiskCategory::CaregiverPerformance);
        assert_eq!(risk.confidence, 0.80);
        assert_eq!(risk.interventions.len(), 2);
    }

    #[test]
    fn test_score_capped_at_hundred() {
        let subject = SubjectRef::resident("r-1");
        let anomalies: Vec<_> = (0..5)
            .map(|_| anomaly(AnomalyType::Deviation, &subject))
            .collect();

        let risk = scorer()
            .score("t-1", Uuid::nil(), &subject, &anomalies, Utc::now())
            .unwrap();
        assert_eq!(risk.score, 100.0);
        assert_eq!(risk.level, Severity::High);
        assert_eq!(risk.interventions.len(), 1);
    }

    #[test]
    fn test_custom_type_uses_default_weight() {
        let s = scorer();
        assert_eq!(s.weight_for(&AnomalyType::Custom("fall_risk".into())), 15.0);
        assert_eq!(s.weight_for(&AnomalyType::Drift), 20.0);
    }

    #[test]
    fn test_no_anomalies_no_score() {
        let subject = SubjectRef::resident("r-1");
        assert!(scorer()
            .score("t-1", Uuid::nil(), &subject, &[], Utc::now())
            .is_none());
    }

    #[test]
    fn test_level_thresholds() {
        let s = scorer();
        assert_eq!(s.level_for(39.9), Severity::Low);
        assert_eq!(s.level_for(40.0), Severity::Medium);
        assert_eq!(s.level_for(59.9), Severity::Medium);
        assert_eq!(s.level_for(60.0), Severity::High);
    }

    #[derive(Debug, Clone)]
    struct AnomalyMix(Vec<AnomalyType>);

    impl Arbitrary for AnomalyMix {
        fn arbitrary(g: &mut Gen) -> Self {
            let kinds = [
                AnomalyType::Deviation,
                AnomalyType::Pattern,
                AnomalyType::Workload,
                AnomalyType::Drift,
                AnomalyType::Custom("extra".to_string()),
            ];
            let count = (u8::arbitrary(g) % 20) as usize;
            Self(
                (0..count)
                    .map(|_| g.choose(&kinds).unwrap().clone())
                    .collect(),
            )
        }
    }

    #[quickcheck]
    fn prop_risk_score_bounded(mix: AnomalyMix) -> bool {
        let subject = SubjectRef::resident("r-1");
        let anomalies: Vec<_> = mix.0.into_iter().map(|t| anomaly(t, &subject)).collect();
        match scorer().score("t-1", Uuid::nil(), &subject, &anomalies, Utc::now()) {
            Some(risk) => (0.0..=100.0).contains(&risk.score),
            None => anomalies.is_empty(),
        }
    }

    #[quickcheck]
    fn prop_bound_clamps_any_raw_sum(raw: f64) -> bool {
        let bounded = RiskScorer::bound(raw);
        (0.0..=100.0).contains(&bounded)
    }
}
