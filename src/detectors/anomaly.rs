use crate::events::{Severity, SubjectRef, TenantId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Kind of anomaly, one per detector strategy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    /// Single value far from the subject's baseline
    Deviation,
    /// Count-based behavioural condition recurring within a window
    Pattern,
    /// Caregiver event volume above an absolute ceiling
    Workload,
    /// Caregiver rolling average creeping above baseline
    Drift,
    /// Emitted by an additionally registered detector
    Custom(String),
}

impl AnomalyType {
    pub fn as_str(&self) -> &str {
        match self {
            AnomalyType::Deviation => "deviation",
            AnomalyType::Pattern => "pattern",
            AnomalyType::Workload => "workload",
            AnomalyType::Drift => "drift",
            AnomalyType::Custom(name) => name,
        }
    }
}

impl fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Review status of an anomaly
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyStatus {
    Detected,
    Acknowledged,
    Dismissed,
}

impl fmt::Display for AnomalyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AnomalyStatus::Detected => "detected",
            AnomalyStatus::Acknowledged => "acknowledged",
            AnomalyStatus::Dismissed => "dismissed",
        };
        f.write_str(name)
    }
}

/// A single detected deviation from expected behaviour
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Anomaly {
    pub id: Uuid,
    pub tenant_id: TenantId,
    /// Run that produced this anomaly
    pub run_id: Uuid,
    pub subject: Option<SubjectRef>,
    pub anomaly_type: AnomalyType,
    pub subtype: String,
    pub severity: Severity,
    pub window_start: Timestamp,
    pub window_end: Timestamp,
    pub baseline_value: Option<f64>,
    pub observed_value: Option<f64>,
    /// Distance from the baseline in standard deviations
    pub deviation: Option<f64>,
    pub confidence: f64,
    pub details: serde_json::Value,
    pub status: AnomalyStatus,
    pub detected_at: Timestamp,
    /// Run-scoped key identifying the observation/window combination covered
    pub dedup_key: String,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<Timestamp>,
}

impl Anomaly {
    /// Start a new anomaly in the `Detected` state
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tenant_id: &str,
        run_id: Uuid,
        subject: Option<SubjectRef>,
        anomaly_type: AnomalyType,
        subtype: impl Into<String>,
        severity: Severity,
        window: (Timestamp, Timestamp),
        detected_at: Timestamp,
    ) -> Self {
        let subtype = subtype.into();
        let dedup_key = format!(
            "{}:{}:{}:{}",
            anomaly_type,
            subtype,
            subject
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "tenant".to_string()),
            window.1.timestamp()
        );

        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            run_id,
            subject,
            anomaly_type,
            subtype,
            severity,
            window_start: window.0,
            window_end: window.1,
            baseline_value: None,
            observed_value: None,
            deviation: None,
            confidence: 0.0,
            details: serde_json::Value::Null,
            status: AnomalyStatus::Detected,
            detected_at,
            dedup_key,
            reviewed_by: None,
            reviewed_at: None,
        }
    }

    pub fn with_values(mut self, baseline: Option<f64>, observed: Option<f64>) -> Self {
        self.baseline_value = baseline;
        self.observed_value = observed;
        self
    }

    pub fn with_deviation(mut self, deviation: f64) -> Self {
        self.deviation = Some(deviation);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    /// Override the default window-based dedup key, e.g. with an observation id
    pub fn with_dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = key.into();
        self
    }
}
