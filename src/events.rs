//! Core event types for the care signal pipeline
//!
//! This module defines the raw domain events handed over by the vitals, task and
//! staffing subsystems, and the canonical `ObservationEvent` they are normalized into.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Timestamp type for consistent time handling across the application
pub type Timestamp = DateTime<Utc>;

/// Identifier of a tenant (care organisation)
pub type TenantId = String;

/// Kind of entity an observation pertains to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    Resident,
    Caregiver,
}

/// Reference to a resident or caregiver
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubjectRef {
    pub kind: SubjectKind,
    pub id: String,
}

impl SubjectRef {
    pub fn resident(id: impl Into<String>) -> Self {
        Self {
            kind: SubjectKind::Resident,
            id: id.into(),
        }
    }

    pub fn caregiver(id: impl Into<String>) -> Self {
        Self {
            kind: SubjectKind::Caregiver,
            id: id.into(),
        }
    }
}

impl fmt::Display for SubjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            SubjectKind::Resident => write!(f, "resident:{}", self.id),
            SubjectKind::Caregiver => write!(f, "caregiver:{}", self.id),
        }
    }
}

/// Originating subsystem of a raw event, used together with the source id for deduplication
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Vitals,
    TaskCompletion,
    StaffingAction,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Vitals => "vitals",
            SourceKind::TaskCompletion => "task_completion",
            SourceKind::StaffingAction => "staffing_action",
        }
    }
}

/// `(source_kind, source_id)` pointer back to the originating record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceRef {
    pub kind: SourceKind,
    pub id: String,
}

/// Whether a metric describes resident health or caregiver performance
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MetricCategory {
    Clinical,
    Performance,
}

/// Numeric metrics tracked with rolling baselines
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    BloodPressureSystolic,
    BloodPressureDiastolic,
    HeartRate,
    Temperature,
    OxygenSaturation,
    RespiratoryRate,
    BloodGlucose,
    Weight,
    TaskDurationMinutes,
    TaskLatenessMinutes,
}

impl MetricKind {
    pub const ALL: [MetricKind; 10] = [
        MetricKind::BloodPressureSystolic,
        MetricKind::BloodPressureDiastolic,
        MetricKind::HeartRate,
        MetricKind::Temperature,
        MetricKind::OxygenSaturation,
        MetricKind::RespiratoryRate,
        MetricKind::BloodGlucose,
        MetricKind::Weight,
        MetricKind::TaskDurationMinutes,
        MetricKind::TaskLatenessMinutes,
    ];

    /// Payload key under which this metric is stored
    pub fn key(&self) -> &'static str {
        match self {
            MetricKind::BloodPressureSystolic => "blood_pressure_systolic",
            MetricKind::BloodPressureDiastolic => "blood_pressure_diastolic",
            MetricKind::HeartRate => "heart_rate",
            MetricKind::Temperature => "temperature",
            MetricKind::OxygenSaturation => "oxygen_saturation",
            MetricKind::RespiratoryRate => "respiratory_rate",
            MetricKind::BloodGlucose => "blood_glucose",
            MetricKind::Weight => "weight",
            MetricKind::TaskDurationMinutes => "task_duration_minutes",
            MetricKind::TaskLatenessMinutes => "task_lateness_minutes",
        }
    }

    pub fn category(&self) -> MetricCategory {
        match self {
            MetricKind::TaskDurationMinutes | MetricKind::TaskLatenessMinutes => {
                MetricCategory::Performance
            }
            _ => MetricCategory::Clinical,
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|metric| metric.key() == key)
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A single measurement in an observation payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Measurement {
    Numeric(f64),
    Categorical(String),
}

impl Measurement {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Measurement::Numeric(value) => Some(*value),
            Measurement::Categorical(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Measurement::Numeric(_) => None,
            Measurement::Categorical(value) => Some(value),
        }
    }
}

/// Severity level shared by anomalies and risk levels
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// Event type stamped on vital-sign observations
pub const VITALS: &str = "vitals";

/// Event type stamped on task completion observations
pub const TASK_COMPLETION: &str = "task_completion";

/// Event type stamped on staffing observations
pub const STAFFING: &str = "staffing";

/// Payload key recording whether completion evidence was attached
pub const EVIDENCE_KEY: &str = "evidence";

/// Canonical, immutable fact produced by the observation aggregator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObservationEvent {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub subject: SubjectRef,
    /// Broad kind of event ("vitals", "task_completion", "staffing")
    pub event_type: String,
    /// Finer classification, e.g. the task type or staffing action
    pub event_subtype: Option<String>,
    /// When the underlying fact happened
    pub timestamp: Timestamp,
    /// When the aggregator accepted the event; bounds the backlog lookback
    pub ingested_at: Timestamp,
    /// Insertion order assigned by the store; drives the processing watermark
    ///
    /// Zero until the observation has been stored.
    #[serde(default)]
    pub ingest_seq: u64,
    pub payload: BTreeMap<String, Measurement>,
    /// Data quality, 0-100
    pub quality_score: u8,
    pub source: SourceRef,
}

impl ObservationEvent {
    /// Numeric value recorded for `metric`, if present
    pub fn metric(&self, metric: MetricKind) -> Option<f64> {
        self.payload.get(metric.key()).and_then(Measurement::as_f64)
    }

    /// All baseline-tracked metrics carried by this observation
    pub fn metrics(&self) -> Vec<(MetricKind, f64)> {
        self.payload
            .iter()
            .filter_map(|(key, value)| Some((MetricKind::from_key(key)?, value.as_f64()?)))
            .collect()
    }
}

/// Raw vital-sign reading from the vitals recording subsystem
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VitalsReading {
    pub source_id: String,
    pub tenant_id: TenantId,
    pub resident_id: String,
    pub recorded_at: Timestamp,
    #[serde(default)]
    pub systolic: Option<f64>,
    #[serde(default)]
    pub diastolic: Option<f64>,
    #[serde(default)]
    pub heart_rate: Option<f64>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub oxygen_saturation: Option<f64>,
    #[serde(default)]
    pub respiratory_rate: Option<f64>,
    #[serde(default)]
    pub blood_glucose: Option<f64>,
    #[serde(default)]
    pub weight: Option<f64>,
    /// Reading typed in by hand rather than captured by a device
    #[serde(default)]
    pub manual_entry: bool,
}

/// Raw task completion from the task execution subsystem
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskCompletionRecord {
    pub source_id: String,
    pub tenant_id: TenantId,
    pub caregiver_id: String,
    #[serde(default)]
    pub resident_id: Option<String>,
    pub task_type: String,
    #[serde(default)]
    pub started_at: Option<Timestamp>,
    pub completed_at: Timestamp,
    #[serde(default)]
    pub scheduled_for: Option<Timestamp>,
    #[serde(default)]
    pub evidence_provided: bool,
}

/// Raw staffing action (shift start, assignment, call-out, ...)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StaffingActionRecord {
    pub source_id: String,
    pub tenant_id: TenantId,
    pub caregiver_id: String,
    pub action: String,
    pub occurred_at: Timestamp,
}

/// Any domain event accepted by the aggregator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawEvent {
    Vitals(VitalsReading),
    TaskCompletion(TaskCompletionRecord),
    StaffingAction(StaffingActionRecord),
}

impl RawEvent {
    pub fn source_kind(&self) -> SourceKind {
        match self {
            RawEvent::Vitals(_) => SourceKind::Vitals,
            RawEvent::TaskCompletion(_) => SourceKind::TaskCompletion,
            RawEvent::StaffingAction(_) => SourceKind::StaffingAction,
        }
    }

    pub fn source_id(&self) -> &str {
        match self {
            RawEvent::Vitals(reading) => &reading.source_id,
            RawEvent::TaskCompletion(record) => &record.source_id,
            RawEvent::StaffingAction(record) => &record.source_id,
        }
    }

    pub fn tenant_id(&self) -> &str {
        match self {
            RawEvent::Vitals(reading) => &reading.tenant_id,
            RawEvent::TaskCompletion(record) => &record.tenant_id,
            RawEvent::StaffingAction(record) => &record.tenant_id,
        }
    }

    pub fn source(&self) -> SourceRef {
        SourceRef {
            kind: self.source_kind(),
            id: self.source_id().to_string(),
        }
    }
}
