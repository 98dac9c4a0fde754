//! Observation aggregator
//!
//! This module turns raw vitals, task and staffing events into canonical
//! `ObservationEvent`s and stores each source record at most once.

use crate::error::{IngestError, StoreError};
use crate::events::{
    Measurement, MetricKind, ObservationEvent, RawEvent, SourceRef, StaffingActionRecord,
    SubjectRef, TaskCompletionRecord, TenantId, Timestamp, VitalsReading, EVIDENCE_KEY, STAFFING,
    TASK_COMPLETION, VITALS,
};
use crate::store::CareStore;
use chrono::Utc;
use log::{debug, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use uuid::Uuid;

/// Quality of a device-captured reading or an evidenced task
const FULL_QUALITY: u8 = 100;
const MANUAL_ENTRY_QUALITY: u8 = 80;
const NO_EVIDENCE_QUALITY: u8 = 70;

/// Result of ingesting one raw event
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Created(ObservationEvent),
    /// An observation already exists for this source record
    Skipped(SourceRef),
}

/// Totals for a batch of raw events
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestSummary {
    pub created: usize,
    pub skipped: usize,
    pub rejected: usize,
    /// Tenants that received at least one new observation
    pub tenants: BTreeSet<TenantId>,
}

/// Normalizes raw domain events and persists them idempotently
pub struct ObservationAggregator {
    store: Arc<dyn CareStore>,
}

impl ObservationAggregator {
    /// Create an aggregator writing to `store`
    ///
    /// # Examples
    ///
    /// ```
    /// use care_signal::aggregator::{IngestOutcome, ObservationAggregator};
    /// use care_signal::events::{RawEvent, StaffingActionRecord};
    /// use care_signal::store::MemoryStore;
    /// use chrono::Utc;
    /// use std::sync::Arc;
    ///
    /// let aggregator = ObservationAggregator::new(Arc::new(MemoryStore::new()));
    /// let raw = RawEvent::StaffingAction(StaffingActionRecord {
    ///     source_id: "shift-1".to_string(),
    ///     tenant_id: "t-1".to_string(),
    ///     caregiver_id: "c-1".to_string(),
    ///     action: "shift_start".to_string(),
    ///     occurred_at: Utc::now(),
    /// });
    ///
    /// assert!(matches!(aggregator.ingest(raw.clone()), Ok(IngestOutcome::Created(_))));
    /// assert!(matches!(aggregator.ingest(raw), Ok(IngestOutcome::Skipped(_))));
    /// ```
    pub fn new(store: Arc<dyn CareStore>) -> Self {
        Self { store }
    }

    /// Ingest one raw event
    ///
    /// A second call for the same `(source_kind, source_id)` is a no-op that
    /// returns `IngestOutcome::Skipped`.
    ///
    /// # Errors
    ///
    /// Returns `IngestError` for malformed events and storage failures.
    pub fn ingest(&self, raw: RawEvent) -> Result<IngestOutcome, IngestError> {
        let source = raw.source();
        if self.store.find_by_source(&source)?.is_some() {
            debug!(
                "Observation for {} {} already exists, skipping",
                source.kind.as_str(),
                source.id
            );
            return Ok(IngestOutcome::Skipped(source));
        }

        let event = Self::normalize(&raw, Utc::now()).map_err(|e| {
            warn!(
                "Rejected {} event {}: {}",
                source.kind.as_str(),
                source.id,
                e
            );
            e
        })?;

        // A concurrent ingest of the same record may win between the lookup and the insert
        match self.store.insert_observation(event) {
            Ok(stored) => Ok(IngestOutcome::Created(stored)),
            Err(StoreError::Duplicate(_)) => Ok(IngestOutcome::Skipped(source)),
            Err(e) => Err(e.into()),
        }
    }

    /// Ingest a stream of raw events, continuing past rejected ones
    pub fn ingest_batch<I>(&self, events: I) -> IngestSummary
    where
        I: IntoIterator<Item = RawEvent>,
    {
        let mut summary = IngestSummary::default();
        for raw in events {
            match self.ingest(raw) {
                Ok(IngestOutcome::Created(event)) => {
                    summary.created += 1;
                    summary.tenants.insert(event.tenant_id);
                }
                Ok(IngestOutcome::Skipped(_)) => summary.skipped += 1,
                Err(_) => summary.rejected += 1,
            }
        }
        summary
    }

    /// Validate a raw event and build its canonical observation
    ///
    /// # Errors
    ///
    /// Returns `IngestError::MissingField` for empty identifiers or a reading
    /// with no measurements, and `IngestError::MalformedPayload` for
    /// non-finite or non-positive values and inverted task timings.
    pub fn normalize(raw: &RawEvent, now: Timestamp) -> Result<ObservationEvent, IngestError> {
        require("source_id", raw.source_id())?;
        require("tenant_id", raw.tenant_id())?;

        let (subject, event_type, subtype, timestamp, payload, quality) = match raw {
            RawEvent::Vitals(reading) => normalize_vitals(reading)?,
            RawEvent::TaskCompletion(record) => normalize_task(record)?,
            RawEvent::StaffingAction(record) => normalize_staffing(record)?,
        };

        Ok(ObservationEvent {
            id: Uuid::new_v4(),
            tenant_id: raw.tenant_id().to_string(),
            subject,
            event_type: event_type.to_string(),
            event_subtype: subtype,
            timestamp,
            ingested_at: now,
            ingest_seq: 0,
            payload,
            quality_score: quality,
            source: raw.source(),
        })
    }
}

type Normalized = (
    SubjectRef,
    &'static str,
    Option<String>,
    Timestamp,
    BTreeMap<String, Measurement>,
    u8,
);

fn require(field: &'static str, value: &str) -> Result<(), IngestError> {
    if value.trim().is_empty() {
        return Err(IngestError::MissingField(field));
    }
    Ok(())
}

fn normalize_vitals(reading: &VitalsReading) -> Result<Normalized, IngestError> {
    require("resident_id", &reading.resident_id)?;

    let readings = [
        (MetricKind::BloodPressureSystolic, reading.systolic),
        (MetricKind::BloodPressureDiastolic, reading.diastolic),
        (MetricKind::HeartRate, reading.heart_rate),
        (MetricKind::Temperature, reading.temperature),
        (MetricKind::OxygenSaturation, reading.oxygen_saturation),
        (MetricKind::RespiratoryRate, reading.respiratory_rate),
        (MetricKind::BloodGlucose, reading.blood_glucose),
        (MetricKind::Weight, reading.weight),
    ];

    let mut payload = BTreeMap::new();
    for (metric, value) in readings {
        let Some(value) = value else { continue };
        if !value.is_finite() || value <= 0.0 {
            return Err(IngestError::MalformedPayload(format!(
                "{} must be a positive number, got {}",
                metric, value
            )));
        }
        payload.insert(metric.key().to_string(), Measurement::Numeric(value));
    }
    if payload.is_empty() {
        return Err(IngestError::MissingField("measurements"));
    }

    let quality = if reading.manual_entry {
        payload.insert(
            "entry_method".to_string(),
            Measurement::Categorical("manual".to_string()),
        );
        MANUAL_ENTRY_QUALITY
    } else {
        FULL_QUALITY
    };

    Ok((
        SubjectRef::resident(reading.resident_id.clone()),
        VITALS,
        None,
        reading.recorded_at,
        payload,
        quality,
    ))
}

fn normalize_task(record: &TaskCompletionRecord) -> Result<Normalized, IngestError> {
    require("caregiver_id", &record.caregiver_id)?;
    require("task_type", &record.task_type)?;

    let mut payload = BTreeMap::new();
    if let Some(started_at) = record.started_at {
        if started_at > record.completed_at {
            return Err(IngestError::MalformedPayload(
                "task completed before it started".to_string(),
            ));
        }
        let minutes = (record.completed_at - started_at).num_seconds() as f64 / 60.0;
        payload.insert(
            MetricKind::TaskDurationMinutes.key().to_string(),
            Measurement::Numeric(minutes),
        );
    }
    if let Some(scheduled_for) = record.scheduled_for {
        let late = (record.completed_at - scheduled_for).num_seconds().max(0) as f64 / 60.0;
        payload.insert(
            MetricKind::TaskLatenessMinutes.key().to_string(),
            Measurement::Numeric(late),
        );
    }
    let evidence = if record.evidence_provided { "present" } else { "missing" };
    payload.insert(
        EVIDENCE_KEY.to_string(),
        Measurement::Categorical(evidence.to_string()),
    );
    if let Some(resident_id) = record.resident_id.as_ref().filter(|id| !id.trim().is_empty()) {
        payload.insert(
            "resident_id".to_string(),
            Measurement::Categorical(resident_id.clone()),
        );
    }

    let quality = if record.evidence_provided {
        FULL_QUALITY
    } else {
        NO_EVIDENCE_QUALITY
    };

    Ok((
        SubjectRef::caregiver(record.caregiver_id.clone()),
        TASK_COMPLETION,
        Some(record.task_type.clone()),
        record.completed_at,
        payload,
        quality,
    ))
}

fn normalize_staffing(record: &StaffingActionRecord) -> Result<Normalized, IngestError> {
    require("caregiver_id", &record.caregiver_id)?;
    require("action", &record.action)?;

    let mut payload = BTreeMap::new();
    payload.insert(
        "action".to_string(),
        Measurement::Categorical(record.action.clone()),
    );

    Ok((
        SubjectRef::caregiver(record.caregiver_id.clone()),
        STAFFING,
        Some(record.action.clone()),
        record.occurred_at,
        payload,
        FULL_QUALITY,
    ))
}
