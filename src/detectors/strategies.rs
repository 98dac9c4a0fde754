//! Built-in detector strategies
//!
//! Each strategy reads observations and baselines through the `DetectionContext`
//! and returns anomalies of its own type. None of them suppresses another.

use crate::baseline::Baseline;
use crate::config::DetectionConfig;
use crate::detectors::{Anomaly, AnomalyType, DetectionContext, Detector};
use crate::error::DetectionError;
use crate::events::{MetricKind, Severity, SubjectKind, SubjectRef, EVIDENCE_KEY, TASK_COMPLETION};
use chrono::Duration;
use serde_json::json;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// Distance of `value` from the baseline's short-window mean, in standard deviations
///
/// Returns `None` when the baseline has no spread to measure against.
pub fn deviation_sigma(value: f64, baseline: &Baseline) -> Option<f64> {
    let stats = baseline.short_window;
    if stats.sample_count == 0 || stats.stddev <= 0.0 {
        return None;
    }
    Some((value - stats.mean).abs() / stats.stddev)
}

/// Severity for a deviation, or `None` if it does not cross the flag threshold
pub fn classify_deviation(sigma: f64, config: &DetectionConfig) -> Option<Severity> {
    if sigma <= config.deviation_threshold_sigma {
        None
    } else if sigma > config.high_sigma {
        Some(Severity::High)
    } else if sigma > config.medium_sigma {
        Some(Severity::Medium)
    } else {
        Some(Severity::Low)
    }
}

/// Flags recent single readings far from the subject's 7-day mean
pub struct DeviationDetector;

impl Detector for DeviationDetector {
    fn name(&self) -> &str {
        "DeviationDetector"
    }

    fn detect(&self, ctx: &DetectionContext<'_>) -> Result<Vec<Anomaly>, DetectionError> {
        let config = ctx.config;
        let recent_start = ctx.now - Duration::hours(config.recent_window_hours);
        let mut baselines: HashMap<(SubjectRef, MetricKind), Option<Baseline>> = HashMap::new();
        let mut anomalies = Vec::new();

        for event in ctx.fresh.iter().filter(|e| e.timestamp >= recent_start) {
            for (metric, value) in event.metrics() {
                let baseline = match baselines.entry((event.subject.clone(), metric)) {
                    Entry::Occupied(entry) => entry.into_mut(),
                    Entry::Vacant(entry) => {
                        entry.insert(ctx.store.baseline(ctx.tenant_id, &event.subject, metric)?)
                    }
                };
                let Some(baseline) = baseline.as_ref() else {
                    continue;
                };
                let Some(sigma) = deviation_sigma(value, baseline) else {
                    continue;
                };
                let Some(severity) = classify_deviation(sigma, config) else {
                    continue;
                };

                let mean = baseline.short_window.mean;
                let direction = if value >= mean { "above" } else { "below" };
                anomalies.push(
                    ctx.anomaly(
                        &event.subject,
                        AnomalyType::Deviation,
                        metric.key(),
                        severity,
                        (recent_start, ctx.now),
                    )
                    .with_values(Some(mean), Some(value))
                    .with_deviation(sigma)
                    .with_confidence(config.deviation_confidence)
                    .with_details(json!({
                        "metric": metric.key(),
                        "observation_id": event.id,
                        "observed_at": event.timestamp,
                        "direction": direction,
                        "baseline_stddev": baseline.short_window.stddev,
                        "baseline_samples": baseline.short_window.sample_count,
                    }))
                    .with_dedup_key(format!("deviation:{}:{}", event.id, metric)),
                );
            }
        }

        Ok(anomalies)
    }
}

/// Flags caregivers with recurring suspicious task completions in a window
///
/// Two count-based conditions are checked: completions faster than
/// `fast_completion_minutes`, and completions without evidence.
pub struct PatternDetector;

impl Detector for PatternDetector {
    fn name(&self) -> &str {
        "PatternDetector"
    }

    fn detect(&self, ctx: &DetectionContext<'_>) -> Result<Vec<Anomaly>, DetectionError> {
        let config = ctx.config;
        let window = (ctx.now - Duration::hours(config.pattern_window_hours), ctx.now);
        let min_count = config.pattern_min_count;
        let mut anomalies = Vec::new();

        for caregiver in ctx.fresh_subjects(SubjectKind::Caregiver) {
            let completions: Vec<_> = ctx
                .store
                .observations_for_subject(ctx.tenant_id, &caregiver, window.0, window.1)?
                .into_iter()
                .filter(|event| event.event_type == TASK_COMPLETION)
                .collect();

            let fast = completions
                .iter()
                .filter(|event| {
                    event
                        .metric(MetricKind::TaskDurationMinutes)
                        .is_some_and(|minutes| minutes < config.fast_completion_minutes)
                })
                .count();
            if fast >= min_count {
                let severity = if fast >= min_count * 2 {
                    Severity::High
                } else {
                    Severity::Medium
                };
                anomalies.push(
                    ctx.anomaly(
                        &caregiver,
                        AnomalyType::Pattern,
                        "rapid_task_completion",
                        severity,
                        window,
                    )
                    .with_values(Some(min_count as f64), Some(fast as f64))
                    .with_confidence(config.pattern_confidence)
                    .with_details(json!({
                        "fast_completions": fast,
                        "total_completions": completions.len(),
                        "fast_threshold_minutes": config.fast_completion_minutes,
                    })),
                );
            }

            let missing_evidence = completions
                .iter()
                .filter(|event| {
                    event
                        .payload
                        .get(EVIDENCE_KEY)
                        .and_then(|m| m.as_str())
                        .is_some_and(|value| value == "missing")
                })
                .count();
            if missing_evidence >= min_count {
                anomalies.push(
                    ctx.anomaly(
                        &caregiver,
                        AnomalyType::Pattern,
                        "missing_evidence",
                        Severity::Low,
                        window,
                    )
                    .with_values(Some(min_count as f64), Some(missing_evidence as f64))
                    .with_confidence(config.pattern_confidence)
                    .with_details(json!({
                        "missing_evidence": missing_evidence,
                        "total_completions": completions.len(),
                    })),
                );
            }
        }

        Ok(anomalies)
    }
}

/// Flags caregivers whose event count in a window exceeds an absolute ceiling
pub struct VolumeDetector;

impl VolumeDetector {
    /// Severity scales with how far the count is over the ceiling
    pub fn severity_for(count: usize, ceiling: usize) -> Option<Severity> {
        if count <= ceiling {
            return None;
        }
        let ratio = count as f64 / ceiling as f64;
        Some(if ratio >= 2.0 {
            Severity::High
        } else if ratio >= 1.5 {
            Severity::Medium
        } else {
            Severity::Low
        })
    }
}

impl Detector for VolumeDetector {
    fn name(&self) -> &str {
        "VolumeDetector"
    }

    fn detect(&self, ctx: &DetectionContext<'_>) -> Result<Vec<Anomaly>, DetectionError> {
        let config = ctx.config;
        let window = (ctx.now - Duration::hours(config.volume_window_hours), ctx.now);
        let mut anomalies = Vec::new();

        for caregiver in ctx.fresh_subjects(SubjectKind::Caregiver) {
            let count = ctx
                .store
                .observations_for_subject(ctx.tenant_id, &caregiver, window.0, window.1)?
                .len();

            if let Some(severity) = Self::severity_for(count, config.volume_ceiling) {
                anomalies.push(
                    ctx.anomaly(
                        &caregiver,
                        AnomalyType::Workload,
                        "excessive_workload",
                        severity,
                        window,
                    )
                    .with_values(Some(config.volume_ceiling as f64), Some(count as f64))
                    .with_confidence(config.volume_confidence)
                    .with_details(json!({
                        "event_count": count,
                        "ceiling": config.volume_ceiling,
                        "window_hours": config.volume_window_hours,
                    })),
                );
            }
        }

        Ok(anomalies)
    }
}

/// Flags caregivers whose recent average for a performance metric exceeds
/// the 30-day baseline mean plus one standard deviation
pub struct DriftDetector;

impl DriftDetector {
    const METRICS: [MetricKind; 2] = [
        MetricKind::TaskDurationMinutes,
        MetricKind::TaskLatenessMinutes,
    ];

    /// Severity for a recent average against a baseline, `None` if within mean + 1 sd
    pub fn evaluate(recent_average: f64, baseline: &Baseline) -> Option<(Severity, Option<f64>)> {
        let reference = baseline.long_window;
        if recent_average <= reference.mean + reference.stddev {
            return None;
        }
        if reference.stddev <= 0.0 {
            return Some((Severity::Low, None));
        }

        let excess = (recent_average - reference.mean) / reference.stddev;
        let severity = if excess > 3.0 {
            Severity::High
        } else if excess > 2.0 {
            Severity::Medium
        } else {
            Severity::Low
        };
        Some((severity, Some(excess)))
    }
}

impl Detector for DriftDetector {
    fn name(&self) -> &str {
        "DriftDetector"
    }

    fn detect(&self, ctx: &DetectionContext<'_>) -> Result<Vec<Anomaly>, DetectionError> {
        let config = ctx.config;
        let window = (ctx.now - Duration::days(config.drift_recent_days), ctx.now);
        let mut anomalies = Vec::new();

        for caregiver in ctx.fresh_subjects(SubjectKind::Caregiver) {
            let recent =
                ctx.store
                    .observations_for_subject(ctx.tenant_id, &caregiver, window.0, window.1)?;

            for metric in Self::METRICS {
                let Some(baseline) = ctx.store.baseline(ctx.tenant_id, &caregiver, metric)? else {
                    continue;
                };
                let values: Vec<f64> = recent.iter().filter_map(|e| e.metric(metric)).collect();
                if values.len() < config.drift_min_samples {
                    continue;
                }

                let average = values.iter().sum::<f64>() / values.len() as f64;
                let Some((severity, excess)) = Self::evaluate(average, &baseline) else {
                    continue;
                };

                let mut anomaly = ctx
                    .anomaly(&caregiver, AnomalyType::Drift, metric.key(), severity, window)
                    .with_values(Some(baseline.long_window.mean), Some(average))
                    .with_confidence(config.drift_confidence)
                    .with_details(json!({
                        "metric": metric.key(),
                        "recent_samples": values.len(),
                        "baseline_stddev": baseline.long_window.stddev,
                        "baseline_samples": baseline.long_window.sample_count,
                    }));
                if let Some(excess) = excess {
                    anomaly = anomaly.with_deviation(excess);
                }
                anomalies.push(anomaly);
            }
        }

        Ok(anomalies)
    }
}
