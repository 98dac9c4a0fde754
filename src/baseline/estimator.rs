//! Rolling statistical baselines per (tenant, subject, metric)
//!
//! A baseline holds a short (7-day) and a long (30-day) window of mean and sample
//! standard deviation. Windows end where the recent detection window begins, so a
//! fresh reading never dilutes the reference it is compared against.

use crate::config::BaselineConfig;
use crate::error::StoreError;
use crate::events::{MetricCategory, MetricKind, SubjectRef, TenantId, Timestamp};
use crate::store::CareStore;
use chrono::Duration;
use log::debug;
use serde::{Deserialize, Serialize};

/// Mean, sample standard deviation and sample count over one window
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct WindowStats {
    pub mean: f64,
    /// Sample standard deviation (n - 1); zero with fewer than two samples
    pub stddev: f64,
    pub sample_count: usize,
}

impl WindowStats {
    /// Compute stats over `values`; `None` when empty
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }

        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let stddev = if values.len() < 2 {
            0.0
        } else {
            let sum_sq: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
            (sum_sq / (n - 1.0)).sqrt()
        };

        Some(Self {
            mean,
            stddev,
            sample_count: values.len(),
        })
    }
}

/// Rolling expectation for one subject's metric
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Baseline {
    pub tenant_id: TenantId,
    pub subject: SubjectRef,
    pub metric: MetricKind,
    /// 7-day window (reference for deviation detection)
    pub short_window: WindowStats,
    /// 30-day window (reference for drift detection)
    pub long_window: WindowStats,
    /// Samples backing the baseline (the long window count)
    pub sample_count: usize,
    pub confidence: f64,
    pub computed_at: Timestamp,
}

/// Result of a recompute request
#[derive(Debug, Clone, PartialEq)]
pub enum RecomputeOutcome {
    /// A new baseline replaced whatever was stored
    Replaced(Baseline),
    /// Too few samples; any existing baseline was left untouched
    Skipped { samples: usize, required: usize },
}

/// Computes and replaces baselines from stored observations
#[derive(Debug, Clone)]
pub struct BaselineEstimator {
    config: BaselineConfig,
    recent_window: Duration,
}

impl BaselineEstimator {
    /// Create an estimator whose windows stop `recent_window` before now
    pub fn new(config: BaselineConfig, recent_window: Duration) -> Self {
        Self {
            config,
            recent_window,
        }
    }

    /// Minimum samples required before a baseline may be (re)computed
    pub fn min_samples(&self, metric: MetricKind) -> usize {
        match metric.category() {
            MetricCategory::Clinical => self.config.min_samples_clinical,
            MetricCategory::Performance => self.config.min_samples_performance,
        }
    }

    /// Confidence grows with sample count and saturates at `high_confidence`
    pub fn confidence_for(&self, samples: usize) -> f64 {
        if samples >= self.config.confidence_saturation_samples {
            self.config.high_confidence
        } else {
            self.config.low_confidence
        }
    }

    /// Build a baseline from timestamped samples without touching storage
    ///
    /// Samples outside `[now - long_window, now - recent_window)` are ignored.
    pub fn compute(
        &self,
        tenant_id: &str,
        subject: &SubjectRef,
        metric: MetricKind,
        samples: &[(Timestamp, f64)],
        now: Timestamp,
    ) -> RecomputeOutcome {
        let window_end = now - self.recent_window;
        let long_start = window_end - Duration::days(self.config.long_window_days);
        let short_start = window_end - Duration::days(self.config.short_window_days);

        let long_values: Vec<f64> = samples
            .iter()
            .filter(|(ts, v)| *ts >= long_start && *ts < window_end && v.is_finite())
            .map(|(_, v)| *v)
            .collect();
        let short_values: Vec<f64> = samples
            .iter()
            .filter(|(ts, v)| *ts >= short_start && *ts < window_end && v.is_finite())
            .map(|(_, v)| *v)
            .collect();

        let required = self.min_samples(metric);
        let long_window = match WindowStats::from_values(&long_values) {
            Some(stats) if long_values.len() >= required => stats,
            _ => {
                return RecomputeOutcome::Skipped {
                    samples: long_values.len(),
                    required,
                }
            }
        };
        let short_window = WindowStats::from_values(&short_values).unwrap_or(WindowStats {
            mean: long_window.mean,
            stddev: 0.0,
            sample_count: 0,
        });

        RecomputeOutcome::Replaced(Baseline {
            tenant_id: tenant_id.to_string(),
            subject: subject.clone(),
            metric,
            short_window,
            long_window,
            sample_count: long_window.sample_count,
            confidence: self.confidence_for(long_window.sample_count),
            computed_at: now,
        })
    }

    /// Pull the subject's observations, recompute, and replace the stored baseline
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if reading observations or writing the baseline fails.
    pub fn recompute(
        &self,
        store: &dyn CareStore,
        tenant_id: &str,
        subject: &SubjectRef,
        metric: MetricKind,
        now: Timestamp,
    ) -> Result<RecomputeOutcome, StoreError> {
        let window_end = now - self.recent_window;
        let long_start = window_end - Duration::days(self.config.long_window_days);

        let samples: Vec<(Timestamp, f64)> = store
            .observations_for_subject(tenant_id, subject, long_start, window_end)?
            .iter()
            .filter_map(|event| event.metric(metric).map(|value| (event.timestamp, value)))
            .collect();

        let outcome = self.compute(tenant_id, subject, metric, &samples, now);
        match &outcome {
            RecomputeOutcome::Replaced(baseline) => {
                store.replace_baseline(baseline.clone())?;
                debug!(
                    "Baseline for {} {} replaced: mean7={:.2} sd7={:.2} n={}",
                    subject, metric, baseline.short_window.mean, baseline.short_window.stddev,
                    baseline.sample_count
                );
            }
            RecomputeOutcome::Skipped { samples, required } => {
                debug!(
                    "Baseline for {} {} skipped: {} samples, {} required",
                    subject, metric, samples, required
                );
            }
        }

        Ok(outcome)
    }
}
