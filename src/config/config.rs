use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Longest window any detector or baseline may look back over
const MAX_WINDOW_DAYS: i64 = 365;
const MAX_WINDOW_HOURS: i64 = MAX_WINDOW_DAYS * 24;
const MAX_WINDOW_MINUTES: i64 = MAX_WINDOW_HOURS * 60;

/// Top-level configuration for the care signal service
///
/// Every section falls back to its defaults, so a partial TOML file is valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Scheduled trigger and run limits
    pub scheduler: SchedulerConfig,
    /// Backlog trigger
    pub backlog: BacklogConfig,
    /// Rolling baseline windows and sample gates
    pub baseline: BaselineConfig,
    /// Detector thresholds and windows
    pub detection: DetectionConfig,
    /// Risk weights and level thresholds
    pub scoring: ScoringConfig,
    /// Issue urgencies
    pub priority: PriorityConfig,
    /// Tenants the scheduler ticks over
    pub tenants: TenantsConfig,
}

/// Fixed-interval scheduling and run bounds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between scheduled runs of every tenant
    pub interval_seconds: u64,
    /// Runs exceeding this are cancelled at the next stage boundary
    pub max_run_seconds: u64,
    /// Tenants allowed to run at the same time
    pub max_concurrent_runs: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 300,
            max_run_seconds: 240,
            max_concurrent_runs: 8,
        }
    }
}

/// Event-driven trigger on unprocessed observation backlog
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BacklogConfig {
    /// Unprocessed observations that start a run in normal mode
    pub threshold: usize,
    /// Only observations ingested this recently count towards the backlog
    pub lookback_minutes: i64,
}

impl Default for BacklogConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            lookback_minutes: 60,
        }
    }
}

/// Rolling baseline windows and sample gates
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BaselineConfig {
    /// Window the deviation detector compares against
    pub short_window_days: i64,
    /// Window used for drift and for the minimum sample gate
    pub long_window_days: i64,
    /// Minimum long-window samples for vital-sign metrics
    pub min_samples_clinical: usize,
    /// Minimum long-window samples for task metrics
    pub min_samples_performance: usize,
    /// Sample count at which confidence reaches `high_confidence`
    pub confidence_saturation_samples: usize,
    /// Confidence below the saturation count
    pub low_confidence: f64,
    /// Confidence at or above the saturation count
    pub high_confidence: f64,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            short_window_days: 7,
            long_window_days: 30,
            min_samples_clinical: 7,
            min_samples_performance: 10,
            confidence_saturation_samples: 20,
            low_confidence: 0.7,
            high_confidence: 0.9,
        }
    }
}

/// Detector thresholds, windows and confidences
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectionConfig {
    /// Observations newer than this are "recent"; baselines exclude them
    pub recent_window_hours: i64,
    /// Deviations at or below this many standard deviations are not flagged
    pub deviation_threshold_sigma: f64,
    /// Deviations above this are medium severity
    pub medium_sigma: f64,
    /// Deviations above this are high severity
    pub high_sigma: f64,
    pub deviation_confidence: f64,
    /// Task completions faster than this count as suspiciously fast
    pub fast_completion_minutes: f64,
    /// Fast or unevidenced completions needed to flag a pattern
    pub pattern_min_count: usize,
    pub pattern_window_hours: i64,
    pub pattern_confidence: f64,
    /// Task completions per caregiver above which workload is flagged
    pub volume_ceiling: usize,
    pub volume_window_hours: i64,
    pub volume_confidence: f64,
    /// Recent window averaged for drift against the long-window baseline
    pub drift_recent_days: i64,
    /// Recent samples needed before drift is evaluated
    pub drift_min_samples: usize,
    pub drift_confidence: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            recent_window_hours: 24,
            deviation_threshold_sigma: 2.0,
            medium_sigma: 2.0,
            high_sigma: 3.0,
            deviation_confidence: 0.9,
            fast_completion_minutes: 2.0,
            pattern_min_count: 3,
            pattern_window_hours: 24,
            pattern_confidence: 0.8,
            volume_ceiling: 40,
            volume_window_hours: 24,
            volume_confidence: 0.85,
            drift_recent_days: 3,
            drift_min_samples: 3,
            drift_confidence: 0.75,
        }
    }
}

/// Per-anomaly-type weights and risk level thresholds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScoringConfig {
    /// Points added per deviation anomaly
    pub deviation_weight: f64,
    /// Points added per pattern anomaly
    pub pattern_weight: f64,
    /// Points added per workload anomaly
    pub workload_weight: f64,
    /// Points added per drift anomaly
    pub drift_weight: f64,
    /// Points added per anomaly of any other type
    pub default_weight: f64,
    /// Scores at or above this are medium risk
    pub medium_threshold: f64,
    /// Scores at or above this are high risk
    pub high_threshold: f64,
    /// Confidence attached to resident health risk scores
    pub resident_health_confidence: f64,
    /// Confidence attached to caregiver performance risk scores
    pub caregiver_performance_confidence: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            deviation_weight: 30.0,
            pattern_weight: 20.0,
            workload_weight: 25.0,
            drift_weight: 20.0,
            default_weight: 15.0,
            medium_threshold: 40.0,
            high_threshold: 60.0,
            resident_health_confidence: 0.85,
            caregiver_performance_confidence: 0.80,
        }
    }
}

/// Urgency per risk category, 0-100
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PriorityConfig {
    pub resident_health_urgency: f64,
    pub caregiver_performance_urgency: f64,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            resident_health_urgency: 80.0,
            caregiver_performance_urgency: 70.0,
        }
    }
}

/// Static tenant registry used by the daemon
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TenantsConfig {
    /// Tenant ids ticked by the scheduler
    pub active: Vec<String>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and validate configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ReadError` if the file cannot be read, a TOML error
    /// if it does not parse, and `ConfigError::ValidationError` for bad values.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::ValidationError(msg.to_string()));

        if self.scheduler.interval_seconds == 0 {
            return invalid("scheduler.interval_seconds must be greater than zero");
        }
        if self.scheduler.max_run_seconds == 0 {
            return invalid("scheduler.max_run_seconds must be greater than zero");
        }
        if self.scheduler.max_run_seconds > self.scheduler.interval_seconds {
            return invalid("scheduler.max_run_seconds must not exceed interval_seconds");
        }
        if self.scheduler.max_concurrent_runs == 0 {
            return invalid("scheduler.max_concurrent_runs must be greater than zero");
        }
        if self.backlog.threshold == 0 || self.backlog.lookback_minutes <= 0 {
            return invalid("backlog.threshold and backlog.lookback_minutes must be positive");
        }
        if self.backlog.lookback_minutes > MAX_WINDOW_MINUTES {
            return invalid("backlog.lookback_minutes must not exceed one year");
        }

        let b = &self.baseline;
        if b.short_window_days <= 0 || b.long_window_days < b.short_window_days {
            return invalid("baseline windows must be positive and long >= short");
        }
        if b.long_window_days > MAX_WINDOW_DAYS {
            return invalid("baseline.long_window_days must not exceed 365");
        }
        if b.min_samples_clinical < 2 || b.min_samples_performance < 2 {
            return invalid("baseline minimum sample counts must be at least 2");
        }
        if !is_unit(b.low_confidence) || !is_unit(b.high_confidence) {
            return invalid("baseline confidences must be within [0, 1]");
        }
        if b.low_confidence > b.high_confidence {
            return invalid("baseline.low_confidence must not exceed high_confidence");
        }

        let d = &self.detection;
        for hours in [
            d.recent_window_hours,
            d.pattern_window_hours,
            d.volume_window_hours,
        ] {
            if hours <= 0 || hours > MAX_WINDOW_HOURS {
                return invalid("detection window hours must be within (0, 8760]");
            }
        }
        if d.drift_recent_days <= 0 || d.drift_recent_days > MAX_WINDOW_DAYS {
            return invalid("detection.drift_recent_days must be within (0, 365]");
        }
        if d.deviation_threshold_sigma <= 0.0 || d.medium_sigma >= d.high_sigma {
            return invalid("detection sigma thresholds must be positive and medium < high");
        }
        for confidence in [
            d.deviation_confidence,
            d.pattern_confidence,
            d.volume_confidence,
            d.drift_confidence,
        ] {
            if !is_unit(confidence) {
                return invalid("detector confidences must be within [0, 1]");
            }
        }
        if d.pattern_min_count == 0 || d.volume_ceiling == 0 || d.drift_min_samples == 0 {
            return invalid("detector counts must be greater than zero");
        }

        let s = &self.scoring;
        if s.medium_threshold >= s.high_threshold {
            return invalid("scoring.medium_threshold must be below high_threshold");
        }
        if !is_unit(s.resident_health_confidence) || !is_unit(s.caregiver_performance_confidence)
        {
            return invalid("scoring confidences must be within [0, 1]");
        }
        for weight in [
            s.deviation_weight,
            s.pattern_weight,
            s.workload_weight,
            s.drift_weight,
            s.default_weight,
        ] {
            if weight < 0.0 {
                return invalid("scoring weights must not be negative");
            }
        }

        let p = &self.priority;
        if !(0.0..=100.0).contains(&p.resident_health_urgency)
            || !(0.0..=100.0).contains(&p.caregiver_performance_urgency)
        {
            return invalid("priority urgencies must be within [0, 100]");
        }

        Ok(())
    }
}

fn is_unit(value: f64) -> bool {
    (0.0..=1.0).contains(&value)
}
