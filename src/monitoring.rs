//! Self-monitoring for the pipeline daemon
//!
//! Tracks how runs end (completed, failed, skipped, timed out, aborted) and how
//! long they take, so the daemon can log its own health periodically.

use crate::orchestrator::{RunReport, RunState};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Point-in-time view of the monitor's counters
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorSnapshot {
    pub runs_completed: u64,
    pub runs_failed: u64,
    /// Concurrency skips plus completed runs that had nothing to do
    pub runs_skipped: u64,
    pub runs_timed_out: u64,
    /// Runs whose worker panicked before producing a report
    pub runs_aborted: u64,
    /// Mean over the most recent latency samples, in milliseconds
    pub avg_run_latency_ms: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Counters {
    completed: u64,
    failed: u64,
    skipped: u64,
    timed_out: u64,
    aborted: u64,
    latencies: VecDeque<Duration>,
}

/// Collects run outcomes from the dispatcher
#[derive(Debug)]
pub struct PipelineMonitor {
    counters: Mutex<Counters>,
    max_latency_samples: usize,
}

impl Default for PipelineMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMonitor {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(Counters::default()),
            max_latency_samples: 100,
        }
    }

    /// Record a run that returned a report within its time limit
    pub fn record_report(&self, report: &RunReport, latency: Duration) {
        let mut counters = self.lock();
        match report.state {
            RunState::Completed if report.skip_reason.is_some() => counters.skipped += 1,
            RunState::Completed => counters.completed += 1,
            RunState::Failed => counters.failed += 1,
            RunState::Idle | RunState::Running => {
                warn!("Run {} reported while still {}", report.run_id, report.state);
            }
        }
        self.push_latency(&mut counters, latency);
    }

    /// Record a trigger dropped because the tenant was already running
    pub fn record_skip(&self) {
        self.lock().skipped += 1;
    }

    /// Record a run that overran its limit and was cancelled
    pub fn record_timeout(&self, latency: Duration) {
        let mut counters = self.lock();
        counters.timed_out += 1;
        self.push_latency(&mut counters, latency);
    }

    /// Record a run whose worker died without returning a report
    pub fn record_abort(&self, latency: Duration) {
        let mut counters = self.lock();
        counters.aborted += 1;
        self.push_latency(&mut counters, latency);
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        let counters = self.lock();
        let avg_run_latency_ms = if counters.latencies.is_empty() {
            0.0
        } else {
            let total: Duration = counters.latencies.iter().sum();
            total.as_secs_f64() * 1000.0 / counters.latencies.len() as f64
        };

        MonitorSnapshot {
            runs_completed: counters.completed,
            runs_failed: counters.failed,
            runs_skipped: counters.skipped,
            runs_timed_out: counters.timed_out,
            runs_aborted: counters.aborted,
            avg_run_latency_ms,
            timestamp: Utc::now(),
        }
    }

    /// Log a one-line health summary
    pub fn log_summary(&self) {
        let snapshot = self.snapshot();
        info!(
            "Pipeline health: {} completed, {} failed, {} skipped, {} timed out, {} aborted, avg latency {:.1}ms",
            snapshot.runs_completed,
            snapshot.runs_failed,
            snapshot.runs_skipped,
            snapshot.runs_timed_out,
            snapshot.runs_aborted,
            snapshot.avg_run_latency_ms
        );
        if snapshot.runs_aborted > 0 {
            warn!("{} run workers died since startup", snapshot.runs_aborted);
        }
        if snapshot.runs_timed_out > 0 {
            warn!(
                "{} runs exceeded their time limit since startup",
                snapshot.runs_timed_out
            );
        }
    }

    fn push_latency(&self, counters: &mut Counters, latency: Duration) {
        counters.latencies.push_back(latency);
        while counters.latencies.len() > self.max_latency_samples {
            counters.latencies.pop_front();
        }
        debug!("Run latency recorded: {:?}", latency);
    }

    // Counters stay meaningful after a panic elsewhere, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
