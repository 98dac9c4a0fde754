//! Single entry point for starting tenant runs
//!
//! Scheduled, backlog and manual triggers all end up here. The dispatcher
//! enforces one active run per tenant, bounds how many tenants run at once,
//! and cancels runs that overrun their time limit.

use crate::events::{TenantId, Timestamp};
use crate::monitoring::PipelineMonitor;
use crate::orchestrator::{CancelToken, Pipeline, RunGuard, RunReport, RunState, TriggerKind};
use chrono::Utc;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinError;

/// Request to run the pipeline for one tenant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSignal {
    pub tenant_id: TenantId,
    pub trigger: TriggerKind,
}

impl RunSignal {
    pub fn new(tenant_id: impl Into<TenantId>, trigger: TriggerKind) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            trigger,
        }
    }
}

/// What happened to a dispatch request
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// The tenant already had an active run
    Skipped,
    Finished(RunReport),
    /// The run overran its limit and stopped at the next checkpoint
    TimedOut(RunReport),
    /// The run could not be started or its worker died
    Aborted(String),
}

pub struct RunDispatcher {
    pipeline: Arc<Pipeline>,
    guard: RunGuard,
    workers: Arc<Semaphore>,
    max_run: Duration,
    monitor: Arc<PipelineMonitor>,
}

impl RunDispatcher {
    /// Create a dispatcher
    ///
    /// # Arguments
    ///
    /// * `pipeline` - Pipeline executed for each run
    /// * `max_concurrent_runs` - Upper bound on tenants running at once
    /// * `max_run` - Time after which a run is cancelled
    /// * `monitor` - Receives every run outcome
    pub fn new(
        pipeline: Arc<Pipeline>,
        max_concurrent_runs: usize,
        max_run: Duration,
        monitor: Arc<PipelineMonitor>,
    ) -> Self {
        Self {
            pipeline,
            guard: RunGuard::new(),
            workers: Arc::new(Semaphore::new(max_concurrent_runs.max(1))),
            max_run,
            monitor,
        }
    }

    /// Current state of a tenant as seen by the dispatcher
    pub fn state_of(&self, tenant_id: &str) -> RunState {
        if self.guard.is_running(tenant_id) {
            RunState::Running
        } else {
            RunState::Idle
        }
    }

    /// Run the pipeline for a tenant unless it is already running
    ///
    /// A trigger that finds the tenant busy returns `Skipped` immediately.
    pub async fn dispatch(&self, tenant_id: &str, trigger: TriggerKind) -> DispatchOutcome {
        let Some(permit) = self.guard.try_acquire(tenant_id) else {
            debug!(
                "Tenant {} already running, skipping {:?} trigger",
                tenant_id, trigger
            );
            self.monitor.record_skip();
            return DispatchOutcome::Skipped;
        };

        let slot = match Arc::clone(&self.workers).acquire_owned().await {
            Ok(slot) => slot,
            Err(e) => {
                error!("Worker pool closed, cannot run tenant {}: {}", tenant_id, e);
                return DispatchOutcome::Aborted(e.to_string());
            }
        };

        let cancel = CancelToken::new();
        let token = cancel.clone();
        let pipeline = Arc::clone(&self.pipeline);
        let tenant = tenant_id.to_string();
        let started = Instant::now();
        let started_at = Utc::now();

        // The permit and worker slot travel with the blocking task so they are
        // only released once the pipeline has actually stopped.
        let mut handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let _slot = slot;
            pipeline.run(&tenant, trigger, &token)
        });

        match tokio::time::timeout(self.max_run, &mut handle).await {
            Ok(Ok(report)) => {
                self.monitor.record_report(&report, started.elapsed());
                DispatchOutcome::Finished(report)
            }
            Ok(Err(e)) => self.worker_died(tenant_id, trigger, started_at, started, e),
            Err(_) => {
                warn!(
                    "Run for tenant {} exceeded {:?}, cancelling",
                    tenant_id, self.max_run
                );
                cancel.cancel();
                match handle.await {
                    Ok(report) => {
                        self.monitor.record_timeout(started.elapsed());
                        DispatchOutcome::TimedOut(report)
                    }
                    Err(e) => self.worker_died(tenant_id, trigger, started_at, started, e),
                }
            }
        }
    }

    /// Record a run whose blocking worker panicked or was cancelled
    fn worker_died(
        &self,
        tenant_id: &str,
        trigger: TriggerKind,
        started_at: Timestamp,
        started: Instant,
        e: JoinError,
    ) -> DispatchOutcome {
        error!("Run worker for tenant {} died: {}", tenant_id, e);
        let reason = format!("run worker died: {}", e);
        let report = RunReport::aborted(tenant_id, trigger, started_at, reason.clone());
        if let Err(e) = self.pipeline.store().record_run(report) {
            error!("Failed to record aborted run for tenant {}: {}", tenant_id, e);
        }
        self.monitor.record_abort(started.elapsed());
        DispatchOutcome::Aborted(reason)
    }

    /// Consume run signals until every sender is dropped
    ///
    /// Each signal is dispatched on its own task so tenants never wait on each other.
    pub async fn serve(self: Arc<Self>, mut signals: mpsc::Receiver<RunSignal>) {
        info!("Run dispatcher listening for signals");
        while let Some(signal) = signals.recv().await {
            let dispatcher = Arc::clone(&self);
            tokio::spawn(async move {
                dispatcher
                    .dispatch(&signal.tenant_id, signal.trigger)
                    .await;
            });
        }
        info!("Run dispatcher stopped: all signal senders closed");
    }
}
