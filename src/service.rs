//! Facade wiring the pipeline to its external collaborators
//!
//! Ingestion, reviewer queries and actions, care-mode changes and manual
//! triggers all go through `CareSignalService`.

use crate::aggregator::{IngestOutcome, IngestSummary, ObservationAggregator};
use crate::config::Config;
use crate::error::{IngestError, StoreError};
use crate::events::RawEvent;
use crate::issues::IssueDesk;
use crate::monitoring::PipelineMonitor;
use crate::orchestrator::{
    BacklogWatcher, DispatchOutcome, Pipeline, RunDispatcher, RunSignal, TriggerKind,
};
use crate::state::{CareMode, CareState};
use crate::store::CareStore;
use chrono::Utc;
use log::{error, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub struct CareSignalService {
    store: Arc<dyn CareStore>,
    aggregator: ObservationAggregator,
    watcher: BacklogWatcher,
    dispatcher: Arc<RunDispatcher>,
    desk: IssueDesk,
    monitor: Arc<PipelineMonitor>,
}

impl CareSignalService {
    /// Build the service over a store
    ///
    /// # Arguments
    ///
    /// * `config` - Validated configuration
    /// * `store` - Persistence adapter shared by every component
    /// * `signals` - Queue the backlog watcher writes run signals to
    pub fn new(
        config: &Config,
        store: Arc<dyn CareStore>,
        signals: mpsc::Sender<RunSignal>,
    ) -> Self {
        let monitor = Arc::new(PipelineMonitor::new());
        let pipeline = Arc::new(Pipeline::new(config, Arc::clone(&store)));
        let dispatcher = Arc::new(RunDispatcher::new(
            pipeline,
            config.scheduler.max_concurrent_runs,
            Duration::from_secs(config.scheduler.max_run_seconds),
            Arc::clone(&monitor),
        ));

        Self {
            aggregator: ObservationAggregator::new(Arc::clone(&store)),
            watcher: BacklogWatcher::new(Arc::clone(&store), config.backlog.clone(), signals),
            desk: IssueDesk::new(Arc::clone(&store)),
            store,
            dispatcher,
            monitor,
        }
    }

    /// Ingest one raw event and check the tenant's backlog if it was new
    ///
    /// # Errors
    ///
    /// Returns `IngestError` if the event is malformed or cannot be stored.
    pub fn ingest(&self, raw: RawEvent) -> Result<IngestOutcome, IngestError> {
        let outcome = self.aggregator.ingest(raw)?;
        if let IngestOutcome::Created(event) = &outcome {
            self.check_backlog(&event.tenant_id);
        }
        Ok(outcome)
    }

    /// Ingest many raw events, checking each touched tenant's backlog once
    pub fn ingest_batch<I>(&self, events: I) -> IngestSummary
    where
        I: IntoIterator<Item = RawEvent>,
    {
        let summary = self.aggregator.ingest_batch(events);
        for tenant_id in &summary.tenants {
            self.check_backlog(tenant_id);
        }
        summary
    }

    /// Run the pipeline for a tenant now, outside the schedule
    ///
    /// Still skipped if the tenant is already running.
    pub async fn trigger_now(&self, tenant_id: &str) -> DispatchOutcome {
        info!("Manual run requested for tenant {}", tenant_id);
        self.dispatcher.dispatch(tenant_id, TriggerKind::Manual).await
    }

    pub fn care_state(&self, tenant_id: &str) -> Result<CareState, StoreError> {
        self.store.care_state(tenant_id)
    }

    /// Change a tenant's care mode with optimistic concurrency
    ///
    /// # Errors
    ///
    /// Returns `StoreError::VersionConflict` if `expected_version` is stale.
    pub fn set_care_mode(
        &self,
        tenant_id: &str,
        expected_version: u64,
        mode: CareMode,
        actor: &str,
    ) -> Result<CareState, StoreError> {
        let state = self
            .store
            .update_care_state(tenant_id, expected_version, mode, actor, Utc::now())?;
        info!(
            "Tenant {} care mode set to {:?} by {} (version {})",
            tenant_id, mode, actor, state.version
        );
        Ok(state)
    }

    pub fn desk(&self) -> &IssueDesk {
        &self.desk
    }

    pub fn dispatcher(&self) -> Arc<RunDispatcher> {
        Arc::clone(&self.dispatcher)
    }

    pub fn monitor(&self) -> Arc<PipelineMonitor> {
        Arc::clone(&self.monitor)
    }

    fn check_backlog(&self, tenant_id: &str) {
        if let Err(e) = self.watcher.check(tenant_id) {
            error!("Backlog check failed for tenant {}: {}", tenant_id, e);
        }
    }
}
