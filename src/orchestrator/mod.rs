/// Pipeline orchestration: runs, mutual exclusion, triggers
pub mod dispatcher;
pub mod guard;
pub mod pipeline;
pub mod scheduler;
pub mod watcher;

pub use dispatcher::{DispatchOutcome, RunDispatcher, RunSignal};
pub use guard::{CancelToken, RunGuard, RunPermit};
pub use pipeline::{Pipeline, RunReport, RunState, Stage, StageCounts, TriggerKind};
pub use scheduler::{Scheduler, StaticTenantRegistry, TenantRegistry};
pub use watcher::BacklogWatcher;
