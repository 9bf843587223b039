//! Runtime Module
//!
//! Everything that exists per activation rather than per catalog:
//!
//! - [`context`]: shared status/value structures crossing thread boundaries
//! - [`instance`]: line and static-module runtime instances
//! - [`pool`]: the recycling object pool handing out instances
//! - [`workers`]: the bounded worker pool draining the job queue
//! - [`invoker`]: turns a ready module into a unit of work and reports back
//! - [`scheduler`]: the tick loop advancing every active state machine

pub mod context;
pub mod instance;
pub mod invoker;
pub mod pool;
pub mod scheduler;
pub mod workers;

pub use context::{Context, RunStatus, ValueCell};
pub use instance::{LineRuntime, PoolItem, StaticArgSet, StaticRuntime};
pub use pool::{Factory, RuntimePool};
pub use scheduler::{RunStats, Scheduler};
pub use workers::WorkerPool;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks a mutex, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
