//! Engine Settings
//!
//! Startup configuration for the scheduler and worker pool. Values come from
//! the catalog's optional `settings` section and can be overridden per run by
//! command-line flags; all fields have defaults, so the section may be
//! omitted entirely.

use std::time::Duration;

use log::warn;
use serde::Deserialize;

/// Default maximum number of concurrently active line instances.
pub const DEFAULT_MAX_LINES: usize = 8;

/// Default pending-job queue depth.
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

/// Default scheduler tick interval in milliseconds.
pub const DEFAULT_TICK_MS: u64 = 100;

/// Tuning knobs supplied once before the scheduler starts.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Maximum line instances active at once.
    pub max_lines: usize,

    /// Worker threads draining the job queue.
    pub workers: usize,

    /// Bounded job-queue depth; submission blocks when full.
    pub queue_depth: usize,

    /// Scheduler tick interval in milliseconds.
    pub tick_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_lines: DEFAULT_MAX_LINES,
            workers: num_cpus::get(),
            queue_depth: DEFAULT_QUEUE_DEPTH,
            tick_ms: DEFAULT_TICK_MS,
        }
    }
}

impl EngineSettings {
    /// The tick interval as a [`Duration`].
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// Clamps zero-valued knobs up to their working minimum.
    pub fn normalized(mut self) -> Self {
        if self.max_lines == 0 {
            warn!("settings: max_lines 0 clamped to 1");
            self.max_lines = 1;
        }
        if self.workers == 0 {
            warn!("settings: workers 0 clamped to 1");
            self.workers = 1;
        }
        if self.queue_depth == 0 {
            warn!("settings: queue_depth 0 clamped to 1");
            self.queue_depth = 1;
        }
        self
    }
}
