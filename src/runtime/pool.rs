//! Recycling Object Pool
//!
//! Keyed pool of runtime instances. `obtain` prefers an idle instance and
//! falls back to the registered factory; `release` recycles the instance and
//! parks it for reuse. Active instance ids are tracked so releasing
//! something the pool never handed out is rejected instead of parked.
//!
//! One lock guards the whole pool. Obtain and release are scheduler-side
//! operations that happen a handful of times per tick, far from any
//! contention worth sharding for.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use log::{debug, warn};

use crate::error::PoolError;

use super::instance::PoolItem;
use super::lock;

/// Builds a fresh instance with the pool-assigned id.
pub type Factory<R> = Box<dyn Fn(u64) -> R + Send>;

struct Inner<R> {
    factories: HashMap<String, Factory<R>>,
    idle: HashMap<String, Vec<R>>,
    active: HashSet<u64>,
    next_id: u64,
}

/// Recycling pool of runtime instances, keyed by definition name.
pub struct RuntimePool<R: PoolItem> {
    inner: Mutex<Inner<R>>,
}

impl<R: PoolItem> RuntimePool<R> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                factories: HashMap::new(),
                idle: HashMap::new(),
                active: HashSet::new(),
                next_id: 1,
            }),
        }
    }

    /// Registers a factory under a definition name.
    pub fn register(&self, name: impl Into<String>, factory: Factory<R>) {
        lock(&self.inner).factories.insert(name.into(), factory);
    }

    /// Replaces every registered factory and drops all pooled instances.
    pub fn init(&self, factories: impl IntoIterator<Item = (String, Factory<R>)>) {
        let mut inner = lock(&self.inner);
        inner.factories = factories.into_iter().collect();
        inner.idle.clear();
        inner.active.clear();
        inner.next_id = 1;
    }

    /// Hands out an instance: an idle one when available, a fresh one
    /// otherwise.
    pub fn obtain(&self, name: &str) -> Result<R, PoolError> {
        let mut inner = lock(&self.inner);

        if let Some(instance) = inner.idle.get_mut(name).and_then(|v| v.pop()) {
            let id = instance.instance_id();
            inner.active.insert(id);
            debug!("pool: reusing idle instance {} of '{}'", id, name);
            return Ok(instance);
        }

        let id = inner.next_id;
        let instance = match inner.factories.get(name) {
            Some(factory) => factory(id),
            None => {
                return Err(PoolError::UnknownDefinition {
                    name: name.to_string(),
                })
            }
        };
        inner.next_id += 1;
        inner.active.insert(id);
        debug!("pool: built instance {} of '{}'", id, name);
        Ok(instance)
    }

    /// Recycles an active instance and parks it for reuse.
    ///
    /// An instance the pool is not tracking as active is dropped and
    /// reported, not parked.
    pub fn release(&self, mut instance: R) -> Result<(), PoolError> {
        let mut inner = lock(&self.inner);

        if !inner.active.remove(&instance.instance_id()) {
            warn!(
                "pool: dropping untracked instance {} of '{}'",
                instance.instance_id(),
                instance.definition_name()
            );
            return Err(PoolError::NotActive {
                name: instance.definition_name().to_string(),
            });
        }

        instance.recycle();
        inner
            .idle
            .entry(instance.definition_name().to_string())
            .or_default()
            .push(instance);
        Ok(())
    }

    /// Idle instances parked under a definition name.
    pub fn idle_count(&self, name: &str) -> usize {
        lock(&self.inner).idle.get(name).map_or(0, Vec::len)
    }

    /// Instances currently handed out.
    pub fn active_count(&self) -> usize {
        lock(&self.inner).active.len()
    }
}

impl<R: PoolItem> Default for RuntimePool<R> {
    fn default() -> Self {
        Self::new()
    }
}
