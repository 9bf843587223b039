//! Execution Contexts and Value Cells
//!
//! The two shared mutable structures that cross the scheduler/worker
//! boundary:
//!
//! - [`Context`]: the status + return value of one trigger or module within
//!   one activation, behind a single lock so both fields are always read and
//!   written together
//! - [`ValueCell`]: one argument value slot, behind its own lock
//!
//! Everything else in the runtime is owned by exactly one thread at a time
//! and carries no lock.

use std::fmt;
use std::sync::Mutex;

use super::lock;

/// Execution status of a line, trigger, or module context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Freshly created or recycled; nothing has happened yet.
    Init,
    /// Waiting for requirements (module) or for the trigger (line).
    Wait,
    /// Submitted for execution and possibly executing right now.
    Run,
    /// Execution finished; the return value is meaningful.
    Finish,
    /// Reserved; no transition currently produces it.
    Equal,
    /// A static module that completed and whose outputs live forever.
    Static,
    /// Execution finished against expectations, or a dependency failed.
    Error,
    /// An unrecoverable scheduling fault (failed spawn, failed submit).
    SysError,
    /// Abandoned; the scheduler no longer consults this context.
    Destroy,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RunStatus::Init => "INIT",
            RunStatus::Wait => "WAIT",
            RunStatus::Run => "RUN",
            RunStatus::Finish => "FINISH",
            RunStatus::Equal => "EQUAL",
            RunStatus::Static => "STATIC",
            RunStatus::Error => "ERROR",
            RunStatus::SysError => "SYSERROR",
            RunStatus::Destroy => "DESTROY",
        };
        write!(f, "{}", text)
    }
}

#[derive(Debug)]
struct ContextState {
    status: RunStatus,
    ret: i32,
}

/// Status and return value of one trigger or module execution.
///
/// The scheduler thread drives status transitions; worker threads report
/// completion. Both fields live behind one lock so a reader always sees a
/// consistent (status, ret) pair.
#[derive(Debug)]
pub struct Context {
    state: Mutex<ContextState>,
}

impl Context {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ContextState {
                status: RunStatus::Init,
                ret: 0,
            }),
        }
    }

    /// Reads status and return value together.
    pub fn load(&self) -> (RunStatus, i32) {
        let state = lock(&self.state);
        (state.status, state.ret)
    }

    /// Reads the status alone.
    pub fn status(&self) -> RunStatus {
        lock(&self.state).status
    }

    /// Sets the status, preserving the return value.
    pub fn set_status(&self, status: RunStatus) {
        lock(&self.state).status = status;
    }

    /// Reports an execution result from a worker.
    ///
    /// Returns `false` without writing when the context was abandoned
    /// (`DESTROY`): results of cancelled work are discarded.
    pub fn complete(&self, status: RunStatus, ret: i32) -> bool {
        let mut state = lock(&self.state);
        if state.status == RunStatus::Destroy {
            return false;
        }
        state.status = status;
        state.ret = ret;
        true
    }

    /// Returns the context to its pristine state for reuse.
    pub fn reset(&self) {
        let mut state = lock(&self.state);
        state.status = RunStatus::Init;
        state.ret = 0;
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

/// One argument value slot shared between producer and consumers.
///
/// Literal cells are created holding their text and are never cleared;
/// variable cells start empty and are cleared on recycle.
#[derive(Debug)]
pub struct ValueCell {
    value: Mutex<Option<String>>,
}

impl ValueCell {
    /// An empty cell for a variable argument.
    pub fn empty() -> Self {
        Self {
            value: Mutex::new(None),
        }
    }

    /// A cell pre-filled with literal text.
    pub fn literal(text: impl Into<String>) -> Self {
        Self {
            value: Mutex::new(Some(text.into())),
        }
    }

    /// Snapshots the current value.
    pub fn get(&self) -> Option<String> {
        lock(&self.value).clone()
    }

    /// Replaces the current value.
    pub fn set(&self, value: impl Into<String>) {
        *lock(&self.value) = Some(value.into());
    }

    /// Empties the cell.
    pub fn clear(&self) {
        *lock(&self.value) = None;
    }

    pub fn is_set(&self) -> bool {
        lock(&self.value).is_some()
    }
}
