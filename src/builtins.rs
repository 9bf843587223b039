//! Stock Callbacks
//!
//! A small set of in-process callbacks registered by the binary, so a
//! catalog can be exercised without shipping shared objects or external
//! programs:
//!
//! - `emit`: copies its first input into every output, returns 0
//! - `pulse`: sleeps (first input, milliseconds), writes the current epoch
//!   millisecond timestamp into every output, returns 0
//! - `print`: logs its inputs, returns 0
//! - `fail`: returns its first input parsed as an integer, or 1
//!
//! Library users register their own callbacks through
//! [`CallbackTable::register`] instead.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::info;
use once_cell::sync::Lazy;

use crate::catalog::registry::{CallbackTable, ModuleFn};
use crate::runtime::context::ValueCell;

/// Sleep applied by `pulse` when no interval input is given.
pub const DEFAULT_PULSE_MS: u64 = 1000;

static STOCK: Lazy<Vec<(&'static str, ModuleFn)>> = Lazy::new(|| {
    vec![
        ("emit", Arc::new(emit) as ModuleFn),
        ("pulse", Arc::new(pulse) as ModuleFn),
        ("print", Arc::new(print) as ModuleFn),
        ("fail", Arc::new(fail) as ModuleFn),
    ]
});

/// A callback table holding every stock callback.
pub fn stock_table() -> CallbackTable {
    let mut table = CallbackTable::new();
    for (symbol, callback) in STOCK.iter() {
        table.insert(*symbol, Arc::clone(callback));
    }
    table
}

fn emit(inputs: &[Arc<ValueCell>], outputs: &[Arc<ValueCell>]) -> i32 {
    let value = inputs.first().and_then(|cell| cell.get()).unwrap_or_default();
    for cell in outputs {
        cell.set(value.clone());
    }
    0
}

fn pulse(inputs: &[Arc<ValueCell>], outputs: &[Arc<ValueCell>]) -> i32 {
    let ms = inputs
        .first()
        .and_then(|cell| cell.get())
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(DEFAULT_PULSE_MS);
    thread::sleep(Duration::from_millis(ms));

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    for cell in outputs {
        cell.set(now.to_string());
    }
    0
}

fn print(inputs: &[Arc<ValueCell>], _outputs: &[Arc<ValueCell>]) -> i32 {
    let joined = inputs
        .iter()
        .map(|cell| cell.get().unwrap_or_default())
        .collect::<Vec<_>>()
        .join(", ");
    info!("print: [{}]", joined);
    0
}

fn fail(inputs: &[Arc<ValueCell>], _outputs: &[Arc<ValueCell>]) -> i32 {
    inputs
        .first()
        .and_then(|cell| cell.get())
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(1)
}
