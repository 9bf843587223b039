//! Runtime Instances
//!
//! The stateful counterparts of the immutable catalog structures:
//!
//! - [`LineRuntime`]: one pooled activation of a line, holding its contexts
//!   and argument value cells
//! - [`StaticRuntime`]: the single long-lived instance of a static module
//! - [`StaticArgSet`]: the process-wide, set-once slots where static-module
//!   outputs become readable by every line
//!
//! All of them reference catalog data through `Arc` handles; the catalog
//! itself is never copied per instance.

use std::sync::Arc;

use log::debug;
use once_cell::sync::OnceCell;

use crate::catalog::line::{ArgKind, ArgSpec, Line, ModIx, StaticModule};

use super::context::{Context, RunStatus, ValueCell};

/// An object a [`super::pool::RuntimePool`] can hold.
pub trait PoolItem {
    /// Name of the definition this instance was built from.
    fn definition_name(&self) -> &str;

    /// Pool-assigned instance id, unique within one pool.
    fn instance_id(&self) -> u64;

    /// Returns the instance to its pristine state before it goes idle.
    fn recycle(&mut self);
}

/// Process-wide set of static-module output cells.
///
/// One slot per declared static output, in catalog order. Slots are
/// installed once during the static phase and are readable forever after;
/// a slot that was never installed reads as unset.
pub struct StaticArgSet {
    specs: Vec<ArgSpec>,
    slots: Vec<OnceCell<Arc<ValueCell>>>,
}

impl StaticArgSet {
    pub fn new(specs: Vec<ArgSpec>) -> Self {
        let slots = specs.iter().map(|_| OnceCell::new()).collect();
        Self { specs, slots }
    }

    /// Installs a produced output cell into its slot.
    ///
    /// A slot keeps its first cell; repeated installs are dropped.
    pub fn install(&self, slot: usize, cell: Arc<ValueCell>) {
        if self.slots[slot].set(cell).is_err() {
            debug!("static slot {} already installed, keeping first", slot);
        }
    }

    /// The cell behind a slot, if its static module has run.
    pub fn cell(&self, slot: usize) -> Option<Arc<ValueCell>> {
        self.slots.get(slot).and_then(|s| s.get().map(Arc::clone))
    }

    pub fn spec(&self, slot: usize) -> &ArgSpec {
        &self.specs[slot]
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// One pooled activation of a line.
///
/// Owns the trigger context, one context per module, and one value cell per
/// interned argument identity. Literal cells are created already holding
/// their text; variable cells start empty and are cleared on recycle.
pub struct LineRuntime {
    id: u64,
    line: Arc<Line>,
    /// Line-level status. Only the scheduler thread reads or writes it, so
    /// it lives outside any lock.
    pub status: RunStatus,
    trigger_ctx: Arc<Context>,
    mod_ctxs: Vec<Arc<Context>>,
    cells: Vec<Arc<ValueCell>>,
}

impl LineRuntime {
    pub fn new(id: u64, line: Arc<Line>) -> Self {
        let cells = line
            .args
            .iter()
            .map(|spec| {
                Arc::new(match spec.kind {
                    ArgKind::Literal => ValueCell::literal(spec.name.clone()),
                    ArgKind::Variable => ValueCell::empty(),
                })
            })
            .collect();
        let mod_ctxs = line.modules.iter().map(|_| Arc::new(Context::new())).collect();
        Self {
            id,
            status: RunStatus::Init,
            trigger_ctx: Arc::new(Context::new()),
            mod_ctxs,
            cells,
            line,
        }
    }

    pub fn line(&self) -> &Arc<Line> {
        &self.line
    }

    pub fn trigger_ctx(&self) -> &Arc<Context> {
        &self.trigger_ctx
    }

    pub fn module_ctx(&self, ix: ModIx) -> &Arc<Context> {
        &self.mod_ctxs[ix.0]
    }

    pub fn module_ctxs(&self) -> &[Arc<Context>] {
        &self.mod_ctxs
    }

    pub fn cell(&self, ix: usize) -> &Arc<ValueCell> {
        &self.cells[ix]
    }
}

impl PoolItem for LineRuntime {
    fn definition_name(&self) -> &str {
        &self.line.name
    }

    fn instance_id(&self) -> u64 {
        self.id
    }

    fn recycle(&mut self) {
        self.status = RunStatus::Init;
        self.trigger_ctx.reset();
        for ctx in &self.mod_ctxs {
            ctx.reset();
        }
        for (cell, spec) in self.cells.iter().zip(&self.line.args) {
            if spec.kind == ArgKind::Variable {
                cell.clear();
            }
        }
    }
}

/// The runtime instance of one static module.
///
/// Created once, run once during the static phase, then retained for the
/// life of the process so its output cells stay valid.
pub struct StaticRuntime {
    id: u64,
    def: Arc<StaticModule>,
    ctx: Arc<Context>,
    in_cells: Vec<Arc<ValueCell>>,
    out_cells: Vec<Arc<ValueCell>>,
}

impl StaticRuntime {
    pub fn new(id: u64, def: Arc<StaticModule>) -> Self {
        let in_cells = def
            .inputs
            .iter()
            .map(|spec| Arc::new(ValueCell::literal(spec.name.clone())))
            .collect();
        let out_cells = def.outputs.iter().map(|_| Arc::new(ValueCell::empty())).collect();
        Self {
            id,
            ctx: Arc::new(Context::new()),
            in_cells,
            out_cells,
            def,
        }
    }

    pub fn def(&self) -> &Arc<StaticModule> {
        &self.def
    }

    pub fn ctx(&self) -> &Arc<Context> {
        &self.ctx
    }

    pub fn input_cells(&self) -> &[Arc<ValueCell>] {
        &self.in_cells
    }

    pub fn output_cells(&self) -> &[Arc<ValueCell>] {
        &self.out_cells
    }
}

impl PoolItem for StaticRuntime {
    fn definition_name(&self) -> &str {
        &self.def.def.name
    }

    fn instance_id(&self) -> u64 {
        self.id
    }

    fn recycle(&mut self) {
        self.ctx.reset();
        for cell in &self.out_cells {
            cell.clear();
        }
    }
}
