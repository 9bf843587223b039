//! Module Invocation
//!
//! Turns a scheduled trigger or module into actual work:
//!
//! - in-process (`so`) definitions call their bound callback with the
//!   resolved input and output cells
//! - external-process (`pro`) definitions spawn the program with the
//!   resolved input values as arguments, capture stdout into the first
//!   output cell, and use the exit status as the return value
//!
//! Line triggers and modules run asynchronously on the worker pool and
//! report through their context; static modules run synchronously on the
//! caller's thread during the static phase.

use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::Arc;

use log::{debug, error, warn};

use crate::catalog::line::{ArgRef, ModIx};
use crate::catalog::registry::{ExecKind, ModuleDef};

use super::context::{Context, RunStatus, ValueCell};
use super::instance::{LineRuntime, StaticArgSet, StaticRuntime};
use super::workers::WorkerPool;

pub struct Invoker {
    workers: WorkerPool,
    statics: Arc<StaticArgSet>,
}

impl Invoker {
    pub fn new(workers: WorkerPool, statics: Arc<StaticArgSet>) -> Self {
        Self { workers, statics }
    }

    pub fn statics(&self) -> &Arc<StaticArgSet> {
        &self.statics
    }

    /// Submits the line's trigger for asynchronous execution.
    pub fn submit_trigger(&self, rt: &LineRuntime) {
        let trigger = &rt.line().trigger;
        debug!(
            "line '{}': submitting trigger '{}'",
            rt.line().name,
            trigger.def.name
        );
        self.submit(
            Arc::clone(rt.trigger_ctx()),
            Arc::clone(&trigger.def),
            self.resolve(rt, &trigger.inputs),
            self.resolve(rt, &trigger.outputs),
        );
    }

    /// Submits one module for asynchronous execution.
    pub fn submit_module(&self, rt: &LineRuntime, ix: ModIx) {
        let module = rt.line().module(ix);
        debug!(
            "line '{}': submitting module '{}'",
            rt.line().name,
            module.name
        );
        self.submit(
            Arc::clone(rt.module_ctx(ix)),
            Arc::clone(&module.def),
            self.resolve(rt, &module.inputs),
            self.resolve(rt, &module.outputs),
        );
    }

    fn submit(
        &self,
        ctx: Arc<Context>,
        def: Arc<ModuleDef>,
        inputs: Vec<Arc<ValueCell>>,
        outputs: Vec<Arc<ValueCell>>,
    ) {
        let job_ctx = Arc::clone(&ctx);
        let result = self.workers.submit(Box::new(move || {
            let (ret, status) = run_unit(&def, &inputs, &outputs);
            if !job_ctx.complete(status, ret) {
                debug!("result of '{}' discarded: context abandoned", def.name);
            }
        }));
        if let Err(err) = result {
            error!("submission rejected: {}", err);
            ctx.complete(RunStatus::SysError, -1);
        }
    }

    /// Runs a static module synchronously and reports through its context.
    pub fn run_static(&self, rt: &StaticRuntime) -> (i32, RunStatus) {
        let (ret, status) = run_unit(&rt.def().def, rt.input_cells(), rt.output_cells());
        rt.ctx().complete(status, ret);
        (ret, status)
    }

    /// Resolves argument references against the runtime's cells and the
    /// static argument set.
    fn resolve(&self, rt: &LineRuntime, refs: &[ArgRef]) -> Vec<Arc<ValueCell>> {
        refs.iter()
            .map(|arg| match arg {
                ArgRef::Line(ix) => Arc::clone(rt.cell(*ix)),
                ArgRef::Static(slot) => self.statics.cell(*slot).unwrap_or_else(|| {
                    warn!(
                        "static argument '{}' read before its module ran",
                        self.statics.spec(*slot).name
                    );
                    Arc::new(ValueCell::empty())
                }),
            })
            .collect()
    }

    /// Closes the worker queue and joins the workers, draining queued jobs.
    pub fn shutdown(&mut self) {
        self.workers.shutdown();
    }
}

/// Executes one definition on the current thread.
///
/// The status distinguishes "ran to completion" (`FINISH`, return value
/// meaningful) from "could not be executed at all" (`SYSERROR`).
pub fn run_unit(
    def: &ModuleDef,
    inputs: &[Arc<ValueCell>],
    outputs: &[Arc<ValueCell>],
) -> (i32, RunStatus) {
    match def.kind {
        ExecKind::Callback => match &def.callback {
            Some(callback) => (callback(inputs, outputs), RunStatus::Finish),
            None => {
                error!("module '{}' has no bound callback", def.name);
                (-1, RunStatus::SysError)
            }
        },
        ExecKind::Process => run_process(def, inputs, outputs),
    }
}

fn run_process(
    def: &ModuleDef,
    inputs: &[Arc<ValueCell>],
    outputs: &[Arc<ValueCell>],
) -> (i32, RunStatus) {
    // Unset inputs pass through as empty arguments.
    let args: Vec<String> = inputs
        .iter()
        .map(|cell| cell.get().unwrap_or_default())
        .collect();

    debug!("spawning '{}' with {} args", def.file.display(), args.len());
    let mut child = match Command::new(&def.file)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(err) => {
            error!("failed to spawn '{}': {}", def.file.display(), err);
            return (-1, RunStatus::SysError);
        }
    };

    let mut captured = Vec::new();
    if let Some(mut stdout) = child.stdout.take() {
        if let Err(err) = stdout.read_to_end(&mut captured) {
            warn!("reading stdout of '{}' failed: {}", def.name, err);
        }
    }

    let status = match child.wait() {
        Ok(status) => status,
        Err(err) => {
            error!("waiting for '{}' failed: {}", def.name, err);
            return (-1, RunStatus::SysError);
        }
    };

    if let Some(cell) = outputs.first() {
        cell.set(String::from_utf8_lossy(&captured).into_owned());
    }

    // A signal-killed child has no exit code.
    (status.code().unwrap_or(-1), RunStatus::Finish)
}
