//! Two-Level Scheduler
//!
//! The engine's single scheduling thread. It owns every active line
//! instance and drives each one through two state machines on a fixed tick:
//!
//! - the line machine: `INIT/WAIT` arm and watch the trigger, `RUN` hands
//!   over to the module machine, `FINISH/ERROR` conclude, `DESTROY` releases
//!   the instance back to the pool
//! - the module machine: first the end-module cascade (once the end module
//!   reaches a terminal status the rest of the line is abandoned), then
//!   dependency evaluation for every waiting module
//!
//! Workers only ever write completion into contexts; every transition
//! decision is made here, so the FSMs never race with themselves.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use log::{debug, error, info, warn};

use crate::catalog::line::{Catalog, ModIx, ReqTarget};
use crate::config::EngineSettings;
use crate::error::EngineError;

use super::context::RunStatus;
use super::instance::{LineRuntime, PoolItem, StaticArgSet, StaticRuntime};
use super::invoker::Invoker;
use super::pool::RuntimePool;
use super::workers::WorkerPool;

/// Counters accumulated over one engine run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunStats {
    /// Line activations admitted from the backlog.
    pub admitted: u64,
    /// Activations that concluded with `FINISH`.
    pub finished: u64,
    /// Activations that concluded with `ERROR`.
    pub failed: u64,
    /// Static modules run during startup.
    pub statics_run: u64,
    /// Scheduler passes.
    pub ticks: u64,
}

/// What requirement evaluation decided for one waiting module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verdict {
    /// At least one requirement group is unresolved.
    Wait,
    /// Every requirement group is satisfied.
    Run,
    /// Every group resolved and at least one failed.
    Error,
}

pub struct Scheduler {
    catalog: Catalog,
    settings: EngineSettings,
    invoker: Invoker,
    line_pool: RuntimePool<LineRuntime>,
    static_pool: RuntimePool<StaticRuntime>,
    /// Static instances live for the whole process so their output cells
    /// stay valid.
    static_runtimes: Vec<StaticRuntime>,
    active: Vec<LineRuntime>,
    backlog: VecDeque<String>,
    stop: Arc<AtomicBool>,
    stats: RunStats,
}

impl Scheduler {
    pub fn new(catalog: Catalog, settings: EngineSettings) -> Self {
        let settings = settings.normalized();
        let statics = Arc::new(StaticArgSet::new(catalog.static_args.clone()));
        let invoker = Invoker::new(
            WorkerPool::new(settings.workers, settings.queue_depth),
            statics,
        );

        let line_pool = RuntimePool::new();
        for line in &catalog.lines {
            let line = Arc::clone(line);
            line_pool.register(
                line.name.clone(),
                Box::new(move |id| LineRuntime::new(id, Arc::clone(&line))),
            );
        }

        let static_pool = RuntimePool::new();
        for def in &catalog.statics {
            let def = Arc::clone(def);
            static_pool.register(
                def.def.name.clone(),
                Box::new(move |id| StaticRuntime::new(id, Arc::clone(&def))),
            );
        }

        let backlog = catalog.lines.iter().map(|l| l.name.clone()).collect();

        Self {
            catalog,
            settings,
            invoker,
            line_pool,
            static_pool,
            static_runtimes: Vec::new(),
            active: Vec::new(),
            backlog,
            stop: Arc::new(AtomicBool::new(false)),
            stats: RunStats::default(),
        }
    }

    /// Shared flag that asks the run loop to halt after the current tick.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn stats(&self) -> RunStats {
        self.stats
    }

    /// Runs every static module once, synchronously, in declaration order.
    ///
    /// Each must finish with return value 0; anything else aborts startup.
    /// Outputs of successful modules are installed into the shared static
    /// argument set and the instances are retained.
    pub fn run_static_phase(&mut self) -> Result<(), EngineError> {
        let names: Vec<String> = self
            .catalog
            .statics
            .iter()
            .map(|s| s.def.name.clone())
            .collect();

        for name in names {
            let rt = self.static_pool.obtain(&name)?;
            rt.ctx().set_status(RunStatus::Run);
            info!("static module '{}' running", name);

            let (ret, status) = self.invoker.run_static(&rt);
            if status != RunStatus::Finish || ret != 0 {
                error!("static module '{}' failed: {} (ret {})", name, status, ret);
                return Err(EngineError::StaticPhase {
                    module: name,
                    status,
                    ret,
                });
            }

            for (cell, slot) in rt.output_cells().iter().zip(&rt.def().slots) {
                self.invoker.statics().install(*slot, Arc::clone(cell));
            }
            rt.ctx().set_status(RunStatus::Static);
            self.stats.statics_run += 1;
            self.static_runtimes.push(rt);
        }
        Ok(())
    }

    /// Runs the engine to completion: static phase, then the tick loop.
    ///
    /// The loop ends when the stop flag is raised or when nothing is active
    /// and nothing is admissible. Queued work is drained before returning.
    pub fn run(&mut self) -> Result<RunStats, EngineError> {
        info!(
            "Engine starting: {} lines, {} static modules, {} workers, max {} active",
            self.catalog.lines.len(),
            self.catalog.statics.len(),
            self.settings.workers,
            self.settings.max_lines
        );
        self.run_static_phase()?;

        loop {
            if self.stop.load(Ordering::SeqCst) {
                info!("Stop requested; halting after {} ticks", self.stats.ticks);
                break;
            }
            self.tick();
            if self.active.is_empty() && self.backlog.is_empty() {
                info!("Nothing left to schedule; engine idle");
                break;
            }
            thread::sleep(self.settings.tick_interval());
        }

        self.invoker.shutdown();
        let stats = self.stats;
        info!(
            "Engine stopped: {} admitted, {} finished, {} failed, {} static, {} ticks",
            stats.admitted, stats.finished, stats.failed, stats.statics_run, stats.ticks
        );
        Ok(stats)
    }

    /// One scheduler pass: admit from the backlog up to the activation
    /// bound, then advance every active instance and release the ones that
    /// reached `DESTROY`.
    fn tick(&mut self) {
        self.stats.ticks += 1;
        self.admit();

        let drained = std::mem::take(&mut self.active);
        for mut rt in drained {
            self.advance(&mut rt);
            if rt.status == RunStatus::Destroy {
                debug!(
                    "line '{}': instance {} released",
                    rt.definition_name(),
                    rt.instance_id()
                );
                if let Err(err) = self.line_pool.release(rt) {
                    error!("release failed: {}", err);
                }
            } else {
                self.active.push(rt);
            }
        }
    }

    fn admit(&mut self) {
        while self.active.len() < self.settings.max_lines {
            let name = match self.backlog.pop_front() {
                Some(name) => name,
                None => break,
            };
            match self.line_pool.obtain(&name) {
                Ok(rt) => {
                    debug!("line '{}': instance {} admitted", name, rt.instance_id());
                    self.stats.admitted += 1;
                    self.active.push(rt);
                }
                Err(err) => error!("cannot admit line '{}': {}", name, err),
            }
        }
    }

    /// The line-level state machine.
    fn advance(&mut self, rt: &mut LineRuntime) {
        match rt.status {
            RunStatus::Init | RunStatus::Wait => self.trigger_fsm(rt),
            RunStatus::Run => self.module_fsm(rt),
            RunStatus::Finish | RunStatus::Error => {
                if rt.status == RunStatus::Finish {
                    self.stats.finished += 1;
                } else {
                    self.stats.failed += 1;
                }
                info!("line '{}': {}", rt.line().name, rt.status);
                rt.status = RunStatus::Destroy;
            }
            other => warn!("line '{}': stuck in {}", rt.line().name, other),
        }
    }

    /// First level: arm the trigger, then follow its context.
    ///
    /// A finished trigger moves the line to `RUN` and re-queues the line
    /// name, so the next activation arms while this one processes. A failed
    /// trigger fails only this activation; the line is not re-queued.
    fn trigger_fsm(&mut self, rt: &mut LineRuntime) {
        let (status, ret) = rt.trigger_ctx().load();
        match status {
            RunStatus::Init => {
                rt.status = RunStatus::Wait;
                for ctx in rt.module_ctxs() {
                    ctx.set_status(RunStatus::Wait);
                }
                rt.trigger_ctx().set_status(RunStatus::Run);
                self.invoker.submit_trigger(rt);
            }
            RunStatus::Finish => {
                debug!("line '{}': trigger finished (ret {})", rt.line().name, ret);
                rt.status = RunStatus::Run;
                self.backlog.push_back(rt.line().name.clone());
            }
            RunStatus::Error | RunStatus::SysError => {
                warn!("line '{}': trigger {} (ret {})", rt.line().name, status, ret);
                rt.status = RunStatus::Error;
            }
            _ => {} // still executing
        }
    }

    /// Second level: the end-module cascade, then dependency evaluation for
    /// every waiting module.
    fn module_fsm(&self, rt: &mut LineRuntime) {
        if self.end_cascade(rt) {
            return;
        }

        for ix in (0..rt.line().modules.len()).map(ModIx) {
            match rt.module_ctx(ix).status() {
                RunStatus::Init => rt.module_ctx(ix).set_status(RunStatus::Wait),
                RunStatus::Wait => match evaluate_requirements(rt, ix) {
                    Verdict::Wait => {}
                    Verdict::Run => {
                        rt.module_ctx(ix).set_status(RunStatus::Run);
                        self.invoker.submit_module(rt, ix);
                    }
                    Verdict::Error => {
                        debug!(
                            "line '{}': module '{}' lost its requirements",
                            rt.line().name,
                            rt.line().module(ix).name
                        );
                        rt.module_ctx(ix).set_status(RunStatus::Error);
                    }
                },
                _ => {}
            }
        }
    }

    /// Once the end module reaches a terminal status, every other context is
    /// abandoned and the line concludes after in-flight work has drained.
    ///
    /// Returns `true` when the cascade is in progress or done, which skips
    /// dependency evaluation for this tick.
    fn end_cascade(&self, rt: &mut LineRuntime) -> bool {
        let end = rt.line().end;
        let (end_status, end_ret) = rt.module_ctx(end).load();
        if !matches!(
            end_status,
            RunStatus::Finish | RunStatus::Error | RunStatus::SysError
        ) {
            return false;
        }

        let mut in_flight = 0;
        for (ix, ctx) in rt.module_ctxs().iter().enumerate() {
            if ModIx(ix) == end {
                continue;
            }
            match ctx.status() {
                RunStatus::Run => in_flight += 1,
                RunStatus::Destroy => {}
                _ => ctx.set_status(RunStatus::Destroy),
            }
        }
        if in_flight > 0 {
            debug!(
                "line '{}': end module done, {} still running",
                rt.line().name,
                in_flight
            );
            return true;
        }

        rt.status = match end_status {
            RunStatus::Finish => RunStatus::Finish,
            _ => RunStatus::Error, // SYSERROR folds into ERROR at line level
        };
        debug!(
            "line '{}': concluding {} (end module ret {})",
            rt.line().name,
            rt.status,
            end_ret
        );
        rt.module_ctx(end).set_status(RunStatus::Destroy);
        true
    }
}

/// Decides whether a waiting module may run, keeps waiting, or has lost its
/// requirements.
///
/// Each requirement target expands to its whole equivalence group, skipping
/// targets already covered by an earlier expansion. A group is satisfied by
/// the first member that finished with its declared return value, failed
/// when every member finished against expectations or errored, and pending
/// otherwise. Unresolved groups outweigh failed ones, so a verdict is never
/// reached while anything relevant is still running. Reads context
/// snapshots only; never writes.
pub(crate) fn evaluate_requirements(rt: &LineRuntime, ix: ModIx) -> Verdict {
    let line = rt.line();
    let module = line.module(ix);
    if module.requirements.is_empty() {
        return Verdict::Run;
    }

    let mut covered: HashSet<ModIx> = HashSet::new();
    let mut pending_groups = 0usize;
    let mut failed_groups = 0usize;

    for edge in &module.requirements {
        match edge.target {
            // The trigger is its own singleton group.
            ReqTarget::Trigger => {
                let (status, ret) = rt.trigger_ctx().load();
                match status {
                    RunStatus::Finish if edge.expect.matches(ret) => {}
                    RunStatus::Finish | RunStatus::Error | RunStatus::SysError => {
                        failed_groups += 1
                    }
                    RunStatus::Destroy => return Verdict::Wait,
                    _ => pending_groups += 1,
                }
            }
            ReqTarget::Module(target) => {
                if !covered.insert(target) {
                    continue;
                }
                let members = line.group_members(target);
                let mut finished = 0usize;
                let mut failed = 0usize;
                for member in members {
                    covered.insert(*member);
                    let expect = match module.expect_for(ReqTarget::Module(*member)) {
                        Some(expect) => expect,
                        None => continue, // ruled out at load time
                    };
                    let (status, ret) = rt.module_ctx(*member).load();
                    match status {
                        RunStatus::Finish if expect.matches(ret) => finished += 1,
                        RunStatus::Finish | RunStatus::Error | RunStatus::SysError => failed += 1,
                        RunStatus::Destroy => return Verdict::Wait,
                        _ => {}
                    }
                }
                if finished > 0 {
                    // first success satisfies the whole group
                } else if failed == members.len() {
                    failed_groups += 1;
                } else {
                    pending_groups += 1;
                }
            }
        }
    }

    if pending_groups > 0 {
        Verdict::Wait
    } else if failed_groups > 0 {
        Verdict::Error
    } else {
        Verdict::Run
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::model::CatalogDoc;
    use crate::catalog::registry::{CallbackTable, ModuleRegistry};
    use crate::catalog::resolver::resolve_catalog;
    use crate::runtime::context::ValueCell;
    use std::sync::Mutex;
    use std::time::Duration;

    fn settings() -> EngineSettings {
        EngineSettings {
            max_lines: 2,
            workers: 4,
            queue_depth: 16,
            tick_ms: 5,
        }
    }

    fn build(yaml: &str, table: &CallbackTable, settings: EngineSettings) -> Scheduler {
        let doc: CatalogDoc = serde_yaml::from_str(yaml).unwrap();
        let registry = ModuleRegistry::load(&doc, table).unwrap();
        let catalog = resolve_catalog(&doc, &registry).unwrap();
        Scheduler::new(catalog, settings)
    }

    /// Ticks until the condition holds, pausing briefly for workers.
    fn tick_until<F: Fn(&Scheduler) -> bool>(sched: &mut Scheduler, cond: F) {
        for _ in 0..400 {
            sched.tick();
            if cond(sched) {
                return;
            }
            thread::sleep(Duration::from_millis(2));
        }
        panic!(
            "condition not reached: admitted={} finished={} failed={}",
            sched.stats.admitted, sched.stats.finished, sched.stats.failed
        );
    }

    fn ret_table(pairs: &[(&str, i32)]) -> CallbackTable {
        let mut table = CallbackTable::new();
        for (name, ret) in pairs {
            let ret = *ret;
            table.register(*name, move |_i: &[Arc<ValueCell>], _o: &[Arc<ValueCell>]| ret);
        }
        table
    }

    const CHAIN: &str = r#"
triggers:
  - name: poll
    type: so
    main: trig
modules:
  - name: fetch
    type: so
    main: produce
  - name: publish
    type: so
    main: consume
main_lines:
  - name: ingest
    trigger:
      trig_name: poll
      argv_out: $batch
    modules:
      - mod_name: fetch
        argv_in: $batch
        argv_out: $raw
        requirement:
          - name: poll
            ret_val: 0
      - mod_name: publish
        argv_in: $raw
        requirement:
          - name: fetch
            ret_val: 0
"#;

    #[test]
    fn test_line_runs_to_finish_and_values_flow() {
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let mut table = CallbackTable::new();
        table.register("trig", |_i: &[Arc<ValueCell>], outputs: &[Arc<ValueCell>]| {
            for cell in outputs {
                cell.set("batch-7");
            }
            0
        });
        table.register("produce", |inputs: &[Arc<ValueCell>], outputs: &[Arc<ValueCell>]| {
            let batch = inputs[0].get().unwrap_or_default();
            outputs[0].set(format!("raw({})", batch));
            0
        });
        let sink = Arc::clone(&seen);
        table.register("consume", move |inputs: &[Arc<ValueCell>], _o: &[Arc<ValueCell>]| {
            sink.lock().unwrap().push(inputs[0].get().unwrap_or_default());
            0
        });

        let mut sched = build(CHAIN, &table, settings());
        tick_until(&mut sched, |s| s.stats.finished >= 1);

        assert!(sched.stats.admitted >= 1);
        assert_eq!(seen.lock().unwrap()[0], "raw(batch-7)");
    }

    #[test]
    fn test_requirement_mismatch_fails_the_line() {
        // fetch returns 2 where publish requires 0
        let table = ret_table(&[("trig", 0), ("produce", 2), ("consume", 0)]);
        let mut sched = build(CHAIN, &table, settings());
        tick_until(&mut sched, |s| s.stats.failed >= 1);
        assert_eq!(sched.stats.finished, 0);
    }

    #[test]
    fn test_trigger_refires_after_finish() {
        let table = ret_table(&[("trig", 0), ("produce", 0), ("consume", 0)]);
        let mut sched = build(CHAIN, &table, settings());
        // each finished activation re-arms the line, so the counter keeps
        // growing as long as we tick
        tick_until(&mut sched, |s| s.stats.finished >= 3);
        assert!(sched.stats.admitted >= 3);
    }

    const ALTERNATES: &str = r#"
triggers:
  - name: poll
    type: so
    main: trig
modules:
  - name: fetch_a
    type: so
    main: side_a
  - name: fetch_b
    type: so
    main: side_b
  - name: publish
    type: so
    main: consume
main_lines:
  - name: ingest
    trigger:
      trig_name: poll
    modules:
      - mod_name: fetch_a
        equivalent:
          - name: fetch_b
      - mod_name: fetch_b
        equivalent:
          - name: fetch_a
      - mod_name: publish
        requirement:
          - name: fetch_a
            ret_val: 0
          - name: fetch_b
            ret_val: 0
"#;

    #[test]
    fn test_equivalence_first_success_wins() {
        // fetch_a fails, fetch_b succeeds: the group is satisfied
        let table = ret_table(&[("trig", 0), ("side_a", 1), ("side_b", 0), ("consume", 0)]);
        let mut sched = build(ALTERNATES, &table, settings());
        tick_until(&mut sched, |s| s.stats.finished >= 1);
        assert_eq!(sched.stats.failed, 0);
    }

    #[test]
    fn test_equivalence_all_members_failing_fails_line() {
        let table = ret_table(&[("trig", 0), ("side_a", 1), ("side_b", 1), ("consume", 0)]);
        let mut sched = build(ALTERNATES, &table, settings());
        tick_until(&mut sched, |s| s.stats.failed >= 1);
        assert_eq!(sched.stats.finished, 0);
    }

    #[test]
    fn test_admission_respects_max_lines() {
        let yaml = r#"
triggers:
  - name: poll
    type: so
    main: slow
modules:
  - name: publish
    type: so
    main: fast
main_lines:
  - name: first
    trigger:
      trig_name: poll
    modules:
      - mod_name: publish
  - name: second
    trigger:
      trig_name: poll
    modules:
      - mod_name: publish
  - name: third
    trigger:
      trig_name: poll
    modules:
      - mod_name: publish
"#;
        let mut table = CallbackTable::new();
        table.register("slow", |_i: &[Arc<ValueCell>], _o: &[Arc<ValueCell>]| {
            thread::sleep(Duration::from_millis(100));
            0
        });
        table.register("fast", |_i: &[Arc<ValueCell>], _o: &[Arc<ValueCell>]| 0);

        let mut sched = build(yaml, &table, settings()); // max_lines: 2
        sched.tick();
        assert_eq!(sched.active.len(), 2);
        assert_eq!(sched.backlog.len(), 1);
        assert_eq!(sched.stats.admitted, 2);

        // the third line gets in once a slot frees up
        tick_until(&mut sched, |s| s.stats.admitted >= 3);
    }

    #[test]
    fn test_finished_instance_returns_to_pool() {
        let table = ret_table(&[("trig", 0), ("produce", 0), ("consume", 0)]);
        let mut sched = build(
            CHAIN,
            &table,
            EngineSettings {
                max_lines: 1,
                ..settings()
            },
        );

        tick_until(&mut sched, |s| s.stats.finished >= 1);
        // admission for this tick ran before the release, so the recycled
        // instance is still parked
        assert_eq!(sched.line_pool.idle_count("ingest"), 1);

        sched.tick();
        assert_eq!(sched.line_pool.idle_count("ingest"), 0);
        assert_eq!(sched.active.len(), 1);
    }

    #[test]
    fn test_trigger_fault_is_isolated_to_its_line() {
        let yaml = r#"
triggers:
  - name: poll
    type: so
    main: trig
  - name: broken
    type: pro
    file: __FILE__
modules:
  - name: publish
    type: so
    main: consume
main_lines:
  - name: healthy
    trigger:
      trig_name: poll
    modules:
      - mod_name: publish
  - name: doomed
    trigger:
      trig_name: broken
    modules:
      - mod_name: publish
"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trigger.sh");
        std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&path).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&path, perms).unwrap();
        }
        let yaml = yaml.replace("__FILE__", &path.to_string_lossy());
        let table = ret_table(&[("trig", 0), ("consume", 0)]);
        let mut sched = build(&yaml, &table, settings());

        // the registry accepted the file; removing it now makes every spawn
        // fail at run time
        std::fs::remove_file(&path).unwrap();

        tick_until(&mut sched, |s| s.stats.failed >= 1 && s.stats.finished >= 1);
        // the doomed line is out of rotation, the healthy one keeps going
        assert!(!sched.backlog.contains(&"doomed".to_string()));
    }

    #[test]
    fn test_static_phase_installs_outputs_and_feeds_lines() {
        let yaml = r#"
triggers:
  - name: poll
    type: so
    main: trig
modules:
  - name: publish
    type: so
    main: consume
static_modules:
  - name: conf
    type: so
    main: load_conf
    argv_in: '"prod"'
    argv_out: $conf
main_lines:
  - name: ingest
    trigger:
      trig_name: poll
    modules:
      - mod_name: publish
        argv_in: $conf
"#;
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let mut table = CallbackTable::new();
        table.register("trig", |_i: &[Arc<ValueCell>], _o: &[Arc<ValueCell>]| 0);
        table.register("load_conf", |inputs: &[Arc<ValueCell>], outputs: &[Arc<ValueCell>]| {
            let env = inputs[0].get().unwrap_or_default();
            outputs[0].set(format!("{}.ini", env));
            0
        });
        let sink = Arc::clone(&seen);
        table.register("consume", move |inputs: &[Arc<ValueCell>], _o: &[Arc<ValueCell>]| {
            sink.lock().unwrap().push(inputs[0].get().unwrap_or_default());
            0
        });

        let mut sched = build(yaml, &table, settings());
        sched.run_static_phase().unwrap();
        assert_eq!(sched.stats.statics_run, 1);
        assert_eq!(
            sched.invoker.statics().cell(0).unwrap().get().as_deref(),
            Some("prod.ini")
        );

        tick_until(&mut sched, |s| s.stats.finished >= 1);
        assert_eq!(seen.lock().unwrap()[0], "prod.ini");
    }

    #[test]
    fn test_static_phase_nonzero_return_aborts() {
        let yaml = r#"
static_modules:
  - name: conf
    type: so
    main: bad_conf
"#;
        let table = ret_table(&[("bad_conf", 3)]);
        let mut sched = build(yaml, &table, settings());
        let err = sched.run_static_phase().unwrap_err();
        match err {
            EngineError::StaticPhase { module, ret, .. } => {
                assert_eq!(module, "conf");
                assert_eq!(ret, 3);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_run_idles_out_when_every_line_is_dead() {
        // the only trigger always fails, so its line errors once and is
        // never re-queued: run() must return on its own
        let yaml = r#"
triggers:
  - name: broken
    type: pro
    file: __FILE__
modules:
  - name: publish
    type: so
    main: consume
main_lines:
  - name: doomed
    trigger:
      trig_name: broken
    modules:
      - mod_name: publish
"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trigger.sh");
        std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&path).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&path, perms).unwrap();
        }
        let yaml = yaml.replace("__FILE__", &path.to_string_lossy());
        let table = ret_table(&[("consume", 0)]);
        let mut sched = build(&yaml, &table, settings());
        std::fs::remove_file(&path).unwrap();

        let stats = sched.run().unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.finished, 0);
    }

    #[test]
    fn test_stop_flag_halts_the_run_loop() {
        let table = ret_table(&[("trig", 0), ("produce", 0), ("consume", 0)]);
        let mut sched = build(CHAIN, &table, settings());
        let stop = sched.stop_flag();

        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(60));
            stop.store(true, Ordering::SeqCst);
        });
        let stats = sched.run().unwrap();
        stopper.join().unwrap();
        assert!(stats.ticks >= 1);
    }

    #[test]
    fn test_cascade_defers_while_a_sibling_runs() {
        let table = ret_table(&[("trig", 0), ("produce", 0), ("consume", 0)]);
        let sched = build(CHAIN, &table, settings());

        let doc: CatalogDoc = serde_yaml::from_str(CHAIN).unwrap();
        let registry = ModuleRegistry::load(&doc, &table).unwrap();
        let catalog = resolve_catalog(&doc, &registry).unwrap();
        let mut rt = LineRuntime::new(1, Arc::clone(&catalog.lines[0]));
        let fetch = rt.line().module_ix("fetch").unwrap();
        let publish = rt.line().module_ix("publish").unwrap(); // end module

        rt.status = RunStatus::Run;
        rt.module_ctx(fetch).set_status(RunStatus::Run);
        rt.module_ctx(publish).complete(RunStatus::Finish, 0);

        // fetch is still in flight: conclude nothing yet
        assert!(sched.end_cascade(&mut rt));
        assert_eq!(rt.status, RunStatus::Run);
        assert_eq!(rt.module_ctx(fetch).status(), RunStatus::Run);

        // fetch drained: siblings are abandoned and the line takes the
        // end module's outcome
        rt.module_ctx(fetch).complete(RunStatus::Finish, 0);
        assert!(sched.end_cascade(&mut rt));
        assert_eq!(rt.status, RunStatus::Finish);
        assert_eq!(rt.module_ctx(fetch).status(), RunStatus::Destroy);
        assert_eq!(rt.module_ctx(publish).status(), RunStatus::Destroy);
    }

    // --- requirement evaluation in isolation ---

    fn alternates_runtime() -> LineRuntime {
        let doc: CatalogDoc = serde_yaml::from_str(ALTERNATES).unwrap();
        let table = ret_table(&[("trig", 0), ("side_a", 0), ("side_b", 0), ("consume", 0)]);
        let registry = ModuleRegistry::load(&doc, &table).unwrap();
        let catalog = resolve_catalog(&doc, &registry).unwrap();
        LineRuntime::new(1, Arc::clone(&catalog.lines[0]))
    }

    #[test]
    fn test_evaluate_waits_while_group_unresolved() {
        let rt = alternates_runtime();
        let publish = rt.line().module_ix("publish").unwrap();
        let a = rt.line().module_ix("fetch_a").unwrap();

        assert_eq!(evaluate_requirements(&rt, publish), Verdict::Wait);

        // one mismatch, partner still pending: keep waiting
        rt.module_ctx(a).complete(RunStatus::Finish, 9);
        assert_eq!(evaluate_requirements(&rt, publish), Verdict::Wait);
    }

    #[test]
    fn test_evaluate_first_success_satisfies_group() {
        let rt = alternates_runtime();
        let publish = rt.line().module_ix("publish").unwrap();
        let a = rt.line().module_ix("fetch_a").unwrap();
        let b = rt.line().module_ix("fetch_b").unwrap();

        rt.module_ctx(a).complete(RunStatus::Finish, 9);
        rt.module_ctx(b).complete(RunStatus::Finish, 0);
        assert_eq!(evaluate_requirements(&rt, publish), Verdict::Run);
    }

    #[test]
    fn test_evaluate_whole_group_failed_is_error() {
        let rt = alternates_runtime();
        let publish = rt.line().module_ix("publish").unwrap();
        let a = rt.line().module_ix("fetch_a").unwrap();
        let b = rt.line().module_ix("fetch_b").unwrap();

        rt.module_ctx(a).complete(RunStatus::Finish, 9);
        rt.module_ctx(b).complete(RunStatus::Error, -1);
        assert_eq!(evaluate_requirements(&rt, publish), Verdict::Error);
    }

    #[test]
    fn test_evaluate_destroyed_member_defers() {
        let rt = alternates_runtime();
        let publish = rt.line().module_ix("publish").unwrap();
        let a = rt.line().module_ix("fetch_a").unwrap();

        rt.module_ctx(a).set_status(RunStatus::Destroy);
        assert_eq!(evaluate_requirements(&rt, publish), Verdict::Wait);
    }

    #[test]
    fn test_evaluate_is_pure_and_repeatable() {
        let rt = alternates_runtime();
        let publish = rt.line().module_ix("publish").unwrap();
        let a = rt.line().module_ix("fetch_a").unwrap();
        let b = rt.line().module_ix("fetch_b").unwrap();

        rt.module_ctx(a).complete(RunStatus::Finish, 0);
        let before_a = rt.module_ctx(a).load();
        let before_b = rt.module_ctx(b).load();

        let first = evaluate_requirements(&rt, publish);
        let second = evaluate_requirements(&rt, publish);
        assert_eq!(first, second);
        assert_eq!(first, Verdict::Run);
        assert_eq!(rt.module_ctx(a).load(), before_a);
        assert_eq!(rt.module_ctx(b).load(), before_b);
    }

    #[test]
    fn test_evaluate_trigger_requirement() {
        let doc: CatalogDoc = serde_yaml::from_str(CHAIN).unwrap();
        let table = ret_table(&[("trig", 0), ("produce", 0), ("consume", 0)]);
        let registry = ModuleRegistry::load(&doc, &table).unwrap();
        let catalog = resolve_catalog(&doc, &registry).unwrap();
        let rt = LineRuntime::new(1, Arc::clone(&catalog.lines[0]));
        let fetch = rt.line().module_ix("fetch").unwrap();

        assert_eq!(evaluate_requirements(&rt, fetch), Verdict::Wait);

        rt.trigger_ctx().complete(RunStatus::Finish, 2);
        assert_eq!(evaluate_requirements(&rt, fetch), Verdict::Error);

        rt.trigger_ctx().reset();
        rt.trigger_ctx().complete(RunStatus::Finish, 0);
        assert_eq!(evaluate_requirements(&rt, fetch), Verdict::Run);
    }

    #[test]
    fn test_evaluate_no_requirements_runs_immediately() {
        let yaml = r#"
triggers:
  - name: poll
    type: so
    main: trig
modules:
  - name: publish
    type: so
    main: consume
main_lines:
  - name: ingest
    trigger:
      trig_name: poll
    modules:
      - mod_name: publish
"#;
        let doc: CatalogDoc = serde_yaml::from_str(yaml).unwrap();
        let table = ret_table(&[("trig", 0), ("consume", 0)]);
        let registry = ModuleRegistry::load(&doc, &table).unwrap();
        let catalog = resolve_catalog(&doc, &registry).unwrap();
        let rt = LineRuntime::new(1, Arc::clone(&catalog.lines[0]));
        let publish = rt.line().module_ix("publish").unwrap();

        assert_eq!(evaluate_requirements(&rt, publish), Verdict::Run);
    }
}
