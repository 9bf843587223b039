//! Dependency & Equivalence Resolver
//!
//! Turns parsed catalog records into validated, handle-linked [`Line`] and
//! [`StaticModule`] structures:
//!
//! - parses `argv_in`/`argv_out` binding strings into argument identities
//! - interns identities into per-line pools (variable references that match a
//!   static-module output bind to the shared static slot instead)
//! - resolves trigger/module/requirement/equivalent names to handles
//! - assigns equivalence-group ids
//! - enforces every load-time invariant; the catalog is rejected as a whole
//!   on the first violation
//!
//! Group-id assignment joins on *directly declared* partners only: a module
//! adopts the id of the first declared partner that already has one,
//! otherwise it opens a new group. Chains that are only transitively related
//! stay separate groups.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::{debug, info};

use crate::error::CatalogError;

use super::line::{
    ArgKind, ArgRef, ArgSpec, Catalog, GroupId, Line, LineModule, LineTrigger, ModIx, ReqTarget,
    RequirementEdge, StaticModule,
};
use super::model::{CatalogDoc, LineRecord};
use super::registry::{ExecKind, ModuleDef, ModuleRegistry};

/// Parses a binding string into argument identities.
///
/// Grammar: comma-separated tokens. A token wholly wrapped in double quotes
/// is a literal (quotes stripped, inner commas and whitespace preserved); an
/// unquoted token starting with `$` is a variable reference; any other
/// unquoted token is a literal. Whitespace outside quotes is dropped; empty
/// unquoted tokens are skipped.
pub fn parse_argv(raw: &str) -> Vec<ArgSpec> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut saw_quote = false;

    for ch in raw.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                saw_quote = true;
            }
            ',' if !in_quotes => finish_token(&mut tokens, &mut current, &mut saw_quote),
            c if c.is_whitespace() && !in_quotes => {}
            c => current.push(c),
        }
    }
    finish_token(&mut tokens, &mut current, &mut saw_quote);

    tokens
}

fn finish_token(tokens: &mut Vec<ArgSpec>, current: &mut String, saw_quote: &mut bool) {
    let text = std::mem::take(current);
    let quoted = std::mem::replace(saw_quote, false);

    if text.is_empty() && !quoted {
        return;
    }
    if quoted || !text.starts_with('$') {
        tokens.push(ArgSpec::literal(text));
    } else {
        tokens.push(ArgSpec::variable(text));
    }
}

/// Per-line argument-identity pool.
///
/// Identity is (name, kind): two uses of `$raw` in one line share a cell,
/// while a literal that happens to spell a variable name does not.
#[derive(Default)]
struct ArgPool {
    specs: Vec<ArgSpec>,
    index: HashMap<(String, ArgKind), usize>,
}

impl ArgPool {
    fn intern(&mut self, spec: ArgSpec) -> usize {
        let key = (spec.name.clone(), spec.kind);
        if let Some(&ix) = self.index.get(&key) {
            return ix;
        }
        let ix = self.specs.len();
        self.specs.push(spec);
        self.index.insert(key, ix);
        ix
    }
}

/// Resolves a whole catalog document against the registry.
///
/// Static modules resolve first so their output names are reserved before
/// any line binds its arguments.
pub fn resolve_catalog(
    doc: &CatalogDoc,
    registry: &ModuleRegistry,
) -> Result<Catalog, CatalogError> {
    let mut catalog = Catalog::default();
    let mut static_index: HashMap<String, usize> = HashMap::new();

    resolve_statics(doc, registry, &mut catalog, &mut static_index)?;

    let mut line_names: HashSet<String> = HashSet::new();
    for record in &doc.main_lines {
        if record.name.trim().is_empty() {
            return Err(CatalogError::EmptyField {
                entity: "a line record".to_string(),
                field: "name",
            });
        }
        if !line_names.insert(record.name.clone()) {
            return Err(CatalogError::DuplicateName {
                scope: "main lines".to_string(),
                name: record.name.clone(),
            });
        }

        let line = resolve_line(record, registry, &catalog.static_args, &static_index)?;
        info!(
            "Resolved line '{}': {} modules, {} groups, end module '{}'",
            line.name,
            line.modules.len(),
            line.groups.len(),
            line.end_module().name
        );
        catalog.lines.push(Arc::new(line));
    }

    info!(
        "Catalog resolved: {} lines, {} static modules, {} static outputs",
        catalog.lines.len(),
        catalog.statics.len(),
        catalog.static_args.len()
    );

    Ok(catalog)
}

fn resolve_statics(
    doc: &CatalogDoc,
    registry: &ModuleRegistry,
    catalog: &mut Catalog,
    static_index: &mut HashMap<String, usize>,
) -> Result<(), CatalogError> {
    for record in &doc.static_modules {
        let def = registry.static_module(&record.name).ok_or_else(|| {
            CatalogError::UnknownStaticModule {
                name: record.name.clone(),
            }
        })?;

        let inputs = parse_argv(&record.argv_in);
        for spec in &inputs {
            if spec.kind != ArgKind::Literal {
                return Err(CatalogError::StaticInputNotLiteral {
                    module: record.name.clone(),
                    argument: spec.name.clone(),
                });
            }
        }

        let outputs = parse_argv(&record.argv_out);
        for spec in &outputs {
            if spec.kind != ArgKind::Variable {
                return Err(CatalogError::StaticOutputNotVariable {
                    module: record.name.clone(),
                    argument: spec.name.clone(),
                });
            }
        }
        if def.kind == ExecKind::Process && outputs.len() > 1 {
            return Err(CatalogError::ProcessOutputArity {
                module: record.name.clone(),
            });
        }

        let mut slots = Vec::with_capacity(outputs.len());
        for spec in &outputs {
            if static_index.contains_key(&spec.name) {
                return Err(CatalogError::StaticOutputCollision {
                    module: record.name.clone(),
                    argument: spec.name.clone(),
                });
            }
            let slot = catalog.static_args.len();
            catalog.static_args.push(spec.clone());
            static_index.insert(spec.name.clone(), slot);
            slots.push(slot);
        }

        debug!(
            "Resolved static module '{}': {} inputs, {} outputs",
            record.name,
            inputs.len(),
            outputs.len()
        );
        catalog.statics.push(Arc::new(StaticModule {
            def,
            inputs,
            outputs,
            slots,
        }));
    }
    Ok(())
}

struct PendingModule {
    name: String,
    def: Arc<ModuleDef>,
    inputs: Vec<ArgRef>,
    outputs: Vec<ArgRef>,
}

fn resolve_line(
    record: &LineRecord,
    registry: &ModuleRegistry,
    static_args: &[ArgSpec],
    static_index: &HashMap<String, usize>,
) -> Result<Line, CatalogError> {
    let line_name = &record.name;
    let trig_name = &record.trigger.trig_name;

    let trigger_def =
        registry
            .trigger(trig_name)
            .ok_or_else(|| CatalogError::UnknownReference {
                line: line_name.clone(),
                owner: "the trigger binding".to_string(),
                what: "trigger",
                name: trig_name.clone(),
            })?;

    let mut pool = ArgPool::default();
    let trigger = LineTrigger {
        inputs: bind(parse_argv(&record.trigger.argv_in), &mut pool, static_index),
        outputs: bind(parse_argv(&record.trigger.argv_out), &mut pool, static_index),
        def: trigger_def,
    };

    // Pass 1: definitions and bindings; module names become handles.
    let mut names: HashMap<String, ModIx> = HashMap::new();
    let mut pending = Vec::with_capacity(record.modules.len());
    for (ix, entry) in record.modules.iter().enumerate() {
        if entry.mod_name.trim().is_empty() {
            return Err(CatalogError::EmptyField {
                entity: format!("a module entry in line '{}'", line_name),
                field: "mod_name",
            });
        }
        if entry.mod_name == *trig_name
            || names.insert(entry.mod_name.clone(), ModIx(ix)).is_some()
        {
            return Err(CatalogError::DuplicateName {
                scope: format!("line '{}'", line_name),
                name: entry.mod_name.clone(),
            });
        }
        let def =
            registry
                .module(&entry.mod_name)
                .ok_or_else(|| CatalogError::UnknownReference {
                    line: line_name.clone(),
                    owner: "the module list".to_string(),
                    what: "module",
                    name: entry.mod_name.clone(),
                })?;
        pending.push(PendingModule {
            name: entry.mod_name.clone(),
            def,
            inputs: bind(parse_argv(&entry.argv_in), &mut pool, static_index),
            outputs: bind(parse_argv(&entry.argv_out), &mut pool, static_index),
        });
    }

    // Pass 2: requirement and equivalence references, now that every module
    // of the line is known.
    let mut modules = Vec::with_capacity(pending.len());
    for (entry, built) in record.modules.iter().zip(pending) {
        let mut requirements = Vec::with_capacity(entry.requirement.len());
        for req in &entry.requirement {
            let target = if req.name == *trig_name {
                ReqTarget::Trigger
            } else {
                match names.get(&req.name) {
                    Some(&ix) => ReqTarget::Module(ix),
                    None => {
                        return Err(CatalogError::UnknownReference {
                            line: line_name.clone(),
                            owner: format!("module '{}'", built.name),
                            what: "requirement",
                            name: req.name.clone(),
                        })
                    }
                }
            };
            requirements.push(RequirementEdge {
                target,
                expect: req.ret_val,
            });
        }

        let mut equivalents = Vec::with_capacity(entry.equivalent.len());
        for equ in &entry.equivalent {
            if equ.name == *trig_name {
                return Err(CatalogError::TriggerEquivalence {
                    line: line_name.clone(),
                    module: built.name.clone(),
                });
            }
            match names.get(&equ.name) {
                Some(&ix) => equivalents.push(ix),
                None => {
                    return Err(CatalogError::UnknownReference {
                        line: line_name.clone(),
                        owner: format!("module '{}'", built.name),
                        what: "equivalent",
                        name: equ.name.clone(),
                    })
                }
            }
        }

        modules.push(LineModule {
            name: built.name,
            def: built.def,
            inputs: built.inputs,
            outputs: built.outputs,
            requirements,
            equivalents,
        });
    }

    let (group_of, groups) = assign_groups(&modules);

    check_outputs(line_name, &trigger.def.name, &trigger.def, &trigger.outputs, &pool, static_args)?;
    for module in &modules {
        check_outputs(line_name, &module.name, &module.def, &module.outputs, &pool, static_args)?;
    }

    let end = find_end_module(line_name, &modules)?;
    check_trigger_sole_requirement(line_name, &modules)?;
    check_symmetry(line_name, &modules)?;
    check_closure(line_name, &modules, &group_of, &groups)?;

    Ok(Line {
        name: line_name.clone(),
        desc: record.desc.clone(),
        trigger,
        modules,
        end,
        args: pool.specs,
        group_of,
        groups,
    })
}

fn bind(
    tokens: Vec<ArgSpec>,
    pool: &mut ArgPool,
    static_index: &HashMap<String, usize>,
) -> Vec<ArgRef> {
    tokens
        .into_iter()
        .map(|token| {
            if token.kind == ArgKind::Variable {
                if let Some(&slot) = static_index.get(&token.name) {
                    return ArgRef::Static(slot);
                }
            }
            ArgRef::Line(pool.intern(token))
        })
        .collect()
}

/// Assigns equivalence-group ids by joining the first directly declared
/// partner that already has one.
fn assign_groups(modules: &[LineModule]) -> (Vec<GroupId>, Vec<Vec<ModIx>>) {
    let mut group_of: Vec<GroupId> = Vec::with_capacity(modules.len());
    let mut groups: Vec<Vec<ModIx>> = Vec::new();

    for (ix, module) in modules.iter().enumerate() {
        let joined = module
            .equivalents
            .iter()
            .find(|partner| partner.0 < ix)
            .map(|partner| group_of[partner.0]);
        let gid = joined.unwrap_or_else(|| {
            groups.push(Vec::new());
            GroupId(groups.len() - 1)
        });
        group_of.push(gid);
        groups[gid.0].push(ModIx(ix));
    }

    (group_of, groups)
}

fn check_outputs(
    line: &str,
    owner: &str,
    def: &ModuleDef,
    outputs: &[ArgRef],
    pool: &ArgPool,
    static_args: &[ArgSpec],
) -> Result<(), CatalogError> {
    for arg in outputs {
        match arg {
            ArgRef::Line(ix) => {
                let spec = &pool.specs[*ix];
                if spec.kind != ArgKind::Variable {
                    return Err(CatalogError::OutputNotVariable {
                        line: line.to_string(),
                        module: owner.to_string(),
                        argument: spec.name.clone(),
                    });
                }
            }
            ArgRef::Static(slot) => {
                return Err(CatalogError::ReservedOutputName {
                    line: line.to_string(),
                    module: owner.to_string(),
                    argument: static_args[*slot].name.clone(),
                });
            }
        }
    }
    if def.kind == ExecKind::Process && outputs.len() > 1 {
        return Err(CatalogError::ProcessOutputArity {
            module: owner.to_string(),
        });
    }
    Ok(())
}

/// The end module is the unique module no other module requires.
fn find_end_module(line: &str, modules: &[LineModule]) -> Result<ModIx, CatalogError> {
    let mut required: HashSet<ModIx> = HashSet::new();
    for module in modules {
        for edge in &module.requirements {
            if let ReqTarget::Module(ix) = edge.target {
                required.insert(ix);
            }
        }
    }

    let candidates: Vec<ModIx> = (0..modules.len())
        .map(ModIx)
        .filter(|ix| !required.contains(ix))
        .collect();

    match candidates.as_slice() {
        [] => Err(CatalogError::NoEndModule {
            line: line.to_string(),
        }),
        [end] => Ok(*end),
        many => Err(CatalogError::MultipleEndModules {
            line: line.to_string(),
            candidates: many
                .iter()
                .map(|ix| modules[ix.0].name.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        }),
    }
}

fn check_trigger_sole_requirement(
    line: &str,
    modules: &[LineModule],
) -> Result<(), CatalogError> {
    for module in modules {
        let names_trigger = module
            .requirements
            .iter()
            .any(|edge| edge.target == ReqTarget::Trigger);
        if names_trigger && module.requirements.len() > 1 {
            return Err(CatalogError::TriggerNotSoleRequirement {
                line: line.to_string(),
                module: module.name.clone(),
            });
        }
    }
    Ok(())
}

fn check_symmetry(line: &str, modules: &[LineModule]) -> Result<(), CatalogError> {
    for (ix, module) in modules.iter().enumerate() {
        for partner in &module.equivalents {
            if partner.0 == ix {
                continue;
            }
            if !modules[partner.0].equivalents.contains(&ModIx(ix)) {
                return Err(CatalogError::AsymmetricEquivalence {
                    line: line.to_string(),
                    declarer: module.name.clone(),
                    partner: modules[partner.0].name.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Requiring any member of a group means requiring every member.
fn check_closure(
    line: &str,
    modules: &[LineModule],
    group_of: &[GroupId],
    groups: &[Vec<ModIx>],
) -> Result<(), CatalogError> {
    for module in modules {
        for edge in &module.requirements {
            let target = match edge.target {
                ReqTarget::Module(ix) => ix,
                ReqTarget::Trigger => continue,
            };
            for member in &groups[group_of[target.0].0] {
                if *member == target {
                    continue;
                }
                if module.expect_for(ReqTarget::Module(*member)).is_none() {
                    return Err(CatalogError::BrokenGroupRequirement {
                        line: line.to_string(),
                        module: module.name.clone(),
                        required: modules[target.0].name.clone(),
                        missing: modules[member.0].name.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}
