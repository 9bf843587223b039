//! Resolved Line Model
//!
//! Handle-linked structures produced by the resolver. Everything here is
//! immutable after resolution and shared (`Arc`) by all runtime instances:
//! module positions are [`ModIx`] handles into the line's module list,
//! equivalence groups are [`GroupId`] handles into the line's group table,
//! and argument references are indices into the line's own argument pool or
//! the process-wide static-output pool.

use std::sync::Arc;

use serde::Serialize;

use super::model::RetExpect;
use super::registry::ModuleDef;

/// Position of a module within its line's module list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModIx(pub usize);

/// Equivalence-group handle within one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(pub usize);

/// Kind of an argument identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgKind {
    /// Fixed text; its value cell holds the text forever.
    Literal,
    /// Produced at runtime by some module or trigger output.
    Variable,
}

/// One argument identity: name plus kind.
///
/// Variable names keep their leading `$`; literal names are the literal text
/// itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgSpec {
    pub name: String,
    pub kind: ArgKind,
}

impl ArgSpec {
    pub fn literal(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ArgKind::Literal,
        }
    }

    pub fn variable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ArgKind::Variable,
        }
    }
}

/// Reference to an argument's value cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgRef {
    /// Index into the line's own argument pool.
    Line(usize),
    /// Index into the process-wide static-output set.
    Static(usize),
}

/// Target of a requirement edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReqTarget {
    /// The line's trigger, named directly.
    Trigger,
    /// A module of the same line.
    Module(ModIx),
}

/// One requirement edge: target plus expected return value.
#[derive(Debug, Clone, Copy)]
pub struct RequirementEdge {
    pub target: ReqTarget,
    pub expect: RetExpect,
}

/// A line's trigger with its resolved bindings.
#[derive(Debug)]
pub struct LineTrigger {
    pub def: Arc<ModuleDef>,
    pub inputs: Vec<ArgRef>,
    pub outputs: Vec<ArgRef>,
}

/// One module use within a line, fully resolved.
#[derive(Debug)]
pub struct LineModule {
    pub name: String,
    pub def: Arc<ModuleDef>,
    pub inputs: Vec<ArgRef>,
    pub outputs: Vec<ArgRef>,
    pub requirements: Vec<RequirementEdge>,
    /// Directly declared equivalence partners.
    pub equivalents: Vec<ModIx>,
}

impl LineModule {
    /// The expected return value this module declared for a target, if any.
    pub fn expect_for(&self, target: ReqTarget) -> Option<RetExpect> {
        self.requirements
            .iter()
            .find(|edge| edge.target == target)
            .map(|edge| edge.expect)
    }
}

/// A validated workflow line.
#[derive(Debug)]
pub struct Line {
    pub name: String,
    pub desc: String,
    pub trigger: LineTrigger,
    pub modules: Vec<LineModule>,
    /// The unique module no other module requires.
    pub end: ModIx,
    /// The line's private argument-identity pool.
    pub args: Vec<ArgSpec>,
    /// Group handle per module, indexed by [`ModIx`].
    pub group_of: Vec<GroupId>,
    /// Group members, indexed by [`GroupId`].
    pub groups: Vec<Vec<ModIx>>,
}

impl Line {
    pub fn module(&self, ix: ModIx) -> &LineModule {
        &self.modules[ix.0]
    }

    pub fn module_ix(&self, name: &str) -> Option<ModIx> {
        self.modules
            .iter()
            .position(|m| m.name == name)
            .map(ModIx)
    }

    /// All members of the equivalence group containing `ix`.
    pub fn group_members(&self, ix: ModIx) -> &[ModIx] {
        &self.groups[self.group_of[ix.0].0]
    }

    pub fn end_module(&self) -> &LineModule {
        self.module(self.end)
    }
}

/// A static module with its resolved argument identities.
#[derive(Debug)]
pub struct StaticModule {
    pub def: Arc<ModuleDef>,
    /// Literal inputs, private to the one instance.
    pub inputs: Vec<ArgSpec>,
    /// Variable outputs, installed process-wide after the static phase.
    pub outputs: Vec<ArgSpec>,
    /// Slot in the static-output set per output, parallel to `outputs`.
    pub slots: Vec<usize>,
}

/// A fully resolved catalog, ready to schedule.
#[derive(Debug, Default)]
pub struct Catalog {
    pub lines: Vec<Arc<Line>>,
    pub statics: Vec<Arc<StaticModule>>,
    /// Identities of the process-wide static-output slots.
    pub static_args: Vec<ArgSpec>,
}

impl Catalog {
    pub fn line(&self, name: &str) -> Option<&Arc<Line>> {
        self.lines.iter().find(|l| l.name == name)
    }

    /// Builds the serializable layout used by check mode.
    pub fn summary(&self) -> CatalogSummary {
        CatalogSummary {
            lines: self
                .lines
                .iter()
                .map(|line| LineSummary {
                    name: line.name.clone(),
                    trigger: line.trigger.def.name.clone(),
                    modules: line.modules.iter().map(|m| m.name.clone()).collect(),
                    end_module: line.end_module().name.clone(),
                    groups: line
                        .groups
                        .iter()
                        .filter(|members| members.len() > 1)
                        .map(|members| {
                            members
                                .iter()
                                .map(|ix| line.module(*ix).name.clone())
                                .collect()
                        })
                        .collect(),
                })
                .collect(),
            static_modules: self
                .statics
                .iter()
                .map(|s| s.def.name.clone())
                .collect(),
            static_outputs: self.static_args.iter().map(|a| a.name.clone()).collect(),
        }
    }
}

/// Check-mode layout of a resolved catalog.
#[derive(Debug, Serialize)]
pub struct CatalogSummary {
    pub lines: Vec<LineSummary>,
    pub static_modules: Vec<String>,
    pub static_outputs: Vec<String>,
}

/// Check-mode layout of one line.
#[derive(Debug, Serialize)]
pub struct LineSummary {
    pub name: String,
    pub trigger: String,
    pub modules: Vec<String>,
    pub end_module: String,
    /// Equivalence groups with more than one member.
    pub groups: Vec<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arg_spec_constructors() {
        let lit = ArgSpec::literal("500");
        assert_eq!(lit.kind, ArgKind::Literal);
        let var = ArgSpec::variable("$batch");
        assert_eq!(var.kind, ArgKind::Variable);
        assert_eq!(var.name, "$batch");
    }

    #[test]
    fn test_expect_for_finds_declared_edge() {
        let module = LineModule {
            name: "parse".to_string(),
            def: test_def("parse"),
            inputs: Vec::new(),
            outputs: Vec::new(),
            requirements: vec![
                RequirementEdge {
                    target: ReqTarget::Module(ModIx(0)),
                    expect: RetExpect::Exact(0),
                },
                RequirementEdge {
                    target: ReqTarget::Trigger,
                    expect: RetExpect::Any,
                },
            ],
            equivalents: Vec::new(),
        };
        assert_eq!(
            module.expect_for(ReqTarget::Module(ModIx(0))),
            Some(RetExpect::Exact(0))
        );
        assert_eq!(module.expect_for(ReqTarget::Trigger), Some(RetExpect::Any));
        assert_eq!(module.expect_for(ReqTarget::Module(ModIx(3))), None);
    }

    fn test_def(name: &str) -> Arc<ModuleDef> {
        use super::super::registry::{ExecKind, ModuleRole};
        Arc::new(ModuleDef {
            name: name.to_string(),
            kind: ExecKind::Callback,
            role: ModuleRole::Regular,
            entry: "noop".to_string(),
            file: std::path::PathBuf::new(),
            desc: String::new(),
            callback: None,
        })
    }
}
