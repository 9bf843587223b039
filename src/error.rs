//! Error Types
//!
//! Typed errors for the three failure domains:
//!
//! - [`CatalogError`]: loading, registering, and resolving a catalog
//! - [`PoolError`]: runtime object pool misuse
//! - [`EngineError`]: scheduler and worker-pool faults
//!
//! Catalog errors carry enough context (line name, module name, offending
//! reference) to point at the exact catalog entry that must be fixed. A
//! catalog that produces any of them is rejected as a whole.

use thiserror::Error;

use crate::runtime::context::RunStatus;

/// Errors raised while parsing, registering, or resolving a catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse catalog YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{entity} has an empty '{field}' field")]
    EmptyField { entity: String, field: &'static str },

    #[error("module '{module}' has unknown type '{kind}' (expected 'so' or 'pro')")]
    UnknownKind { module: String, kind: String },

    #[error("in-process module '{module}' does not declare a 'main' entry symbol")]
    MissingEntry { module: String },

    #[error("duplicate name '{name}' in {scope}")]
    DuplicateName { scope: String, name: String },

    #[error("line '{line}': {owner} references unknown {what} '{name}'")]
    UnknownReference {
        line: String,
        owner: String,
        what: &'static str,
        name: String,
    },

    #[error("static module '{name}' is not registered (missing, inaccessible, or unbound)")]
    UnknownStaticModule { name: String },

    #[error("line '{line}' has no end module (every module is required by another)")]
    NoEndModule { line: String },

    #[error("line '{line}' has multiple end-module candidates: {candidates}")]
    MultipleEndModules { line: String, candidates: String },

    #[error("line '{line}': module '{declarer}' declares '{partner}' as equivalent, but not vice versa")]
    AsymmetricEquivalence {
        line: String,
        declarer: String,
        partner: String,
    },

    #[error("line '{line}': module '{module}' declares the trigger as an equivalent")]
    TriggerEquivalence { line: String, module: String },

    #[error("line '{line}': module '{module}' requires the trigger alongside other requirements")]
    TriggerNotSoleRequirement { line: String, module: String },

    #[error(
        "line '{line}': module '{module}' requires '{required}' but not its \
         equivalence partner '{missing}'"
    )]
    BrokenGroupRequirement {
        line: String,
        module: String,
        required: String,
        missing: String,
    },

    #[error("line '{line}': output '{argument}' of '{module}' is not a variable")]
    OutputNotVariable {
        line: String,
        module: String,
        argument: String,
    },

    #[error("line '{line}': output '{argument}' of '{module}' collides with a static-module output")]
    ReservedOutputName {
        line: String,
        module: String,
        argument: String,
    },

    #[error("external-process module '{module}' declares more than one output")]
    ProcessOutputArity { module: String },

    #[error("static module '{module}': input '{argument}' must be a literal")]
    StaticInputNotLiteral { module: String, argument: String },

    #[error("static module '{module}': output '{argument}' is not a variable")]
    StaticOutputNotVariable { module: String, argument: String },

    #[error("static module '{module}': output '{argument}' is already declared by another static module")]
    StaticOutputCollision { module: String, argument: String },
}

/// Errors raised by the runtime object pool.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("'{name}' is not a registered definition in this pool")]
    UnknownDefinition { name: String },

    #[error("instance of '{name}' is not tracked as active (never obtained or already released)")]
    NotActive { name: String },
}

/// Errors raised while the engine is running.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("static module '{module}' ended with status {status} (ret {ret})")]
    StaticPhase {
        module: String,
        status: RunStatus,
        ret: i32,
    },

    #[error("worker pool is shut down")]
    WorkersClosed,

    #[error(transparent)]
    Pool(#[from] PoolError),
}
