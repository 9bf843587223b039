//! Catalog Loading and Resolution
//!
//! Everything that happens before the engine starts ticking:
//!
//! - `model`: raw serde records mirroring the YAML document
//! - `parser`: file reading and YAML parsing
//! - `registry`: name-keyed definitions with accessibility checks
//! - `line`: the resolved, handle-linked catalog structures
//! - `resolver`: binding-string parsing, reference resolution, group
//!   assignment, and load-time validation
//!
//! The output of this stage is an immutable [`Catalog`] shared by every
//! runtime instance through `Arc` handles.

pub mod line;
pub mod model;
pub mod parser;
pub mod registry;
pub mod resolver;

pub use line::{
    ArgKind, ArgRef, ArgSpec, Catalog, GroupId, Line, LineModule, LineTrigger, ModIx, ReqTarget,
    RequirementEdge, StaticModule,
};
pub use model::{CatalogDoc, RetExpect};
pub use parser::{load_catalog, parse_catalog};
pub use registry::{CallbackTable, ExecKind, ModuleDef, ModuleFn, ModuleRegistry, ModuleRole};
pub use resolver::{parse_argv, resolve_catalog};
