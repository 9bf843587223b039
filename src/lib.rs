//! Flowline - Catalog-Driven Workflow Engine
//!
//! A single-process engine that runs production lines described by a YAML
//! catalog. A line couples one trigger to a set of modules related by
//! requirement edges and equivalence groups; when an activation's trigger
//! fires, the line is re-armed, so lines flow continuously until stopped.
//!
//! # Architecture
//!
//! The library is organized into four main modules:
//!
//! - [`catalog`]: catalog records, the module registry, and the resolver
//!   that links and validates them into an immutable catalog
//! - [`runtime`]: execution contexts, the instance pool, the bounded worker
//!   pool, and the two-level scheduler
//! - [`builtins`]: stock in-process callbacks for catalogs that ship no
//!   code of their own
//! - [`config`]: engine settings from the catalog, overridable per run
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//!
//! use flowline::builtins::stock_table;
//! use flowline::{load_catalog, resolve_catalog, ModuleRegistry, Scheduler};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Load and resolve the catalog
//!     let doc = load_catalog(Path::new("catalog.yaml"))?;
//!     let registry = ModuleRegistry::load(&doc, &stock_table())?;
//!     let catalog = resolve_catalog(&doc, &registry)?;
//!
//!     // Run the engine until every line is out of rotation
//!     let mut scheduler = Scheduler::new(catalog, doc.settings.clone());
//!     let stats = scheduler.run()?;
//!     println!("{} activations finished", stats.finished);
//!     Ok(())
//! }
//! ```

pub mod builtins;
pub mod catalog;
pub mod config;
pub mod error;
pub mod runtime;

// Re-export commonly used types
pub use catalog::model::CatalogDoc;
pub use catalog::parser::{load_catalog, parse_catalog};
pub use catalog::registry::{CallbackTable, ModuleFn, ModuleRegistry};
pub use catalog::resolver::resolve_catalog;
pub use catalog::Catalog;
pub use config::EngineSettings;
pub use error::{CatalogError, EngineError, PoolError};
pub use runtime::{RunStats, RunStatus, Scheduler, ValueCell};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "flowline";
