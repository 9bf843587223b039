//! Catalog File Loading
//!
//! Reads a catalog document from a YAML file and hands the raw records to
//! the registry and resolver. Unknown keys are ignored and missing sections
//! default to empty, so a catalog can declare only the parts it uses.

use std::fs;
use std::path::Path;

use log::{info, warn};

use crate::error::CatalogError;

use super::model::CatalogDoc;

/// Loads a catalog document from a YAML file.
pub fn load_catalog(path: &Path) -> Result<CatalogDoc, CatalogError> {
    info!("Loading catalog from {}", path.display());
    let text = fs::read_to_string(path)?;
    parse_catalog(&text)
}

/// Parses a catalog document from YAML text.
pub fn parse_catalog(text: &str) -> Result<CatalogDoc, CatalogError> {
    let doc: CatalogDoc = serde_yaml::from_str(text)?;

    if doc.main_lines.is_empty() {
        warn!("Catalog declares no main lines; only static modules will run");
    }
    info!(
        "Parsed catalog: {} modules, {} triggers, {} static modules, {} lines",
        doc.modules.len(),
        doc.triggers.len(),
        doc.static_modules.len(),
        doc.main_lines.len()
    );

    Ok(doc)
}
