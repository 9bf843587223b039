//! Module Registry
//!
//! Name-keyed lookup of module, trigger, and static-module definitions, plus
//! the mechanism that makes a definition callable: in-process (`so`) entries
//! bind their entry symbol against a [`CallbackTable`]; external-process
//! (`pro`) entries must point at an executable file.
//!
//! Entries that cannot be made callable are skipped with a warning and never
//! registered — a line that references one fails resolution with an unknown
//! reference, which names the exact catalog entry to fix.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};

use crate::error::CatalogError;
use crate::runtime::context::ValueCell;

use super::model::{CatalogDoc, ModuleRecord, StaticRecord};

/// Signature of an in-process module callback.
///
/// Receives the resolved input cells and output cells; returns the integer
/// status used in requirement matching.
pub type ModuleFn = Arc<dyn Fn(&[Arc<ValueCell>], &[Arc<ValueCell>]) -> i32 + Send + Sync>;

/// Execution kind of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecKind {
    /// In-process callback (`so`).
    Callback,
    /// Spawned external process (`pro`).
    Process,
}

impl ExecKind {
    fn parse(kind: &str) -> Option<Self> {
        match kind {
            "so" => Some(ExecKind::Callback),
            "pro" => Some(ExecKind::Process),
            _ => None,
        }
    }
}

impl fmt::Display for ExecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecKind::Callback => write!(f, "so"),
            ExecKind::Process => write!(f, "pro"),
        }
    }
}

/// Role a definition plays in a catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleRole {
    Regular,
    Trigger,
    Static,
}

impl fmt::Display for ModuleRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleRole::Regular => write!(f, "module"),
            ModuleRole::Trigger => write!(f, "trigger"),
            ModuleRole::Static => write!(f, "static module"),
        }
    }
}

/// One immutable, registered definition, shared by every runtime instance.
pub struct ModuleDef {
    pub name: String,
    pub kind: ExecKind,
    pub role: ModuleRole,
    /// Entry symbol for `so` definitions; empty for `pro`.
    pub entry: String,
    /// Executable path for `pro` definitions.
    pub file: PathBuf,
    pub desc: String,
    /// Bound callback for `so` definitions.
    pub callback: Option<ModuleFn>,
}

impl fmt::Debug for ModuleDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDef")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("role", &self.role)
            .field("entry", &self.entry)
            .field("file", &self.file)
            .field("callback", &self.callback.as_ref().map(|_| "<bound>"))
            .finish()
    }
}

/// Registered in-process callbacks, keyed by entry symbol.
///
/// Library users build their own table; the binary installs the stock one
/// from [`crate::builtins`].
#[derive(Default)]
pub struct CallbackTable {
    entries: HashMap<String, ModuleFn>,
}

impl CallbackTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback closure under an entry symbol.
    pub fn register<F>(&mut self, symbol: impl Into<String>, callback: F)
    where
        F: Fn(&[Arc<ValueCell>], &[Arc<ValueCell>]) -> i32 + Send + Sync + 'static,
    {
        self.entries.insert(symbol.into(), Arc::new(callback));
    }

    /// Registers an already-wrapped callback.
    pub fn insert(&mut self, symbol: impl Into<String>, callback: ModuleFn) {
        self.entries.insert(symbol.into(), callback);
    }

    /// Looks up the callback bound to an entry symbol.
    pub fn bind(&self, symbol: &str) -> Option<ModuleFn> {
        self.entries.get(symbol).map(Arc::clone)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Name-keyed definition tables for one loaded catalog.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: HashMap<String, Arc<ModuleDef>>,
    triggers: HashMap<String, Arc<ModuleDef>>,
    statics: HashMap<String, Arc<ModuleDef>>,
}

impl ModuleRegistry {
    /// Builds a registry from catalog records.
    ///
    /// Names must be unique across modules, triggers, and static modules.
    /// Structurally invalid records are hard errors; records that merely
    /// cannot be made callable (missing executable, unbound symbol) are
    /// skipped with a warning.
    pub fn load(doc: &CatalogDoc, callbacks: &CallbackTable) -> Result<Self, CatalogError> {
        let mut seen: HashSet<&str> = HashSet::new();
        let all_names = doc
            .modules
            .iter()
            .map(|r| r.name.as_str())
            .chain(doc.triggers.iter().map(|r| r.name.as_str()))
            .chain(doc.static_modules.iter().map(|r| r.name.as_str()));
        for name in all_names {
            if !name.is_empty() && !seen.insert(name) {
                return Err(CatalogError::DuplicateName {
                    scope: "module registry".to_string(),
                    name: name.to_string(),
                });
            }
        }

        let mut registry = ModuleRegistry::default();

        for record in &doc.modules {
            if let Some(def) = build_def(record, ModuleRole::Regular, callbacks)? {
                registry.modules.insert(def.name.clone(), def);
            }
        }
        for record in &doc.triggers {
            if let Some(def) = build_def(record, ModuleRole::Trigger, callbacks)? {
                registry.triggers.insert(def.name.clone(), def);
            }
        }
        for record in &doc.static_modules {
            if let Some(def) = build_static_def(record, callbacks)? {
                registry.statics.insert(def.name.clone(), def);
            }
        }

        info!(
            "Registered {} modules, {} triggers, {} static modules",
            registry.modules.len(),
            registry.triggers.len(),
            registry.statics.len()
        );

        Ok(registry)
    }

    pub fn module(&self, name: &str) -> Option<Arc<ModuleDef>> {
        self.modules.get(name).map(Arc::clone)
    }

    pub fn trigger(&self, name: &str) -> Option<Arc<ModuleDef>> {
        self.triggers.get(name).map(Arc::clone)
    }

    pub fn static_module(&self, name: &str) -> Option<Arc<ModuleDef>> {
        self.statics.get(name).map(Arc::clone)
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    pub fn trigger_count(&self) -> usize {
        self.triggers.len()
    }

    pub fn static_count(&self) -> usize {
        self.statics.len()
    }
}

fn build_def(
    record: &ModuleRecord,
    role: ModuleRole,
    callbacks: &CallbackTable,
) -> Result<Option<Arc<ModuleDef>>, CatalogError> {
    make_def(
        &record.name,
        &record.kind,
        &record.main,
        &record.file,
        &record.desc,
        role,
        callbacks,
    )
}

fn build_static_def(
    record: &StaticRecord,
    callbacks: &CallbackTable,
) -> Result<Option<Arc<ModuleDef>>, CatalogError> {
    make_def(
        &record.name,
        &record.kind,
        &record.main,
        &record.file,
        &record.desc,
        ModuleRole::Static,
        callbacks,
    )
}

fn make_def(
    name: &str,
    kind: &str,
    main: &str,
    file: &str,
    desc: &str,
    role: ModuleRole,
    callbacks: &CallbackTable,
) -> Result<Option<Arc<ModuleDef>>, CatalogError> {
    if name.trim().is_empty() {
        return Err(CatalogError::EmptyField {
            entity: format!("a {} record", role),
            field: "name",
        });
    }

    let exec_kind = ExecKind::parse(kind).ok_or_else(|| CatalogError::UnknownKind {
        module: name.to_string(),
        kind: kind.to_string(),
    })?;

    let callback = match exec_kind {
        ExecKind::Callback => {
            if main.trim().is_empty() {
                return Err(CatalogError::MissingEntry {
                    module: name.to_string(),
                });
            }
            match callbacks.bind(main) {
                Some(f) => Some(f),
                None => {
                    warn!(
                        "{} '{}': entry symbol '{}' is not registered, skipping",
                        role, name, main
                    );
                    return Ok(None);
                }
            }
        }
        ExecKind::Process => {
            if file.trim().is_empty() {
                return Err(CatalogError::EmptyField {
                    entity: format!("{} '{}'", role, name),
                    field: "file",
                });
            }
            if !is_executable(Path::new(file)) {
                warn!(
                    "{} '{}': file '{}' is missing or not executable, skipping",
                    role, name, file
                );
                return Ok(None);
            }
            None
        }
    };

    debug!("Registered {} '{}' ({})", role, name, exec_kind);

    Ok(Some(Arc::new(ModuleDef {
        name: name.to_string(),
        kind: exec_kind,
        role,
        entry: main.to_string(),
        file: PathBuf::from(file),
        desc: desc.to_string(),
        callback,
    })))
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    match fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    fn stock_table() -> CallbackTable {
        let mut table = CallbackTable::new();
        table.register("noop", |_inputs: &[Arc<ValueCell>], _outputs: &[Arc<ValueCell>]| 0);
        table
    }

    fn write_executable(dir: &std::path::Path, name: &str) -> String {
        let path = dir.join(name);
        let mut f = fs::File::create(&path).unwrap();
        writeln!(f, "#!/bin/sh\nexit 0").unwrap();
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn doc_from(yaml: &str) -> CatalogDoc {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_registers_bound_callback_module() {
        let doc = doc_from("modules:\n  - name: parse\n    type: so\n    main: noop");
        let registry = ModuleRegistry::load(&doc, &stock_table()).unwrap();
        let def = registry.module("parse").unwrap();
        assert_eq!(def.kind, ExecKind::Callback);
        assert!(def.callback.is_some());
    }

    #[test]
    fn test_skips_unbound_callback_module() {
        let doc = doc_from("modules:\n  - name: parse\n    type: so\n    main: missing_symbol");
        let registry = ModuleRegistry::load(&doc, &stock_table()).unwrap();
        assert!(registry.module("parse").is_none());
        assert_eq!(registry.module_count(), 0);
    }

    #[test]
    fn test_registers_executable_process_module() {
        let dir = tempdir().unwrap();
        let path = write_executable(dir.path(), "fetch.sh");
        let doc = doc_from(&format!(
            "modules:\n  - name: fetch\n    type: pro\n    file: {}",
            path
        ));
        let registry = ModuleRegistry::load(&doc, &CallbackTable::new()).unwrap();
        let def = registry.module("fetch").unwrap();
        assert_eq!(def.kind, ExecKind::Process);
        assert!(def.callback.is_none());
    }

    #[test]
    fn test_skips_missing_process_file() {
        let doc = doc_from("modules:\n  - name: fetch\n    type: pro\n    file: /no/such/file");
        let registry = ModuleRegistry::load(&doc, &CallbackTable::new()).unwrap();
        assert!(registry.module("fetch").is_none());
    }

    #[test]
    fn test_skips_non_executable_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.txt");
        fs::write(&path, "not a program").unwrap();
        let doc = doc_from(&format!(
            "modules:\n  - name: fetch\n    type: pro\n    file: {}",
            path.display()
        ));
        let registry = ModuleRegistry::load(&doc, &CallbackTable::new()).unwrap();
        assert!(registry.module("fetch").is_none());
    }

    #[test]
    fn test_rejects_unknown_kind() {
        let doc = doc_from("modules:\n  - name: fetch\n    type: jar");
        let err = ModuleRegistry::load(&doc, &CallbackTable::new()).unwrap_err();
        assert!(matches!(err, CatalogError::UnknownKind { .. }));
    }

    #[test]
    fn test_rejects_so_without_main() {
        let doc = doc_from("modules:\n  - name: parse\n    type: so");
        let err = ModuleRegistry::load(&doc, &stock_table()).unwrap_err();
        assert!(matches!(err, CatalogError::MissingEntry { .. }));
    }

    #[test]
    fn test_rejects_duplicate_name_across_roles() {
        let doc = doc_from(
            "modules:\n  - name: poll\n    type: so\n    main: noop\n\
             triggers:\n  - name: poll\n    type: so\n    main: noop",
        );
        let err = ModuleRegistry::load(&doc, &stock_table()).unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateName { .. }));
    }

    #[test]
    fn test_roles_resolve_in_their_own_table() {
        let doc = doc_from(
            "triggers:\n  - name: poll\n    type: so\n    main: noop\n\
             static_modules:\n  - name: conf\n    type: so\n    main: noop",
        );
        let registry = ModuleRegistry::load(&doc, &stock_table()).unwrap();
        assert!(registry.trigger("poll").is_some());
        assert!(registry.module("poll").is_none());
        assert!(registry.static_module("conf").is_some());
        assert_eq!(registry.static_count(), 1);
    }

    #[test]
    fn test_callback_table_bind() {
        let table = stock_table();
        assert!(table.bind("noop").is_some());
        assert!(table.bind("other").is_none());
        assert_eq!(table.len(), 1);
    }
}
