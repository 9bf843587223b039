//! Catalog Data Model
//!
//! Raw record types deserialized from a catalog document, before any
//! reference resolution. The resolver turns these into linked [`super::line`]
//! structures.
//!
//! # Example YAML Format
//!
//! ```yaml
//! triggers:
//!   - name: poll
//!     type: so
//!     main: pulse
//!
//! modules:
//!   - name: fetch
//!     type: pro
//!     file: /usr/local/bin/fetch
//!     desc: pulls one batch from upstream
//!   - name: parse
//!     type: so
//!     main: emit
//!
//! static_modules:
//!   - name: load_conf
//!     type: so
//!     main: emit
//!     argv_in: '"/etc/pipeline.conf"'
//!     argv_out: $conf
//!
//! main_lines:
//!   - name: ingest
//!     trigger:
//!       trig_name: poll
//!       argv_in: '"500"'
//!       argv_out: $batch
//!     modules:
//!       - mod_name: fetch
//!         argv_in: $batch, $conf
//!         argv_out: $raw
//!         requirement:
//!           - name: poll
//!             ret_val: 0
//!       - mod_name: parse
//!         argv_in: $raw
//!         argv_out: $parsed
//!         requirement:
//!           - name: fetch
//!             ret_val: any
//! ```

use std::fmt;

use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::Value;

use crate::config::EngineSettings;

/// A parsed catalog document: definitions plus optional engine settings.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CatalogDoc {
    /// Engine tuning knobs; every field has a default.
    #[serde(default)]
    pub settings: EngineSettings,

    /// Regular module definitions.
    #[serde(default)]
    pub modules: Vec<ModuleRecord>,

    /// Trigger definitions (modules that start a line).
    #[serde(default)]
    pub triggers: Vec<ModuleRecord>,

    /// Modules run once at startup, before any line.
    #[serde(default)]
    pub static_modules: Vec<StaticRecord>,

    /// Workflow line definitions.
    #[serde(default)]
    pub main_lines: Vec<LineRecord>,
}

/// One module or trigger definition.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleRecord {
    pub name: String,

    /// Execution kind: `so` (in-process callback) or `pro` (external process).
    #[serde(rename = "type")]
    pub kind: String,

    /// Entry symbol in the callback table; required for `so`.
    #[serde(default)]
    pub main: String,

    /// Executable path; required for `pro`.
    #[serde(default)]
    pub file: String,

    #[serde(default)]
    pub desc: String,
}

/// A static-module definition with its own argument bindings.
///
/// Regular modules get their bindings per line; static modules run outside
/// any line, so the bindings live on the definition itself.
#[derive(Debug, Clone, Deserialize)]
pub struct StaticRecord {
    pub name: String,

    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub main: String,

    #[serde(default)]
    pub file: String,

    #[serde(default)]
    pub desc: String,

    #[serde(default)]
    pub argv_in: String,

    #[serde(default)]
    pub argv_out: String,
}

/// One workflow line: a trigger and its modules.
#[derive(Debug, Clone, Deserialize)]
pub struct LineRecord {
    pub name: String,

    #[serde(default)]
    pub desc: String,

    pub trigger: TriggerRecord,

    #[serde(default)]
    pub modules: Vec<LineModuleRecord>,
}

/// A line's trigger binding.
#[derive(Debug, Clone, Deserialize)]
pub struct TriggerRecord {
    pub trig_name: String,

    #[serde(default)]
    pub argv_in: String,

    #[serde(default)]
    pub argv_out: String,
}

/// One module use inside a line, with its bindings and relations.
#[derive(Debug, Clone, Deserialize)]
pub struct LineModuleRecord {
    pub mod_name: String,

    #[serde(default)]
    pub argv_in: String,

    #[serde(default)]
    pub argv_out: String,

    /// Requirement edges; all must be satisfied before this module runs.
    #[serde(default)]
    pub requirement: Vec<RequirementRecord>,

    /// Modules declared as mutual alternatives to this one.
    #[serde(default)]
    pub equivalent: Vec<EquivalentRecord>,
}

/// One requirement edge: a target name and the expected return value.
#[derive(Debug, Clone, Deserialize)]
pub struct RequirementRecord {
    pub name: String,

    #[serde(default, deserialize_with = "int_or_any")]
    pub ret_val: RetExpect,
}

/// One equivalence declaration.
#[derive(Debug, Clone, Deserialize)]
pub struct EquivalentRecord {
    pub name: String,
}

/// Expected return value of a requirement edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetExpect {
    /// Any return value satisfies the edge.
    Any,
    /// Only this exact return value satisfies the edge.
    Exact(i32),
}

impl RetExpect {
    /// Whether a concrete return value satisfies this expectation.
    pub fn matches(&self, ret: i32) -> bool {
        match self {
            RetExpect::Any => true,
            RetExpect::Exact(expected) => *expected == ret,
        }
    }
}

impl Default for RetExpect {
    fn default() -> Self {
        RetExpect::Any
    }
}

impl fmt::Display for RetExpect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetExpect::Any => write!(f, "any"),
            RetExpect::Exact(value) => write!(f, "{}", value),
        }
    }
}

/// Deserializes an integer or the literal string `any` into [`RetExpect`].
fn int_or_any<'de, D>(deserializer: D) -> Result<RetExpect, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    match val {
        Value::Null => Ok(RetExpect::Any),
        Value::Number(n) => n
            .as_i64()
            .filter(|v| i32::try_from(*v).is_ok())
            .map(|v| RetExpect::Exact(v as i32))
            .ok_or_else(|| de::Error::custom(format!("ret_val out of range: {}", n))),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.eq_ignore_ascii_case("any") {
                Ok(RetExpect::Any)
            } else {
                trimmed.parse::<i32>().map(RetExpect::Exact).map_err(|_| {
                    de::Error::custom(format!(
                        "invalid ret_val '{}' (expected an integer or 'any')",
                        s
                    ))
                })
            }
        }
        other => Err(de::Error::custom(format!(
            "invalid ret_val {:?} (expected an integer or 'any')",
            other
        ))),
    }
}
