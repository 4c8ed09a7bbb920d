//! User-defined attribute (UDA) registry.
//!
//! Every service declares the extra task fields it writes. The registry
//! merges those declarations across the configured services so the task
//! store schema can be printed (`issuesync uda`) and so incoming records
//! can be checked before they reach the merge engine.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate};
use serde::Serialize;
use serde_json::Value;

use crate::services::{self, ServiceKind};

/// Value type of a UDA, as understood by the task store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UdaType {
    String,
    Numeric,
    Date,
    Duration,
}

impl fmt::Display for UdaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UdaType::String => write!(f, "string"),
            UdaType::Numeric => write!(f, "numeric"),
            UdaType::Date => write!(f, "date"),
            UdaType::Duration => write!(f, "duration"),
        }
    }
}

impl UdaType {
    /// Whether `value` can be stored in a field of this type.
    ///
    /// `null` is accepted everywhere: it clears the field.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (UdaType::String, Value::String(_)) => true,
            (UdaType::String, Value::Number(_)) => true,
            (UdaType::String, Value::Bool(_)) => true,
            (UdaType::Numeric, Value::Number(_)) => true,
            (UdaType::Numeric, Value::String(s)) => s.trim().parse::<f64>().is_ok(),
            (UdaType::Numeric, Value::Bool(_)) => true,
            (UdaType::Date, Value::String(s)) => is_date(s),
            (UdaType::Duration, Value::String(s)) => !s.trim().is_empty(),
            (UdaType::Duration, Value::Number(_)) => true,
            _ => false,
        }
    }
}

fn is_date(raw: &str) -> bool {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw).is_ok() || NaiveDate::parse_from_str(raw, "%Y-%m-%d").is_ok()
}

/// One UDA declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UdaDecl {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub kind: UdaType,
    pub label: &'static str,
}

impl UdaDecl {
    pub const fn new(name: &'static str, kind: UdaType, label: &'static str) -> Self {
        Self { name, kind, label }
    }

    /// Task store configuration lines for this declaration
    pub fn config_lines(&self) -> [String; 2] {
        [
            format!("uda.{}.type={}", self.name, self.kind),
            format!("uda.{}.label={}", self.name, self.label),
        ]
    }
}

/// Declarations of every UDA the given services write, deduplicated by
/// name (first declaration wins) and sorted by name.
pub fn collect(kinds: &[ServiceKind]) -> Vec<UdaDecl> {
    let mut by_name: BTreeMap<&'static str, UdaDecl> = BTreeMap::new();
    for kind in kinds {
        for decl in services::descriptor(*kind).udas {
            by_name.entry(decl.name).or_insert(*decl);
        }
    }
    by_name.into_values().collect()
}

/// `uda.<name>.type=` / `uda.<name>.label=` lines, sorted
pub fn config_lines(kinds: &[ServiceKind]) -> Vec<String> {
    let mut lines: Vec<String> = collect(kinds)
        .iter()
        .flat_map(|decl| decl.config_lines())
        .collect();
    lines.sort();
    lines
}

/// Lookup table used to validate incoming records
#[derive(Debug, Clone, Default)]
pub struct UdaRegistry {
    decls: BTreeMap<&'static str, UdaDecl>,
}

impl UdaRegistry {
    pub fn for_services(kinds: &[ServiceKind]) -> Self {
        Self {
            decls: collect(kinds)
                .into_iter()
                .map(|decl| (decl.name, decl))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&UdaDecl> {
        self.decls.get(name)
    }

    pub fn len(&self) -> usize {
        self.decls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decls.is_empty()
    }
}
