//! Field merge policies.
//!
//! Decides, field by field, how a remote value combines with what the
//! local task already holds. Everything here is pure: callers pass the
//! current local value and the remote value and get the merged value back.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::GeneralConfig;
use crate::error::{Error, Result};

/// Fields that hold lists of strings
pub const LIST_FIELDS: [&str; 2] = ["tags", "annotations"];

pub fn is_list_field(field: &str) -> bool {
    LIST_FIELDS.contains(&field)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Union of local and remote entries
    Merge,
    /// Remote list wins; kept local entries survive
    Replace,
    /// Remote value replaces local when the remote carries the field
    Overwrite,
    /// Set once, never overwritten
    Static,
}

impl MergePolicy {
    pub fn is_list_policy(&self) -> bool {
        matches!(self, MergePolicy::Merge | MergePolicy::Replace)
    }
}

impl fmt::Display for MergePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergePolicy::Merge => write!(f, "merge"),
            MergePolicy::Replace => write!(f, "replace"),
            MergePolicy::Overwrite => write!(f, "overwrite"),
            MergePolicy::Static => write!(f, "static"),
        }
    }
}

impl FromStr for MergePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "merge" => Ok(MergePolicy::Merge),
            "replace" => Ok(MergePolicy::Replace),
            "overwrite" => Ok(MergePolicy::Overwrite),
            "static" => Ok(MergePolicy::Static),
            other => Err(format!("unknown merge policy '{other}'")),
        }
    }
}

/// Knobs for list policies
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeOptions<'a> {
    /// Entries equal after whitespace normalization count as duplicates
    pub rough_equality: bool,
    /// Local entries that survive `Replace`
    pub keep: &'a [String],
}

/// Merge one field.
///
/// `local` is `None` when the task has no value for the field, `remote` is
/// `None` when the record does not carry it. A remote `null` under
/// `Overwrite` clears the field.
pub fn apply(
    field: &str,
    local: Option<&Value>,
    remote: Option<&Value>,
    policy: MergePolicy,
    options: MergeOptions<'_>,
) -> Result<Option<Value>> {
    match policy {
        MergePolicy::Overwrite => Ok(match remote {
            Some(Value::Null) => None,
            Some(value) => Some(value.clone()),
            None => local.cloned(),
        }),
        MergePolicy::Static => Ok(match local {
            Some(value) if !value.is_null() => Some(value.clone()),
            _ => remote.filter(|value| !value.is_null()).cloned(),
        }),
        MergePolicy::Merge => {
            let local = list_entries(field, local)?;
            let remote = list_entries(field, remote)?;
            Ok(to_list_value(merge_list(&local, &remote, options.rough_equality)))
        }
        MergePolicy::Replace => {
            let local = list_entries(field, local)?;
            let remote = list_entries(field, remote)?;
            Ok(to_list_value(replace_list(&local, &remote, options.keep)))
        }
    }
}

fn list_entries(field: &str, value: Option<&Value>) -> Result<Vec<String>> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(values)) => values
            .iter()
            .map(|value| match value {
                Value::String(value) => Ok(value.clone()),
                Value::Number(value) => Ok(value.to_string()),
                _ => Err(list_type_error(field)),
            })
            .collect(),
        Some(_) => Err(list_type_error(field)),
    }
}

fn list_type_error(field: &str) -> Error {
    Error::FieldType {
        field: field.to_string(),
        expected: "a list of strings".to_string(),
    }
}

fn to_list_value(entries: Vec<String>) -> Option<Value> {
    if entries.is_empty() {
        None
    } else {
        Some(Value::Array(entries.into_iter().map(Value::String).collect()))
    }
}

/// Whitespace-normalized form used by rough equality
pub fn rough_key(entry: &str) -> String {
    entry.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn roughly_equal(left: &str, right: &str) -> bool {
    rough_key(left) == rough_key(right)
}

/// Local entries in order, then remote entries not already present
pub fn merge_list(local: &[String], remote: &[String], rough_equality: bool) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(local.len() + remote.len());
    for entry in local.iter().chain(remote) {
        let duplicate = merged.iter().any(|existing| {
            existing == entry || (rough_equality && roughly_equal(existing, entry))
        });
        if !duplicate {
            merged.push(entry.clone());
        }
    }
    merged
}

/// Kept local entries in local order, then remote entries not already
/// present in remote order
pub fn replace_list(local: &[String], remote: &[String], keep: &[String]) -> Vec<String> {
    let mut replaced: Vec<String> = local
        .iter()
        .filter(|entry| keep.contains(entry))
        .cloned()
        .collect();
    replaced.dedup();
    for entry in remote {
        if !replaced.contains(entry) {
            replaced.push(entry.clone());
        }
    }
    replaced
}

/// Resolved policy for every field, built from `[general]`
#[derive(Debug, Clone)]
pub struct PolicyTable {
    policies: BTreeMap<String, MergePolicy>,
    keep: BTreeMap<String, Vec<String>>,
    annotation_rough_equality: bool,
}

impl Default for PolicyTable {
    fn default() -> Self {
        let mut policies = BTreeMap::new();
        policies.insert("annotations".to_string(), MergePolicy::Merge);
        policies.insert("tags".to_string(), MergePolicy::Merge);
        Self {
            policies,
            keep: BTreeMap::new(),
            annotation_rough_equality: true,
        }
    }
}

impl PolicyTable {
    /// Fields not listed anywhere default to `Overwrite`.
    ///
    /// Precedence: `static_fields`, then `[general.policies]`, then the
    /// merge toggles.
    pub fn from_config(general: &GeneralConfig) -> Result<Self> {
        let mut policies = BTreeMap::new();

        policies.insert(
            "annotations".to_string(),
            if general.merge_annotations {
                MergePolicy::Merge
            } else {
                MergePolicy::Static
            },
        );
        policies.insert(
            "tags".to_string(),
            match (general.merge_tags, general.replace_tags) {
                (false, _) => MergePolicy::Static,
                (true, true) => MergePolicy::Replace,
                (true, false) => MergePolicy::Merge,
            },
        );

        for (raw_field, raw) in &general.policies {
            let field = raw_field.trim();
            let policy = raw
                .parse::<MergePolicy>()
                .map_err(|_| Error::UnknownMergePolicy {
                    field: field.to_string(),
                    policy: raw.clone(),
                })?;
            if policy.is_list_policy() && !is_list_field(field) {
                return Err(Error::InvalidConfig(format!(
                    "general.policies.{field}: '{policy}' only applies to list fields"
                )));
            }
            policies.insert(field.to_string(), policy);
        }

        for field in &general.static_fields {
            policies.insert(field.trim().to_string(), MergePolicy::Static);
        }

        Ok(Self {
            policies,
            keep: general.keep.clone(),
            annotation_rough_equality: general.annotation_rough_equality,
        })
    }

    pub fn policy_for(&self, field: &str) -> MergePolicy {
        self.policies
            .get(field)
            .copied()
            .unwrap_or(MergePolicy::Overwrite)
    }

    pub fn options_for(&self, field: &str) -> MergeOptions<'_> {
        MergeOptions {
            rough_equality: field == "annotations" && self.annotation_rough_equality,
            keep: self.keep.get(field).map(Vec::as_slice).unwrap_or(&[]),
        }
    }

    pub fn apply(&self, field: &str, local: Option<&Value>, remote: Option<&Value>) -> Result<Option<Value>> {
        apply(
            field,
            local,
            remote,
            self.policy_for(field),
            self.options_for(field),
        )
    }
}
