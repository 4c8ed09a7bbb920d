//! Normalized remote issue records
//!
//! A [`RemoteIssue`] is what every service hands to the synchronizer: a
//! fixed core schema plus the service's UDA fields. It is never persisted.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::Target;
use crate::error::{Error, Result};
use crate::services::ServiceKind;

/// Marker prefixed to generated descriptions
pub const DESCRIPTION_MARKUP: &str = "(bw)";

/// Core fields every record may carry
pub const CORE_FIELDS: [&str; 7] = [
    "description",
    "project",
    "priority",
    "due",
    "entry",
    "tags",
    "annotations",
];

/// One issue as reported by a remote service
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteIssue {
    /// Configured target that produced the record
    pub target: String,
    pub service: ServiceKind,
    pub description: String,
    pub project: Option<String>,
    pub priority: Option<String>,
    pub due: Option<DateTime<Utc>>,
    /// Creation time on the remote side, used when a task is created
    pub entry: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    pub annotations: Vec<String>,
    /// Core fields the record explicitly emptied (`null`, blank or `[]`).
    /// Empty core fields not listed here were absent from the record.
    pub cleared: BTreeSet<String>,
    /// Service-specific fields, keyed by UDA name
    pub udas: BTreeMap<String, Value>,
}

impl RemoteIssue {
    pub fn new(target: impl Into<String>, service: ServiceKind, description: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            service,
            description: description.into(),
            project: None,
            priority: None,
            due: None,
            entry: None,
            tags: Vec::new(),
            annotations: Vec::new(),
            cleared: BTreeSet::new(),
            udas: BTreeMap::new(),
        }
    }

    pub fn with_uda(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.udas.insert(name.to_string(), value.into());
        self
    }

    pub fn uda(&self, name: &str) -> Option<&Value> {
        self.udas.get(name)
    }

    /// Short label for diagnostics: the first string UDA that looks like
    /// a URL, else the description.
    pub fn label(&self) -> String {
        self.udas
            .iter()
            .filter(|(name, _)| name.ends_with("url"))
            .find_map(|(_, value)| value.as_str().map(str::to_string))
            .unwrap_or_else(|| self.description.clone())
    }

    /// Fields offered to the merge engine, in a stable order.
    ///
    /// An empty core field is only offered (as `null` or `[]`) when the
    /// record cleared it; otherwise it is left out so the local value
    /// stands. `entry` is left out: it only seeds new tasks.
    pub fn fields(&self) -> Vec<(String, Value)> {
        let mut fields = Vec::new();
        let mut offer = |name: &str, value: Option<Value>, empty: Value| {
            match value {
                Some(value) => fields.push((name.to_string(), value)),
                None if self.cleared.contains(name) => fields.push((name.to_string(), empty)),
                None => {}
            }
        };

        offer(
            "description",
            (!self.description.is_empty()).then(|| Value::String(self.description.clone())),
            Value::Null,
        );
        offer("project", optional_string(self.project.as_deref()), Value::Null);
        offer("priority", optional_string(self.priority.as_deref()), Value::Null);
        offer(
            "due",
            self.due.map(|due| Value::String(format_timestamp(due))),
            Value::Null,
        );
        offer("tags", string_list(&self.tags), Value::Array(Vec::new()));
        offer("annotations", string_list(&self.annotations), Value::Array(Vec::new()));

        fields.extend(self.udas.iter().map(|(name, value)| (name.clone(), value.clone())));
        fields
    }

    /// Build an issue from an already-normalized field map.
    ///
    /// Core fields are read by name; everything else lands in `udas`.
    /// The target's default priority fills a missing or blank priority.
    pub fn from_record(target: &Target, record: Value) -> Result<Self> {
        let Value::Object(mut map) = record else {
            return Err(Error::MalformedIssue {
                key: format!("[{}]", target.name),
                field: "record".to_string(),
                reason: "expected a JSON object".to_string(),
            });
        };
        let key = record_label(&target.name, &map);

        let mut cleared = BTreeSet::new();
        let mut track = |field: &str, present: bool, empty: bool| {
            if present && empty {
                cleared.insert(field.to_string());
            }
        };

        let description = match map.remove("description") {
            Some(Value::String(description)) => description,
            Some(Value::Null) | None => String::new(),
            Some(_) => return Err(malformed(&key, "description", "expected a string")),
        };

        let mut issue = RemoteIssue::new(target.name.clone(), target.service, description);

        let project = take_string(&mut map, &key, "project")?;
        track("project", project.is_some(), matches!(project, Some(None)));
        issue.project = project.flatten();

        let priority = take_string(&mut map, &key, "priority")?;
        let default_priority = target.default_priority().map(str::to_string);
        track(
            "priority",
            priority.is_some(),
            matches!(priority, Some(None)) && default_priority.is_none(),
        );
        issue.priority = priority.flatten().or(default_priority);

        let due = take_timestamp(&mut map, &key, "due")?;
        track("due", due.is_some(), matches!(due, Some(None)));
        issue.due = due.flatten();

        issue.entry = take_timestamp(&mut map, &key, "entry")?.flatten();

        let tags = take_list(&mut map, &key, "tags")?;
        track("tags", tags.is_some(), tags.as_ref().is_some_and(Vec::is_empty));
        issue.tags = tags
            .unwrap_or_default()
            .iter()
            .map(|tag| normalize_label_to_tag(tag))
            .collect();

        let annotations = take_list(&mut map, &key, "annotations")?;
        track(
            "annotations",
            annotations.is_some(),
            annotations.as_ref().is_some_and(Vec::is_empty),
        );
        issue.annotations = annotations.unwrap_or_default();
        issue.cleared = cleared;

        // Completion time is owned by the task store.
        map.remove("end");

        issue.udas = map.into_iter().collect();
        Ok(issue)
    }
}

fn optional_string(value: Option<&str>) -> Option<Value> {
    match value.map(str::trim) {
        Some(value) if !value.is_empty() => Some(Value::String(value.to_string())),
        _ => None,
    }
}

fn string_list(values: &[String]) -> Option<Value> {
    (!values.is_empty()).then(|| Value::Array(values.iter().cloned().map(Value::String).collect()))
}

fn malformed(key: &str, field: &str, reason: &str) -> Error {
    Error::MalformedIssue {
        key: key.to_string(),
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

fn record_label(target: &str, map: &Map<String, Value>) -> String {
    map.iter()
        .filter(|(name, _)| name.ends_with("url"))
        .find_map(|(_, value)| value.as_str().map(str::to_string))
        .unwrap_or_else(|| format!("[{target}]"))
}

// The `take_*` helpers return `None` when the record lacks the field and
// `Some(None)` (or an empty list) when it carries an empty value.

fn take_string(
    map: &mut Map<String, Value>,
    key: &str,
    field: &str,
) -> Result<Option<Option<String>>> {
    match map.remove(field) {
        None => Ok(None),
        Some(Value::Null) => Ok(Some(None)),
        Some(Value::String(value)) => {
            let value = value.trim();
            Ok(Some((!value.is_empty()).then(|| value.to_string())))
        }
        Some(Value::Number(value)) => Ok(Some(Some(value.to_string()))),
        Some(_) => Err(malformed(key, field, "expected a string")),
    }
}

fn take_timestamp(
    map: &mut Map<String, Value>,
    key: &str,
    field: &str,
) -> Result<Option<Option<DateTime<Utc>>>> {
    match map.remove(field) {
        None => Ok(None),
        Some(Value::Null) => Ok(Some(None)),
        Some(Value::String(raw)) if raw.trim().is_empty() => Ok(Some(None)),
        Some(Value::String(raw)) => parse_timestamp(&raw)
            .map(|parsed| Some(Some(parsed)))
            .ok_or_else(|| malformed(key, field, "expected an RFC 3339 timestamp or YYYY-MM-DD")),
        Some(_) => Err(malformed(key, field, "expected a timestamp string")),
    }
}

fn take_list(
    map: &mut Map<String, Value>,
    key: &str,
    field: &str,
) -> Result<Option<Vec<String>>> {
    match map.remove(field) {
        None => Ok(None),
        Some(Value::Null) => Ok(Some(Vec::new())),
        Some(Value::Array(values)) => values
            .into_iter()
            .map(|value| match value {
                Value::String(value) => Ok(value),
                Value::Number(value) => Ok(value.to_string()),
                _ => Err(malformed(key, field, "expected a list of strings")),
            })
            .collect::<Result<Vec<_>>>()
            .map(Some),
        Some(_) => Err(malformed(key, field, "expected a list of strings")),
    }
}

/// Parse an RFC 3339 timestamp or a plain `YYYY-MM-DD` date (midnight UTC)
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

pub fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Task store tags cannot contain whitespace.
pub fn normalize_label_to_tag(label: &str) -> String {
    label.split_whitespace().collect::<Vec<_>>().join("_")
}

/// `@author - text`
pub fn format_annotation(author: &str, text: &str) -> String {
    format!("@{author} - {text}")
}

/// Standard description line for a remote item:
/// `(bw)<Abbr>#<number> - <title> .. <url>`
pub fn default_description(kind: &str, number: &str, title: &str, url: &str) -> String {
    let abbreviation = match kind.trim().to_ascii_lowercase().as_str() {
        "issue" => "Is".to_string(),
        "pull_request" => "PR".to_string(),
        "merge_request" => "MR".to_string(),
        "todo" | "task" => String::new(),
        "subtask" => "Subtask #".to_string(),
        other => title_case(other),
    };
    let mut description = format!("{DESCRIPTION_MARKUP}{abbreviation}#{number} - {title}");
    if !url.is_empty() {
        description.push_str(" .. ");
        description.push_str(url);
    }
    description
}

fn title_case(raw: &str) -> String {
    raw.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TargetConfig;
    use serde_json::json;

    fn target(default_priority: Option<&str>) -> Target {
        let mut config = TargetConfig::new("github");
        config.default_priority = default_priority.map(str::to_string);
        Target {
            name: "gh".to_string(),
            service: ServiceKind::Github,
            config,
        }
    }

    #[test]
    fn from_record_splits_core_and_udas() {
        let issue = RemoteIssue::from_record(
            &target(None),
            json!({
                "description": "Fix it",
                "project": "sample_project",
                "priority": "H",
                "due": "2024-03-01",
                "entry": "2024-01-01T10:00:00Z",
                "end": "2024-02-01T10:00:00Z",
                "tags": ["needs work", "bug"],
                "annotations": ["@jane - looks good"],
                "githuburl": "https://example.com/1",
                "githubnumber": 1
            }),
        )
        .expect("normalize");

        assert_eq!(issue.description, "Fix it");
        assert_eq!(issue.project.as_deref(), Some("sample_project"));
        assert_eq!(issue.priority.as_deref(), Some("H"));
        assert_eq!(issue.due, parse_timestamp("2024-03-01"));
        assert_eq!(issue.tags, vec!["needs_work".to_string(), "bug".to_string()]);
        assert_eq!(issue.annotations.len(), 1);
        assert_eq!(issue.uda("githubnumber"), Some(&json!(1)));
        assert!(issue.uda("end").is_none());
        assert!(issue.uda("description").is_none());
    }

    #[test]
    fn blank_priority_falls_back_to_default() {
        let issue = RemoteIssue::from_record(
            &target(Some("M")),
            json!({"description": "x", "priority": ""}),
        )
        .expect("normalize");
        assert_eq!(issue.priority.as_deref(), Some("M"));

        let issue = RemoteIssue::from_record(&target(None), json!({"description": "x", "priority": ""}))
            .expect("normalize");
        let priority = issue
            .fields()
            .into_iter()
            .find(|(name, _)| name == "priority")
            .map(|(_, value)| value);
        assert_eq!(priority, Some(Value::Null));
    }

    #[test]
    fn bad_tags_are_malformed() {
        let err = RemoteIssue::from_record(
            &target(None),
            json!({"description": "x", "tags": "bug", "githuburl": "https://example.com/2"}),
        )
        .expect_err("malformed");
        match err {
            Error::MalformedIssue { key, field, .. } => {
                assert_eq!(key, "https://example.com/2");
                assert_eq!(field, "tags");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn fields_skip_entry() {
        let mut issue = RemoteIssue::new("gh", ServiceKind::Github, "x");
        issue.entry = parse_timestamp("2024-01-01");
        assert!(issue.fields().iter().all(|(name, _)| name != "entry"));
    }

    #[test]
    fn absent_fields_are_not_offered() {
        let issue = RemoteIssue::from_record(
            &target(None),
            json!({"description": "x", "githuburl": "https://example.com/4"}),
        )
        .expect("normalize");
        let names: Vec<String> = issue.fields().into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["description".to_string(), "githuburl".to_string()]);
    }

    #[test]
    fn explicit_empty_fields_are_offered_empty() {
        let issue = RemoteIssue::from_record(
            &target(None),
            json!({"description": "x", "project": null, "due": "", "tags": []}),
        )
        .expect("normalize");
        let fields: BTreeMap<String, Value> = issue.fields().into_iter().collect();
        assert_eq!(fields.get("project"), Some(&Value::Null));
        assert_eq!(fields.get("due"), Some(&Value::Null));
        assert_eq!(fields.get("tags"), Some(&json!([])));
        assert!(!fields.contains_key("priority"));
        assert!(!fields.contains_key("annotations"));
    }

    #[test]
    fn default_description_formats() {
        assert_eq!(
            default_description("issue", "3", "Add user settings", "example.com/issues/3"),
            "(bw)Is#3 - Add user settings .. example.com/issues/3"
        );
        assert_eq!(
            default_description("merge_request", "7", "Refactor", ""),
            "(bw)MR#7 - Refactor"
        );
        assert_eq!(
            default_description("user story", "12", "Login", "https://x/12"),
            "(bw)User Story#12 - Login .. https://x/12"
        );
    }

    #[test]
    fn label_to_tag() {
        assert_eq!(normalize_label_to_tag("needs work"), "needs_work");
        assert_eq!(normalize_label_to_tag("bug"), "bug");
    }
}
