//! Identity keys for remote issues.
//!
//! A key is the service namespace plus the values of the service's
//! unique-key fields. It is derived only from those fields, so edits to
//! titles, states or anything else never change which task an issue maps
//! to.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::issue::RemoteIssue;
use crate::services::{self, ServiceKind};
use crate::task::LocalTask;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct IdentityKey {
    service: ServiceKind,
    parts: Vec<(String, String)>,
}

impl IdentityKey {
    pub fn new(service: ServiceKind, parts: Vec<(String, String)>) -> Self {
        Self { service, parts }
    }

    pub fn service(&self) -> ServiceKind {
        self.service
    }

    pub fn parts(&self) -> &[(String, String)] {
        &self.parts
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", services::descriptor(self.service).namespace)?;
        for (index, (field, value)) in self.parts.iter().enumerate() {
            if index > 0 {
                f.write_str(",")?;
            }
            write!(f, "{field}={value}")?;
        }
        Ok(())
    }
}

/// Key of a remote issue. A missing or empty unique-key field is fatal.
pub fn resolve(issue: &RemoteIssue) -> Result<IdentityKey> {
    let descriptor = services::descriptor(issue.service);
    let mut parts = Vec::with_capacity(descriptor.unique_key.len());
    for field in descriptor.unique_key {
        let value = issue
            .uda(field)
            .and_then(key_value)
            .ok_or_else(|| Error::MissingUniqueKey {
                service: issue.service.to_string(),
                field: field.to_string(),
            })?;
        parts.push((field.to_string(), value));
    }
    Ok(IdentityKey::new(issue.service, parts))
}

/// Key of a stored task, tried against each service in order. Tasks with
/// no complete key for any of them are not managed by the sync.
pub fn resolve_local(task: &LocalTask, services: &[ServiceKind]) -> Option<IdentityKey> {
    services.iter().find_map(|service| {
        let descriptor = services::descriptor(*service);
        let parts = descriptor
            .unique_key
            .iter()
            .map(|field| {
                task.udas
                    .get(*field)
                    .and_then(key_value)
                    .map(|value| (field.to_string(), value))
            })
            .collect::<Option<Vec<_>>>()?;
        Some(IdentityKey::new(*service, parts))
    })
}

fn key_value(value: &Value) -> Option<String> {
    match value {
        Value::String(value) => {
            let value = value.trim();
            (!value.is_empty()).then(|| value.to_string())
        }
        Value::Number(value) => Some(value.to_string()),
        Value::Bool(value) => Some(value.to_string()),
        _ => None,
    }
}
