//! Error types for issuesync
//!
//! Exit codes:
//! - 0: Success
//! - 2: Configuration or usage error (nothing was written)
//! - 3: A remote source failed (query rejected, source unreadable)
//! - 4: Operation failed (task store I/O, lock contention, hook failure)
//!
//! Record-level errors (`MalformedIssue`, `FieldType`) never reach the exit
//! code: the synchronizer skips the record and reports it.

use std::path::PathBuf;
use thiserror::Error;

/// Exit codes for the issuesync CLI
pub mod exit_codes {
    pub const USER_ERROR: i32 = 2;
    pub const REMOTE_FAILED: i32 = 3;
    pub const OPERATION_FAILED: i32 = 4;
}

/// Main error type for issuesync operations
#[derive(Error, Debug)]
pub enum Error {
    // Configuration / usage errors (exit code 2)
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unknown service '{service}' for target [{target}]")]
    UnknownService { target: String, service: String },

    #[error("Unknown merge policy '{policy}' for field '{field}'")]
    UnknownMergePolicy { field: String, policy: String },

    #[error("{service} record has no unique key field '{field}'")]
    MissingUniqueKey { service: String, field: String },

    // Record-level errors (skipped during a pass)
    #[error("Malformed issue {key}: {field}: {reason}")]
    MalformedIssue {
        key: String,
        field: String,
        reason: String,
    },

    #[error("Field '{field}' cannot be merged: expected {expected}")]
    FieldType { field: String, expected: String },

    // Remote failures (exit code 3)
    #[error("[{target}] query returned too many results: {message}")]
    QueryLimitExceeded { target: String, message: String },

    #[error("[{target}] remote error: {message}")]
    Remote { target: String, message: String },

    // Operation failures (exit code 4)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Lock acquisition failed: {0}")]
    LockFailed(PathBuf),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Duplicate identity key in commit: {0}")]
    DuplicateIdentity(String),

    #[error("pre_import hook failed: {0}")]
    HookFailed(String),

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

impl Error {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidConfig(_)
            | Error::InvalidArgument(_)
            | Error::UnknownService { .. }
            | Error::UnknownMergePolicy { .. }
            | Error::MissingUniqueKey { .. } => exit_codes::USER_ERROR,

            Error::QueryLimitExceeded { .. } | Error::Remote { .. } => exit_codes::REMOTE_FAILED,

            Error::MalformedIssue { .. }
            | Error::FieldType { .. }
            | Error::Io(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_)
            | Error::LockFailed(_)
            | Error::TaskNotFound(_)
            | Error::DuplicateIdentity(_)
            | Error::HookFailed(_)
            | Error::OperationFailed(_) => exit_codes::OPERATION_FAILED,
        }
    }

    /// Machine-readable class matching the exit code
    pub fn kind(&self) -> &'static str {
        match self.exit_code() {
            exit_codes::USER_ERROR => "user_error",
            exit_codes::REMOTE_FAILED => "remote_failed",
            _ => "operation_failed",
        }
    }

    /// Whether this error only invalidates the record that produced it.
    ///
    /// The synchronizer skips such records and keeps going; every other
    /// error aborts the pass before anything is committed.
    pub fn is_record_level(&self) -> bool {
        matches!(self, Error::MalformedIssue { .. } | Error::FieldType { .. })
    }

    /// Structured fields for machine-readable output
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Error::InvalidConfig(message) | Error::InvalidArgument(message) => {
                Some(serde_json::json!({ "message": message }))
            }
            Error::UnknownService { target, service } => {
                Some(serde_json::json!({ "target": target, "service": service }))
            }
            Error::UnknownMergePolicy { field, policy } => {
                Some(serde_json::json!({ "field": field, "policy": policy }))
            }
            Error::MissingUniqueKey { service, field } => {
                Some(serde_json::json!({ "service": service, "field": field }))
            }
            Error::MalformedIssue { key, field, reason } => Some(serde_json::json!({
                "key": key,
                "field": field,
                "reason": reason,
            })),
            Error::QueryLimitExceeded { target, message } | Error::Remote { target, message } => {
                Some(serde_json::json!({ "target": target, "message": message }))
            }
            Error::LockFailed(path) => Some(serde_json::json!({ "path": path })),
            _ => None,
        }
    }
}

/// Result type alias for issuesync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error body of the JSON envelope
#[derive(Debug, serde::Serialize)]
pub struct JsonError {
    pub message: String,
    pub code: i32,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&Error> for JsonError {
    fn from(err: &Error) -> Self {
        JsonError {
            message: err.to_string(),
            code: err.exit_code(),
            kind: err.kind(),
            details: err.details(),
        }
    }
}
