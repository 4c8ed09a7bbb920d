//! issuesync - Issue Tracker Synchronization Library
//!
//! This library pulls issues from remote trackers and reconciles them
//! into a local task store, one task per remote issue.
//!
//! # Core Concepts
//!
//! - **Targets**: named configurations of one tracker service
//! - **Identity keys**: the service's unique-key fields, which pair a
//!   remote issue with its local task across runs
//! - **Merge policies**: per-field rules deciding how remote values land
//!   on an existing task (merge, replace, overwrite, static)
//! - **UDAs**: service-namespaced user-defined attributes carried on tasks
//!
//! # Module Organization
//!
//! - `cli`: Command-line interface using clap
//! - `config`: Configuration loading from `issuesync.toml`
//! - `error`: Error types and result aliases
//! - `services`: Tracker services and their record sources
//! - `issue`: Normalized remote issue records
//! - `identity`: Identity key resolution
//! - `merge`: Field merge policies
//! - `task`: Local tasks and the JSON task store
//! - `sync`: The reconciliation pass
//! - `uda`: UDA declarations and type checks
//! - `hooks`: Pre-import shell hooks
//! - `storage`: File storage and directory management
//! - `lock`: File locking for concurrent runs

pub mod cli;
pub mod config;
pub mod error;
pub mod hooks;
pub mod identity;
pub mod issue;
pub mod lock;
pub mod merge;
pub mod output;
pub mod services;
pub mod storage;
pub mod sync;
pub mod task;
pub mod uda;

pub use error::{Error, Result};
