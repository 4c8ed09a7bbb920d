//! Issue services
//!
//! A service knows how one tracker's records look: the fields forming its
//! identity key, the UDAs it writes, and how a raw record becomes a
//! [`RemoteIssue`]. Services are picked through [`service_for`] by
//! [`ServiceKind`]; sources ([`IssueSource`]) produce the record stream for
//! one configured target.

pub mod azuredevops;
pub mod feed;
pub mod github;
pub mod gitlab;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{Target, TargetConfig};
use crate::error::{Error, Result};
use crate::issue::RemoteIssue;
use crate::uda::UdaDecl;

pub use azuredevops::AzureDevops;
pub use feed::FeedSource;
pub use github::Github;
pub use gitlab::Gitlab;

/// Supported tracker kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Github,
    Gitlab,
    #[serde(rename = "azuredevops")]
    AzureDevops,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 3] = [
        ServiceKind::Github,
        ServiceKind::Gitlab,
        ServiceKind::AzureDevops,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Github => "github",
            ServiceKind::Gitlab => "gitlab",
            ServiceKind::AzureDevops => "azuredevops",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "github" => Ok(ServiceKind::Github),
            "gitlab" => Ok(ServiceKind::Gitlab),
            "azuredevops" | "ado" => Ok(ServiceKind::AzureDevops),
            other => Err(format!("unknown service '{other}'")),
        }
    }
}

/// Static description of a service
#[derive(Debug)]
pub struct ServiceDescriptor {
    pub kind: ServiceKind,
    /// Namespace used when rendering identity keys
    pub namespace: &'static str,
    /// UDA fields that together identify one remote issue
    pub unique_key: &'static [&'static str],
    pub udas: &'static [UdaDecl],
}

/// Per-service behavior
pub trait IssueService: Sync {
    fn descriptor(&self) -> &'static ServiceDescriptor;

    /// Check the service-specific options of a target
    fn validate_config(&self, _target: &str, _config: &TargetConfig) -> Result<()> {
        Ok(())
    }

    /// Turn one raw record into a [`RemoteIssue`]
    fn normalize(&self, target: &Target, record: Value) -> Result<RemoteIssue>;
}

/// Produces the record stream of one target
pub trait IssueSource {
    fn target(&self) -> &str;

    fn service(&self) -> ServiceKind;

    /// Records for this target.
    ///
    /// An `Err` returned here is a query-level failure and aborts the
    /// pass; per-item errors are yielded inside the iterator.
    fn issues(&self) -> Result<Box<dyn Iterator<Item = Result<RemoteIssue>> + '_>>;
}

static GITHUB: Github = Github;
static GITLAB: Gitlab = Gitlab;
static AZURE_DEVOPS: AzureDevops = AzureDevops;

/// Service implementation for a kind
pub fn service_for(kind: ServiceKind) -> &'static dyn IssueService {
    match kind {
        ServiceKind::Github => &GITHUB,
        ServiceKind::Gitlab => &GITLAB,
        ServiceKind::AzureDevops => &AZURE_DEVOPS,
    }
}

pub fn descriptor(kind: ServiceKind) -> &'static ServiceDescriptor {
    service_for(kind).descriptor()
}

/// Source for a configured target
pub fn source_for(target: &Target) -> Result<Box<dyn IssueSource>> {
    if target.config.feed.is_none() {
        return Err(Error::InvalidConfig(format!(
            "targets.{}: no feed configured",
            target.name
        )));
    }
    Ok(Box::new(FeedSource::new(target.clone())))
}
