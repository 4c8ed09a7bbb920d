//! GitHub issues and pull requests

use serde_json::Value;

use super::{IssueService, ServiceDescriptor, ServiceKind};
use crate::config::Target;
use crate::error::Result;
use crate::issue::RemoteIssue;
use crate::uda::{UdaDecl, UdaType};

pub const URL: &str = "githuburl";

const UDAS: &[UdaDecl] = &[
    UdaDecl::new("githubbody", UdaType::String, "Github Body"),
    UdaDecl::new("githubclosedon", UdaType::Date, "GitHub Closed"),
    UdaDecl::new("githubcreatedon", UdaType::Date, "Github Created"),
    UdaDecl::new("githubmilestone", UdaType::String, "Github Milestone"),
    UdaDecl::new("githubnamespace", UdaType::String, "Github Namespace"),
    UdaDecl::new("githubnumber", UdaType::Numeric, "Github Issue/PR #"),
    UdaDecl::new("githubrepo", UdaType::String, "Github Repo Slug"),
    UdaDecl::new("githubstate", UdaType::String, "GitHub State"),
    UdaDecl::new("githubtitle", UdaType::String, "Github Title"),
    UdaDecl::new("githubtype", UdaType::String, "Github Type"),
    UdaDecl::new("githubupdatedat", UdaType::Date, "Github Updated"),
    UdaDecl::new(URL, UdaType::String, "Github URL"),
    UdaDecl::new("githubuser", UdaType::String, "Github User"),
];

static DESCRIPTOR: ServiceDescriptor = ServiceDescriptor {
    kind: ServiceKind::Github,
    namespace: "github",
    unique_key: &[URL],
    udas: UDAS,
};

pub struct Github;

impl IssueService for Github {
    fn descriptor(&self) -> &'static ServiceDescriptor {
        &DESCRIPTOR
    }

    /// Feed records are already in task shape; a missing description is
    /// generated from the number, title and URL.
    fn normalize(&self, target: &Target, record: Value) -> Result<RemoteIssue> {
        let mut issue = RemoteIssue::from_record(target, record)?;
        if issue.description.trim().is_empty() {
            if let Some(title) = issue.uda("githubtitle").and_then(Value::as_str) {
                let kind = match issue.uda("githubtype").and_then(Value::as_str) {
                    Some("pull_request") => "pull_request",
                    _ => "issue",
                };
                let number = issue
                    .uda("githubnumber")
                    .map(display_value)
                    .unwrap_or_default();
                let url = issue.uda(URL).and_then(Value::as_str).unwrap_or_default();
                issue.description = crate::issue::default_description(kind, &number, title, url);
            }
        }
        Ok(issue)
    }
}

pub(crate) fn display_value(value: &Value) -> String {
    match value {
        Value::String(value) => value.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
