//! GitLab issues, merge requests and todos

use serde_json::Value;

use super::github::display_value;
use super::{IssueService, ServiceDescriptor, ServiceKind};
use crate::config::Target;
use crate::error::Result;
use crate::issue::RemoteIssue;
use crate::uda::{UdaDecl, UdaType};

pub const URL: &str = "gitlaburl";

const UDAS: &[UdaDecl] = &[
    UdaDecl::new("gitlabtitle", UdaType::String, "Gitlab Title"),
    UdaDecl::new("gitlabdescription", UdaType::String, "Gitlab Description"),
    UdaDecl::new("gitlabcreatedon", UdaType::Date, "Gitlab Created"),
    UdaDecl::new("gitlabupdatedat", UdaType::Date, "Gitlab Updated"),
    UdaDecl::new("gitlabduedate", UdaType::Date, "Gitlab Due Date"),
    UdaDecl::new("gitlabmilestone", UdaType::String, "Gitlab Milestone"),
    UdaDecl::new(URL, UdaType::String, "Gitlab URL"),
    UdaDecl::new("gitlabrepo", UdaType::String, "Gitlab Repo Slug"),
    UdaDecl::new("gitlabtype", UdaType::String, "Gitlab Type"),
    UdaDecl::new("gitlabnumber", UdaType::String, "Gitlab Issue/MR #"),
    UdaDecl::new("gitlabstate", UdaType::String, "Gitlab Issue/MR State"),
    UdaDecl::new("gitlabupvotes", UdaType::Numeric, "Gitlab Upvotes"),
    UdaDecl::new("gitlabdownvotes", UdaType::Numeric, "Gitlab Downvotes"),
    UdaDecl::new("gitlabwip", UdaType::Numeric, "Gitlab MR Work-In-Progress Flag"),
    UdaDecl::new("gitlabauthor", UdaType::String, "Gitlab Author"),
    UdaDecl::new("gitlabassignee", UdaType::String, "Gitlab Assignee"),
    UdaDecl::new("gitlabnamespace", UdaType::String, "Gitlab Namespace"),
    UdaDecl::new("gitlabweight", UdaType::Numeric, "Gitlab Weight"),
];

static DESCRIPTOR: ServiceDescriptor = ServiceDescriptor {
    kind: ServiceKind::Gitlab,
    namespace: "gitlab",
    unique_key: &[URL],
    udas: UDAS,
};

pub struct Gitlab;

impl IssueService for Gitlab {
    fn descriptor(&self) -> &'static ServiceDescriptor {
        &DESCRIPTOR
    }

    fn normalize(&self, target: &Target, record: Value) -> Result<RemoteIssue> {
        let mut issue = RemoteIssue::from_record(target, record)?;
        if issue.description.trim().is_empty() {
            if let Some(title) = issue.uda("gitlabtitle").and_then(Value::as_str) {
                let kind = issue
                    .uda("gitlabtype")
                    .and_then(Value::as_str)
                    .unwrap_or("issue");
                let number = issue
                    .uda("gitlabnumber")
                    .map(display_value)
                    .unwrap_or_default();
                let url = issue.uda(URL).and_then(Value::as_str).unwrap_or_default();
                issue.description = crate::issue::default_description(kind, &number, title, url);
            }
        }
        Ok(issue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TargetConfig;
    use serde_json::json;

    #[test]
    fn normalizes_issue_record() {
        let target = Target {
            name: "gl".to_string(),
            service: ServiceKind::Gitlab,
            config: TargetConfig::new("gitlab"),
        };
        let issue = Gitlab
            .normalize(
                &target,
                json!({
                    "project": "arbitrary_username/project",
                    "priority": "M",
                    "tags": ["feature"],
                    "gitlabtitle": "Add user settings",
                    "gitlabtype": "issue",
                    "gitlabnumber": "3",
                    "gitlaburl": "example.com/issues/3",
                    "gitlabweight": 3
                }),
            )
            .expect("normalize");

        assert_eq!(
            issue.description,
            "(bw)Is#3 - Add user settings .. example.com/issues/3"
        );
        assert_eq!(issue.tags, vec!["feature".to_string()]);
        assert_eq!(issue.uda("gitlabweight"), Some(&json!(3)));
    }
}
