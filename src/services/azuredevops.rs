//! Azure DevOps work items
//!
//! Work items are found with a WIQL query, then fetched one by one. The
//! parent title and the comment thread of each item are explicit follow-up
//! requests through [`AdoTransport`]. Feed files hold the same raw work
//! item JSON, optionally with `ParentTitle` and `comments` already filled
//! in.

use serde_json::{Map, Value};

use super::{IssueService, IssueSource, ServiceDescriptor, ServiceKind};
use crate::config::{Target, TargetConfig};
use crate::error::{Error, Result};
use crate::issue::{default_description, format_annotation, parse_timestamp, RemoteIssue};
use crate::uda::{UdaDecl, UdaType};

pub const URL: &str = "adourl";

const QUERY_LIMIT_TYPE_KEY: &str = "WorkItemTrackingQueryResultSizeLimitExceededException";

const UDAS: &[UdaDecl] = &[
    UdaDecl::new("adotitle", UdaType::String, "Azure Devops Title"),
    UdaDecl::new("adodescription", UdaType::String, "Azure Devops Description"),
    UdaDecl::new("adoid", UdaType::Numeric, "Azure Devops ID number"),
    UdaDecl::new(URL, UdaType::String, "Azure Devops URL"),
    UdaDecl::new("adotype", UdaType::String, "Azure Devops Work Item Type"),
    UdaDecl::new("adostate", UdaType::String, "Azure Devops Work Item State"),
    UdaDecl::new("adoactivity", UdaType::String, "Azure Devops Activity"),
    UdaDecl::new("adopriority", UdaType::Numeric, "Azure Devops Priority"),
    UdaDecl::new(
        "adoremainingwork",
        UdaType::Numeric,
        "Azure Devops Amount of Remaining Work",
    ),
    UdaDecl::new("adoparent", UdaType::String, "Azure Devops Parent Work Item Name"),
    UdaDecl::new("adonamespace", UdaType::String, "Azure Devops Namespace"),
];

static DESCRIPTOR: ServiceDescriptor = ServiceDescriptor {
    kind: ServiceKind::AzureDevops,
    namespace: "ado",
    unique_key: &[URL],
    udas: UDAS,
};

pub struct AzureDevops;

impl IssueService for AzureDevops {
    fn descriptor(&self) -> &'static ServiceDescriptor {
        &DESCRIPTOR
    }

    fn validate_config(&self, target: &str, config: &TargetConfig) -> Result<()> {
        for option in ["organization", "project"] {
            if config.option_str(option).is_none() {
                return Err(Error::InvalidConfig(format!(
                    "targets.{target}: missing '{option}'"
                )));
            }
        }
        Ok(())
    }

    fn normalize(&self, target: &Target, record: Value) -> Result<RemoteIssue> {
        normalize_work_item(target, record)
    }
}

/// Task priority for an Azure DevOps priority value
pub fn map_priority(value: Option<&Value>) -> Option<&'static str> {
    let raw = match value? {
        Value::Number(number) => number.to_string(),
        Value::String(raw) => raw.trim().to_string(),
        _ => return None,
    };
    match raw.as_str() {
        "1" => Some("H"),
        "2" => Some("M"),
        "3" | "4" => Some("L"),
        _ => None,
    }
}

/// Plain text from the HTML Azure DevOps stores in descriptions and
/// comments: one line per `<br>`, closing tag or `&nbsp;`, tags removed,
/// empty lines dropped.
pub fn format_item(item: &str) -> String {
    fn flush(current: &mut String, lines: &mut Vec<String>) {
        if !current.is_empty() {
            lines.push(std::mem::take(current));
        }
    }

    let mut lines = Vec::new();
    let mut current = String::new();
    let mut rest = item;

    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix("<br>").or_else(|| rest.strip_prefix("&nbsp;")) {
            flush(&mut current, &mut lines);
            rest = after;
            continue;
        }
        if rest.starts_with('<') {
            if let Some(close) = rest[1..].find(['>', '\n']).map(|index| index + 1) {
                if rest.as_bytes()[close] == b'>' {
                    if rest.starts_with("</") {
                        flush(&mut current, &mut lines);
                    }
                    rest = &rest[close + 1..];
                    continue;
                }
            }
        }
        let mut chars = rest.chars();
        if let Some(ch) = chars.next() {
            current.push(ch);
        }
        rest = chars.as_str();
    }
    flush(&mut current, &mut lines);

    lines.join("\n")
}

/// WIQL clauses built from target options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WiqlQuery {
    pub filter: Option<String>,
    pub only_if_assigned: bool,
    pub also_unassigned: bool,
}

impl WiqlQuery {
    pub fn from_config(config: &TargetConfig) -> Self {
        Self {
            filter: config.option_str("wiql_filter").map(str::to_string),
            only_if_assigned: config.option_bool("only_if_assigned").unwrap_or(false),
            also_unassigned: config.option_bool("also_unassigned").unwrap_or(false),
        }
    }

    /// `also_unassigned` widens `only_if_assigned` and means nothing alone.
    pub fn build(&self) -> String {
        let mut query = "SELECT [System.Id] FROM workitems".to_string();
        if self.filter.is_none() && !self.only_if_assigned {
            return query;
        }

        query.push_str(" WHERE ");
        if let Some(filter) = &self.filter {
            query.push_str(filter);
        }
        if self.only_if_assigned {
            if self.filter.is_some() {
                query.push_str(" AND ");
            }
            if self.also_unassigned {
                query.push_str("([System.AssignedTo] = @me OR [System.AssignedTo] == '')");
            } else {
                query.push_str("[System.AssignedTo] = @me ");
            }
        }
        query
    }
}

/// Raw WIQL reply
#[derive(Debug, Clone)]
pub struct WiqlResponse {
    pub status: u16,
    pub body: Value,
}

/// Work item ids from a WIQL reply. A result-size-limit rejection is fatal
/// for the whole run.
pub fn parse_wiql_response(target: &str, response: &WiqlResponse) -> Result<Vec<u64>> {
    if response.status == 400
        && response.body.get("typeKey").and_then(Value::as_str) == Some(QUERY_LIMIT_TYPE_KEY)
    {
        return Err(Error::QueryLimitExceeded {
            target: target.to_string(),
            message: "Too many azure devops results in query, please narrow the search by updating the ado.wiql_filter".to_string(),
        });
    }
    if !(200..300).contains(&response.status) {
        let message = response
            .body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("query rejected");
        return Err(Error::Remote {
            target: target.to_string(),
            message: format!("WIQL query failed with status {}: {message}", response.status),
        });
    }

    let items = response
        .body
        .get("workItems")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::Remote {
            target: target.to_string(),
            message: "WIQL reply has no workItems".to_string(),
        })?;
    Ok(items
        .iter()
        .filter_map(|item| item.get("id").and_then(Value::as_u64))
        .collect())
}

/// HTTP seam for Azure DevOps
pub trait AdoTransport {
    fn post_wiql(&self, query: &str) -> Result<WiqlResponse>;

    fn get_work_item(&self, id: u64) -> Result<Value>;

    /// Comment objects of a work item
    fn get_comments(&self, work_item: &Value) -> Result<Vec<Value>>;
}

/// Source querying Azure DevOps through a transport
pub struct AdoSource<T> {
    target: Target,
    transport: T,
    query: WiqlQuery,
    annotation_comments: bool,
}

impl<T: AdoTransport> AdoSource<T> {
    pub fn new(target: Target, transport: T) -> Self {
        let query = WiqlQuery::from_config(&target.config);
        let annotation_comments = target
            .config
            .option_bool("annotation_comments")
            .unwrap_or(true);
        Self {
            target,
            transport,
            query,
            annotation_comments,
        }
    }

    fn work_item_ids(&self) -> Result<Vec<u64>> {
        let query = self.query.build();
        tracing::debug!(target_name = %self.target.name, query = %query, "running WIQL query");
        let response = self.transport.post_wiql(&query)?;
        parse_wiql_response(&self.target.name, &response)
    }

    fn fetch(&self, id: u64) -> Result<RemoteIssue> {
        let mut item = self.transport.get_work_item(id)?;

        let parent_title = match item
            .pointer("/fields/System.Parent")
            .and_then(Value::as_u64)
        {
            Some(parent) => self
                .transport
                .get_work_item(parent)?
                .pointer("/fields/System.Title")
                .cloned()
                .unwrap_or(Value::Null),
            None => Value::Null,
        };

        let comments = if self.annotation_comments {
            self.transport.get_comments(&item)?
        } else {
            Vec::new()
        };

        if let Value::Object(map) = &mut item {
            map.insert("ParentTitle".to_string(), parent_title);
            map.insert("comments".to_string(), Value::Array(comments));
        }
        normalize_work_item(&self.target, item)
    }
}

impl<T: AdoTransport> IssueSource for AdoSource<T> {
    fn target(&self) -> &str {
        &self.target.name
    }

    fn service(&self) -> ServiceKind {
        ServiceKind::AzureDevops
    }

    fn issues(&self) -> Result<Box<dyn Iterator<Item = Result<RemoteIssue>> + '_>> {
        let ids = self.work_item_ids()?;
        Ok(Box::new(ids.into_iter().map(move |id| self.fetch(id))))
    }
}

fn malformed(target: &Target, record: &Map<String, Value>, field: &str, reason: &str) -> Error {
    let key = record
        .get("id")
        .map(|id| format!("[{}] work item {id}", target.name))
        .unwrap_or_else(|| format!("[{}]", target.name));
    Error::MalformedIssue {
        key,
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

/// Turn one raw work item into a [`RemoteIssue`]
pub fn normalize_work_item(target: &Target, record: Value) -> Result<RemoteIssue> {
    let Value::Object(record) = record else {
        return Err(Error::MalformedIssue {
            key: format!("[{}]", target.name),
            field: "record".to_string(),
            reason: "expected a JSON object".to_string(),
        });
    };
    let fields = record
        .get("fields")
        .and_then(Value::as_object)
        .ok_or_else(|| malformed(target, &record, "fields", "missing fields"))?;
    let title = fields
        .get("System.Title")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed(target, &record, "System.Title", "missing title"))?;
    let id = record
        .get("id")
        .and_then(Value::as_u64)
        .ok_or_else(|| malformed(target, &record, "id", "missing work item id"))?;
    let url = record
        .get("_links")
        .and_then(|links| links.pointer("/html/href"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    let work_item_type = fields
        .get("System.WorkItemType")
        .and_then(Value::as_str)
        .unwrap_or("work item");
    let parent_title = record
        .get("ParentTitle")
        .and_then(Value::as_str)
        .map(str::to_string);
    let raw_priority = fields.get("Microsoft.VSTS.Common.Priority");

    let description = default_description(
        &work_item_type.to_lowercase(),
        &id.to_string(),
        title,
        url,
    );
    let mut issue = RemoteIssue::new(target.name.clone(), ServiceKind::AzureDevops, description);
    issue.project = parent_title.clone();
    issue.priority = map_priority(raw_priority)
        .map(str::to_string)
        .or_else(|| target.default_priority().map(str::to_string));
    issue.entry = fields
        .get("System.CreatedDate")
        .and_then(Value::as_str)
        .and_then(parse_timestamp);
    issue.annotations = record
        .get("comments")
        .and_then(Value::as_array)
        .map(|comments| comments.iter().filter_map(comment_annotation).collect())
        .unwrap_or_default();

    let string_field = |name: &str| {
        fields
            .get(name)
            .and_then(Value::as_str)
            .map(|value| Value::String(value.to_string()))
            .unwrap_or(Value::Null)
    };
    let namespace = match (
        target.config.option_str("organization"),
        target.config.option_str("project"),
    ) {
        (Some(organization), Some(project)) => Value::String(format!("{organization}\\{project}")),
        _ => Value::Null,
    };

    let mut udas = vec![
        ("adotitle", Value::String(title.to_string())),
        (
            "adodescription",
            fields
                .get("System.Description")
                .and_then(Value::as_str)
                .map(|html| Value::String(format_item(html)))
                .unwrap_or(Value::Null),
        ),
        ("adoid", Value::from(id)),
        ("adotype", string_field("System.WorkItemType")),
        ("adostate", string_field("System.State")),
        (
            "adoactivity",
            Value::String(
                fields
                    .get("System.Activity")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            ),
        ),
        ("adopriority", raw_priority.cloned().unwrap_or(Value::Null)),
        (
            "adoremainingwork",
            fields
                .get("Microsoft.VSTS.Scheduling.RemainingWork")
                .cloned()
                .unwrap_or(Value::Null),
        ),
        ("adoparent", parent_title.map(Value::String).unwrap_or(Value::Null)),
        ("adonamespace", namespace),
    ];
    if !url.is_empty() {
        udas.push((URL, Value::String(url.to_string())));
    }
    issue.udas = udas
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect();

    Ok(issue)
}

fn comment_annotation(comment: &Value) -> Option<String> {
    let author = comment
        .pointer("/revisedBy/displayName")
        .or_else(|| comment.pointer("/modifiedBy/displayName"))
        .and_then(Value::as_str)?;
    let text = comment.get("text").and_then(Value::as_str).unwrap_or_default();
    Some(format_annotation(author, &format_item(text)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn format_item_strips_html() {
        assert_eq!(
            format_item("<div>First line</div><div>Second&nbsp;part<br>third <b>bold</b></div>"),
            "First line\nSecond\npart\nthird bold"
        );
        assert_eq!(format_item("plain"), "plain");
        assert_eq!(format_item(""), "");
    }

    #[test]
    fn query_without_options() {
        assert_eq!(WiqlQuery::default().build(), "SELECT [System.Id] FROM workitems");
    }

    #[test]
    fn query_with_filter_and_assignment() {
        let query = WiqlQuery {
            filter: Some("[System.State] = 'Active'".to_string()),
            only_if_assigned: true,
            also_unassigned: false,
        };
        assert_eq!(
            query.build(),
            "SELECT [System.Id] FROM workitems WHERE [System.State] = 'Active' AND [System.AssignedTo] = @me "
        );

        let query = WiqlQuery {
            filter: None,
            only_if_assigned: true,
            also_unassigned: true,
        };
        assert_eq!(
            query.build(),
            "SELECT [System.Id] FROM workitems WHERE ([System.AssignedTo] = @me OR [System.AssignedTo] == '')"
        );
    }

    #[test]
    fn priority_map() {
        assert_eq!(map_priority(Some(&json!(1))), Some("H"));
        assert_eq!(map_priority(Some(&json!("2"))), Some("M"));
        assert_eq!(map_priority(Some(&json!(4))), Some("L"));
        assert_eq!(map_priority(Some(&json!(9))), None);
        assert_eq!(map_priority(None), None);
    }

    #[test]
    fn query_limit_is_fatal() {
        let response = WiqlResponse {
            status: 400,
            body: json!({"typeKey": QUERY_LIMIT_TYPE_KEY}),
        };
        let err = parse_wiql_response("ado", &response).expect_err("limit");
        assert!(matches!(err, Error::QueryLimitExceeded { .. }));
        assert!(!err.is_record_level());
        assert!(err.to_string().contains("wiql_filter"));
    }

    #[test]
    fn wiql_ids() {
        let response = WiqlResponse {
            status: 200,
            body: json!({"workItems": [{"id": 1}, {"id": 5}]}),
        };
        assert_eq!(parse_wiql_response("ado", &response).expect("ids"), vec![1, 5]);
    }

    #[test]
    fn config_requires_organization_and_project() {
        let mut config = TargetConfig::new("azuredevops");
        config
            .options
            .insert("organization".to_string(), toml::Value::from("acme"));
        let err = AzureDevops
            .validate_config("ado", &config)
            .expect_err("missing project");
        match err {
            Error::InvalidConfig(message) => assert!(message.contains("project")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
