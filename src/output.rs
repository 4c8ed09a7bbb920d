//! Shared output formatting for issuesync CLI commands.
//!
//! Every command either prints a human report or, with `--json`, one JSON
//! envelope on stdout:
//!
//! ```json
//! {"schema_version": "issuesync.v1", "command": "pull", "status": "success", "data": {...}}
//! ```

use serde::Serialize;

use crate::error::{Error, JsonError, Result};

pub const SCHEMA_VERSION: &str = "issuesync.v1";

#[derive(Debug, Clone, Copy)]
pub struct OutputOptions {
    pub json: bool,
    pub quiet: bool,
}

/// Human-readable report: a header line followed by optional sections
#[derive(Debug, Clone, Default)]
pub struct HumanOutput {
    header: String,
    summary: Vec<(String, String)>,
    details: Vec<String>,
    warnings: Vec<String>,
    next_steps: Vec<String>,
}

impl HumanOutput {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            ..Self::default()
        }
    }

    /// `- key: value`, or `- key` when the value is empty
    pub fn push_summary(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.summary.push((key.into(), value.into()));
    }

    pub fn push_detail(&mut self, value: impl Into<String>) {
        self.details.push(value.into());
    }

    /// Also carried into the JSON envelope
    pub fn push_warning(&mut self, value: impl Into<String>) {
        self.warnings.push(value.into());
    }

    /// Also carried into the JSON envelope
    pub fn push_next_step(&mut self, value: impl Into<String>) {
        self.next_steps.push(value.into());
    }
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
enum Status {
    Success,
    Error,
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    schema_version: &'static str,
    command: &'a str,
    status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonError>,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    warnings: &'a [String],
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    next_steps: &'a [String],
}

pub fn emit_success<T: Serialize>(
    options: OutputOptions,
    command: &str,
    data: &T,
    human: Option<&HumanOutput>,
) -> Result<()> {
    if options.json {
        let envelope = Envelope {
            schema_version: SCHEMA_VERSION,
            command,
            status: Status::Success,
            data: Some(data),
            error: None,
            warnings: human.map(|h| h.warnings.as_slice()).unwrap_or_default(),
            next_steps: human.map(|h| h.next_steps.as_slice()).unwrap_or_default(),
        };
        println!("{}", serde_json::to_string_pretty(&envelope)?);
        return Ok(());
    }

    if let (false, Some(human)) = (options.quiet, human) {
        println!("{}", format_human(human));
    }
    Ok(())
}

/// Report a failed command: a JSON envelope on stdout, or `error:` and an
/// optional `hint:` line on stderr
pub fn emit_error(command: &str, err: &Error, json: bool) -> Result<()> {
    let next_steps = error_next_steps(err);

    if json {
        let envelope = error_envelope(command, err, &next_steps);
        println!("{}", serde_json::to_string_pretty(&envelope)?);
        return Ok(());
    }

    eprintln!("error: {err}");
    if let Some(hint) = next_steps.first() {
        eprintln!("hint: {hint}");
    }
    Ok(())
}

fn error_envelope<'a>(
    command: &'a str,
    err: &Error,
    next_steps: &'a [String],
) -> Envelope<'a, ()> {
    Envelope {
        schema_version: SCHEMA_VERSION,
        command,
        status: Status::Error,
        data: None,
        error: Some(JsonError::from(err)),
        warnings: &[],
        next_steps,
    }
}

pub fn format_human(output: &HumanOutput) -> String {
    let mut lines = vec![output.header.clone()];

    let summary: Vec<String> = output
        .summary
        .iter()
        .map(|(key, value)| {
            if value.is_empty() {
                key.clone()
            } else {
                format!("{key}: {value}")
            }
        })
        .collect();

    for (title, items) in [
        ("Summary", summary.as_slice()),
        ("Details", output.details.as_slice()),
        ("Warnings", output.warnings.as_slice()),
        ("Next steps", output.next_steps.as_slice()),
    ] {
        if items.is_empty() {
            continue;
        }
        lines.push(String::new());
        lines.push(format!("{title}:"));
        lines.extend(items.iter().map(|item| format!("- {item}")));
    }

    lines.join("\n")
}

/// First positional argument, used to label error envelopes before clap
/// has parsed anything
pub fn infer_command_name_from_args() -> String {
    command_name_from(std::env::args().skip(1))
}

fn command_name_from(mut args: impl Iterator<Item = String>) -> String {
    while let Some(arg) = args.next() {
        if arg == "--config" {
            args.next();
            continue;
        }
        if !arg.starts_with('-') {
            return arg;
        }
    }
    "issuesync".to_string()
}

fn error_next_steps(err: &Error) -> Vec<String> {
    let hint = match err {
        Error::InvalidConfig(_) | Error::UnknownService { .. } | Error::UnknownMergePolicy { .. } => {
            "fix issuesync.toml then retry"
        }
        Error::MissingUniqueKey { .. } => "check the target's records carry their URL field",
        Error::QueryLimitExceeded { .. } => "narrow the query with the target's wiql_filter",
        Error::LockFailed(_) => "wait for the other issuesync run to finish",
        Error::HookFailed(_) => "fix or remove the failing [hooks] pre_import command",
        _ => return Vec::new(),
    };
    vec![hint.to_string()]
}
