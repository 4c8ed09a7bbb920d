//! issuesync pull command implementation

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;

use crate::config::{Config, Target};
use crate::error::{Error, Result};
use crate::hooks;
use crate::merge::PolicyTable;
use crate::output::{emit_success, HumanOutput, OutputOptions};
use crate::services::{self, IssueSource, ServiceKind};
use crate::sync::{SyncReport, Synchronizer};
use crate::task::JsonTaskStore;

/// Key of the last report in the data file
pub const LAST_SYNC_KEY: &str = "last_sync";

/// Options for the pull command
pub struct PullOptions {
    pub config: Option<PathBuf>,
    pub dry_run: bool,
    pub target: Option<String>,
    pub json: bool,
    pub quiet: bool,
}

#[derive(Serialize)]
struct PullReport {
    targets: Vec<String>,
    tasks_file: PathBuf,
    #[serde(flatten)]
    sync: SyncReport,
}

pub fn run(options: PullOptions) -> Result<()> {
    let config_path = Config::locate(options.config.as_deref())?;
    let config = Config::load(&config_path)?;
    let targets = select_targets(&config, options.target.as_deref())?;
    let policies = PolicyTable::from_config(&config.general)?;

    let hook_dir = config_path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    hooks::run_pre_import(&config.hooks, &hook_dir)?;

    let storage = config.storage()?;
    storage.ensure_dirs()?;
    let tasks_file = config.tasks_file()?;
    let mut store = JsonTaskStore::new(tasks_file.clone());

    let sources = targets
        .iter()
        .map(services::source_for)
        .collect::<Result<Vec<Box<dyn IssueSource>>>>()?;
    let mut streams = Vec::with_capacity(sources.len());
    for source in &sources {
        tracing::info!(target_name = source.target(), service = %source.service(), "pulling target");
        streams.push(source.issues()?);
    }

    let services: Vec<ServiceKind> = targets.iter().map(|target| target.service).collect();
    let names: Vec<String> = targets.iter().map(|target| target.name.clone()).collect();
    let mut synchronizer = Synchronizer::new(&policies, &services).dry_run(options.dry_run);
    if targets.len() < config.general.targets.len() {
        synchronizer = synchronizer.only_targets(names.as_slice());
    }
    let report = synchronizer.run(&mut store, streams.into_iter().flatten())?;

    if !options.dry_run {
        storage.data().set(
            LAST_SYNC_KEY,
            serde_json::json!({
                "at": Utc::now(),
                "targets": names,
                "report": report,
            }),
        )?;
    }

    let header = if options.dry_run {
        format!("issuesync pull (dry run): {} change(s) planned", report.changed())
    } else {
        format!("issuesync pull: {} change(s) written", report.changed())
    };
    let mut human = HumanOutput::new(header);
    human.push_summary("targets", names.join(", "));
    human.push_summary("created", report.created.to_string());
    human.push_summary("updated", report.updated.to_string());
    human.push_summary("unchanged", report.unchanged.to_string());
    human.push_summary("completed", report.completed.to_string());
    human.push_summary("reopened", report.reopened.to_string());
    human.push_detail(format!("task store: {}", tasks_file.display()));
    for skipped in &report.skipped {
        let label = if skipped.target.is_empty() {
            skipped.key.clone()
        } else {
            format!("[{}] {}", skipped.target, skipped.key)
        };
        human.push_warning(format!("skipped {label}: {}", skipped.reason));
    }
    if options.dry_run && report.changed() > 0 {
        human.push_next_step("issuesync pull".to_string());
    }

    let data = PullReport {
        targets: names,
        tasks_file,
        sync: report,
    };
    emit_success(
        OutputOptions {
            json: options.json,
            quiet: options.quiet,
        },
        "pull",
        &data,
        Some(&human),
    )
}

/// Configured targets, optionally restricted by a glob on their names
pub fn select_targets(config: &Config, pattern: Option<&str>) -> Result<Vec<Target>> {
    let targets = config.targets()?;
    let Some(pattern) = pattern else {
        return Ok(targets);
    };

    let matcher = glob::Pattern::new(pattern).map_err(|err| {
        Error::InvalidArgument(format!("invalid --target pattern '{pattern}': {err}"))
    })?;
    let selected: Vec<Target> = targets
        .into_iter()
        .filter(|target| matcher.matches(&target.name))
        .collect();
    if selected.is_empty() {
        return Err(Error::InvalidArgument(format!(
            "no configured target matches '{pattern}'"
        )));
    }
    Ok(selected)
}
