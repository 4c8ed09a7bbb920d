//! issuesync tasks command implementation

use std::path::PathBuf;

use serde::Serialize;

use crate::config::Config;
use crate::error::Result;
use crate::output::{emit_success, HumanOutput, OutputOptions};
use crate::task::{JsonTaskStore, LocalTask, TaskStatus};

/// Options for the tasks command
pub struct TasksOptions {
    pub config: Option<PathBuf>,
    pub status: Option<String>,
    pub json: bool,
    pub quiet: bool,
}

#[derive(Serialize)]
struct TasksReport {
    total: usize,
    tasks: Vec<LocalTask>,
}

pub fn run(options: TasksOptions) -> Result<()> {
    let status = options
        .status
        .as_deref()
        .map(str::parse::<TaskStatus>)
        .transpose()?;

    let config_path = Config::locate(options.config.as_deref())?;
    let config = Config::load(&config_path)?;
    let store = JsonTaskStore::new(config.tasks_file()?);
    let tasks = store.list(status)?;

    let header = match status {
        Some(status) => format!("issuesync tasks: {} {status}", tasks.len()),
        None => format!("issuesync tasks: {}", tasks.len()),
    };
    let mut human = HumanOutput::new(header);
    for task in &tasks {
        let id = if task.id == 0 {
            "-".to_string()
        } else {
            task.id.to_string()
        };
        human.push_detail(format!(
            "{id} [{}] {} ({})",
            task.status, task.description, task.uuid
        ));
    }

    let report = TasksReport {
        total: tasks.len(),
        tasks,
    };
    emit_success(
        OutputOptions {
            json: options.json,
            quiet: options.quiet,
        },
        "tasks",
        &report,
        Some(&human),
    )
}
