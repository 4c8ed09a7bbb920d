#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use issuesync::cli::pull::select_targets;
use issuesync::config::Config;
use issuesync::merge::PolicyTable;
use issuesync::services::{self, ServiceKind};
use issuesync::sync::{SyncReport, Synchronizer};
use issuesync::task::{JsonTaskStore, LocalTask, TaskStatus};
use serde_json::Value;
use tempfile::TempDir;

pub const GITHUB_CONFIG: &str = r#"
[general]
targets = ["my_github"]
data_dir = "data"

[targets.my_github]
service = "github"
feed = "github.jsonl"
"#;

/// A config file, its feeds and a task store inside one temp dir
pub struct TestEnv {
    dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        Self { dir }
    }

    pub fn with_config(contents: &str) -> Self {
        let env = Self::new();
        env.write_config(contents).expect("write config");
        env
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.path().join("issuesync.toml")
    }

    pub fn tasks_file(&self) -> PathBuf {
        self.dir.path().join("data").join("tasks.json")
    }

    pub fn data_file(&self) -> PathBuf {
        self.dir.path().join("data").join("data.json")
    }

    pub fn write_file(&self, rel_path: &str, contents: &str) -> std::io::Result<PathBuf> {
        let path = self.dir.path().join(rel_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents)?;
        Ok(path)
    }

    pub fn write_config(&self, contents: &str) -> std::io::Result<PathBuf> {
        self.write_file("issuesync.toml", contents)
    }

    /// One JSON record per line
    pub fn write_feed(&self, rel_path: &str, records: &[Value]) -> std::io::Result<PathBuf> {
        let mut contents = String::new();
        for record in records {
            contents.push_str(&record.to_string());
            contents.push('\n');
        }
        self.write_file(rel_path, &contents)
    }

    pub fn load_config(&self) -> Config {
        Config::load(&self.config_path()).expect("load config")
    }

    /// Same flow as `issuesync pull`, without hooks or output
    pub fn sync(&self, dry_run: bool) -> issuesync::Result<SyncReport> {
        self.run_pass(None, dry_run)
    }

    /// Same as `issuesync pull --target <pattern>`
    pub fn sync_targets(&self, pattern: &str) -> issuesync::Result<SyncReport> {
        self.run_pass(Some(pattern), false)
    }

    fn run_pass(&self, pattern: Option<&str>, dry_run: bool) -> issuesync::Result<SyncReport> {
        let config = Config::load(&self.config_path())?;
        let policies = PolicyTable::from_config(&config.general)?;
        let targets = select_targets(&config, pattern)?;
        let mut store = JsonTaskStore::new(config.tasks_file()?);

        let sources = targets
            .iter()
            .map(services::source_for)
            .collect::<issuesync::Result<Vec<_>>>()?;
        let mut streams = Vec::new();
        for source in &sources {
            streams.push(source.issues()?);
        }
        let kinds: Vec<ServiceKind> = targets.iter().map(|target| target.service).collect();
        let names: Vec<&str> = targets.iter().map(|target| target.name.as_str()).collect();
        let mut synchronizer = Synchronizer::new(&policies, &kinds).dry_run(dry_run);
        if targets.len() < config.general.targets.len() {
            synchronizer = synchronizer.only_targets(names.as_slice());
        }
        synchronizer.run(&mut store, streams.into_iter().flatten())
    }

    pub fn tasks(&self) -> Vec<LocalTask> {
        JsonTaskStore::new(self.tasks_file())
            .list(None)
            .expect("list tasks")
    }

    pub fn tasks_with(&self, status: TaskStatus) -> Vec<LocalTask> {
        JsonTaskStore::new(self.tasks_file())
            .list(Some(status))
            .expect("list tasks")
    }
}

pub fn github_issue(number: u64, title: &str) -> Value {
    serde_json::json!({
        "project": "sample_project",
        "priority": "M",
        "tags": ["bug"],
        "githubtitle": title,
        "githubnumber": number,
        "githubtype": "issue",
        "githuburl": format!("https://github.com/example/repo/issues/{number}"),
    })
}
