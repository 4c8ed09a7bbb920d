//! Configuration loading and management
//!
//! Handles parsing of `issuesync.toml` configuration files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::merge::MergePolicy;
use crate::services::ServiceKind;
use crate::storage::Storage;

/// Environment variable overriding the config file location
pub const CONFIG_ENV: &str = "ISSUESYNC_CONFIG";

/// Config file name inside the platform config directory
pub const CONFIG_FILE: &str = "issuesync.toml";

/// Fields owned by the task store; policies never apply to them.
const STORE_MANAGED_FIELDS: [&str; 7] = [
    "uuid", "id", "status", "entry", "end", "modified", "target",
];

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub general: GeneralConfig,

    /// Commands run before a pull
    #[serde(default)]
    pub hooks: HooksConfig,

    /// Target definitions keyed by name
    #[serde(default)]
    pub targets: BTreeMap<String, TargetConfig>,
}

/// `[general]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Targets pulled by default, in order
    pub targets: Vec<String>,

    /// Fields set once and never overwritten
    #[serde(default = "default_static_fields")]
    pub static_fields: Vec<String>,

    #[serde(default = "default_true")]
    pub merge_annotations: bool,

    #[serde(default = "default_true")]
    pub merge_tags: bool,

    /// Tags follow the remote list instead of accumulating
    #[serde(default)]
    pub replace_tags: bool,

    /// Treat annotations differing only in whitespace as equal
    #[serde(default = "default_true")]
    pub annotation_rough_equality: bool,

    /// Explicit task store file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taskdata: Option<PathBuf>,

    /// Directory for the task store and data file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// Local list entries that survive `replace`, keyed by field
    #[serde(default, alias = "keeped_items")]
    pub keep: BTreeMap<String, Vec<String>>,

    /// Explicit per-field merge policies
    #[serde(default)]
    pub policies: BTreeMap<String, String>,
}

fn default_static_fields() -> Vec<String> {
    vec!["priority".to_string()]
}

fn default_true() -> bool {
    true
}

impl GeneralConfig {
    pub fn new(targets: Vec<String>) -> Self {
        Self {
            targets,
            static_fields: default_static_fields(),
            merge_annotations: true,
            merge_tags: true,
            replace_tags: false,
            annotation_rough_equality: true,
            taskdata: None,
            data_dir: None,
            keep: BTreeMap::new(),
            policies: BTreeMap::new(),
        }
    }
}

/// `[hooks]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HooksConfig {
    #[serde(default)]
    pub pre_import: Vec<String>,
}

/// One `[targets.<name>]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub service: String,

    /// JSON Lines file holding this target's records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feed: Option<PathBuf>,

    /// Priority for records that carry none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_priority: Option<String>,

    /// Service-specific options
    #[serde(flatten)]
    pub options: BTreeMap<String, toml::Value>,
}

impl TargetConfig {
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
            feed: None,
            default_priority: None,
            options: BTreeMap::new(),
        }
    }

    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options
            .get(key)
            .and_then(|value| value.as_str())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn option_bool(&self, key: &str) -> Option<bool> {
        self.options.get(key).and_then(|value| value.as_bool())
    }
}

/// A validated target with its name and resolved service
#[derive(Debug, Clone)]
pub struct Target {
    pub name: String,
    pub service: ServiceKind,
    pub config: TargetConfig,
}

impl Target {
    pub fn default_priority(&self) -> Option<&str> {
        self.config
            .default_priority
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

impl Config {
    /// Configuration with the given general section and no targets
    pub fn new(general: GeneralConfig) -> Self {
        Self {
            general,
            hooks: HooksConfig::default(),
            targets: BTreeMap::new(),
        }
    }

    /// Load configuration from an `issuesync.toml` file
    pub fn load(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|err| {
            Error::InvalidConfig(format!("cannot read {}: {err}", path.display()))
        })?;
        let mut config: Config = toml::from_str(&content)?;
        config.resolve_relative_paths(path.parent());
        config.validate()?;
        Ok(config)
    }

    /// Config path from the CLI flag, the environment, or the platform
    /// config directory, in that order
    pub fn locate(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            if !path.trim().is_empty() {
                return Ok(PathBuf::from(path));
            }
        }
        let dirs = directories::ProjectDirs::from("", "", "issuesync").ok_or_else(|| {
            Error::InvalidConfig("cannot determine a config directory".to_string())
        })?;
        Ok(dirs.config_dir().join(CONFIG_FILE))
    }

    /// Save configuration to a file
    pub fn save(&self, path: &PathBuf) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Feed paths are relative to the config file.
    fn resolve_relative_paths(&mut self, base: Option<&Path>) {
        let Some(base) = base else {
            return;
        };
        for target in self.targets.values_mut() {
            if let Some(feed) = target.feed.as_mut() {
                if feed.is_relative() {
                    *feed = base.join(&*feed);
                }
            }
        }
        for path in [&mut self.general.taskdata, &mut self.general.data_dir]
            .into_iter()
            .flatten()
        {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.general.validate()?;

        for name in &self.general.targets {
            if !self.targets.contains_key(name) {
                return Err(Error::InvalidConfig(format!(
                    "general.targets: no [targets.{name}] section"
                )));
            }
        }

        for (name, target) in &self.targets {
            let service = target.service.parse::<ServiceKind>().map_err(|_| {
                Error::UnknownService {
                    target: name.clone(),
                    service: target.service.clone(),
                }
            })?;
            crate::services::service_for(service).validate_config(name, target)?;
        }

        for (index, command) in self.hooks.pre_import.iter().enumerate() {
            if command.trim().is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "hooks.pre_import[{index}] cannot be empty"
                )));
            }
        }

        Ok(())
    }

    /// Resolved targets listed in `general.targets`, in configured order
    pub fn targets(&self) -> Result<Vec<Target>> {
        self.general
            .targets
            .iter()
            .map(|name| self.target(name))
            .collect()
    }

    pub fn target(&self, name: &str) -> Result<Target> {
        let config = self.targets.get(name).ok_or_else(|| {
            Error::InvalidConfig(format!("general.targets: no [targets.{name}] section"))
        })?;
        let service = config
            .service
            .parse::<ServiceKind>()
            .map_err(|_| Error::UnknownService {
                target: name.to_string(),
                service: config.service.clone(),
            })?;
        Ok(Target {
            name: name.to_string(),
            service,
            config: config.clone(),
        })
    }

    /// Storage location for the task store and data file
    pub fn storage(&self) -> Result<Storage> {
        if let Some(dir) = &self.general.data_dir {
            return Ok(Storage::new(dir.clone()));
        }
        if let Some(parent) = self
            .general
            .taskdata
            .as_deref()
            .and_then(Path::parent)
            .filter(|parent| !parent.as_os_str().is_empty())
        {
            return Ok(Storage::new(parent.to_path_buf()));
        }
        Storage::default_location()
    }

    /// Task store file, `general.taskdata` or `<data_dir>/tasks.json`
    pub fn tasks_file(&self) -> Result<PathBuf> {
        if let Some(path) = &self.general.taskdata {
            return Ok(path.clone());
        }
        Ok(self.storage()?.tasks_file())
    }
}

impl GeneralConfig {
    fn validate(&self) -> Result<()> {
        if self.targets.is_empty() {
            return Err(Error::InvalidConfig(
                "general.targets cannot be empty".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for name in &self.targets {
            let trimmed = name.trim();
            if trimmed.is_empty() {
                return Err(Error::InvalidConfig(
                    "general.targets cannot include empty entries".to_string(),
                ));
            }
            if !seen.insert(trimmed) {
                return Err(Error::InvalidConfig(format!(
                    "general.targets has duplicate entry '{trimmed}'"
                )));
            }
        }

        for field in &self.static_fields {
            validate_field_name(field, "general.static_fields")?;
        }

        for field in self.keep.keys() {
            validate_field_name(field, "general.keep")?;
        }

        for (field, policy) in &self.policies {
            validate_field_name(field, "general.policies")?;
            let parsed = policy
                .parse::<MergePolicy>()
                .map_err(|_| Error::UnknownMergePolicy {
                    field: field.clone(),
                    policy: policy.clone(),
                })?;
            if parsed.is_list_policy() && !crate::merge::is_list_field(field) {
                return Err(Error::InvalidConfig(format!(
                    "general.policies.{field}: '{policy}' only applies to list fields (tags, annotations)"
                )));
            }
        }

        Ok(())
    }
}

fn validate_field_name(field: &str, key: &str) -> Result<()> {
    let trimmed = field.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidConfig(format!(
            "{key}: field name cannot be empty"
        )));
    }
    if STORE_MANAGED_FIELDS.contains(&trimmed) {
        return Err(Error::InvalidConfig(format!(
            "{key}: '{trimmed}' is managed by the task store"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::TASKS_FILE;
    use std::fs;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, content.trim()).expect("write config");
        (dir, path)
    }

    #[test]
    fn defaults_are_expected() {
        let (_dir, path) = write_config(
            r#"
[general]
targets = ["gh"]

[targets.gh]
service = "github"
"#,
        );

        let cfg = Config::load(&path).expect("load config");
        assert_eq!(cfg.general.static_fields, vec!["priority".to_string()]);
        assert!(cfg.general.merge_annotations);
        assert!(cfg.general.merge_tags);
        assert!(!cfg.general.replace_tags);
        assert!(cfg.general.annotation_rough_equality);
        assert!(cfg.general.keep.is_empty());
        assert!(cfg.general.policies.is_empty());
        assert!(cfg.hooks.pre_import.is_empty());
    }

    #[test]
    fn load_parses_overrides() {
        let (dir, path) = write_config(
            r#"
[general]
targets = ["gh", "ado"]
static_fields = ["project", "priority"]
replace_tags = true
annotation_rough_equality = false
data_dir = "state"

[general.keeped_items]
tags = ["test"]

[general.policies]
description = "static"

[hooks]
pre_import = ["true"]

[targets.gh]
service = "github"
feed = "gh.jsonl"
default_priority = "M"

[targets.ado]
service = "azuredevops"
organization = "acme"
project = "web"
only_if_assigned = true
"#,
        );

        let cfg = Config::load(&path).expect("load config");
        assert_eq!(
            cfg.general.static_fields,
            vec!["project".to_string(), "priority".to_string()]
        );
        assert!(cfg.general.replace_tags);
        assert!(!cfg.general.annotation_rough_equality);
        assert_eq!(cfg.general.keep["tags"], vec!["test".to_string()]);
        assert_eq!(cfg.general.policies["description"], "static");
        assert_eq!(cfg.hooks.pre_import, vec!["true".to_string()]);

        let targets = cfg.targets().expect("targets");
        assert_eq!(targets[0].name, "gh");
        assert_eq!(targets[0].service, ServiceKind::Github);
        assert_eq!(targets[0].default_priority(), Some("M"));
        assert_eq!(targets[0].config.feed, Some(dir.path().join("gh.jsonl")));
        assert_eq!(targets[1].service, ServiceKind::AzureDevops);
        assert_eq!(targets[1].config.option_str("organization"), Some("acme"));
        assert_eq!(targets[1].config.option_bool("only_if_assigned"), Some(true));

        assert_eq!(
            cfg.tasks_file().expect("tasks file"),
            dir.path().join("state").join(TASKS_FILE)
        );
    }

    #[test]
    fn missing_target_section_rejected() {
        let (_dir, path) = write_config(
            r#"
[general]
targets = ["gh"]
"#,
        );

        let err = Config::load(&path).expect_err("invalid config");
        match err {
            Error::InvalidConfig(message) => assert!(message.contains("targets.gh")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unknown_service_rejected() {
        let (_dir, path) = write_config(
            r#"
[general]
targets = ["jira"]

[targets.jira]
service = "jira"
"#,
        );

        let err = Config::load(&path).expect_err("invalid config");
        assert!(matches!(err, Error::UnknownService { .. }));
    }

    #[test]
    fn unknown_policy_rejected() {
        let (_dir, path) = write_config(
            r#"
[general]
targets = ["gh"]

[general.policies]
tags = "ignore"

[targets.gh]
service = "github"
"#,
        );

        let err = Config::load(&path).expect_err("invalid config");
        match err {
            Error::UnknownMergePolicy { field, policy } => {
                assert_eq!(field, "tags");
                assert_eq!(policy, "ignore");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn list_policy_on_scalar_rejected() {
        let (_dir, path) = write_config(
            r#"
[general]
targets = ["gh"]

[general.policies]
project = "merge"

[targets.gh]
service = "github"
"#,
        );

        let err = Config::load(&path).expect_err("invalid config");
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn store_managed_static_field_rejected() {
        let (_dir, path) = write_config(
            r#"
[general]
targets = ["gh"]
static_fields = ["uuid"]

[targets.gh]
service = "github"
"#,
        );

        let err = Config::load(&path).expect_err("invalid config");
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn explicit_path_wins() {
        let path = Config::locate(Some(Path::new("/tmp/custom.toml"))).expect("locate");
        assert_eq!(path, PathBuf::from("/tmp/custom.toml"));
    }

    #[test]
    fn save_writes_toml() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.toml");
        let mut cfg = Config::new(GeneralConfig::new(vec!["gh".to_string()]));
        cfg.targets
            .insert("gh".to_string(), TargetConfig::new("github"));
        cfg.save(&path).expect("save config");

        let written = fs::read_to_string(&path).expect("read config");
        assert!(written.contains("service = \"github\""));
        let reloaded = Config::load(&path).expect("reload");
        assert_eq!(reloaded.general.targets, vec!["gh".to_string()]);
    }
}
