//! Reconciliation pass.
//!
//! One pass takes the records of every target that ran, matches them to
//! local tasks by identity key and stages the resulting creates, updates,
//! completions and reopens. Nothing reaches the store until the whole
//! remote stream has been read, so a fatal source error leaves the store
//! untouched.
//!
//! Per identity key:
//!
//! | local state | remote present | remote absent |
//! |-------------|----------------|---------------|
//! | none        | create         | -             |
//! | pending     | merge / update | complete      |
//! | completed   | reopen + merge | -             |

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::identity::{self, IdentityKey};
use crate::issue::RemoteIssue;
use crate::merge::PolicyTable;
use crate::services::ServiceKind;
use crate::task::{LocalTask, TaskSet, TaskStatus, TaskStore};
use crate::uda::UdaRegistry;

/// A record left out of the pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRecord {
    pub target: String,
    pub key: String,
    pub reason: String,
}

/// Outcome of one pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub completed: usize,
    pub reopened: usize,
    #[serde(default)]
    pub skipped: Vec<SkippedRecord>,
    #[serde(default)]
    pub dry_run: bool,
}

impl SyncReport {
    /// Number of task writes the pass produced
    pub fn changed(&self) -> usize {
        self.created + self.updated + self.completed + self.reopened
    }

    fn skip(&mut self, target: &str, key: String, err: &Error) {
        tracing::warn!(target_name = target, key = %key, error = %err, "skipping record");
        self.skipped.push(SkippedRecord {
            target: target.to_string(),
            key,
            reason: err.to_string(),
        });
    }
}

/// One staged store operation
#[derive(Debug, Clone, PartialEq)]
pub enum TaskChange {
    Create(LocalTask),
    Update(LocalTask),
    Complete { uuid: Uuid, end: DateTime<Utc> },
    Reopen(LocalTask),
}

/// Changes computed by a pass, not yet applied
#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
    pub changes: Vec<TaskChange>,
    pub report: SyncReport,
}

/// Deduplicated remote view: one record per key, in first-seen order
#[derive(Debug, Default)]
struct RemoteSet {
    issues: Vec<(IdentityKey, RemoteIssue)>,
    /// Keys seen only in records that failed validation
    unreadable: HashSet<IdentityKey>,
}

pub struct Synchronizer<'a> {
    policies: &'a PolicyTable,
    services: Vec<ServiceKind>,
    registry: UdaRegistry,
    /// Targets of a narrowed pass; `None` when every configured target ran
    only_targets: Option<HashSet<String>>,
    dry_run: bool,
}

impl<'a> Synchronizer<'a> {
    /// Sync managing tasks of `services`. Completion only ever touches
    /// tasks whose key belongs to one of them.
    pub fn new(policies: &'a PolicyTable, services: &[ServiceKind]) -> Self {
        let mut managed: Vec<ServiceKind> = Vec::new();
        for service in services {
            if !managed.contains(service) {
                managed.push(*service);
            }
        }
        Self {
            policies,
            registry: UdaRegistry::for_services(&managed),
            services: managed,
            only_targets: None,
            dry_run: false,
        }
    }

    /// Restrict completion to tasks last written by one of `targets`.
    ///
    /// Used when a pass runs a subset of the configured targets: a task of
    /// a target that did not run is never completed, nor is a task with no
    /// recorded target.
    pub fn only_targets<T: AsRef<str>>(mut self, targets: &[T]) -> Self {
        self.only_targets = Some(
            targets
                .iter()
                .map(|target| target.as_ref().to_string())
                .collect(),
        );
        self
    }

    fn may_complete(&self, task: &LocalTask) -> bool {
        match (&self.only_targets, &task.target) {
            (None, _) => true,
            (Some(targets), Some(target)) => targets.contains(target),
            (Some(_), None) => false,
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Run a full pass and commit the result (unless dry-run)
    pub fn run<S, I>(&self, store: &mut S, issues: I) -> Result<SyncReport>
    where
        S: TaskStore + ?Sized,
        I: IntoIterator<Item = Result<RemoteIssue>>,
    {
        let plan = self.plan(&*store, issues, Utc::now())?;

        if self.dry_run {
            store.discard();
            tracing::info!(changes = plan.report.changed(), "dry run, nothing committed");
            return Ok(plan.report);
        }

        if let Err(err) = apply(store, plan.changes) {
            store.discard();
            return Err(err);
        }
        store.commit()?;

        let report = plan.report;
        tracing::info!(
            created = report.created,
            updated = report.updated,
            unchanged = report.unchanged,
            completed = report.completed,
            reopened = report.reopened,
            skipped = report.skipped.len(),
            "sync finished"
        );
        Ok(report)
    }

    /// Compute the changes of a pass without touching the store
    pub fn plan<S, I>(&self, store: &S, issues: I, now: DateTime<Utc>) -> Result<SyncPlan>
    where
        S: TaskStore + ?Sized,
        I: IntoIterator<Item = Result<RemoteIssue>>,
    {
        let mut report = SyncReport {
            dry_run: self.dry_run,
            ..SyncReport::default()
        };
        let remote = self.collect(issues, &mut report)?;
        let local = store.load_tasks()?;
        let changes = self.reconcile(remote, local, now, &mut report)?;
        Ok(SyncPlan { changes, report })
    }

    fn collect<I>(&self, issues: I, report: &mut SyncReport) -> Result<RemoteSet>
    where
        I: IntoIterator<Item = Result<RemoteIssue>>,
    {
        let mut order: Vec<IdentityKey> = Vec::new();
        let mut latest: HashMap<IdentityKey, RemoteIssue> = HashMap::new();
        let mut unreadable: HashSet<IdentityKey> = HashSet::new();

        for item in issues {
            let issue = match item {
                Ok(issue) => issue,
                Err(err) if err.is_record_level() => {
                    let key = match &err {
                        Error::MalformedIssue { key, .. } => key.clone(),
                        _ => String::new(),
                    };
                    report.skip("", key, &err);
                    continue;
                }
                Err(err) => return Err(err),
            };

            let key = identity::resolve(&issue)?;
            if let Err(err) = self.validate(&issue) {
                if !err.is_record_level() {
                    return Err(err);
                }
                report.skip(&issue.target, key.to_string(), &err);
                unreadable.insert(key);
                continue;
            }

            tracing::debug!(key = %key, target_name = %issue.target, "remote record");
            if !latest.contains_key(&key) {
                order.push(key.clone());
            }
            latest.insert(key, issue);
        }

        let issues: Vec<(IdentityKey, RemoteIssue)> = order
            .into_iter()
            .filter_map(|key| latest.remove(&key).map(|issue| (key, issue)))
            .collect();
        unreadable.retain(|key| !issues.iter().any(|(seen, _)| seen == key));

        Ok(RemoteSet { issues, unreadable })
    }

    /// Description present, every extension field declared and well typed
    fn validate(&self, issue: &RemoteIssue) -> Result<()> {
        let malformed = |field: &str, reason: String| Error::MalformedIssue {
            key: issue.label(),
            field: field.to_string(),
            reason,
        };

        if !self.services.contains(&issue.service) {
            return Err(malformed(
                "service",
                format!("service '{}' is not configured", issue.service),
            ));
        }
        if issue.description.trim().is_empty() {
            return Err(malformed("description", "missing description".to_string()));
        }
        for (name, value) in &issue.udas {
            let decl = self
                .registry
                .get(name)
                .ok_or_else(|| malformed(name, "field is not a declared UDA".to_string()))?;
            if !decl.kind.accepts(value) {
                return Err(malformed(name, format!("expected a {} value", decl.kind)));
            }
        }
        Ok(())
    }

    fn reconcile(
        &self,
        remote: RemoteSet,
        local: TaskSet,
        now: DateTime<Utc>,
        report: &mut SyncReport,
    ) -> Result<Vec<TaskChange>> {
        let RemoteSet { issues, unreadable } = remote;
        let positions: HashMap<&IdentityKey, usize> = issues
            .iter()
            .enumerate()
            .map(|(index, (key, _))| (key, index))
            .collect();
        let mut matched = vec![false; issues.len()];
        let mut claimed: HashMap<IdentityKey, Uuid> = HashMap::new();
        let mut changes = Vec::new();

        // Pending tasks first, so a pending duplicate wins over a completed one.
        for task in local.pending.into_iter().chain(local.completed) {
            let Some(key) = identity::resolve_local(&task, &self.services) else {
                continue;
            };
            if let Some(owner) = claimed.get(&key) {
                tracing::warn!(
                    key = %key,
                    kept = %owner,
                    ignored = %task.uuid,
                    "several local tasks share one identity key"
                );
                continue;
            }
            claimed.insert(key.clone(), task.uuid);

            let position = positions.get(&key).copied();
            match (task.status, position) {
                (TaskStatus::Pending, Some(position)) => {
                    matched[position] = true;
                    let issue = &issues[position].1;
                    match self.merge_task(task.clone(), issue) {
                        Ok(mut merged) => {
                            if merged.same_content(&task) {
                                report.unchanged += 1;
                            } else {
                                tracing::debug!(key = %key, uuid = %task.uuid, "update");
                                merged.modified = Some(now);
                                changes.push(TaskChange::Update(merged));
                                report.updated += 1;
                            }
                        }
                        Err(err) if err.is_record_level() => {
                            report.skip(&issue.target, key.to_string(), &err);
                        }
                        Err(err) => return Err(err),
                    }
                }
                (TaskStatus::Pending, None) => {
                    if unreadable.contains(&key) || !self.may_complete(&task) {
                        continue;
                    }
                    tracing::debug!(key = %key, uuid = %task.uuid, "complete");
                    changes.push(TaskChange::Complete {
                        uuid: task.uuid,
                        end: now,
                    });
                    report.completed += 1;
                }
                (TaskStatus::Completed, Some(position)) => {
                    matched[position] = true;
                    let issue = &issues[position].1;
                    let mut reopened = task.clone();
                    reopened.status = TaskStatus::Pending;
                    reopened.end = None;
                    match self.merge_task(reopened, issue) {
                        Ok(mut merged) => {
                            tracing::debug!(key = %key, uuid = %task.uuid, "reopen");
                            merged.modified = Some(now);
                            changes.push(TaskChange::Reopen(merged));
                            report.reopened += 1;
                        }
                        Err(err) if err.is_record_level() => {
                            report.skip(&issue.target, key.to_string(), &err);
                        }
                        Err(err) => return Err(err),
                    }
                }
                (TaskStatus::Completed, None) | (TaskStatus::Deleted, _) => {}
            }
        }

        for ((key, issue), matched) in issues.iter().zip(matched) {
            if matched {
                continue;
            }
            if claimed.contains_key(key) {
                return Err(Error::DuplicateIdentity(key.to_string()));
            }
            let fresh = LocalTask::new(String::new(), issue.entry.unwrap_or(now));
            match self.merge_task(fresh, issue) {
                Ok(task) => {
                    tracing::debug!(key = %key, uuid = %task.uuid, "create");
                    claimed.insert(key.clone(), task.uuid);
                    changes.push(TaskChange::Create(task));
                    report.created += 1;
                }
                Err(err) if err.is_record_level() => {
                    report.skip(&issue.target, key.to_string(), &err);
                }
                Err(err) => return Err(err),
            }
        }

        Ok(changes)
    }

    /// Fold every remote field into `task` under the configured policies
    fn merge_task(&self, mut task: LocalTask, issue: &RemoteIssue) -> Result<LocalTask> {
        for (field, remote) in issue.fields() {
            let local = task.field(&field);
            let merged = self.policies.apply(&field, local.as_ref(), Some(&remote))?;
            task.set_field(&field, merged)?;
        }
        task.target = Some(issue.target.clone());
        Ok(task)
    }
}

fn apply<S: TaskStore + ?Sized>(store: &mut S, changes: Vec<TaskChange>) -> Result<()> {
    for change in changes {
        match change {
            TaskChange::Create(task) => store.add_task(task)?,
            TaskChange::Update(task) => store.update_task(task)?,
            TaskChange::Complete { uuid, end } => store.complete_task(uuid, end)?,
            TaskChange::Reopen(task) => store.reopen_task(task)?,
        }
    }
    Ok(())
}
