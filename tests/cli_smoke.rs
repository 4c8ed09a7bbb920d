mod support;

use assert_cmd::Command;
use predicates::str::contains;
use serde_json::Value;
use support::{github_issue, TestEnv, GITHUB_CONFIG};

fn issuesync(env: &TestEnv) -> Command {
    let mut cmd = Command::cargo_bin("issuesync").expect("binary");
    cmd.current_dir(env.path())
        .env_remove("ISSUESYNC_CONFIG")
        .env_remove("RUST_LOG")
        .arg("--config")
        .arg(env.config_path());
    cmd
}

#[test]
fn issuesync_help_works() {
    Command::cargo_bin("issuesync")
        .expect("binary")
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("pull"));
}

#[test]
fn subcommand_help_works() {
    for cmd in ["pull", "uda", "tasks"] {
        Command::cargo_bin("issuesync")
            .expect("binary")
            .arg(cmd)
            .arg("--help")
            .assert()
            .success();
    }
}

#[test]
fn pull_creates_tasks_and_records_last_sync() {
    let env = TestEnv::with_config(GITHUB_CONFIG);
    env.write_feed(
        "github.jsonl",
        &[github_issue(1, "Crash on start"), github_issue(2, "Typo")],
    )
    .expect("feed");

    issuesync(&env)
        .arg("pull")
        .assert()
        .success()
        .stdout(contains("created: 2"));

    assert_eq!(env.tasks().len(), 2);
    let data: Value =
        serde_json::from_str(&std::fs::read_to_string(env.data_file()).expect("data file"))
            .expect("data json");
    assert_eq!(data["last_sync"]["report"]["created"], 2);
    assert_eq!(data["last_sync"]["targets"][0], "my_github");
}

#[test]
fn pull_dry_run_writes_nothing() {
    let env = TestEnv::with_config(GITHUB_CONFIG);
    env.write_feed("github.jsonl", &[github_issue(1, "Crash on start")])
        .expect("feed");

    issuesync(&env)
        .args(["pull", "--dry-run"])
        .assert()
        .success()
        .stdout(contains("dry run"));

    assert!(!env.tasks_file().exists());
    assert!(!env.data_file().exists());
}

#[test]
fn pull_json_envelope() {
    let env = TestEnv::with_config(GITHUB_CONFIG);
    env.write_feed("github.jsonl", &[github_issue(1, "Crash on start")])
        .expect("feed");

    let output = issuesync(&env)
        .args(["--json", "pull"])
        .output()
        .expect("run");
    assert!(output.status.success());

    let payload: Value = serde_json::from_slice(&output.stdout).expect("json output");
    assert_eq!(payload["schema_version"], "issuesync.v1");
    assert_eq!(payload["command"], "pull");
    assert_eq!(payload["status"], "success");
    assert_eq!(payload["data"]["created"], 1);
}

#[test]
fn pull_unknown_target_pattern_fails() {
    let env = TestEnv::with_config(GITHUB_CONFIG);
    issuesync(&env)
        .args(["pull", "--target", "jira*"])
        .assert()
        .code(2)
        .stderr(contains("no configured target matches"));
}

#[test]
fn failing_hook_aborts_pull() {
    let config = format!("{GITHUB_CONFIG}\n[hooks]\npre_import = [\"exit 7\"]\n");
    let env = TestEnv::with_config(&config);
    env.write_feed("github.jsonl", &[github_issue(1, "Crash on start")])
        .expect("feed");

    issuesync(&env).arg("pull").assert().code(4);
    assert!(!env.tasks_file().exists());
}

#[test]
fn invalid_config_exits_with_user_error() {
    let env = TestEnv::with_config("[general]\ntargets = [\"missing\"]\n");
    issuesync(&env)
        .arg("pull")
        .assert()
        .code(2)
        .stderr(contains("targets.missing"));
}

#[test]
fn invalid_config_json_error_envelope() {
    let env = TestEnv::with_config(
        "[general]\ntargets = [\"t\"]\n\n[targets.t]\nservice = \"jira\"\n",
    );
    let output = issuesync(&env)
        .args(["--json", "pull"])
        .output()
        .expect("run");
    assert_eq!(output.status.code(), Some(2));

    let payload: Value = serde_json::from_slice(&output.stdout).expect("json output");
    assert_eq!(payload["status"], "error");
    assert_eq!(payload["command"], "pull");
    assert_eq!(payload["error"]["kind"], "user_error");
}

#[test]
fn uda_lists_declarations() {
    let env = TestEnv::with_config(GITHUB_CONFIG);
    issuesync(&env)
        .arg("uda")
        .assert()
        .success()
        .stdout(contains("uda.githuburl.type=string"))
        .stdout(contains("uda.githubnumber.type=numeric"));
}

#[test]
fn tasks_lists_and_filters_by_status() {
    let env = TestEnv::with_config(GITHUB_CONFIG);
    env.write_feed("github.jsonl", &[github_issue(1, "Crash on start")])
        .expect("feed");
    issuesync(&env).arg("pull").assert().success();

    issuesync(&env)
        .arg("tasks")
        .assert()
        .success()
        .stdout(contains("Crash on start"));

    let output = issuesync(&env)
        .args(["--json", "tasks", "--status", "completed"])
        .output()
        .expect("run");
    let payload: Value = serde_json::from_slice(&output.stdout).expect("json output");
    assert_eq!(payload["data"]["total"], 0);

    issuesync(&env)
        .args(["tasks", "--status", "done"])
        .assert()
        .code(2);
}

#[test]
fn narrowed_pull_leaves_other_targets_pending() {
    let env = TestEnv::with_config(
        r#"
[general]
targets = ["work", "home"]
data_dir = "data"

[targets.work]
service = "github"
feed = "work.jsonl"

[targets.home]
service = "github"
feed = "home.jsonl"
"#,
    );
    env.write_feed("work.jsonl", &[github_issue(1, "Work item")])
        .expect("feed");
    env.write_feed("home.jsonl", &[github_issue(2, "Home item")])
        .expect("feed");
    issuesync(&env).arg("pull").assert().success();

    issuesync(&env)
        .args(["pull", "--target", "work"])
        .assert()
        .success()
        .stdout(contains("completed: 0"));
    assert_eq!(env.tasks_with(issuesync::task::TaskStatus::Pending).len(), 2);
}
