//! Pre-import hooks.
//!
//! Commands from `[hooks] pre_import` run through the platform shell
//! before any target is read. The first failing command aborts the run.

use std::path::Path;
use std::process::Command;

use crate::config::HooksConfig;
use crate::error::{Error, Result};

/// Longest hook output quoted in an error
const MAX_MESSAGE_CHARS: usize = 400;

/// Run every `pre_import` command in order from `cwd`
pub fn run_pre_import(hooks: &HooksConfig, cwd: &Path) -> Result<()> {
    for cmd in hooks.pre_import.iter().filter(|cmd| !cmd.trim().is_empty()) {
        tracing::info!(cmd = %cmd, "running pre_import hook");
        if let Err(reason) = run_hook(cwd, cmd) {
            tracing::warn!(cmd = %cmd, reason = %reason, "pre_import hook failed");
            return Err(Error::HookFailed(format!("`{cmd}`: {reason}")));
        }
    }
    Ok(())
}

/// Run one command; `Err` carries a short description of the failure
fn run_hook(cwd: &Path, cmd: &str) -> std::result::Result<(), String> {
    let output = shell(cmd)
        .current_dir(cwd)
        .output()
        .map_err(|err| format!("cannot start shell: {err}"))?;
    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let message = [stderr.trim(), stdout.trim()]
        .into_iter()
        .find(|text| !text.is_empty())
        .unwrap_or("unknown error");
    let exit = output
        .status
        .code()
        .map_or_else(|| "signal".to_string(), |code| code.to_string());
    Err(format!(
        "exit={exit} msg={}",
        message.chars().take(MAX_MESSAGE_CHARS).collect::<String>()
    ))
}

fn shell(cmd: &str) -> Command {
    let (program, flag) = if cfg!(windows) { ("cmd", "/C") } else { ("sh", "-c") };
    let mut command = Command::new(program);
    command.args([flag, cmd]);
    command
}
