//! issuesync uda command implementation

use std::path::PathBuf;

use serde::Serialize;

use crate::config::Config;
use crate::error::Result;
use crate::output::{emit_success, OutputOptions};
use crate::services::ServiceKind;
use crate::uda::{self, UdaDecl};

#[derive(Serialize)]
struct UdaReport {
    services: Vec<ServiceKind>,
    udas: Vec<UdaDecl>,
    lines: Vec<String>,
}

pub fn run(config: Option<PathBuf>, json: bool, quiet: bool) -> Result<()> {
    let config_path = Config::locate(config.as_deref())?;
    let config = Config::load(&config_path)?;

    let mut services: Vec<ServiceKind> = Vec::new();
    for target in config.targets()? {
        if !services.contains(&target.service) {
            services.push(target.service);
        }
    }

    let report = UdaReport {
        udas: uda::collect(&services),
        lines: uda::config_lines(&services),
        services,
    };

    if json {
        return emit_success(OutputOptions { json, quiet }, "uda", &report, None);
    }

    // Plain lines so the output can be pasted into the task store config.
    if !quiet {
        for line in &report.lines {
            println!("{line}");
        }
    }
    Ok(())
}
