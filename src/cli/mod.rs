//! Command-line interface for issuesync
//!
//! This module defines the CLI structure using clap derive macros.
//! Each subcommand is defined in its own submodule.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::CONFIG_ENV;
use crate::error::Result;

pub mod pull;
mod tasks;
mod uda;

/// issuesync - pull issues from remote trackers into a local task store
#[derive(Parser, Debug)]
#[command(name = "issuesync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to issuesync.toml (defaults to the platform config dir)
    #[arg(long, global = true, env = CONFIG_ENV)]
    pub config: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch every target and reconcile the task store
    Pull {
        /// Compute and report changes without writing them
        #[arg(long)]
        dry_run: bool,

        /// Only pull targets whose name matches this glob
        #[arg(long)]
        target: Option<String>,
    },

    /// Print the UDA definitions of all configured services
    Uda,

    /// List tasks in the store
    Tasks {
        /// Only show tasks with this status: pending, completed, deleted
        #[arg(long)]
        status: Option<String>,
    },
}

impl Cli {
    /// Execute the CLI command
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Pull { dry_run, target } => pull::run(pull::PullOptions {
                config: self.config,
                dry_run,
                target,
                json: self.json,
                quiet: self.quiet,
            }),
            Commands::Uda => uda::run(self.config, self.json, self.quiet),
            Commands::Tasks { status } => tasks::run(tasks::TasksOptions {
                config: self.config,
                status,
                json: self.json,
                quiet: self.quiet,
            }),
        }
    }
}
