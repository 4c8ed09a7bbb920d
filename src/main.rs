//! issuesync - pull remote issues into a local task store

use clap::Parser;
use issuesync::cli::Cli;
use issuesync::output::{emit_error, infer_command_name_from_args};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Longest `RUST_LOG` value accepted before falling back to the default
const MAX_FILTER_LEN: usize = 4096;

fn main() {
    let command = infer_command_name_from_args();
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(log_filter(std::env::var("RUST_LOG").ok(), cli.verbose))
        .init();

    let json = cli.json;
    if let Err(err) = cli.run() {
        let _ = emit_error(&command, &err, json);
        std::process::exit(err.exit_code());
    }
}

/// `RUST_LOG` wins when it parses; otherwise `--verbose` turns on info
/// logs for this crate and everything stays silent.
fn log_filter(env: Option<String>, verbose: bool) -> EnvFilter {
    let from_env = env
        .as_deref()
        .map(str::trim)
        .filter(|raw| !raw.is_empty() && raw.len() <= MAX_FILTER_LEN)
        .and_then(|raw| EnvFilter::try_new(raw).ok());
    match from_env {
        Some(filter) => filter,
        None if verbose => EnvFilter::new("issuesync=info"),
        None => EnvFilter::new("off"),
    }
}
