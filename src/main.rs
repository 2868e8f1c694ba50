mod backup;
mod db;
mod eligibility;
mod ipc;
mod marks;
mod marks_csv;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use chrono::NaiveDate;
use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// School administration data service. Speaks newline-delimited JSON on
/// stdin/stdout.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Workspace directory to open at start-up.
    #[arg(long, env = "SCHOOLD_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Pin the service date (YYYY-MM-DD) instead of following the local clock.
    #[arg(long, env = "SCHOOLD_TODAY", value_parser = parse_today)]
    today: Option<NaiveDate>,
}

fn parse_today(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|e| format!("expected YYYY-MM-DD: {e}"))
}

fn main() -> anyhow::Result<()> {
    // stdout carries responses, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let cli = Cli::parse();
    let mut state = ipc::AppState::new(cli.today);
    if let Some(path) = cli.workspace.as_deref() {
        ipc::select_workspace(&mut state, path)?;
    }
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        today = %state.today(),
        pinned = cli.today.is_some(),
        "schoold ready"
    );

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "stdin read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id.
                tracing::warn!(error = %e, "unparsable request line");
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                writeln!(stdout, "{}", resp)?;
                stdout.flush()?;
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        writeln!(stdout, "{}", resp)?;
        stdout.flush()?;
    }
    Ok(())
}
