//! Target inspection and repair: `synctick status` and `synctick reset`.

use anyhow::Context;
use console::style;
use std::path::Path;

use synctick::errors::TickError;
use synctick::exit::ExitStatus;
use synctick::orchestrator::ResetOutcome;
use synctick::state::log::format_epoch;

use super::open_target;

pub fn cmd_status(config_path: &Path, json: bool) -> Result<ExitStatus, TickError> {
    let (orchestrator, _paths) = open_target(config_path)?;
    let status = orchestrator.status()?;

    if json {
        let text =
            serde_json::to_string_pretty(&status).context("Failed to serialize status")?;
        println!("{text}");
        return Ok(ExitStatus::Ok);
    }

    println!();
    println!("Sync Target Status");
    println!("==================");
    println!();
    println!("Config:  {}", status.config_file.display());
    println!("Local:   {}", status.local_dir.display());
    println!("Remote:  {}", status.remote_url);
    println!();

    match (status.lock_owner, status.lock_owner_alive) {
        (Some(pid), Some(true)) => println!("Lock:    held by running process {pid}"),
        (Some(pid), _) => println!(
            "Lock:    {} (process {pid} is gone, next run reclaims it)",
            style("stale").yellow()
        ),
        (None, _) => println!("Lock:    free"),
    }

    match &status.failure {
        None => println!("State:   {}", style("OK").green()),
        Some(failure) => {
            println!(
                "State:   {} ({} consecutive failure{})",
                style("failing").red(),
                failure.count,
                if failure.count == 1 { "" } else { "s" }
            );
            println!("Reason:  {}", failure.reason);
            println!("Last:    {}", format_epoch(failure.last_failure_epoch));
            if status.blocked {
                println!(
                    "Next:    {} until the config or credentials change (or `synctick reset`)",
                    style("blocked").red()
                );
            } else if let Some(at) = status.next_retry_epoch {
                let delay = status.backoff_secs.unwrap_or_default();
                println!("Next:    not before {} (backoff {delay} s)", format_epoch(at));
            } else {
                println!("Next:    on the next run");
            }
        }
    }

    if !status.recent.is_empty() {
        println!();
        println!("Recent activity:");
        for line in &status.recent {
            println!("  {line}");
        }
    }
    println!();
    Ok(ExitStatus::Ok)
}

pub fn cmd_reset(config_path: &Path) -> Result<ExitStatus, TickError> {
    let (orchestrator, paths) = open_target(config_path)?;
    paths.ensure_dir()?;

    match orchestrator.reset()? {
        ResetOutcome::Cleared(Some(previous)) => {
            println!(
                "Cleared {} recorded failure(s): {}",
                previous.count, previous.reason
            );
            Ok(ExitStatus::Ok)
        }
        ResetOutcome::Cleared(None) => {
            println!("No failures recorded, nothing to reset.");
            Ok(ExitStatus::Ok)
        }
        ResetOutcome::AlreadyRunning { owner } => {
            let who = owner.map_or_else(|| "another process".to_string(), |pid| format!("process {pid}"));
            eprintln!("synctick: a sync is running ({who}), try again later");
            Ok(ExitStatus::AlreadyRunning)
        }
    }
}
