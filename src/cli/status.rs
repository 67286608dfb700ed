//! Status command implementation

use colored::Colorize;

use stowaway::error::Result;
use stowaway::sync::SyncState;

use crate::cli::{CommandContext, GlobalOptions, OutputFormat};
use crate::output::formatters::{format_duration, format_size};
use crate::output::json::format_json;

/// Display store health, connectivity, cadence and backlog
pub fn run(opts: &GlobalOptions) -> Result<()> {
    let ctx = CommandContext::new(opts)?;
    let status = ctx.engine.status();

    if ctx.format == OutputFormat::Json {
        println!("{}", format_json(&status)?);
        return Ok(());
    }

    println!("{}\n", "Stowaway Status".bold());

    let db_path = ctx.engine.config().database_path()?;
    println!("Database: {}", db_path.display().to_string().cyan());
    println!("Server:   {}", ctx.engine.config().server.base_url.cyan());
    println!();

    match status.repair_reason {
        None => println!("{} Object store healthy", "✓".green()),
        Some(ref reason) => {
            println!("{} Object store needs repair: {}", "✗".red(), reason);
            println!("  → Run 'stowaway repair' to rebuild it");
        }
    }

    if status.online {
        println!("{} Online", "✓".green());
    } else {
        println!("{} Offline", "○".dimmed());
    }

    match (status.visibility, status.cadence.interval()) {
        (visibility, Some(interval)) => println!(
            "{} Syncing every {} ({:?})",
            "✓".green(),
            format_duration(interval),
            visibility
        ),
        (_, None) => println!("{} Sync paused", "⚠".yellow()),
    }

    let state = match status.sync_state {
        SyncState::Idle => "idle".to_string(),
        SyncState::Draining { .. } => "draining".to_string(),
        SyncState::Backoff { streak } => format!("backing off (streak {})", streak),
    };
    println!("  Synchronizer: {}", state);

    println!();
    if status.queued > 0 {
        println!("{} {} items waiting to sync", "⚠".yellow(), status.queued);
    } else {
        println!("{} Sync queue empty", "✓".green());
    }
    println!(
        "  Cache: {} entries, {}",
        status.cache.entries,
        format_size(status.cache.cache_bytes)
    );
    println!(
        "  Storage: {} of {}",
        format_size(status.cache.total_bytes),
        format_size(status.cache.quota_bytes)
    );
    println!("  Manifest version: {}", status.manifest_version.dimmed());

    Ok(())
}
