//! Network-facing commands: sync, run, fetch, precache, and maintenance

use std::io::Write;

use colored::Colorize;
use reqwest::Url;
use tokio::sync::watch;

use stowaway::error::{ConfigError, Result};
use stowaway::router::Destination;
use stowaway::{EngineEvent, ResourceRequest, Visibility};

use crate::cli::{CommandContext, GlobalOptions, OutputFormat};
use crate::output::formatters::format_size;
use crate::output::json::format_json;

/// One foreground drain pass
pub async fn sync(opts: &GlobalOptions) -> Result<()> {
    let ctx = CommandContext::new(opts)?;
    let report = ctx.engine.sync_now().await?;
    let remaining = ctx.engine.queue().len()?;

    match ctx.format {
        OutputFormat::Json => {
            let json = serde_json::json!({ "report": report, "remaining": remaining });
            println!("{}", format_json(&json)?);
        }
        OutputFormat::Table => {
            println!(
                "{} Delivered {}, failed {}, rejected {}, dropped {}",
                if report.failed == 0 { "✓".green() } else { "⚠".yellow() },
                report.delivered,
                report.failed,
                report.rejected,
                report.exhausted
            );
            if remaining > 0 {
                println!("  {} items still queued", remaining);
            }
        }
    }
    Ok(())
}

/// Run the scheduler and the reachability probe until Ctrl-C
pub async fn run(opts: &GlobalOptions, background: bool) -> Result<()> {
    let ctx = CommandContext::new(opts)?;
    if background {
        ctx.engine.set_visibility(Visibility::Background);
    }

    let (stop, shutdown) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Interrupt received, shutting down");
        }
        let _ = stop.send(true);
    });

    let mut events = ctx.engine.subscribe();
    let format = ctx.format;
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            print_event(format, &event);
        }
    });

    eprintln!(
        "Syncing against {} (Ctrl-C to stop)",
        ctx.engine.config().server.base_url
    );
    ctx.engine.run(shutdown).await?;
    ctx.engine.router().settle().await;
    Ok(())
}

fn print_event(format: OutputFormat, event: &EngineEvent) {
    if format == OutputFormat::Json {
        if let Ok(line) = serde_json::to_string(event) {
            println!("{}", line);
        }
        return;
    }
    match event {
        EngineEvent::ConnectivityChanged { online: true } => println!("{} Online", "✓".green()),
        EngineEvent::ConnectivityChanged { online: false } => {
            println!("{} Offline, sync paused", "○".dimmed())
        }
        EngineEvent::SyncTerminalFailure { kind, reason, .. } => {
            println!("{} Dropped {} item: {}", "✗".red(), kind, reason)
        }
        EngineEvent::QuotaExceeded { needed, quota } => println!(
            "{} Storage quota reached ({} over {})",
            "⚠".yellow(),
            format_size(*needed),
            format_size(*quota)
        ),
        EngineEvent::RepairRequired { reason } => {
            println!("{} Repair required: {}", "✗".red(), reason)
        }
    }
}

/// Resolve a CLI url argument against the server base URL
fn resolve_url(base: &Url, raw: &str) -> Result<Url> {
    base.join(raw)
        .map_err(|e| ConfigError::Invalid(format!("'{}' is not a valid URL: {}", raw, e)).into())
}

pub async fn fetch(
    opts: &GlobalOptions,
    url: &str,
    navigate: bool,
    image: bool,
    offline: bool,
    body: bool,
) -> Result<()> {
    let ctx = CommandContext::new(opts)?;
    let url = resolve_url(&ctx.engine.config().server.base_url()?, url)?;
    if offline {
        ctx.engine.set_online(false);
    }

    let mut request = ResourceRequest::get(url.clone());
    if navigate {
        request = request.navigate();
    } else if image {
        request = request.with_destination(Destination::Image);
    }
    let strategy = ctx.engine.router().classify(&request);
    let response = ctx.engine.fetch(request).await;
    // Let a stale-while-revalidate refresh land before exiting
    ctx.engine.router().settle().await;

    if body {
        std::io::stdout().write_all(&response.body)?;
        return Ok(());
    }

    match ctx.format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "url": url.as_str(),
                "strategy": strategy,
                "status": response.status,
                "source": response.source,
                "content_type": response.content_type,
                "bytes": response.body.len(),
            });
            println!("{}", format_json(&json)?);
        }
        OutputFormat::Table => {
            println!("{} {}", response.status, url);
            println!("  Strategy: {}", strategy);
            println!("  Source:   {:?}", response.source);
            if let Some(ref content_type) = response.content_type {
                println!("  Type:     {}", content_type);
            }
            println!("  Size:     {}", format_size(response.body.len() as u64));
        }
    }
    Ok(())
}

pub async fn precache(opts: &GlobalOptions) -> Result<()> {
    let ctx = CommandContext::new(opts)?;
    let report = ctx.engine.precache().await;

    match ctx.format {
        OutputFormat::Json => println!("{}", format_json(&report)?),
        OutputFormat::Table => {
            println!(
                "Cached {} manifest entries (version {})",
                report.fetched,
                ctx.engine.router().manifest_version()
            );
            if report.failed > 0 {
                println!("  {} {} entries could not be fetched", "✗".red(), report.failed);
            }
        }
    }
    Ok(())
}

pub fn reconcile(opts: &GlobalOptions) -> Result<()> {
    let ctx = CommandContext::new(opts)?;
    let requeued = ctx.engine.reconcile()?;

    match ctx.format {
        OutputFormat::Json => {
            println!("{}", format_json(&serde_json::json!({ "requeued": requeued }))?)
        }
        OutputFormat::Table => println!("Re-queued {} unsynced records", requeued),
    }
    Ok(())
}

pub fn repair(opts: &GlobalOptions) -> Result<()> {
    let ctx = CommandContext::new(opts)?;
    ctx.engine.repair()?;

    match ctx.format {
        OutputFormat::Json => println!("{}", format_json(&ctx.engine.status())?),
        OutputFormat::Table => println!("{} Object store repaired", "✓".green()),
    }
    Ok(())
}
