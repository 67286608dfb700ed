//! Cache management commands

use serde::Serialize;
use tabled::Tabled;

use stowaway::error::Result;
use stowaway::store::CacheEntry;

use crate::cli::{CommandContext, GlobalOptions, OutputFormat};
use crate::output::Formattable;
use crate::output::formatters::{format_size, format_timestamp_local, truncate};
use crate::output::json::format_json;

/// Cache entry display model for table/JSON output
#[derive(Debug, Clone, Tabled, Serialize)]
pub struct CacheEntryDisplay {
    #[tabled(rename = "PRIORITY")]
    pub priority: u8,

    #[tabled(rename = "STATUS")]
    pub status: u16,

    #[tabled(rename = "SIZE")]
    pub size: String,

    #[tabled(rename = "LAST ACCESSED")]
    pub last_accessed: String,

    #[tabled(rename = "URL")]
    pub key: String,
}

impl From<CacheEntry> for CacheEntryDisplay {
    fn from(entry: CacheEntry) -> Self {
        Self {
            priority: entry.priority,
            status: entry.status,
            size: format_size(entry.size_bytes),
            last_accessed: format_timestamp_local(&entry.last_accessed_at),
            key: truncate(&entry.key, 72),
        }
    }
}

/// Show cache occupancy
pub fn status(opts: &GlobalOptions) -> Result<()> {
    let ctx = CommandContext::new(opts)?;
    let stats = ctx.engine.cache().stats()?;

    match ctx.format {
        OutputFormat::Json => println!("{}", format_json(&stats)?),
        OutputFormat::Table => {
            println!("Cache Status");
            println!("────────────────────────────────────────");
            println!("Entries:        {}", stats.entries);
            println!("Cache size:     {}", format_size(stats.cache_bytes));
            println!("Store total:    {}", format_size(stats.total_bytes));
            println!("Quota:          {}", format_size(stats.quota_bytes));
        }
    }

    Ok(())
}

/// List entries in eviction order (first listed is evicted first)
pub fn list(opts: &GlobalOptions) -> Result<()> {
    let ctx = CommandContext::new(opts)?;
    let mut entries = ctx.engine.cache().entries()?;
    entries.sort_by_key(|e| (std::cmp::Reverse(e.priority), e.last_accessed_at));

    let rows: Vec<CacheEntryDisplay> = entries.into_iter().map(Into::into).collect();
    rows.print(ctx.format)
}

/// Clear all cache entries
pub fn clear(opts: &GlobalOptions) -> Result<()> {
    let ctx = CommandContext::new(opts)?;
    let removed = ctx.engine.cache().clear()?;

    match ctx.format {
        OutputFormat::Json => {
            let json = serde_json::json!({ "entries_removed": removed });
            println!("{}", format_json(&json)?);
        }
        OutputFormat::Table => {
            if removed > 0 {
                println!("Cleared {} cache entries", removed);
            } else {
                println!("Cache was already empty");
            }
        }
    }

    Ok(())
}

/// Apply the retention horizon
pub fn sweep(opts: &GlobalOptions) -> Result<()> {
    let ctx = CommandContext::new(opts)?;
    let report = ctx.engine.sweep()?;

    match ctx.format {
        OutputFormat::Json => println!("{}", format_json(&report)?),
        OutputFormat::Table => println!(
            "Removed {} cache entries, {} synced progress records, {} synced analytics events",
            report.cache_entries, report.progress, report.analytics
        ),
    }

    Ok(())
}

/// Show the database path
pub fn path(opts: &GlobalOptions) -> Result<()> {
    let config = CommandContext::load_config(opts)?;
    println!("{}", config.database_path()?.display());
    Ok(())
}
