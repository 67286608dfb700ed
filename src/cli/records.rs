//! Collaborator record commands: progress, favorites, analytics, profile

use serde::Serialize;
use tabled::Tabled;

use stowaway::error::{Error, Result};
use stowaway::store::{FavoriteRecord, ProgressRecord};

use crate::cli::{CommandContext, GlobalOptions, OutputFormat, parse_json_arg};
use crate::output::Formattable;
use crate::output::formatters::{format_timestamp_local, truncate};
use crate::output::json::format_json;

#[derive(Debug, Clone, Tabled, Serialize)]
pub struct ProgressDisplay {
    #[tabled(rename = "ID")]
    pub id: i64,

    #[tabled(rename = "SAVED")]
    pub saved: String,

    #[tabled(rename = "SYNCED")]
    pub synced: String,

    #[tabled(rename = "DATA")]
    pub data: String,
}

impl From<ProgressRecord> for ProgressDisplay {
    fn from(record: ProgressRecord) -> Self {
        Self {
            id: record.id,
            saved: format_timestamp_local(&record.timestamp),
            synced: synced_mark(record.synced),
            data: truncate(&record.payload.to_string(), 60),
        }
    }
}

#[derive(Debug, Clone, Tabled, Serialize)]
pub struct FavoriteDisplay {
    #[tabled(rename = "ID")]
    pub id: String,

    #[tabled(rename = "TYPE")]
    pub kind: String,

    #[tabled(rename = "TITLE")]
    pub title: String,

    #[tabled(rename = "URL")]
    pub url: String,

    #[tabled(rename = "SYNCED")]
    pub synced: String,
}

impl From<FavoriteRecord> for FavoriteDisplay {
    fn from(record: FavoriteRecord) -> Self {
        Self {
            id: record.id,
            kind: record.kind,
            title: truncate(&record.title, 40),
            url: record.url,
            synced: synced_mark(record.synced),
        }
    }
}

fn synced_mark(synced: bool) -> String {
    if synced {
        "\u{2713}".to_string()
    } else {
        String::new()
    }
}

/// Report a collaborator write the way the engine reports it: true or false
fn report_write(format: OutputFormat, ok: bool, what: &str) -> Result<()> {
    if !ok {
        return Err(Error::Other(format!(
            "{} was not recorded; see the log for details",
            what
        )));
    }
    match format {
        OutputFormat::Json => {
            println!("{}", format_json(&serde_json::json!({ "recorded": true }))?)
        }
        OutputFormat::Table => println!("Recorded {}", what),
    }
    Ok(())
}

pub fn save_progress(opts: &GlobalOptions, section: &str, data: &str) -> Result<()> {
    let data = parse_json_arg("data", data)?;
    let ctx = CommandContext::new(opts)?;
    let ok = ctx.engine.save_progress(section, data);
    report_write(ctx.format, ok, &format!("progress for '{}'", section))
}

pub fn list_progress(opts: &GlobalOptions, section: &str) -> Result<()> {
    let ctx = CommandContext::new(opts)?;
    let rows: Vec<ProgressDisplay> = ctx
        .engine
        .get_progress(section)
        .into_iter()
        .map(Into::into)
        .collect();
    rows.print(ctx.format)
}

pub fn add_favorite(
    opts: &GlobalOptions,
    id: &str,
    kind: &str,
    title: &str,
    url: &str,
) -> Result<()> {
    let ctx = CommandContext::new(opts)?;
    let ok = ctx.engine.add_to_favorites(id, kind, title, url);
    report_write(ctx.format, ok, &format!("favorite '{}'", id))
}

pub fn list_favorites(opts: &GlobalOptions) -> Result<()> {
    let ctx = CommandContext::new(opts)?;
    let rows: Vec<FavoriteDisplay> = ctx
        .engine
        .get_favorites()
        .into_iter()
        .map(Into::into)
        .collect();
    rows.print(ctx.format)
}

pub fn remove_favorite(opts: &GlobalOptions, id: &str) -> Result<()> {
    let ctx = CommandContext::new(opts)?;
    let removed = ctx.engine.remove_favorite(id);

    match ctx.format {
        OutputFormat::Json => {
            println!("{}", format_json(&serde_json::json!({ "removed": removed }))?)
        }
        OutputFormat::Table if removed => println!("Removed favorite '{}'", id),
        OutputFormat::Table => println!("No favorite named '{}'", id),
    }
    Ok(())
}

pub fn track(opts: &GlobalOptions, event_type: &str, data: &str) -> Result<()> {
    let data = parse_json_arg("--data", data)?;
    let ctx = CommandContext::new(opts)?;
    let ok = ctx.engine.track_event(event_type, data);
    report_write(ctx.format, ok, &format!("'{}' event", event_type))
}

pub fn update_profile(opts: &GlobalOptions, data: &str) -> Result<()> {
    let data = parse_json_arg("data", data)?;
    let ctx = CommandContext::new(opts)?;
    let ok = ctx.engine.update_profile(data);
    report_write(ctx.format, ok, "profile update")
}
