//! Sync queue inspection commands

use serde::Serialize;
use tabled::Tabled;

use stowaway::error::Result;
use stowaway::store::SyncQueueItem;

use crate::cli::{CommandContext, GlobalOptions, OutputFormat};
use crate::output::Formattable;
use crate::output::formatters::{format_timestamp_local, truncate};
use crate::output::json::format_json;

/// Queue item display model for table/JSON output
#[derive(Debug, Clone, Tabled, Serialize)]
pub struct QueueItemDisplay {
    #[tabled(rename = "ID")]
    pub id: i64,

    #[tabled(rename = "KIND")]
    pub kind: String,

    #[tabled(rename = "PRIORITY")]
    pub priority: u8,

    #[tabled(rename = "ATTEMPTS")]
    pub attempts: String,

    #[tabled(rename = "ENQUEUED")]
    pub enqueued: String,

    #[tabled(rename = "PAYLOAD")]
    #[serde(skip)]
    pub preview: String,

    #[tabled(skip)]
    pub payload: serde_json::Value,
}

impl From<SyncQueueItem> for QueueItemDisplay {
    fn from(item: SyncQueueItem) -> Self {
        Self {
            id: item.id,
            kind: item.kind.to_string(),
            priority: item.priority,
            attempts: format!("{}/{}", item.attempts, item.max_attempts),
            enqueued: format_timestamp_local(&item.enqueued_at),
            preview: truncate(&item.payload.to_string(), 48),
            payload: item.payload,
        }
    }
}

/// List pending items in delivery order
pub fn list(opts: &GlobalOptions) -> Result<()> {
    let ctx = CommandContext::new(opts)?;
    let items = ctx.engine.queue().list()?;
    let rows: Vec<QueueItemDisplay> = items.into_iter().map(Into::into).collect();
    rows.print(ctx.format)
}

/// Drop every pending item
pub fn clear(opts: &GlobalOptions) -> Result<()> {
    let ctx = CommandContext::new(opts)?;
    let removed = ctx.engine.queue().clear()?;

    match ctx.format {
        OutputFormat::Json => {
            let json = serde_json::json!({ "items_removed": removed });
            println!("{}", format_json(&json)?);
        }
        OutputFormat::Table => println!("Dropped {} queued items", removed),
    }
    Ok(())
}
