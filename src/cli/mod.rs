//! CLI command definitions and handlers

use clap::{Parser, Subcommand};

pub mod args;
pub mod cache;
pub mod context;
pub mod queue;
pub mod records;
pub mod status;
pub mod sync;

pub use args::{GlobalOptions, OutputFormat};
pub use context::CommandContext;

/// Stowaway - offline-first content cache and background sync engine
#[derive(Parser, Debug)]
#[command(name = "stowaway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (table, json)
    #[arg(
        long,
        global = true,
        env = "STOWAWAY_FORMAT",
        default_value = "table",
        hide_env = true
    )]
    pub format: OutputFormat,

    /// Override config file location
    #[arg(long, global = true, env = "STOWAWAY_CONFIG", hide_env = true)]
    pub config: Option<String>,

    /// Override the object store database location
    #[arg(long, global = true, env = "STOWAWAY_DATABASE", hide_env = true)]
    pub database: Option<String>,

    /// Override the server base URL
    #[arg(long, global = true, env = "STOWAWAY_SERVER", hide_env = true)]
    pub server: Option<String>,

    /// Enable debug logging
    #[arg(long, global = true, env = "STOWAWAY_DEBUG", hide_env = true)]
    pub debug: bool,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show store health, connectivity and queue status
    Status,

    /// Deliver queued items once, in the foreground
    Sync,

    /// Run the background scheduler until interrupted
    Run {
        /// Start as if backgrounded (slower cadence)
        #[arg(long)]
        background: bool,
    },

    /// Fetch a resource through the cache strategy router
    Fetch {
        /// Absolute URL or path on the configured server
        url: String,

        /// Treat as a top-level page navigation
        #[arg(long, conflicts_with = "image")]
        navigate: bool,

        /// Treat as an image request
        #[arg(long)]
        image: bool,

        /// Skip the network entirely
        #[arg(long)]
        offline: bool,

        /// Write the body to stdout instead of a summary
        #[arg(long)]
        body: bool,
    },

    /// Fetch and cache every app-shell manifest entry
    Precache,

    /// Manage the content cache
    #[command(subcommand)]
    Cache(CacheCommands),

    /// Inspect the sync queue
    #[command(subcommand)]
    Queue(QueueCommands),

    /// Record or list progress
    #[command(subcommand)]
    Progress(ProgressCommands),

    /// Manage favorites
    #[command(subcommand)]
    Favorites(FavoritesCommands),

    /// Record an analytics event
    Track {
        /// Event type
        event_type: String,

        /// Event data as JSON
        #[arg(long, default_value = "{}")]
        data: String,
    },

    /// Queue a profile update
    Profile {
        /// Profile fields as JSON
        data: String,
    },

    /// Re-queue unsynced records that no queue item references
    Reconcile,

    /// Rebuild the object store after corruption or a schema mismatch
    Repair,
}

/// Content cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Show cache occupancy against the storage quota
    Status,

    /// List cached entries in eviction order
    List,

    /// Remove every cached entry
    Clear,

    /// Apply the retention horizon to cache and synced records
    Sweep,

    /// Print the database path
    Path,
}

/// Sync queue subcommands
#[derive(Subcommand, Debug)]
pub enum QueueCommands {
    /// List pending items in delivery order
    List,

    /// Drop every pending item
    Clear,
}

/// Progress subcommands
#[derive(Subcommand, Debug)]
pub enum ProgressCommands {
    /// Record progress for a section
    Save {
        /// Section identifier
        section: String,

        /// Progress payload as JSON
        data: String,
    },

    /// List progress records for a section
    List {
        /// Section identifier
        section: String,
    },
}

/// Favorites subcommands
#[derive(Subcommand, Debug)]
pub enum FavoritesCommands {
    /// Add or update a favorite
    Add {
        /// Favorite identifier
        id: String,

        /// Item type (lesson, article, ...)
        #[arg(long = "type", short = 't')]
        kind: String,

        /// Display title
        #[arg(long)]
        title: String,

        /// Item URL
        #[arg(long)]
        url: String,
    },

    /// List favorites, oldest first
    List,

    /// Remove a favorite
    Remove {
        /// Favorite identifier
        id: String,
    },
}

/// Parse a JSON argument, reporting which argument was malformed
pub fn parse_json_arg(name: &str, raw: &str) -> stowaway::Result<serde_json::Value> {
    serde_json::from_str(raw)
        .map_err(|e| stowaway::Error::Other(format!("{} is not valid JSON: {}", name, e)))
}
