//! Stowaway CLI - drive the offline engine from the command line

use clap::Parser;

mod cli;
mod output;

use cli::{
    CacheCommands, Cli, Commands, FavoritesCommands, GlobalOptions, ProgressCommands,
    QueueCommands,
};
use stowaway::error::Result;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();

    let opts = GlobalOptions::from_cli(&cli);

    match cli.command {
        Commands::Status => cli::status::run(&opts),
        Commands::Sync => cli::sync::sync(&opts).await,
        Commands::Run { background } => cli::sync::run(&opts, background).await,
        Commands::Fetch {
            url,
            navigate,
            image,
            offline,
            body,
        } => cli::sync::fetch(&opts, &url, navigate, image, offline, body).await,
        Commands::Precache => cli::sync::precache(&opts).await,
        Commands::Cache(cache_cmd) => match cache_cmd {
            CacheCommands::Status => cli::cache::status(&opts),
            CacheCommands::List => cli::cache::list(&opts),
            CacheCommands::Clear => cli::cache::clear(&opts),
            CacheCommands::Sweep => cli::cache::sweep(&opts),
            CacheCommands::Path => cli::cache::path(&opts),
        },
        Commands::Queue(queue_cmd) => match queue_cmd {
            QueueCommands::List => cli::queue::list(&opts),
            QueueCommands::Clear => cli::queue::clear(&opts),
        },
        Commands::Progress(progress_cmd) => match progress_cmd {
            ProgressCommands::Save { section, data } => {
                cli::records::save_progress(&opts, &section, &data)
            }
            ProgressCommands::List { section } => cli::records::list_progress(&opts, &section),
        },
        Commands::Favorites(favorites_cmd) => match favorites_cmd {
            FavoritesCommands::Add {
                id,
                kind,
                title,
                url,
            } => cli::records::add_favorite(&opts, &id, &kind, &title, &url),
            FavoritesCommands::List => cli::records::list_favorites(&opts),
            FavoritesCommands::Remove { id } => cli::records::remove_favorite(&opts, &id),
        },
        Commands::Track { event_type, data } => cli::records::track(&opts, &event_type, &data),
        Commands::Profile { data } => cli::records::update_profile(&opts, &data),
        Commands::Reconcile => cli::sync::reconcile(&opts),
        Commands::Repair => cli::sync::repair(&opts),
    }
}
