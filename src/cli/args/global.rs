//! Global CLI options shared across all commands

use crate::cli::{Cli, OutputFormat};

/// Global flags, resolved once in `main.rs` and passed to every handler.
///
/// Precedence is CLI flag > environment variable > config file > default;
/// this struct captures the first two layers.
#[derive(Debug, Clone)]
pub struct GlobalOptions {
    /// Output format (table, json)
    pub format: OutputFormat,

    /// Custom config file path (defaults to ~/.stowaway/config.yaml)
    pub config: Option<String>,

    /// Database path override (bypasses storage.path in the config file)
    pub database: Option<String>,

    /// Server base URL override (bypasses server.base_url)
    pub server: Option<String>,
}

impl GlobalOptions {
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            format: cli.format,
            config: cli.config.clone(),
            database: cli.database.clone(),
            server: cli.server.clone(),
        }
    }

    pub fn config_ref(&self) -> Option<&str> {
        self.config.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_from_cli_copies_globals() {
        let cli = Cli::try_parse_from([
            "stowaway",
            "--format",
            "json",
            "--config",
            "/custom/config.yaml",
            "--server",
            "http://localhost:9000",
            "status",
        ])
        .unwrap();
        let opts = GlobalOptions::from_cli(&cli);

        assert_eq!(opts.format, OutputFormat::Json);
        assert_eq!(opts.config_ref(), Some("/custom/config.yaml"));
        assert_eq!(opts.server.as_deref(), Some("http://localhost:9000"));
        assert_eq!(opts.database, None);
    }
}
