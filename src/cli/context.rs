//! Command execution context
//!
//! Loads configuration, applies global overrides and opens the engine, so
//! handlers start from a ready [`Engine`].

use std::path::PathBuf;

use stowaway::error::Result;
use stowaway::{Config, Engine};

use crate::cli::{GlobalOptions, OutputFormat};

pub struct CommandContext {
    pub engine: Engine,
    pub format: OutputFormat,
}

impl CommandContext {
    /// Build the context for a command.
    ///
    /// # Errors
    /// Returns error if the config cannot be loaded or the store cannot be opened.
    pub fn new(opts: &GlobalOptions) -> Result<Self> {
        let config = Self::load_config(opts)?;
        let engine = Engine::open(config)?;

        if !engine.status().healthy {
            log::warn!("Object store needs repair; run `stowaway repair`");
        }

        Ok(Self {
            engine,
            format: opts.format,
        })
    }

    /// Config file with CLI/env overrides applied
    pub fn load_config(opts: &GlobalOptions) -> Result<Config> {
        let mut config = Config::load_at(opts.config_ref())?;
        if let Some(ref database) = opts.database {
            config.storage.path = Some(PathBuf::from(database));
        }
        if let Some(ref server) = opts.server {
            config.server.base_url = server.clone();
        }
        config.validate()?;
        Ok(config)
    }
}
