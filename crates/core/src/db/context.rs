use std::fs;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::db::CheckDb;

/// Convenience wrapper bundling the configuration and an open `CheckDb`.
#[derive(Debug)]
pub struct StoreContext {
    pub config: Config,
    pub db: CheckDb,
}

impl StoreContext {
    /// Open (creating parent directories as needed) the database named by `config`.
    pub fn open(config: Config) -> Result<Self> {
        if let Some(parent) = config.database.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory {}", parent.display())
            })?;
        }
        let db = CheckDb::open(&config.database).with_context(|| {
            format!("Failed to open database at {}", config.database.display())
        })?;
        Ok(Self { config, db })
    }
}
