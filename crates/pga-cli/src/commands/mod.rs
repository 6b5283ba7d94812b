//! CLI command implementations.

mod api;
mod auth;
mod config;

pub use api::{get, guard};
pub use config::show_config;
pub use auth::{login, logout, passwd, profile, refresh, register, status, whoami};

use anyhow::{Context as _, Result};
use pga_core::{init_logging, Config, LogConfig, Paths};
use session_engine::SessionManager;
use std::io::{self, Write};
use std::sync::Arc;
use token_store::{create_token_store, MemoryStorage, TokenStore};
use tracing::debug;

/// Options shared by every command.
#[derive(Debug, Clone)]
pub struct GlobalOptions {
    pub log_level: Option<String>,
    pub api_url: Option<String>,
    pub ephemeral: bool,
}

/// Build the session for one CLI run and resolve the stored session.
///
/// Order: config, logging, token store, client, session manager.
pub async fn connect(options: &GlobalOptions) -> Result<Arc<SessionManager>> {
    let (paths, config) = load_config(options)?;

    init_logging(LogConfig {
        service_name: "pga".into(),
        default_level: config.log_level.clone(),
        log_path: Some(paths.log_file()),
        also_stderr: false,
    })?;

    let tokens = if options.ephemeral {
        TokenStore::new(Box::new(MemoryStorage::new()))
    } else {
        create_token_store(&paths)?
    };

    let session = SessionManager::connect(&config, Arc::new(tokens))?;
    let phase = session.initialize().await?;
    debug!(api_url = %config.api_url, phase = %phase, "Session ready");

    Ok(session)
}

/// Configuration from file and environment, with command-line overrides.
fn load_config(options: &GlobalOptions) -> Result<(Paths, Config)> {
    let paths = Paths::new()?;
    let mut config = Config::load(&paths).context("failed to load configuration")?;
    if let Some(api_url) = &options.api_url {
        config.api_url = api_url.clone();
    }
    if let Some(level) = &options.log_level {
        config.log_level = level.clone();
    }
    config.validate()?;
    Ok((paths, config))
}

/// Prompt on stdout and read one trimmed line.
fn prompt(label: &str) -> Result<String> {
    print!("{}: ", label);
    io::stdout().flush()?;
    let mut value = String::new();
    io::stdin().read_line(&mut value)?;
    Ok(value.trim().to_string())
}

/// Use the given value or prompt for it.
fn value_or_prompt(value: Option<String>, label: &str) -> Result<String> {
    match value {
        Some(value) => Ok(value),
        None => prompt(label),
    }
}
