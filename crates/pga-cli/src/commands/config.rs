//! Configuration command.

use super::{load_config, GlobalOptions};
use crate::output::{self, OutputFormat};
use anyhow::{Context as _, Result};

/// Print the effective configuration, optionally writing it to the config file.
pub fn show_config(options: &GlobalOptions, save: bool, format: &OutputFormat) -> Result<()> {
    let (paths, config) = load_config(options)?;

    if save {
        config
            .save(&paths)
            .context("failed to save configuration")?;
    }

    match format {
        OutputFormat::Json => output::print_json(&config),
        OutputFormat::Text => {
            output::print_heading("Configuration");
            output::print_row("API URL", &config.api_url);
            output::print_row("Log level", &config.log_level);
            output::print_row("Timeout", &format!("{}s", config.request_timeout_secs));
            output::print_row("File", &paths.config_file().display().to_string());
        }
    }
    if save {
        output::print_success(
            &format!("Saved to {}", paths.config_file().display()),
            format,
        );
    }

    Ok(())
}
