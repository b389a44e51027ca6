//! Config command implementation.

use std::path::Path;

use anyhow::{Context, Result};

use crate::cli::{ConfigAction, OutputFormat};
use crate::config::Config;
use crate::util::print_output;

pub fn cmd_config(action: ConfigAction, path: &Path, config: &Config, format: OutputFormat) -> Result<()> {
    match action {
        ConfigAction::Path => {
            print_output(format, &path, &path.display().to_string())
        }
        ConfigAction::Show => {
            let text = toml::to_string_pretty(config).context("Failed to serialize config")?;
            print_output(format, config, text.trim_end())
        }
    }
}
