use anyhow::Result;
use fh_config::{RunnerConfig, validate_config};

use crate::cli::OutputFormat;

pub(crate) fn handle_config_show(config: &RunnerConfig, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
        OutputFormat::Text => print!("{}", config.to_toml()?),
    }
    Ok(())
}

pub(crate) fn handle_config_validate(config: &RunnerConfig) -> Result<()> {
    validate_config(config)?;
    eprintln!("Configuration is valid");
    Ok(())
}

pub(crate) fn handle_config_template() {
    print!("{}", RunnerConfig::default_template());
}
