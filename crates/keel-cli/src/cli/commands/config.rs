//! Config inspection commands.

use anyhow::{Context, Result};
use keel_core::config::{KeelConfig, paths};

pub fn path() -> Result<()> {
    println!("{}", paths::config_path().display());
    Ok(())
}

pub fn show(config: &KeelConfig) -> Result<()> {
    print!(
        "{}",
        toml::to_string_pretty(config).context("render effective config")?
    );
    Ok(())
}
