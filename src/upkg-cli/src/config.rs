//! Settings file handling for the upkg CLI

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use upkg::Config;

use crate::cli::Cli;

/// Get the path to the default settings file
pub fn config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("Could not determine config directory")?
        .join("upkg");

    Ok(config_dir.join("config.toml"))
}

/// Load settings from `path`, or the default file; a missing file is empty
pub fn load(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => config_path()?,
    };

    if !path.exists() {
        return Ok(Config::default());
    }

    Ok(Config::load(&path)?)
}

/// Write settings to `path`, or the default file
pub fn save(config: &Config, path: Option<&Path>) -> Result<PathBuf> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => config_path()?,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory at {}", parent.display()))?;
    }

    fs::write(&path, config.to_toml()?)
        .with_context(|| format!("Failed to write config to {}", path.display()))?;

    Ok(path)
}

/// Settings given on the command line
pub fn from_args(cli: &Cli) -> Config {
    Config {
        game: cli.game.clone(),
        aes: cli.aes.clone(),
        ver: cli.ver,
        startup_package: cli.startup.clone(),
        suppress: Vec::new(),
    }
}
