//! Handles settings for the application.
//!
//! Values come, in increasing priority, from the built-in defaults, the
//! optional `config/saldo.toml` file (or the one passed with `--config`),
//! `SALDO_*` environment variables and finally the command line.
use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

const DEFAULT_FILE: &str = "config/saldo";

#[derive(Debug, Deserialize)]
pub struct Settings {
    /// Directory holding the JSON artifacts.
    pub data_dir: PathBuf,
    /// Log level applied to the `saldo` and `engine` targets.
    pub level: String,
}

/// Command line values that take precedence over every other source.
#[derive(Debug, Default)]
pub struct Overrides<'a> {
    pub file: Option<&'a Path>,
    pub data_dir: Option<&'a Path>,
    pub level: Option<&'a str>,
}

impl Settings {
    pub fn new(overrides: &Overrides<'_>) -> Result<Self, ConfigError> {
        let file = match overrides.file {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_FILE).required(false),
        };

        let settings = Config::builder()
            .set_default("data_dir", "saldo_data")?
            .set_default("level", "info")?
            .add_source(file)
            .add_source(Environment::with_prefix("SALDO"))
            .set_override_option(
                "data_dir",
                overrides
                    .data_dir
                    .map(|path| path.to_string_lossy().into_owned()),
            )?
            .set_override_option("level", overrides.level)?
            .build()?;

        settings.try_deserialize()
    }
}
