use http_purger::config::{Listener, PurgerSettings};
use http_purger::invalidation::{InvalidationTypes, TypeRule};
use http_purger::{Purgers, ValidationError};
use serde::Deserialize;
use std::fs::File;

#[derive(Deserialize, Debug)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
    #[serde(default = "default_metrics_prefix")]
    pub prefix: String,
}

fn default_metrics_prefix() -> String {
    "purger".into()
}

#[derive(Deserialize, Debug)]
pub struct LoggingConfig {
    pub sentry_dsn: String,
}

#[derive(Deserialize, Debug)]
pub struct CommonConfig {
    pub metrics: Option<MetricsConfig>,
    pub logging: Option<LoggingConfig>,
}

#[derive(Deserialize, Debug)]
pub struct Config {
    #[serde(flatten)]
    pub common: CommonConfig,
    #[serde(default)]
    pub listener: Listener,
    /// Extra invalidation types, or overrides of the built-in ones
    #[serde(default)]
    pub invalidation_types: Vec<TypeRule>,
    pub purgers: Vec<PurgerSettings>,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data = serde_yaml::from_reader(file)?;

        Ok(data)
    }

    /// Validates every purger and creates its dispatcher.
    pub fn build_purgers(&self) -> Result<Purgers, ConfigError> {
        let types = InvalidationTypes::with_overrides(self.invalidation_types.clone())?;
        let purgers = Purgers::try_new(self.purgers.clone(), &types)?;
        if purgers.is_empty() {
            return Err(ConfigError::NoPurgers);
        }
        Ok(purgers)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid purger configuration: {0}")]
    Invalid(#[from] ValidationError),
    #[error("no purgers configured")]
    NoPurgers,
}
