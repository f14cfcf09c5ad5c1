use crate::prelude::*;
use crate::{err, err_ctx, fetch, forward, tg, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Prefix of all environment variables read by the bot
pub(crate) const ENV_PREFIX: &str = "SHUTTLEBOT_";

const DEFAULT_CONFIG_PATH: &str = "shuttlebot.yaml";

#[derive(Debug, Error)]
pub(crate) enum ConfigError {
    #[error("Couldn't load config from environment for {target}")]
    Env {
        target: &'static str,
        source: envy::Error,
    },

    #[error("Failed to read config file {path:?}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path:?}")]
    ParseFile {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error(
        "Invalid chat id {value} in forwarding rule `{rule}`, \
        expected a positive magnitude of the group chat id"
    )]
    InvalidChat { rule: String, value: i64 },
}

pub struct Config {
    pub(crate) tg: tg::Config,
    pub(crate) forward: Vec<forward::ForwardRuleConfig>,
    pub(crate) fetch: Option<fetch::Config>,
}

#[derive(Deserialize)]
struct ConfigLocation {
    config: Option<PathBuf>,
}

/// Contents of the YAML config file
#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub(crate) struct FileConfig {
    #[serde(default)]
    pub(crate) forward: Vec<forward::ForwardRuleConfig>,

    /// Absence of this section disables the fetch capability
    pub(crate) fetch: Option<fetch::Config>,
}

impl Config {
    /// Loads the config from the environment and the config file it points to.
    /// Any error here is fatal, we never start with a partially loaded config.
    pub fn load() -> Result<Config> {
        let tg: tg::Config = from_env(ENV_PREFIX).map_err(err_ctx!(ConfigError::Env {
            target: std::any::type_name::<tg::Config>(),
        }))?;

        let location: ConfigLocation =
            from_env(ENV_PREFIX).map_err(err_ctx!(ConfigError::Env {
                target: std::any::type_name::<ConfigLocation>(),
            }))?;

        let path = location
            .config
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

        info!(path = %path.display(), "Loading config file");

        let file = FileConfig::read(&path)?;

        Ok(Self {
            tg,
            forward: file.forward,
            fetch: file.fetch,
        })
    }
}

impl FileConfig {
    fn read(path: &Path) -> Result<Self> {
        let content = fs_err::read_to_string(path).map_err(|source| {
            err!(ConfigError::ReadFile {
                path: path.to_owned(),
                source,
            })
        })?;

        Self::parse(&content).map_err(|source| {
            err!(ConfigError::ParseFile {
                path: path.to_owned(),
                source,
            })
        })
    }

    pub(crate) fn parse(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }
}

pub(crate) fn from_env<T: DeserializeOwned>(prefix: &str) -> Result<T, envy::Error> {
    envy::prefixed(prefix).from_env()
}
