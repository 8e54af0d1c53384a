use std::fs;
use std::path::PathBuf;

use indexmap::IndexMap;
use serde::Deserialize;
use thiserror::Error;

pub use self::server::Server;
use crate::environment;

pub mod server;

/// Everything read from `config.toml`. The file is never written back.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub servers: IndexMap<String, Server>,
}

impl Config {
    pub fn config_dir() -> PathBuf {
        environment::config_dir()
    }

    pub fn path() -> PathBuf {
        Self::config_dir().join(environment::CONFIG_FILE_NAME)
    }

    pub fn load() -> Result<Self, Error> {
        let path = Self::path();
        let content = fs::read_to_string(&path)
            .map_err(|e| Error::Read(format!("{}: {e}", path.display())))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, Error> {
        let config: Config = toml::from_str(content).map_err(|e| Error::Parse(e.to_string()))?;

        for (name, server) in &config.servers {
            server.validate().map_err(|reason| Error::Invalid {
                server: name.clone(),
                reason,
            })?;
        }

        Ok(config)
    }
}

#[derive(Debug, Error, Clone)]
pub enum Error {
    #[error("config could not be read: {0}")]
    Read(String),
    #[error("{0}")]
    Io(String),
    #[error("{0}")]
    Parse(String),
    #[error("server {server}: {reason}")]
    Invalid { server: String, reason: String },
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}
