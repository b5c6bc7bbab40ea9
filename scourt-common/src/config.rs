//! Service configuration loading
//!
//! Resolution priority for every value:
//! 1. Command-line argument (highest)
//! 2. Environment variable (`SCOURT_SYNC_*`)
//! 3. TOML config file (`scourt-sync/config.toml` in the platform config dir)
//! 4. Compiled default

use crate::{Error, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;

const ENV_DB_PATH: &str = "SCOURT_SYNC_DB";
const ENV_BIND: &str = "SCOURT_SYNC_BIND";
const ENV_SECRET: &str = "SCOURT_SYNC_SECRET";

const DEFAULT_BIND: &str = "127.0.0.1:5840";

/// Static service configuration (runtime sync settings live in the database,
/// see [`crate::settings`]).
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// SQLite database path
    pub database_path: PathBuf,
    /// HTTP bind address
    pub bind_addr: SocketAddr,
    /// Shared secret required on scheduler/worker trigger endpoints
    pub trigger_secret: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    database_path: Option<String>,
    bind_addr: Option<String>,
    trigger_secret: Option<String>,
}

impl ServiceConfig {
    /// Resolve configuration from CLI argument, environment, config file and
    /// defaults, in that order.
    pub fn resolve(cli_db_path: Option<&str>) -> Result<Self> {
        let file = load_config_file().unwrap_or_default();

        let database_path = cli_db_path
            .map(PathBuf::from)
            .or_else(|| std::env::var(ENV_DB_PATH).ok().map(PathBuf::from))
            .or_else(|| file.database_path.as_ref().map(PathBuf::from))
            .unwrap_or_else(default_database_path);

        let bind_raw = std::env::var(ENV_BIND)
            .ok()
            .or_else(|| file.bind_addr.clone())
            .unwrap_or_else(|| DEFAULT_BIND.to_string());

        let bind_addr: SocketAddr = bind_raw
            .parse()
            .map_err(|e| Error::Config(format!("invalid bind address {bind_raw:?}: {e}")))?;

        let trigger_secret = std::env::var(ENV_SECRET).ok().or(file.trigger_secret);

        Ok(Self {
            database_path,
            bind_addr,
            trigger_secret,
        })
    }

    /// In-memory configuration with no trigger secret.
    pub fn for_tests() -> Self {
        Self {
            database_path: PathBuf::from(":memory:"),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            trigger_secret: None,
        }
    }
}

fn config_file_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("scourt-sync").join("config.toml"))
}

fn load_config_file() -> Option<ConfigFile> {
    let path = config_file_path()?;
    let raw = std::fs::read_to_string(&path).ok()?;
    match toml::from_str(&raw) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring unparseable config file");
            None
        }
    }
}

fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("scourt-sync")
        .join("scourt.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_argument_wins() {
        let config = ServiceConfig::resolve(Some("/tmp/override.db")).unwrap();
        assert_eq!(config.database_path, PathBuf::from("/tmp/override.db"));
    }

    #[test]
    fn default_bind_parses() {
        assert!(DEFAULT_BIND.parse::<SocketAddr>().is_ok());
    }
}
