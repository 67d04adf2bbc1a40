use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::db;
use crate::driver::Credentials;
use crate::error::ConfigError;
use crate::registry::Registry;

const DEFAULT_LISTEN: &str = "127.0.0.1:5005";
const DEFAULT_DEVICE_TIMEOUT_MS: u64 = 3000;

/// Daemon configuration loaded from the environment.
///
/// | Env Var             | Default                  |
/// |---------------------|--------------------------|
/// | `PLUGD_LISTEN`      | `127.0.0.1:5005`         |
/// | `PLUGD_DB`          | `~/.plugshare/plugd.db`  |
/// | `PLUGS`             | `{}`                     |
/// | `DEVICE_USERNAME`   | empty                    |
/// | `DEVICE_PASSWORD`   | empty                    |
/// | `DEVICE_TIMEOUT_MS` | `3000`, must be positive  |
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub listen: SocketAddr,
    pub db_path: PathBuf,
    pub registry: Registry,
    pub credentials: Credentials,
    pub device_timeout: Duration,
}

impl DaemonConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let listen_raw = lookup("PLUGD_LISTEN").unwrap_or_else(|| DEFAULT_LISTEN.to_string());
        let listen = listen_raw.parse().map_err(|_| ConfigError::InvalidValue {
            name: "PLUGD_LISTEN",
            value: listen_raw.clone(),
        })?;

        let db_path = lookup("PLUGD_DB")
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(db::default_db_path);

        let registry = match lookup("PLUGS") {
            Some(raw) if !raw.trim().is_empty() => Registry::from_json(&raw)?,
            _ => Registry::default(),
        };

        let credentials = Credentials {
            username: lookup("DEVICE_USERNAME").unwrap_or_default(),
            password: lookup("DEVICE_PASSWORD").unwrap_or_default(),
        };

        let device_timeout = match lookup("DEVICE_TIMEOUT_MS") {
            Some(raw) => {
                let invalid = || ConfigError::InvalidValue {
                    name: "DEVICE_TIMEOUT_MS",
                    value: raw.clone(),
                };
                let ms: u64 = raw.trim().parse().map_err(|_| invalid())?;
                if ms == 0 {
                    return Err(invalid());
                }
                Duration::from_millis(ms)
            }
            None => Duration::from_millis(DEFAULT_DEVICE_TIMEOUT_MS),
        };

        Ok(DaemonConfig {
            listen,
            db_path,
            registry,
            credentials,
            device_timeout,
        })
    }
}
