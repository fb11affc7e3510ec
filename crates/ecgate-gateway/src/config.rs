//! Gateway configuration types.
//!
//! The configuration is read from the JSON file named by `ECGATE_CONFIG`, when
//! set, and `LISTEN_ADDR` / `DATA_DIR` override the corresponding fields.

use std::path::PathBuf;
use std::time::Duration;

use ecgate_control::ControlConfig;
use ecgate_store::{Destination, Mover};
use serde::Deserialize;

use crate::error::{GatewayError, Result};

/// Configuration for the gateway service.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Listen address (e.g., "0.0.0.0:6640").
    #[serde(default = "GatewayConfig::default_listen_addr")]
    pub listen_addr: String,

    /// RocksDB directory.
    #[serde(default = "GatewayConfig::default_data_dir")]
    pub data_dir: PathBuf,

    /// Idle time after which a silent session is closed, in seconds.
    #[serde(default = "GatewayConfig::default_socket_timeout")]
    pub socket_timeout_seconds: u64,

    /// Interval of the mover cache refresh, in seconds.
    #[serde(default = "GatewayConfig::default_mover_refresh")]
    pub mover_refresh_seconds: u64,

    /// Coordinator settings.
    #[serde(default)]
    pub control: ControlConfig,

    /// Destinations written to the store at startup.
    #[serde(default)]
    pub destinations: Vec<Destination>,

    /// Movers written to the store at startup.
    #[serde(default)]
    pub movers: Vec<Mover>,
}

impl GatewayConfig {
    fn default_listen_addr() -> String {
        "0.0.0.0:6640".to_string()
    }

    fn default_data_dir() -> PathBuf {
        PathBuf::from("/data/ecgate")
    }

    const fn default_socket_timeout() -> u64 {
        60
    }

    const fn default_mover_refresh() -> u64 {
        30
    }

    /// Load from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Config` if the configuration file cannot be read
    /// or parsed.
    pub fn from_env() -> Result<Self> {
        Self::load_with(|name| std::env::var(name).ok())
    }

    /// Load using `var` to look up environment variables.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Config` if the configuration file cannot be read
    /// or parsed.
    pub fn load_with(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = match var("ECGATE_CONFIG") {
            Some(path) => {
                let text = std::fs::read_to_string(&path)
                    .map_err(|e| GatewayError::Config(format!("{path}: {e}")))?;
                serde_json::from_str(&text).map_err(|e| GatewayError::Config(format!("{path}: {e}")))?
            }
            None => Self::default(),
        };
        if let Some(listen_addr) = var("LISTEN_ADDR") {
            config.listen_addr = listen_addr;
        }
        if let Some(data_dir) = var("DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }
        Ok(config)
    }

    /// Get the session idle timeout as a `Duration`.
    #[must_use]
    pub fn socket_timeout(&self) -> Duration {
        Duration::from_secs(self.socket_timeout_seconds)
    }

    /// Get the mover refresh interval as a `Duration`.
    #[must_use]
    pub fn mover_refresh(&self) -> Duration {
        Duration::from_secs(self.mover_refresh_seconds.max(1))
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: Self::default_listen_addr(),
            data_dir: Self::default_data_dir(),
            socket_timeout_seconds: Self::default_socket_timeout(),
            mover_refresh_seconds: Self::default_mover_refresh(),
            control: ControlConfig::default(),
            destinations: Vec::new(),
            movers: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.listen_addr, "0.0.0.0:6640");
        assert_eq!(config.socket_timeout(), Duration::from_secs(60));
        assert_eq!(config.mover_refresh(), Duration::from_secs(30));
        assert!(config.control.check_port);
        assert!(config.destinations.is_empty());
    }

    #[test]
    fn file_then_environment() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("gateway.json");
        std::fs::write(
            &path,
            r#"{
                "listen_addr": "127.0.0.1:7000",
                "socket_timeout_seconds": 5,
                "control": {"check_port": false},
                "destinations": [{"name": "dest"}],
                "movers": [{"name": "m1", "host": "10.0.0.1", "port": 9000}]
            }"#,
        )
        .unwrap();
        let env: HashMap<&str, String> = [
            ("ECGATE_CONFIG", path.display().to_string()),
            ("DATA_DIR", "/tmp/ecgate".to_string()),
        ]
        .into_iter()
        .collect();

        let config = GatewayConfig::load_with(|name| env.get(name).cloned()).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:7000");
        assert_eq!(config.data_dir, PathBuf::from("/tmp/ecgate"));
        assert_eq!(config.socket_timeout_seconds, 5);
        assert!(!config.control.check_port);
        assert_eq!(config.destinations[0].name, "dest");
        assert_eq!(config.destinations[0].transfer_group, "default");
        assert!(config.movers[0].active);
    }

    #[test]
    fn unreadable_file() {
        let err = GatewayConfig::load_with(|name| {
            (name == "ECGATE_CONFIG").then(|| "/nonexistent/ecgate.json".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().starts_with("invalid configuration: /nonexistent/ecgate.json"));
    }
}
