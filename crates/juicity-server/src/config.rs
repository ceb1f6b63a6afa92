//! Configuration management

use std::collections::HashMap;
use std::net::{Ipv6Addr, SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ConfigError;
use crate::server::{ServerOptions, DEFAULT_MAX_INCOMING_STREAMS};

/// Server configuration file.
///
/// JSON by default; a path ending in `.toml` is read as TOML. Unknown keys
/// are ignored so that files shared with other juicity deployments still load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen: String,
    #[serde(default)]
    pub users: HashMap<String, String>,
    #[serde(default)]
    pub certificate: PathBuf,
    #[serde(default)]
    pub private_key: PathBuf,
    #[serde(default)]
    pub congestion_control: String,
    #[serde(default, deserialize_with = "deserialize_fwmark")]
    pub fwmark: u32,
    #[serde(default)]
    pub send_through: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(default = "default_max_incoming_streams")]
    pub max_incoming_streams: u64,
    #[serde(default)]
    pub metrics_listen: Option<SocketAddr>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_incoming_streams() -> u64 {
    DEFAULT_MAX_INCOMING_STREAMS
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: String::new(),
            users: HashMap::new(),
            certificate: PathBuf::from("fullchain.pem"),
            private_key: PathBuf::from("private.key"),
            congestion_control: String::new(),
            fwmark: 0,
            send_through: None,
            log_level: default_log_level(),
            log_file: None,
            max_incoming_streams: default_max_incoming_streams(),
            metrics_listen: None,
        }
    }
}

impl ServerConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        let config = if is_toml {
            Self::from_toml_str(&content)?
        } else {
            Self::from_json_str(&content)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.is_empty() {
            return Err(ConfigError::Invalid("\"listen\" is required".to_string()));
        }
        self.listen_addr()?;

        if self.users.is_empty() {
            return Err(ConfigError::Invalid("\"users\" must not be empty".to_string()));
        }

        if self.max_incoming_streams == 0 {
            return Err(ConfigError::Invalid(
                "max_incoming_streams must be > 0".to_string(),
            ));
        }

        if tracing::Level::from_str(&self.log_level).is_err() {
            return Err(ConfigError::Invalid(format!(
                "unknown log_level: {}",
                self.log_level
            )));
        }

        Ok(())
    }

    /// Resolve `listen` to a socket address. A bare `:port` listens on every
    /// interface.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        if let Some(port) = self.listen.strip_prefix(':') {
            let port = port
                .parse::<u16>()
                .map_err(|e| ConfigError::Invalid(format!("Invalid listen port: {}", e)))?;
            return Ok(SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), port));
        }
        if let Ok(addr) = self.listen.parse::<SocketAddr>() {
            return Ok(addr);
        }
        self.listen
            .to_socket_addrs()
            .map_err(|e| ConfigError::Invalid(format!("Invalid listen address: {}", e)))?
            .next()
            .ok_or_else(|| ConfigError::Invalid(format!("Invalid listen address: {}", self.listen)))
    }

    /// Options consumed by [`crate::Server::new`].
    pub fn server_options(&self) -> ServerOptions {
        ServerOptions {
            users: self.users.clone(),
            certificate: self.certificate.clone(),
            private_key: self.private_key.clone(),
            congestion_control: self.congestion_control.clone(),
            fwmark: self.fwmark,
            send_through: self.send_through.clone().filter(|s| !s.is_empty()),
            max_incoming_streams: self.max_incoming_streams,
        }
    }
}

/// Accept the mark either as a number or as a decimal / `0x` hex string.
fn deserialize_fwmark<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Mark {
        Number(u32),
        Text(String),
    }

    match Mark::deserialize(deserializer)? {
        Mark::Number(n) => Ok(n),
        Mark::Text(s) => parse_fwmark(&s).map_err(serde::de::Error::custom),
    }
}

fn parse_fwmark(s: &str) -> Result<u32, String> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(0);
    }
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse::<u32>(),
    };
    parsed.map_err(|e| format!("invalid fwmark {:?}: {}", s, e))
}
