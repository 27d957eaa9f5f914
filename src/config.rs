use anyhow::{Context, Result};
use ipnet::IpNet;
use serde::Deserialize;
use std::{fs, io, path::Path, time::Duration};
use tracing::warn;

use crate::auth::Identifier;
use crate::security::parse_allowlist;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_IP: &str = "0.0.0.0";
pub const DEFAULT_UUID: &str = "00000000-0000-0000-0000-000000000000";
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen: ListenConfig,
    pub tunnel: TunnelConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    pub ip: String,
    pub port: u16,
    pub allowed_proxy_ips: Option<Vec<String>>,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            ip: DEFAULT_IP.to_string(),
            port: DEFAULT_PORT,
            allowed_proxy_ips: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    pub uuid: Option<String>,
    pub buffer_size: usize,
    pub idle_timeout_secs: Option<u64>,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            uuid: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
            idle_timeout_secs: None,
        }
    }
}

/// Validated settings shared read-only by every session.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub identifier: Identifier,
    pub buffer_size: usize,
    pub idle_timeout: Option<Duration>,
    pub allowed_proxy_ips: Option<Vec<IpNet>>,
}

impl GatewayConfig {
    #[must_use]
    pub fn new(identifier: Identifier) -> Self {
        Self {
            identifier,
            buffer_size: DEFAULT_BUFFER_SIZE,
            idle_timeout: None,
            allowed_proxy_ips: None,
        }
    }
}

impl Config {
    /// Applies `PORT` and `UUID` from a variable lookup on top of the file values.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT").filter(|p| !p.is_empty()) {
            self.listen.port = port
                .parse()
                .with_context(|| format!("PORT is not a valid port number: {port}"))?;
        }
        if let Some(uuid) = lookup("UUID").filter(|u| !u.is_empty()) {
            self.tunnel.uuid = Some(uuid);
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen.ip, self.listen.port)
    }

    pub fn gateway(&self) -> Result<GatewayConfig> {
        let uuid = match self.tunnel.uuid.as_deref() {
            Some(uuid) => uuid,
            None => {
                warn!("No UUID configured, using the default identifier");
                DEFAULT_UUID
            }
        };
        let identifier = Identifier::parse(uuid).context("Invalid tunnel UUID")?;

        let allowed_proxy_ips = self
            .listen
            .allowed_proxy_ips
            .as_deref()
            .map(parse_allowlist)
            .transpose()?;

        Ok(GatewayConfig {
            identifier,
            buffer_size: self.tunnel.buffer_size.max(1),
            idle_timeout: self
                .tunnel
                .idle_timeout_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            allowed_proxy_ips,
        })
    }
}

/// Reads `path` if it exists; a missing file yields the defaults.
pub fn load_config_file(path: &Path) -> Result<Config> {
    match fs::read_to_string(path) {
        Ok(content) => toml::from_str(&content)
            .with_context(|| format!("Failed to parse {} as valid TOML", path.display())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Config::default()),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

/// Loads `config.toml` from the working directory, then the environment.
pub fn load_config() -> Result<Config> {
    let mut config = load_config_file(Path::new("config.toml"))?;
    config.apply_env(|key| std::env::var(key).ok())?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const UUID: &str = "d342d11e-d424-4583-b36e-524ab1f0afa4";

    #[test]
    fn defaults_without_file_or_env() {
        let config = Config::default();
        assert_eq!(config.listen_addr(), "0.0.0.0:8080");
        let gateway = config.gateway().unwrap();
        assert_eq!(gateway.identifier, Identifier::from_bytes([0; 16]));
        assert_eq!(gateway.buffer_size, DEFAULT_BUFFER_SIZE);
        assert!(gateway.idle_timeout.is_none());
        assert!(gateway.allowed_proxy_ips.is_none());
    }

    #[test]
    fn parses_full_file() {
        let config: Config = toml::from_str(&format!(
            r#"
            [listen]
            ip = "127.0.0.1"
            port = 9000
            allowed_proxy_ips = ["10.0.0.0/8", "127.0.0.1"]

            [tunnel]
            uuid = "{UUID}"
            buffer_size = 16384
            idle_timeout_secs = 60
            "#
        ))
        .unwrap();
        assert_eq!(config.listen_addr(), "127.0.0.1:9000");

        let gateway = config.gateway().unwrap();
        assert_eq!(gateway.identifier, Identifier::parse(UUID).unwrap());
        assert_eq!(gateway.buffer_size, 16384);
        assert_eq!(gateway.idle_timeout, Some(Duration::from_secs(60)));
        assert_eq!(gateway.allowed_proxy_ips.map(|l| l.len()), Some(2));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config: Config = toml::from_str("[listen]\nport = 1234\n").unwrap();
        assert_eq!(config.listen.ip, DEFAULT_IP);
        assert_eq!(config.listen.port, 1234);
        assert_eq!(config.tunnel.buffer_size, DEFAULT_BUFFER_SIZE);
    }

    #[test]
    fn env_overrides_file() {
        let env: HashMap<&str, String> =
            HashMap::from([("PORT", "3000".to_string()), ("UUID", UUID.to_string())]);
        let mut config = Config::default();
        config
            .apply_env(|key| env.get(key).cloned())
            .unwrap();
        assert_eq!(config.listen.port, 3000);
        assert_eq!(config.tunnel.uuid.as_deref(), Some(UUID));
    }

    #[test]
    fn empty_env_values_are_ignored() {
        let mut config = Config::default();
        config.apply_env(|_| Some(String::new())).unwrap();
        assert_eq!(config.listen.port, DEFAULT_PORT);
        assert!(config.tunnel.uuid.is_none());
    }

    #[test]
    fn bad_port_is_an_error() {
        let mut config = Config::default();
        assert!(config.apply_env(|_| Some("eighty".to_string())).is_err());
    }

    #[test]
    fn short_uuid_is_an_error() {
        let mut config = Config::default();
        config.tunnel.uuid = Some("123456".to_string());
        assert!(config.gateway().is_err());
    }

    #[test]
    fn invalid_allowlist_is_an_error() {
        let mut config = Config::default();
        config.listen.allowed_proxy_ips = Some(vec!["nope".to_string()]);
        assert!(config.gateway().is_err());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = load_config_file(Path::new("does-not-exist/config.toml")).unwrap();
        assert_eq!(config.listen.port, DEFAULT_PORT);
    }
}
