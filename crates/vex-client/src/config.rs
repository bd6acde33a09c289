//! Client configuration loaded from environment variables.
//!
//! Every setting has a default, so `vex` with no environment connects to a
//! local development server.

use std::path::PathBuf;
use std::time::Duration;

use uuid::Uuid;

use vex_net::{ConnectorConfig, Target};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server to connect to, `host[:port]`.
    /// Env: `VEX_SERVER`
    /// Default: `localhost:8000`
    pub target: Target,

    /// Channel joined as soon as the server lists it.
    /// Env: `VEX_CHANNEL` (channel UUID)
    /// Default: none
    pub channel: Option<Uuid>,

    /// Directory holding the signing key and the database.
    /// Env: `VEX_DATA_DIR`
    /// Default: the platform data directory.
    pub data_dir: Option<PathBuf>,

    /// Env: `VEX_HEARTBEAT_SECS`
    /// Default: `10`
    pub heartbeat_interval: Duration,

    /// Env: `VEX_RECONNECT_SECS`
    /// Default: `5`
    pub reconnect_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let connector = ConnectorConfig::default();
        Self {
            target: Target::default(),
            channel: None,
            data_dir: None,
            heartbeat_interval: connector.heartbeat_interval,
            reconnect_delay: connector.reconnect_delay,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(server) = var("VEX_SERVER") {
            match server.parse::<Target>() {
                Ok(target) => config.target = target,
                Err(e) => tracing::warn!(value = %server, error = %e, "Invalid VEX_SERVER, using default"),
            }
        }

        // ws:// on the given port instead of wss://
        if let Some(val) = var("VEX_INSECURE") {
            config.target.insecure = val != "false" && val != "0" && !val.is_empty();
        }

        if let Some(channel) = var("VEX_CHANNEL") {
            match Uuid::parse_str(channel.trim()) {
                Ok(id) => config.channel = Some(id),
                Err(_) => tracing::warn!(value = %channel, "Invalid VEX_CHANNEL, not auto-joining"),
            }
        }

        if let Some(path) = var("VEX_DATA_DIR") {
            if !path.is_empty() {
                config.data_dir = Some(PathBuf::from(path));
            }
        }

        if let Some(val) = var("VEX_HEARTBEAT_SECS") {
            match parse_secs(&val) {
                Some(interval) => config.heartbeat_interval = interval,
                None => tracing::warn!(value = %val, "Invalid VEX_HEARTBEAT_SECS, using default"),
            }
        }

        if let Some(val) = var("VEX_RECONNECT_SECS") {
            match parse_secs(&val) {
                Some(delay) => config.reconnect_delay = delay,
                None => tracing::warn!(value = %val, "Invalid VEX_RECONNECT_SECS, using default"),
            }
        }

        config
    }

    /// Connector settings with the overrides applied.
    pub fn connector_config(&self) -> ConnectorConfig {
        ConnectorConfig {
            heartbeat_interval: self.heartbeat_interval,
            reconnect_delay: self.reconnect_delay,
            ..ConnectorConfig::default()
        }
    }
}

/// Whole seconds, at least one.
fn parse_secs(val: &str) -> Option<Duration> {
    match val.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Some(Duration::from_secs(secs)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> ClientConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ClientConfig::from_vars(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.target, Target::default());
        assert_eq!(config.target.url(), "wss://localhost/socket");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
        assert!(config.channel.is_none());
    }

    #[test]
    fn test_overrides() {
        let channel = Uuid::new_v4();
        let config = config_from(&[
            ("VEX_SERVER", "chat.example:9000"),
            ("VEX_INSECURE", "1"),
            ("VEX_CHANNEL", &channel.to_string()),
            ("VEX_DATA_DIR", "/tmp/vex"),
            ("VEX_HEARTBEAT_SECS", "30"),
        ]);
        assert_eq!(config.target.url(), "ws://chat.example:9000/socket");
        assert_eq!(config.channel, Some(channel));
        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/vex")));

        let connector = config.connector_config();
        assert_eq!(connector.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(connector.reconnect_delay, Duration::from_secs(5));
        assert_eq!(connector.heartbeat_miss_threshold, 3);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = config_from(&[
            ("VEX_SERVER", "host:notaport"),
            ("VEX_CHANNEL", "general"),
            ("VEX_HEARTBEAT_SECS", "0"),
            ("VEX_RECONNECT_SECS", "soon"),
            ("VEX_INSECURE", "false"),
        ]);
        assert_eq!(config.target, Target::default());
        assert!(config.channel.is_none());
        assert_eq!(config.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
    }
}
