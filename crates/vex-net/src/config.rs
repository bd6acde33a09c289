//! Connector tuning and connection targets.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use vex_shared::constants::{
    DEFAULT_HOST, DEFAULT_PORT, HANDSHAKE_TIMEOUT, HEARTBEAT_INTERVAL, HEARTBEAT_MISS_THRESHOLD,
    HISTORY_REPLAY_LIMIT, HISTORY_TIMEOUT, RECONNECT_DELAY, SOCKET_PATH,
};

use crate::error::ConnectorError;

/// Timers and limits for one connector and the session driving it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorConfig {
    /// Watchdog over the network phases of the handshake.
    pub handshake_timeout: Duration,
    pub heartbeat_interval: Duration,
    /// Consecutive unanswered pings before the server is declared unresponsive.
    pub heartbeat_miss_threshold: u32,
    /// Bound on waiting for the reply to a history request.
    pub history_timeout: Duration,
    /// Cached messages replayed on join.
    pub history_replay_limit: u32,
    /// Bound on waiting for correlated replies such as user lookups.
    pub request_timeout: Duration,
    /// Flat delay between reconnect attempts.
    pub reconnect_delay: Duration,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: HANDSHAKE_TIMEOUT,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            heartbeat_miss_threshold: HEARTBEAT_MISS_THRESHOLD,
            history_timeout: HISTORY_TIMEOUT,
            history_replay_limit: HISTORY_REPLAY_LIMIT,
            request_timeout: HISTORY_TIMEOUT,
            reconnect_delay: RECONNECT_DELAY,
        }
    }
}

/// Where to connect: `host[:port]`, plus whether TLS is skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
    /// Plain `ws://` for local development servers.
    pub insecure: bool,
}

impl Target {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            insecure: false,
        }
    }

    pub fn insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    /// Websocket URL. Secure targets go through the default TLS port.
    pub fn url(&self) -> String {
        if self.insecure {
            format!("ws://{}:{}{}", self.host, self.port, SOCKET_PATH)
        } else {
            format!("wss://{}{}", self.host, SOCKET_PATH)
        }
    }
}

impl Default for Target {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

impl FromStr for Target {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (host, port) = match s.split_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| ConnectorError::InvalidTarget(format!("bad port in {s:?}")))?;
                (host, port)
            }
            None => (s, DEFAULT_PORT),
        };

        if host.contains('/') {
            return Err(ConnectorError::InvalidTarget(format!(
                "expected host[:port], got {s:?}"
            )));
        }

        let host = if host.is_empty() { DEFAULT_HOST } else { host };
        Ok(Self::new(host, port))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
