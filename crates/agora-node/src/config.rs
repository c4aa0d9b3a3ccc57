//! Node configuration loaded from environment variables.
//!
//! Every setting has a default so a node starts with zero configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use agora_shared::constants::{DEFAULT_HTTP_PORT, DEFAULT_QUIC_PORT};

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Socket address of the HTTP API.
    /// Env: `AGORA_HTTP_ADDR`
    pub http_addr: SocketAddr,

    /// QUIC port of the replicating swarm.
    /// Env: `AGORA_LISTEN_PORT`
    pub listen_port: u16,

    /// QUIC port of the circuit relay. `0` disables the relay.
    /// Env: `AGORA_RELAY_PORT`
    pub relay_port: u16,

    /// Graph journal location. `None` uses the platform data directory.
    /// Env: `AGORA_JOURNAL`
    pub journal_path: Option<PathBuf>,

    /// File listing bootstrap peers, one multiaddr per line.
    /// Env: `AGORA_SEED_FILE`
    pub seed_file: Option<PathBuf>,

    /// How long `/graph` waits for a value before answering 404.
    /// Env: `AGORA_READ_TIMEOUT_MS`
    pub read_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            listen_port: DEFAULT_QUIC_PORT,
            relay_port: DEFAULT_QUIC_PORT + 1,
            journal_path: None,
            seed_file: None,
            read_timeout: Duration::from_millis(250),
        }
    }
}

fn parsed<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "Invalid value, using default");
            None
        }
    }
}

impl NodeConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(addr) = parsed::<SocketAddr>("AGORA_HTTP_ADDR") {
            config.http_addr = addr;
        }
        if let Some(port) = parsed::<u16>("AGORA_LISTEN_PORT") {
            config.listen_port = port;
        }
        if let Some(port) = parsed::<u16>("AGORA_RELAY_PORT") {
            config.relay_port = port;
        }
        if let Ok(path) = std::env::var("AGORA_JOURNAL") {
            config.journal_path = Some(PathBuf::from(path));
        }
        if let Ok(path) = std::env::var("AGORA_SEED_FILE") {
            config.seed_file = Some(PathBuf::from(path));
        }
        if let Some(ms) = parsed::<u64>("AGORA_READ_TIMEOUT_MS") {
            config.read_timeout = Duration::from_millis(ms);
        }

        config
    }

    pub fn relay_enabled(&self) -> bool {
        self.relay_port != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_well_known_ports() {
        let config = NodeConfig::default();
        assert_eq!(config.http_addr.port(), DEFAULT_HTTP_PORT);
        assert_eq!(config.listen_port, DEFAULT_QUIC_PORT);
        assert_ne!(config.relay_port, config.listen_port);
        assert!(config.relay_enabled());
        assert!(config.journal_path.is_none());
    }

    #[test]
    fn env_overrides_and_rejects_garbage() {
        std::env::set_var("AGORA_HTTP_ADDR", "127.0.0.1:9000");
        std::env::set_var("AGORA_RELAY_PORT", "0");
        std::env::set_var("AGORA_LISTEN_PORT", "not-a-port");

        let config = NodeConfig::from_env();
        assert_eq!(config.http_addr, "127.0.0.1:9000".parse().unwrap());
        assert!(!config.relay_enabled());
        assert_eq!(config.listen_port, DEFAULT_QUIC_PORT);

        std::env::remove_var("AGORA_HTTP_ADDR");
        std::env::remove_var("AGORA_RELAY_PORT");
        std::env::remove_var("AGORA_LISTEN_PORT");
    }
}
