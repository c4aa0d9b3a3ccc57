//! Client configuration loaded from environment variables.
//!
//! Every setting has a default so a client starts with no configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use agora_media::VoiceConfig;
use agora_shared::constants::{DEFAULT_QUIC_PORT, LOOKUP_TIMEOUT_MS, MIN_PASSWORD_LEN};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Bound on reads of other identities' records (epub, profile, server).
    /// Env: `AGORA_LOOKUP_TIMEOUT_MS`
    pub lookup_timeout: Duration,

    /// Bound on reads of records that are usually absent (ban entries,
    /// pending requests, own references).
    /// Env: `AGORA_PROBE_TIMEOUT_MS`
    pub probe_timeout: Duration,

    /// Env: `AGORA_NEGOTIATION_TIMEOUT_SECS`
    pub negotiation_timeout: Duration,

    /// Bound on microphone and screen acquisition.
    /// Env: `AGORA_MEDIA_TIMEOUT_SECS`
    pub media_timeout: Duration,

    /// Env: `AGORA_MIN_PASSWORD_LEN`
    pub min_password_len: usize,

    /// Graph journal location. `None` uses the platform data directory.
    /// Env: `AGORA_JOURNAL`
    pub journal_path: Option<PathBuf>,

    /// QUIC port for replication.
    /// Env: `AGORA_LISTEN_PORT`
    pub listen_port: u16,

    /// File listing seed multiaddrs, one per line.
    /// Env: `AGORA_SEED_FILE`
    pub seed_file: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            lookup_timeout: Duration::from_millis(LOOKUP_TIMEOUT_MS),
            probe_timeout: Duration::from_millis(500),
            negotiation_timeout: Duration::from_secs(10),
            media_timeout: Duration::from_secs(30),
            min_password_len: MIN_PASSWORD_LEN,
            journal_path: None,
            listen_port: DEFAULT_QUIC_PORT,
            seed_file: None,
        }
    }
}

fn parsed<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = name, value = %raw, "Invalid value, using default");
            None
        }
    }
}

impl ClientConfig {
    /// Load configuration from `AGORA_*` variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(ms) = parsed::<u64>("AGORA_LOOKUP_TIMEOUT_MS") {
            config.lookup_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parsed::<u64>("AGORA_PROBE_TIMEOUT_MS") {
            config.probe_timeout = Duration::from_millis(ms);
        }
        if let Some(secs) = parsed::<u64>("AGORA_NEGOTIATION_TIMEOUT_SECS") {
            config.negotiation_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parsed::<u64>("AGORA_MEDIA_TIMEOUT_SECS") {
            config.media_timeout = Duration::from_secs(secs);
        }
        if let Some(len) = parsed::<usize>("AGORA_MIN_PASSWORD_LEN") {
            config.min_password_len = len;
        }
        if let Ok(path) = std::env::var("AGORA_JOURNAL") {
            if !path.is_empty() {
                config.journal_path = Some(PathBuf::from(path));
            }
        }
        if let Some(port) = parsed::<u16>("AGORA_LISTEN_PORT") {
            config.listen_port = port;
        }
        if let Ok(path) = std::env::var("AGORA_SEED_FILE") {
            if !path.is_empty() {
                config.seed_file = Some(PathBuf::from(path));
            }
        }

        config
    }

    pub fn voice_config(&self) -> VoiceConfig {
        VoiceConfig {
            negotiation_timeout: self.negotiation_timeout,
            media_timeout: self.media_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let config = ClientConfig::default();
        assert_eq!(config.lookup_timeout, Duration::from_secs(5));
        assert_eq!(config.min_password_len, 16);
        assert_eq!(config.listen_port, 4001);
        assert!(config.journal_path.is_none());
    }

    #[test]
    fn voice_config_carries_timeouts() {
        let config = ClientConfig {
            negotiation_timeout: Duration::from_secs(3),
            media_timeout: Duration::from_secs(7),
            ..ClientConfig::default()
        };
        let voice = config.voice_config();
        assert_eq!(voice.negotiation_timeout, Duration::from_secs(3));
        assert_eq!(voice.media_timeout, Duration::from_secs(7));
    }
}
