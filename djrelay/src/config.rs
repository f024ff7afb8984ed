//! Relay configuration
//!
//! Loaded from a TOML file (see [`djrelay_common::config`] for path resolution)
//! with every section optional. Missing keys take the compiled defaults below.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub player: PlayerConfig,
    pub pump: PumpConfig,
    pub listeners: ListenerConfig,
    pub broadcast: BroadcastConfig,
    pub api: ApiConfig,
    pub library: LibraryConfig,
}

impl RelayConfig {
    /// Load and validate a config file, or return defaults when `path` is `None`
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config: RelayConfig = match path {
            Some(path) => djrelay_common::config::load_toml(path)?,
            None => RelayConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the relay cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.pump.frame_len() == 0 {
            return Err(Error::Config("pump frame length must be non-zero".to_string()));
        }
        if self.pump.frame_ms == 0 {
            return Err(Error::Config("pump.frame_ms must be non-zero".to_string()));
        }
        if !(self.player.skip_ratio > 0.0 && self.player.skip_ratio <= 1.0) {
            return Err(Error::Config(format!(
                "player.skip_ratio must be in (0, 1], got {}",
                self.player.skip_ratio
            )));
        }
        if self.player.content_retries == 0 {
            return Err(Error::Config("player.content_retries must be at least 1".to_string()));
        }
        if self.player.volume_percent > 200 {
            return Err(Error::Config(format!(
                "player.volume_percent must be 0-200, got {}",
                self.player.volume_percent
            )));
        }
        if self.player.decoder_command.is_empty() {
            return Err(Error::Config("player.decoder_command is empty".to_string()));
        }
        if self.broadcast.enabled && self.broadcast.encoder_command.is_empty() {
            return Err(Error::Config("broadcast.encoder_command is empty".to_string()));
        }
        if self.broadcast.block_size == 0 {
            return Err(Error::Config("broadcast.block_size must be non-zero".to_string()));
        }
        if !(self.library.hype_skip_ratio >= 0.0 && self.library.hype_skip_ratio.is_finite()) {
            return Err(Error::Config(format!(
                "library.hype_skip_ratio must be a non-negative number, got {}",
                self.library.hype_skip_ratio
            )));
        }
        if self.library.credit_renew_secs == 0 {
            return Err(Error::Config("library.credit_renew_secs must be non-zero".to_string()));
        }
        for (name, policy) in [
            ("contributor", &self.listeners.contributor_timeout),
            ("direct", &self.listeners.direct_timeout),
            ("token", &self.listeners.token_timeout),
        ] {
            if let Some(notify) = policy.notify_secs {
                if notify >= policy.remove_secs {
                    return Err(Error::Config(format!(
                        "listeners.{}_timeout: notify_secs must be below remove_secs",
                        name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Mode the player enters at startup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitialState {
    #[default]
    Stopped,
    Playing,
}

/// `[player]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub initial_state: InitialState,
    /// Fraction of listeners whose skip votes end the current item (inclusive)
    pub skip_ratio: f64,
    pub cooldown_secs: u64,
    /// Attempts per contributor before they are dropped from the rotation
    pub content_retries: u32,
    /// Decoder argv; `{input}` is replaced by the item locator
    pub decoder_command: Vec<String>,
    pub volume_percent: u32,
    /// Upper bound on waiting for the pump to acknowledge a flush
    pub cleanup_timeout_ms: u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            initial_state: InitialState::Stopped,
            skip_ratio: 0.5,
            cooldown_secs: 15,
            content_retries: 3,
            decoder_command: [
                "ffmpeg", "-loglevel", "error", "-i", "{input}", "-vn", "-f", "s16le", "-ar", "48000", "-ac", "2",
                "-",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            volume_percent: 100,
            cleanup_timeout_ms: 2000,
        }
    }
}

impl PlayerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn cleanup_timeout(&self) -> Duration {
        Duration::from_millis(self.cleanup_timeout_ms)
    }
}

/// `[pump]` section, describes the raw PCM format
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PumpConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_ms: u32,
    /// Decoded chunks buffered between the decoder feeder and the pump
    pub input_frames: usize,
    /// Silent period after the input reports it is not ready
    pub backoff_ms: u64,
    /// Frames buffered per sink before writes are dropped
    pub sink_queue_frames: usize,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            frame_ms: 20,
            input_frames: 50,
            backoff_ms: 1000,
            sink_queue_frames: 25,
        }
    }
}

impl PumpConfig {
    /// Bytes per frame of interleaved s16le samples
    pub fn frame_len(&self) -> usize {
        self.sample_rate as usize * self.channels as usize * 2 * self.frame_ms as usize / 1000
    }

    pub fn period(&self) -> Duration {
        Duration::from_millis(self.frame_ms as u64)
    }

    /// Backoff expressed in whole ticks
    pub fn backoff_ticks(&self) -> u32 {
        if self.frame_ms == 0 {
            return 0;
        }
        (self.backoff_ms / self.frame_ms as u64) as u32
    }
}

/// Notify-then-remove thresholds, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    pub notify_secs: Option<u64>,
    pub remove_secs: u64,
}

/// `[listeners]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    pub contributor_timeout: TimeoutConfig,
    pub direct_timeout: TimeoutConfig,
    pub token_timeout: TimeoutConfig,
    pub sweep_interval_secs: u64,
    /// Accept a token whose owner is currently in the voice channel
    pub allow_voice_token_claims: bool,
    pub update_capacity: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            contributor_timeout: TimeoutConfig { notify_secs: Some(600), remove_secs: 900 },
            direct_timeout: TimeoutConfig { notify_secs: Some(3600), remove_secs: 3900 },
            token_timeout: TimeoutConfig { notify_secs: None, remove_secs: 300 },
            sweep_interval_secs: 20,
            allow_voice_token_claims: false,
            update_capacity: 64,
        }
    }
}

/// `[broadcast]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    pub enabled: bool,
    pub bind: String,
    pub path: String,
    /// Externally reachable base URL, used in playlist descriptors
    pub public_url: String,
    pub name: String,
    pub description: String,
    pub genre: String,
    pub url: String,
    pub bitrate_kbps: u32,
    pub content_type: String,
    /// Encoded bytes between metadata blocks (`icy-metaint`)
    pub block_size: usize,
    /// Byte budget for the stream title before escaping
    pub title_budget: usize,
    /// A connection whose queue stays full this long is evicted
    pub send_timeout_ms: u64,
    /// Payloads buffered per connection before data is dropped for it
    pub connection_queue: usize,
    pub sweep_interval_ms: u64,
    /// Encoder argv, reads PCM on stdin and writes the encoded stream to stdout
    pub encoder_command: Vec<String>,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "0.0.0.0:8000".to_string(),
            path: "/stream".to_string(),
            public_url: "http://localhost:8000".to_string(),
            name: "djrelay".to_string(),
            description: String::new(),
            genre: String::new(),
            url: String::new(),
            bitrate_kbps: 128,
            content_type: "audio/aac".to_string(),
            block_size: 8192,
            title_budget: 256,
            send_timeout_ms: 5000,
            connection_queue: 64,
            sweep_interval_ms: 1000,
            encoder_command: [
                "ffmpeg", "-loglevel", "error", "-f", "s16le", "-ar", "48000", "-ac", "2", "-i", "-", "-c:a", "aac",
                "-b:a", "128k", "-f", "adts", "-",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl BroadcastConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Streaming URL with the token placeholder filled in
    pub fn stream_url(&self, token: &str) -> String {
        format!("{}{}?token={}", self.public_url.trim_end_matches('/'), self.path, token)
    }
}

/// `[api]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { bind: "127.0.0.1:8100".to_string() }
    }
}

/// `[library]` section, seeds the in-memory content provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Minimum time between two plays of the same item
    pub protection_secs: u64,
    /// Minimum accumulated hypes for background selection
    pub hype_threshold: u64,
    /// Background items need `skip_votes * ratio <= hypes`
    pub hype_skip_ratio: f64,
    pub max_duration_secs: u64,
    /// Initial play credits of an item, also the renewal cap
    pub default_credits: u32,
    /// Every item regains one credit per interval
    pub credit_renew_secs: u64,
    pub items: Vec<LibraryItem>,
    pub playlists: Vec<LibraryPlaylist>,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            protection_secs: 3600,
            hype_threshold: 0,
            hype_skip_ratio: 1.0,
            max_duration_secs: 600,
            default_credits: 3,
            credit_renew_secs: 86400,
            items: Vec::new(),
            playlists: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryItem {
    pub id: u64,
    pub title: String,
    pub duration_secs: u64,
    pub locator: String,
    #[serde(default)]
    pub credits: Option<u32>,
    #[serde(default)]
    pub blacklisted: bool,
    /// Played in place of this item when set
    #[serde(default)]
    pub duplicate_of: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryPlaylist {
    pub contributor: u64,
    pub items: Vec<u64>,
    #[serde(default)]
    pub repeat: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        let config = RelayConfig::default();
        config.validate().unwrap();
        assert_eq!(config.pump.frame_len(), 3840);
        assert_eq!(config.pump.backoff_ticks(), 50);
        assert_eq!(config.player.cooldown(), Duration::from_secs(15));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[player]
skip_ratio = 0.75

[broadcast]
name = "Late Night Relay"

[[library.items]]
id = 7
title = "Intro"
duration_secs = 95
locator = "file:///music/intro.ogg"
"#
        )
        .unwrap();

        let config = RelayConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.player.skip_ratio, 0.75);
        assert_eq!(config.player.content_retries, 3);
        assert_eq!(config.broadcast.name, "Late Night Relay");
        assert_eq!(config.broadcast.path, "/stream");
        assert_eq!(config.library.items.len(), 1);
        assert_eq!(config.library.items[0].credits, None);
    }

    #[test]
    fn test_invalid_skip_ratio_rejected() {
        let mut config = RelayConfig::default();
        config.player.skip_ratio = 0.0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
        config.player.skip_ratio = 1.5;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_library_limits_validated() {
        let mut config = RelayConfig::default();
        config.library.hype_skip_ratio = f64::NAN;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = RelayConfig::default();
        config.library.credit_renew_secs = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_timeout_thresholds_must_be_ordered() {
        let mut config = RelayConfig::default();
        config.listeners.direct_timeout = TimeoutConfig { notify_secs: Some(100), remove_secs: 100 };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_stream_url_formatting() {
        let mut config = BroadcastConfig::default();
        config.public_url = "http://relay.example:8000/".to_string();
        assert_eq!(config.stream_url("abc"), "http://relay.example:8000/stream?token=abc");
    }
}
