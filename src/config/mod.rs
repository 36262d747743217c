//! Configuration management for LR MIDI GW
//!
//! Handles loading and parsing of the YAML configuration file. Every section
//! is optional; anything missing takes its default.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::info;

use crate::catalog::Locale;
use crate::midi::devices::PinnedDevice;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub midi: MidiConfig,
    /// UI language tag, e.g. `de` or `zh_TW`
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub profiles: ProfilesConfig,
}

/// Network link to the remote application
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LinkConfig {
    #[serde(default = "default_host")]
    pub host: String,
    /// Port the bridge sends commands to
    #[serde(default = "default_outbound_port")]
    pub outbound_port: u16,
    /// Port the bridge receives updates from
    #[serde(default = "default_inbound_port")]
    pub inbound_port: u16,
    #[serde(default = "default_reconnect_min_ms")]
    pub reconnect_min_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Queued commands older than this are dropped while disconnected
    #[serde(default = "default_max_queue_age_ms")]
    pub max_queue_age_ms: u64,
    #[serde(default = "default_max_queue_len")]
    pub max_queue_len: usize,
    #[serde(default = "default_flush_timeout_ms")]
    pub flush_timeout_ms: u64,
    /// Longest inbound line accepted, in bytes
    #[serde(default = "default_max_line_len")]
    pub max_line_len: usize,
}

impl LinkConfig {
    pub fn reconnect_min(&self) -> Duration {
        Duration::from_millis(self.reconnect_min_ms.max(1))
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms.max(self.reconnect_min_ms).max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn max_queue_age(&self) -> Duration {
        Duration::from_millis(self.max_queue_age_ms)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    /// Linear backoff: `reconnect_min * attempt`, capped at `reconnect_max`
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.reconnect_min()
            .saturating_mul(attempt.max(1))
            .min(self.reconnect_max())
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            outbound_port: default_outbound_port(),
            inbound_port: default_inbound_port(),
            reconnect_min_ms: default_reconnect_min_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            max_queue_age_ms: default_max_queue_age_ms(),
            max_queue_len: default_max_queue_len(),
            flush_timeout_ms: default_flush_timeout_ms(),
            max_line_len: default_max_line_len(),
        }
    }
}

/// MIDI port selection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MidiConfig {
    /// Substring patterns of input ports to open; empty opens every port
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Substring patterns of output ports to open; empty opens every port
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Port patterns pinned to fixed device ids
    #[serde(default)]
    pub pinned: Vec<PinnedDeviceConfig>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl MidiConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(50))
    }

    pub fn pinned_devices(&self) -> Vec<PinnedDevice> {
        self.pinned
            .iter()
            .map(|p| PinnedDevice {
                pattern: p.port.clone(),
                id: p.id,
            })
            .collect()
    }

    pub fn wants_input(&self, name: &str) -> bool {
        self.inputs.is_empty() || self.inputs.iter().any(|p| crate::midi::port_matches(name, p))
    }

    pub fn wants_output(&self, name: &str) -> bool {
        self.outputs.is_empty() || self.outputs.iter().any(|p| crate::midi::port_matches(name, p))
    }
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            outputs: Vec::new(),
            pinned: Vec::new(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// `{ port: "X-Touch", id: 1 }`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PinnedDeviceConfig {
    pub port: String,
    pub id: u16,
}

/// Where profiles live and which one starts active
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProfilesConfig {
    /// Profile directory; relative paths resolve against the data directory
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default = "default_profile")]
    pub default: String,
    /// Reload the active profile when its file changes on disk
    #[serde(default = "default_true")]
    pub watch: bool,
}

impl Default for ProfilesConfig {
    fn default() -> Self {
        Self {
            directory: None,
            default: default_profile(),
            watch: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from a YAML file; a missing file yields defaults
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = match fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))
            }
        };

        Self::parse(&contents)
            .with_context(|| format!("Failed to parse YAML config: {}", path.display()))
    }

    /// Parse configuration from YAML text
    pub fn parse(contents: &str) -> Result<Self> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: AppConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.link.max_line_len < 16 {
            anyhow::bail!("link.max_line_len must be at least 16 bytes");
        }
        if self.link.max_queue_len == 0 {
            anyhow::bail!("link.max_queue_len must be greater than 0");
        }
        if self.link.outbound_port == self.link.inbound_port {
            anyhow::bail!("link.outbound_port and link.inbound_port must differ");
        }
        for pin in &self.midi.pinned {
            if pin.id == 0 || pin.id == u16::MAX {
                anyhow::bail!(
                    "midi.pinned id for '{}' must be between 1 and {}",
                    pin.port,
                    u16::MAX - 1
                );
            }
        }
        Ok(())
    }

    /// Locale from config, falling back to English
    pub fn locale(&self) -> Locale {
        self.locale
            .as_deref()
            .map(Locale::parse_or_default)
            .unwrap_or_default()
    }
}

// Default value functions for serde
fn default_host() -> String { "127.0.0.1".to_string() }
fn default_outbound_port() -> u16 { 58763 }
fn default_inbound_port() -> u16 { 58764 }
fn default_reconnect_min_ms() -> u64 { 250 }
fn default_reconnect_max_ms() -> u64 { 10_000 }
fn default_connect_timeout_ms() -> u64 { 2_000 }
fn default_max_queue_age_ms() -> u64 { 5_000 }
fn default_max_queue_len() -> usize { 1_024 }
fn default_flush_timeout_ms() -> u64 { 500 }
fn default_max_line_len() -> usize { 4_096 }
fn default_poll_interval_ms() -> u64 { 1_000 }
fn default_profile() -> String { "default.yaml".to_string() }
fn default_true() -> bool { true }
