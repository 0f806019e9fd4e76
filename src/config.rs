//! Streamer configuration file
//!
//! TOML, every section optional:
//!
//! ```toml
//! [server]
//! address = "stream.example.net:8000"
//! reconnect_secs = 10
//!
//! [encoder]
//! bitrate = 128000
//! application = "audio"
//! frame_ms = 20.0
//!
//! [status]
//! output_control = "GENERAL,SERVER,OUTPUT"
//!
//! [metadata]
//! title = "Live from the studio"
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::DEFAULT_RECONNECT_SECS;
use crate::error::ConfigError;

/// Complete configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub encoder: OpusConfig,
    pub status: StatusConfig,
    pub metadata: MetadataConfig,
}

impl AppConfig {
    /// Read and validate a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::parse(&text).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                source,
            },
            other => other,
        })?;
        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: "<inline>".to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Per-user config location, e.g. `~/.config/audio-caster/caster.toml`
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "audio-caster")
            .map(|dirs| dirs.config_dir().join("caster.toml"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.address.trim().is_empty() {
            return Err(ConfigError::Invalid("server.address is empty".into()));
        }
        if self.server.reconnect_secs == 0 {
            return Err(ConfigError::Invalid("server.reconnect_secs must be at least 1".into()));
        }
        if self.server.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "server.connect_timeout_ms must be at least 1".into(),
            ));
        }
        self.encoder.validate()
    }
}

/// Streaming server settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// `host:port` of the streaming server
    pub address: String,
    /// Wait after a forced disconnect before reconnecting
    pub reconnect_secs: u64,
    pub connect_timeout_ms: u64,
    pub write_timeout_ms: u64,
}

impl ServerConfig {
    pub fn reconnect_timeout(&self) -> Duration {
        Duration::from_secs(self.reconnect_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8000".to_string(),
            reconnect_secs: DEFAULT_RECONNECT_SECS,
            connect_timeout_ms: 3000,
            write_timeout_ms: 2000,
        }
    }
}

/// Opus application mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpusApplication {
    Voip,
    Audio,
    LowDelay,
}

/// Opus signal type hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpusSignal {
    Auto,
    Voice,
    Music,
}

/// Opus maximum bandwidth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpusBandwidth {
    Narrowband,
    Mediumband,
    Wideband,
    Superwideband,
    Fullband,
}

/// Encoder settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OpusConfig {
    /// Bits per second
    pub bitrate: u32,
    pub vbr: bool,
    /// Constrained VBR (only with `vbr`)
    pub cvbr: bool,
    /// 0-10
    pub complexity: u8,
    /// In-band forward error correction
    pub fec: bool,
    pub packet_loss_perc: u8,
    /// Discontinuous transmission
    pub dtx: bool,
    pub signal: OpusSignal,
    pub max_bandwidth: OpusBandwidth,
    pub application: OpusApplication,
    /// Opus frame length in milliseconds
    pub frame_ms: f32,
}

impl Default for OpusConfig {
    fn default() -> Self {
        Self {
            bitrate: 128_000,
            vbr: true,
            cvbr: true,
            complexity: 10,
            fec: false,
            packet_loss_perc: 0,
            dtx: false,
            signal: OpusSignal::Music,
            max_bandwidth: OpusBandwidth::Fullband,
            application: OpusApplication::Audio,
            frame_ms: 20.0,
        }
    }
}

impl OpusConfig {
    /// Frame lengths Opus accepts
    const FRAME_MS: [f32; 6] = [2.5, 5.0, 10.0, 20.0, 40.0, 60.0];

    /// Samples per channel in one Opus frame of `ms` at `sample_rate`
    pub fn frame_size_from_ms(sample_rate: u32, ms: f32) -> usize {
        (sample_rate as f32 * ms / 1000.0) as usize
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !Self::FRAME_MS.iter().any(|ms| (ms - self.frame_ms).abs() < f32::EPSILON) {
            return Err(ConfigError::Invalid(format!(
                "encoder.frame_ms must be one of {:?}, got {}",
                Self::FRAME_MS,
                self.frame_ms
            )));
        }
        if self.complexity > 10 {
            return Err(ConfigError::Invalid("encoder.complexity must be 0-10".into()));
        }
        if self.packet_loss_perc > 100 {
            return Err(ConfigError::Invalid("encoder.packet_loss_perc must be 0-100".into()));
        }
        Ok(())
    }
}

/// Status callback settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    /// Any of `GENERAL`, `SERVER`, `OUTPUT`; empty enables all
    pub output_control: String,
}

/// Display metadata sent to the server
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    pub title: Option<String>,
}
