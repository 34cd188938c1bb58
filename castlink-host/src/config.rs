//! Configuration for the host service.

use std::path::Path;

use serde::{Deserialize, Serialize};

use castlink_core::CaptureSettings;
use castlink_core::frame::{MAX_FPS, MIN_FPS};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Network settings.
    pub network: NetworkConfig,
    /// Screen capture settings.
    pub capture: CaptureConfig,
    /// System audio settings.
    pub audio: AudioConfig,
    /// Remote control settings.
    pub remote_control: RemoteControlConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// TCP port to listen on for viewer connections.
    pub listen_port: u16,
}

/// Screen capture configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Target frames per second.
    pub fps: u32,
    /// JPEG quality (1..=100).
    pub quality: u8,
    /// Downsample factor applied to both dimensions (0 < f ≤ 1).
    pub scale: f32,
    /// Screen index to capture (0 = primary).
    pub screen_index: usize,
}

/// System audio configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Capture and broadcast system audio.
    pub enabled: bool,
    /// Capture sample rate in Hz.
    pub sample_rate: u32,
    /// Capture channel count.
    pub channels: u16,
    /// Chunk duration in milliseconds.
    pub chunk_ms: u32,
}

/// Remote control configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteControlConfig {
    /// Whether viewers may enable remote control at all.
    pub allowed: bool,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            capture: CaptureConfig::default(),
            audio: AudioConfig::default(),
            remote_control: RemoteControlConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self { listen_port: 9750 }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            fps: 30,
            quality: 80,
            scale: 1.0,
            screen_index: 0,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_rate: 48_000,
            channels: 2,
            chunk_ms: 16,
        }
    }
}

impl Default for RemoteControlConfig {
    fn default() -> Self {
        Self { allowed: true }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl HostConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Convert capture settings into core [`CaptureSettings`].
    pub fn to_capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            target_fps: self.capture.fps.clamp(MIN_FPS, MAX_FPS),
            jpeg_quality: self.capture.quality.clamp(1, 100),
            downsample: if self.capture.scale > 0.0 && self.capture.scale <= 1.0 {
                self.capture.scale
            } else {
                1.0
            },
            screen_index: self.capture.screen_index,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let cfg = HostConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        assert!(text.contains("listen_port"));
        assert!(text.contains("fps"));
        assert!(text.contains("chunk_ms"));
    }

    #[test]
    fn roundtrip_config() {
        let cfg = HostConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        let parsed: HostConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.network.listen_port, 9750);
        assert_eq!(parsed.capture.fps, 30);
        assert!(parsed.remote_control.allowed);
    }

    #[test]
    fn to_capture_settings_clamps() {
        let mut cfg = HostConfig::default();
        cfg.capture.fps = 1000;
        cfg.capture.scale = 3.0;
        let settings = cfg.to_capture_settings();
        assert_eq!(settings.target_fps, MAX_FPS);
        assert_eq!(settings.downsample, 1.0);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let parsed: HostConfig = toml::from_str("[capture]\nfps = 15\n").unwrap();
        assert_eq!(parsed.capture.fps, 15);
        assert_eq!(parsed.capture.quality, 80);
        assert_eq!(parsed.network.listen_port, 9750);
    }
}
