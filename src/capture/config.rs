//! Capture session configuration.
//!
//! The session runs a single pinned frame rate and a fixed 32-bit BGRA
//! output format. The configuration is read once when the pipeline is built
//! and is read-only once the session starts.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::buffer::PixelFormat;

/// Highest frame rate accepted by validation.
pub const MAX_FRAME_RATE: u32 = 120;

/// Session quality preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum QualityPreset {
    /// Favor the highest resolution the device offers.
    #[default]
    MaxResolution,
    /// Use the configured `width` x `height` as given.
    Exact,
}

/// Configuration for the capture session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Target frames per second (both frame-duration bounds are pinned to it).
    pub frame_rate: u32,
    /// Frame width in pixels (hint for devices that cannot report one).
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Output pixel format. Only BGRA is produced by the session.
    pub pixel_format: PixelFormat,
    /// Resolution preset.
    pub quality: QualityPreset,
    /// Discard frames that arrive while the sampler is still busy.
    pub drop_late_frames: bool,
    /// Number of raw buffers the device may have in flight.
    pub buffer_pool_size: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            frame_rate: 10,
            width: 640,
            height: 480,
            pixel_format: PixelFormat::Bgra8,
            quality: QualityPreset::MaxResolution,
            drop_late_frames: true,
            buffer_pool_size: 4,
        }
    }
}

impl CaptureConfig {
    /// Creates a configuration with the given frame rate.
    pub fn with_frame_rate(frame_rate: u32) -> Self {
        Self {
            frame_rate,
            ..Default::default()
        }
    }

    /// Duration of a single frame at the configured rate.
    ///
    /// Callers must validate first; a zero rate yields a one-second frame.
    pub fn frame_duration(&self) -> Duration {
        Duration::from_secs(1) / self.frame_rate.max(1)
    }

    /// Validates the configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::InvalidDimensions);
        }
        if self.frame_rate == 0 || self.frame_rate > MAX_FRAME_RATE {
            return Err(ConfigError::InvalidFrameRate);
        }
        if self.pixel_format != PixelFormat::Bgra8 {
            return Err(ConfigError::UnsupportedPixelFormat(self.pixel_format));
        }
        if self.buffer_pool_size == 0 {
            return Err(ConfigError::EmptyBufferPool);
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid frame dimensions")]
    InvalidDimensions,
    #[error("invalid frame rate (must be 1-120 fps)")]
    InvalidFrameRate,
    #[error("unsupported session pixel format {0:?}")]
    UnsupportedPixelFormat(PixelFormat),
    #[error("buffer pool must hold at least one buffer")]
    EmptyBufferPool,
    #[error("invalid preview surface size")]
    InvalidPreviewSize,
    #[error("failed to read config file: {0}")]
    FileReadError(String),
    #[error("failed to parse config file: {0}")]
    ParseError(String),
}

/// Host preview surface size in logical units. Cosmetic only.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    /// Surface width.
    pub width: f32,
    /// Surface height.
    pub height: f32,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            width: 400.0,
            height: 300.0,
        }
    }
}

impl PreviewConfig {
    /// Validates the surface size.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.width.is_finite() && self.height.is_finite())
            || self.width <= 0.0
            || self.height <= 0.0
        {
            return Err(ConfigError::InvalidPreviewSize);
        }
        Ok(())
    }
}

/// Output configuration for the demo binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Number of images to collect before exiting (0 runs until Ctrl-C).
    pub frame_count: u32,
    /// Metrics server port (0 to disable).
    pub metrics_port: u16,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            frame_count: 50,
            metrics_port: 0,
        }
    }
}

/// Full configuration file format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    /// Capture session settings.
    #[serde(default)]
    pub capture: CaptureConfig,
    /// Preview surface settings.
    #[serde(default)]
    pub preview: PreviewConfig,
    /// Demo binary settings.
    #[serde(default)]
    pub output: OutputConfig,
}

impl FileConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: FileConfig =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.capture.validate()?;
        config.preview.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = CaptureConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.frame_rate, 10);
        assert!(config.drop_late_frames);
    }

    #[test]
    fn test_zero_frame_rate_invalid() {
        let config = CaptureConfig::with_frame_rate(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidFrameRate)
        ));
    }

    #[test]
    fn test_non_bgra_format_rejected() {
        let config = CaptureConfig {
            pixel_format: PixelFormat::Rgba8,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnsupportedPixelFormat(PixelFormat::Rgba8))
        ));
    }

    #[test]
    fn test_frame_duration() {
        let config = CaptureConfig::with_frame_rate(10);
        assert_eq!(config.frame_duration(), Duration::from_millis(100));
    }

    #[test]
    fn test_parse_toml() {
        let config = FileConfig::from_toml(
            r#"
            [capture]
            frame_rate = 25
            pixel_format = "bgra8"
            quality = "exact"

            [preview]
            width = 320.0
            height = 240.0

            [output]
            frame_count = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.capture.frame_rate, 25);
        assert_eq!(config.capture.quality, QualityPreset::Exact);
        assert_eq!(config.capture.width, 640);
        assert_eq!(config.preview.width, 320.0);
        assert_eq!(config.output.frame_count, 0);
    }

    #[test]
    fn test_parse_rejects_invalid_rate() {
        let result = FileConfig::from_toml("[capture]\nframe_rate = 500\n");
        assert!(matches!(result, Err(ConfigError::InvalidFrameRate)));
    }

    #[test]
    fn test_preview_size_validation() {
        let preview = PreviewConfig {
            width: 0.0,
            height: 10.0,
        };
        assert!(preview.validate().is_err());
        assert!(PreviewConfig::default().validate().is_ok());
    }
}
