//! Capture device abstraction.
//!
//! This module provides a trait-based abstraction over camera hardware,
//! allowing for both real camera input and mock implementations for testing.

use std::time::Duration;
use thiserror::Error;

use super::buffer::{PixelFormat, RawFrameBuffer};
use super::config::{CaptureConfig, QualityPreset};

/// Errors reported by a capture device.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("failed to open device: {0}")]
    OpenFailed(String),
    #[error("device configuration is already locked")]
    ConfigurationLocked,
    #[error("device must be locked for configuration before mutation")]
    NotLockedForConfiguration,
    #[error("invalid frame duration bounds: min {min:?} > max {max:?}")]
    InvalidFrameDuration { min: Duration, max: Duration },
    #[error("unsupported output format {0:?}")]
    UnsupportedFormat(PixelFormat),
    #[error("device is not streaming")]
    NotStreaming,
    #[error("device is busy streaming")]
    Streaming,
    #[error("stream error: {0}")]
    StreamFailed(String),
    #[error("device disconnected")]
    Disconnected,
}

/// Identifies a discovered capture device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Platform index of the device.
    pub index: u32,
    /// Human readable name.
    pub name: String,
}

/// Discovers capture devices and binds them as session inputs.
pub trait DeviceProvider {
    /// Returns the default video-capable device, if any exists.
    fn default_video_device(&self) -> Option<DeviceInfo>;

    /// Opens `device` as a session input.
    fn open_input(
        &self,
        device: &DeviceInfo,
        config: &CaptureConfig,
    ) -> Result<Box<dyn VideoDevice>, DeviceError>;
}

/// Trait for capture device implementations.
///
/// Frame-duration bounds may only be changed between
/// `lock_for_configuration` and `unlock_for_configuration`; use
/// [`DeviceConfiguration`] to get the pairing right.
pub trait VideoDevice: Send {
    /// Device identity.
    fn info(&self) -> &DeviceInfo;

    /// Takes the exclusive configuration lock.
    fn lock_for_configuration(&mut self) -> Result<(), DeviceError>;

    /// Releases the configuration lock.
    fn unlock_for_configuration(&mut self);

    /// Sets minimum and maximum frame durations.
    fn set_frame_duration_bounds(&mut self, min: Duration, max: Duration)
        -> Result<(), DeviceError>;

    /// Selects the output pixel format and resolution preset.
    fn configure_output(
        &mut self,
        format: PixelFormat,
        quality: QualityPreset,
    ) -> Result<(), DeviceError>;

    /// Starts producing frames.
    fn start_streaming(&mut self) -> Result<(), DeviceError>;

    /// Stops producing frames.
    fn stop_streaming(&mut self);

    /// Waits for the next frame.
    ///
    /// Returns `Ok(None)` when no buffer could be produced this tick, for
    /// example because every pool buffer is still held downstream.
    fn next_buffer(&mut self) -> Result<Option<RawFrameBuffer>, DeviceError>;
}

/// Scoped device-configuration lock. Unlocks when dropped.
pub struct DeviceConfiguration<'a> {
    device: &'a mut dyn VideoDevice,
}

impl<'a> DeviceConfiguration<'a> {
    /// Locks `device` for configuration.
    pub fn lock(device: &'a mut dyn VideoDevice) -> Result<Self, DeviceError> {
        device.lock_for_configuration()?;
        tracing::trace!(device = %device.info().name, "Device locked for configuration");
        Ok(Self { device })
    }

    /// Sets frame-duration bounds on the locked device.
    pub fn set_frame_duration_bounds(
        &mut self,
        min: Duration,
        max: Duration,
    ) -> Result<(), DeviceError> {
        self.device.set_frame_duration_bounds(min, max)
    }
}

impl Drop for DeviceConfiguration<'_> {
    fn drop(&mut self) {
        self.device.unlock_for_configuration();
        tracing::trace!(device = %self.device.info().name, "Device configuration unlocked");
    }
}
