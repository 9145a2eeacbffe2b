//! Camera input and frame handling.
//!
//! This module owns everything on the device side of the pipeline: the
//! device abstraction and its mock and native backends, the pooled raw
//! buffers frames arrive in, and [`FrameSource`], which runs the capture
//! session and delivers frames to a [`FrameSink`].

mod buffer;
mod config;
mod device;
mod mock;
#[cfg(feature = "camera")]
mod native;
mod pool;
mod source;

pub use buffer::{
    BufferAccessError, FrameLayout, LockError, PixelFormat, PixelLock, PixelStore, RawFrameBuffer,
};
pub use config::{
    CaptureConfig, ConfigError, FileConfig, OutputConfig, PreviewConfig, QualityPreset,
    MAX_FRAME_RATE,
};
pub use device::{DeviceConfiguration, DeviceError, DeviceInfo, DeviceProvider, VideoDevice};
pub use mock::{FrameFault, MockDevice, MockProvider};
#[cfg(feature = "camera")]
pub use native::{NativeDevice, NativeProvider};
pub use pool::{BufferPool, PoolStats, PooledStore};
pub use source::{CaptureError, FrameSink, FrameSource, SourceConnection};
