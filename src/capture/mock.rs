//! Mock capture device that generates synthetic BGRA frames.
//!
//! Frames come from a real [`BufferPool`], are paced to the configured frame
//! duration, and can carry injected faults so the per-frame error paths can
//! be exercised without hardware.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use super::buffer::{FrameLayout, LockError, PixelFormat, PixelStore, RawFrameBuffer};
use super::config::{CaptureConfig, QualityPreset};
use super::device::{DeviceError, DeviceInfo, DeviceProvider, VideoDevice};
use super::pool::{BufferPool, PooledStore};

/// A fault to inject into a generated frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFault {
    /// The frame arrives without addressable pixel memory.
    MissingPixelStore,
    /// Locking the pixel store fails.
    LockFailure,
    /// The store locks fine but reports a stride shorter than a row.
    CorruptStride,
}

/// Mock camera producing a moving gradient.
#[derive(Debug)]
pub struct MockDevice {
    info: DeviceInfo,
    layout: FrameLayout,
    pool: BufferPool,
    frame_duration: Option<Duration>,
    paced: bool,
    config_locked: bool,
    streaming: bool,
    sequence: u64,
    started_at: Option<Instant>,
    next_deadline: Option<Instant>,
    faults: BTreeMap<u64, FrameFault>,
    recurring_fault: Option<(u64, FrameFault)>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    /// Creates a 640x480 mock device with a four-buffer pool.
    pub fn new() -> Self {
        Self {
            info: DeviceInfo {
                index: 0,
                name: "Mock Camera".to_string(),
            },
            layout: FrameLayout::packed(640, 480, PixelFormat::Bgra8),
            pool: BufferPool::new(4),
            frame_duration: None,
            paced: true,
            config_locked: false,
            streaming: false,
            sequence: 0,
            started_at: None,
            next_deadline: None,
            faults: BTreeMap::new(),
            recurring_fault: None,
        }
    }

    /// Sets the frame dimensions.
    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        let padding = self.layout.bytes_per_row - self.layout.width as usize * 4;
        self.layout = FrameLayout::packed(width, height, PixelFormat::Bgra8).with_row_padding(padding);
        self
    }

    /// Pads every row with `padding` extra bytes.
    pub fn with_row_padding(mut self, padding: usize) -> Self {
        self.layout = FrameLayout::packed(self.layout.width, self.layout.height, PixelFormat::Bgra8)
            .with_row_padding(padding);
        self
    }

    /// Replaces the buffer pool with one of `capacity` buffers.
    pub fn with_pool_size(mut self, capacity: usize) -> Self {
        self.pool = BufferPool::new(capacity);
        self
    }

    /// Injects `fault` into the frame with the given sequence number (1-based).
    pub fn with_fault(mut self, sequence: u64, fault: FrameFault) -> Self {
        self.faults.insert(sequence, fault);
        self
    }

    /// Injects `fault` into every `every`-th frame.
    pub fn with_fault_every(mut self, every: u64, fault: FrameFault) -> Self {
        self.recurring_fault = (every > 0).then_some((every, fault));
        self
    }

    /// Produces frames as fast as they are requested instead of in real time.
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }

    /// Handle to the buffer pool, for inspecting lock and release counters.
    pub fn pool(&self) -> BufferPool {
        self.pool.clone()
    }

    /// Current frame layout.
    pub fn layout(&self) -> FrameLayout {
        self.layout
    }

    /// Frame duration set through the configuration lock, if any.
    pub fn frame_duration(&self) -> Option<Duration> {
        self.frame_duration
    }

    fn fault_for(&self, sequence: u64) -> Option<FrameFault> {
        self.faults.get(&sequence).copied().or_else(|| {
            self.recurring_fault
                .filter(|(every, _)| sequence % every == 0)
                .map(|(_, fault)| fault)
        })
    }

    fn wait_for_tick(&mut self) {
        let (Some(duration), true) = (self.frame_duration, self.paced) else {
            return;
        };

        let now = Instant::now();
        let deadline = self.next_deadline.unwrap_or(now);
        if deadline > now {
            std::thread::sleep(deadline - now);
        }
        // Never schedule in the past, so a slow consumer cannot cause a burst.
        self.next_deadline = Some(deadline.max(now) + duration);
    }

    fn fill_gradient(&self, store: &mut PooledStore, sequence: u64) {
        let width = self.layout.width as usize;
        let stride = self.layout.bytes_per_row;
        let shade = (sequence % 256) as u8;

        for (y, row) in store.data_mut().chunks_mut(stride).enumerate() {
            for (x, pixel) in row.chunks_exact_mut(4).take(width).enumerate() {
                pixel[0] = (x % 256) as u8; // B
                pixel[1] = (y % 256) as u8; // G
                pixel[2] = shade; // R
                pixel[3] = 255; // A
            }
        }
    }
}

impl VideoDevice for MockDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn lock_for_configuration(&mut self) -> Result<(), DeviceError> {
        if self.config_locked {
            return Err(DeviceError::ConfigurationLocked);
        }
        self.config_locked = true;
        Ok(())
    }

    fn unlock_for_configuration(&mut self) {
        self.config_locked = false;
    }

    fn set_frame_duration_bounds(
        &mut self,
        min: Duration,
        max: Duration,
    ) -> Result<(), DeviceError> {
        if !self.config_locked {
            return Err(DeviceError::NotLockedForConfiguration);
        }
        if min > max || min.is_zero() {
            return Err(DeviceError::InvalidFrameDuration { min, max });
        }
        self.frame_duration = Some(min);
        self.next_deadline = None;
        Ok(())
    }

    fn configure_output(
        &mut self,
        format: PixelFormat,
        _quality: QualityPreset,
    ) -> Result<(), DeviceError> {
        if self.streaming {
            return Err(DeviceError::Streaming);
        }
        if format != PixelFormat::Bgra8 {
            return Err(DeviceError::UnsupportedFormat(format));
        }
        Ok(())
    }

    fn start_streaming(&mut self) -> Result<(), DeviceError> {
        if !self.streaming {
            self.streaming = true;
            self.started_at = Some(Instant::now());
            self.next_deadline = None;
            tracing::info!(device = %self.info.name, "MockDevice streaming");
        }
        Ok(())
    }

    fn stop_streaming(&mut self) {
        if self.streaming {
            self.streaming = false;
            tracing::info!(device = %self.info.name, frames = self.sequence, "MockDevice stopped");
        }
    }

    fn next_buffer(&mut self) -> Result<Option<RawFrameBuffer>, DeviceError> {
        if !self.streaming {
            return Err(DeviceError::NotStreaming);
        }

        self.wait_for_tick();

        let Some(mut store) = self.pool.acquire(self.layout) else {
            tracing::trace!("Buffer pool exhausted; no frame this tick");
            return Ok(None);
        };

        self.sequence += 1;
        let sequence = self.sequence;
        let presentation_time = self
            .started_at
            .map(|start| start.elapsed())
            .unwrap_or_default();

        self.fill_gradient(&mut store, sequence);

        let buffer = match self.fault_for(sequence) {
            None => RawFrameBuffer::new(Box::new(store), sequence, presentation_time),
            Some(FrameFault::MissingPixelStore) => {
                RawFrameBuffer::without_store(sequence, presentation_time)
            }
            Some(fault) => RawFrameBuffer::new(
                Box::new(FaultyStore { inner: store, fault }),
                sequence,
                presentation_time,
            ),
        };

        Ok(Some(buffer))
    }
}

/// Pool store wrapper that misbehaves on purpose.
struct FaultyStore {
    inner: PooledStore,
    fault: FrameFault,
}

impl PixelStore for FaultyStore {
    fn layout(&self) -> FrameLayout {
        let layout = self.inner.layout();
        match self.fault {
            FrameFault::CorruptStride => FrameLayout {
                bytes_per_row: (layout.width as usize * 4).saturating_sub(4),
                ..layout
            },
            _ => layout,
        }
    }

    fn lock(&mut self) -> Result<(), LockError> {
        match self.fault {
            FrameFault::LockFailure => Err(LockError("injected lock failure".to_string())),
            _ => self.inner.lock(),
        }
    }

    fn unlock(&mut self) {
        self.inner.unlock();
    }

    fn base_address(&self) -> Option<&[u8]> {
        self.inner.base_address()
    }
}

/// Provider handing out a single prepared [`MockDevice`].
#[derive(Debug)]
pub struct MockProvider {
    device: Mutex<Option<MockDevice>>,
    present: bool,
    binding_fails: bool,
}

impl MockProvider {
    /// Provider whose default device is `device`.
    pub fn new(device: MockDevice) -> Self {
        Self {
            device: Mutex::new(Some(device)),
            present: true,
            binding_fails: false,
        }
    }

    /// Provider with no cameras attached.
    pub fn empty() -> Self {
        Self {
            device: Mutex::new(None),
            present: false,
            binding_fails: false,
        }
    }

    /// Provider that lists a device but fails to open it.
    pub fn unbindable() -> Self {
        Self {
            device: Mutex::new(None),
            present: true,
            binding_fails: true,
        }
    }
}

impl DeviceProvider for MockProvider {
    fn default_video_device(&self) -> Option<DeviceInfo> {
        self.present.then(|| DeviceInfo {
            index: 0,
            name: "Mock Camera".to_string(),
        })
    }

    fn open_input(
        &self,
        device: &DeviceInfo,
        _config: &CaptureConfig,
    ) -> Result<Box<dyn VideoDevice>, DeviceError> {
        if self.binding_fails {
            return Err(DeviceError::OpenFailed(format!(
                "{} refused the session input",
                device.name
            )));
        }
        let mock = self
            .device
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| DeviceError::OpenFailed(format!("{} is already bound", device.name)))?;
        Ok(Box::new(mock))
    }
}
