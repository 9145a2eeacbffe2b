//! Capture session ownership and frame delivery.
//!
//! [`FrameSource`] binds one device to one [`FrameSink`]. While running it
//! owns two threads:
//!
//! ```text
//! capture thread:  device.next_buffer() → preview → hand-off
//! delivery thread: hand-off → sink.on_frame_delivered()   (serial, in order)
//! ```
//!
//! With the drop-late-frames policy the hand-off is a rendezvous: a frame is
//! passed over only while the delivery thread is waiting for one, and a frame
//! that arrives while the sink is busy is released straight back to the
//! device. Otherwise frames queue up to the buffer pool size.
//!
//! A device error halts the capture thread. The next `start` reaps the dead
//! session and streams again.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

use super::buffer::{PixelFormat, RawFrameBuffer};
use super::config::{CaptureConfig, ConfigError, QualityPreset};
use super::device::{DeviceConfiguration, DeviceError, DeviceInfo, DeviceProvider, VideoDevice};
use crate::events::panic_message;
use crate::metrics::PipelineStats;
use crate::preview::PreviewSink;

/// Startup and session errors. These are fatal to pipeline construction.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no video capture device available")]
    DeviceUnavailable,
    #[error("could not bind {device} as a session input: {source}")]
    InputBindingFailure {
        device: String,
        #[source]
        source: DeviceError,
    },
    #[error("invalid configuration: {0}")]
    Configuration(#[from] ConfigError),
    #[error("device error: {0}")]
    Device(#[from] DeviceError),
    #[error("no frame sink bound")]
    SinkNotBound,
    #[error("failed to spawn {name} thread: {source}")]
    Thread {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Describes where a delivered frame came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConnection {
    /// Device name.
    pub device: String,
    /// Pinned frame rate at the time the session started.
    pub frame_rate: u32,
}

/// Receives every frame delivered by a [`FrameSource`].
///
/// Called on the delivery thread, one frame at a time, in capture order.
/// The buffer must not outlive the call.
pub trait FrameSink: Send + Sync {
    /// Handles one frame. Dropping `buffer` returns it to the device.
    fn on_frame_delivered(&self, buffer: RawFrameBuffer, connection: &SourceConnection);
}

#[derive(Debug, Clone, Copy)]
struct OutputSettings {
    format: PixelFormat,
    drop_late_frames: bool,
}

struct RunningSession {
    running: Arc<AtomicBool>,
    capture: JoinHandle<()>,
    delivery: JoinHandle<()>,
}

/// Owns the capture session: device, output, frame rate and delivery threads.
pub struct FrameSource {
    device: Arc<Mutex<Box<dyn VideoDevice>>>,
    info: DeviceInfo,
    quality: QualityPreset,
    queue_depth: usize,
    output: Option<OutputSettings>,
    frame_rate: u32,
    sink: Option<Arc<dyn FrameSink>>,
    preview: Option<Arc<PreviewSink>>,
    stats: Arc<PipelineStats>,
    session: Option<RunningSession>,
}

fn lock_device(device: &Mutex<Box<dyn VideoDevice>>) -> MutexGuard<'_, Box<dyn VideoDevice>> {
    device.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FrameSource {
    /// Selects the default video device and binds it as the session input.
    pub fn initialize(
        provider: &dyn DeviceProvider,
        config: &CaptureConfig,
    ) -> Result<Self, CaptureError> {
        config.validate()?;

        let info = provider
            .default_video_device()
            .ok_or(CaptureError::DeviceUnavailable)?;
        let device = provider
            .open_input(&info, config)
            .map_err(|source| CaptureError::InputBindingFailure {
                device: info.name.clone(),
                source,
            })?;

        tracing::info!(device = %info.name, index = info.index, "Capture device bound");

        Ok(Self {
            device: Arc::new(Mutex::new(device)),
            info,
            quality: config.quality,
            queue_depth: config.buffer_pool_size,
            output: None,
            frame_rate: config.frame_rate,
            sink: None,
            preview: None,
            stats: Arc::new(PipelineStats::new()),
            session: None,
        })
    }

    /// Records outcomes into `stats` instead of a private set of counters.
    pub fn with_stats(mut self, stats: Arc<PipelineStats>) -> Self {
        self.stats = stats;
        self
    }

    /// The bound device.
    pub fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Binds the data output with the given pixel format and backpressure policy.
    pub fn configure_output(
        &mut self,
        format: PixelFormat,
        drop_late_frames: bool,
    ) -> Result<(), CaptureError> {
        lock_device(&self.device).configure_output(format, self.quality)?;
        self.output = Some(OutputSettings {
            format,
            drop_late_frames,
        });
        tracing::debug!(?format, drop_late_frames, "Output configured");
        Ok(())
    }

    /// Binds the sink that receives every frame. Replaces any previous sink
    /// from the next `start`.
    pub fn bind_sink(&mut self, sink: Arc<dyn FrameSink>) {
        self.sink = Some(sink);
    }

    /// Mirrors every captured frame into `preview` before it is sampled.
    pub fn attach_preview(&mut self, preview: Arc<PreviewSink>) {
        self.preview = Some(preview);
    }

    /// Applies frame-duration bounds under the device configuration lock.
    ///
    /// Devices pace at the shortest allowed duration, so the reported frame
    /// rate follows `min`.
    pub fn set_frame_rate_bounds(&mut self, min: Duration, max: Duration) -> Result<(), CaptureError> {
        {
            let mut device = lock_device(&self.device);
            let mut config = DeviceConfiguration::lock(&mut **device)?;
            config.set_frame_duration_bounds(min, max)?;
        }

        if !min.is_zero() {
            self.frame_rate = (1.0 / min.as_secs_f64()).round().max(1.0) as u32;
        }
        tracing::debug!(?min, ?max, fps = self.frame_rate, "Frame duration bounds applied");
        Ok(())
    }

    /// Pins the device to exactly `fps` frames per second.
    pub fn set_frame_rate(&mut self, fps: u32) -> Result<(), CaptureError> {
        if fps == 0 {
            return Err(ConfigError::InvalidFrameRate.into());
        }
        let duration = Duration::from_secs(1) / fps;
        self.set_frame_rate_bounds(duration, duration)
    }

    /// Current pinned frame rate.
    pub fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    /// Returns true while frames are flowing.
    pub fn is_running(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.running.load(Ordering::Acquire))
    }

    /// Starts the session. A no-op if it is already running.
    ///
    /// A session whose capture thread halted on a device error is torn down
    /// and replaced.
    pub fn start(&mut self) -> Result<(), CaptureError> {
        if let Some(session) = self.session.take() {
            if session.running.load(Ordering::Acquire) {
                self.session = Some(session);
                tracing::debug!("Capture session already running");
                return Ok(());
            }
            tracing::warn!(device = %self.info.name, "Reaping halted capture session");
            self.shutdown(session);
        }

        let sink = self.sink.clone().ok_or(CaptureError::SinkNotBound)?;
        let output = match self.output {
            Some(output) => output,
            None => {
                self.configure_output(PixelFormat::Bgra8, true)?;
                self.output.ok_or(CaptureError::SinkNotBound)?
            }
        };

        lock_device(&self.device).start_streaming()?;

        let capacity = if output.drop_late_frames {
            0
        } else {
            self.queue_depth.max(1)
        };
        let (tx, rx) = bounded::<RawFrameBuffer>(capacity);
        let running = Arc::new(AtomicBool::new(true));
        let connection = SourceConnection {
            device: self.info.name.clone(),
            frame_rate: self.frame_rate,
        };

        let delivery = {
            let stats = Arc::clone(&self.stats);
            thread::Builder::new()
                .name("frame-delivery".to_string())
                .spawn(move || delivery_loop(rx, sink, connection, stats))
        };
        let delivery = match delivery {
            Ok(handle) => handle,
            Err(source) => {
                lock_device(&self.device).stop_streaming();
                return Err(CaptureError::Thread {
                    name: "frame-delivery",
                    source,
                });
            }
        };

        let capture = {
            let device = Arc::clone(&self.device);
            let running = Arc::clone(&running);
            let preview = self.preview.clone();
            let stats = Arc::clone(&self.stats);
            let drop_late = output.drop_late_frames;
            thread::Builder::new()
                .name("frame-capture".to_string())
                .spawn(move || capture_loop(device, running, tx, preview, stats, drop_late))
        };
        let capture = match capture {
            Ok(handle) => handle,
            Err(source) => {
                // The sender went down with the closure, so delivery will exit.
                let _ = delivery.join();
                lock_device(&self.device).stop_streaming();
                return Err(CaptureError::Thread {
                    name: "frame-capture",
                    source,
                });
            }
        };

        self.stats.set_running(true);
        self.session = Some(RunningSession {
            running,
            capture,
            delivery,
        });

        tracing::info!(
            device = %self.info.name,
            fps = self.frame_rate,
            format = ?output.format,
            drop_late_frames = output.drop_late_frames,
            "Capture session started"
        );
        Ok(())
    }

    /// Stops the session. In-flight frames finish delivery first.
    /// A no-op if the session is not running.
    pub fn stop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        self.shutdown(session);
        tracing::info!(device = %self.info.name, "Capture session stopped");
    }

    fn shutdown(&mut self, session: RunningSession) {
        session.running.store(false, Ordering::Release);
        if session.capture.join().is_err() {
            tracing::error!("Capture thread panicked");
        }
        if session.delivery.join().is_err() {
            tracing::error!("Delivery thread panicked");
        }

        lock_device(&self.device).stop_streaming();
        if let Some(preview) = &self.preview {
            preview.clear();
        }
        self.stats.set_running(false);
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for FrameSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSource")
            .field("device", &self.info)
            .field("frame_rate", &self.frame_rate)
            .field("output", &self.output)
            .field("running", &self.is_running())
            .finish()
    }
}

fn capture_loop(
    device: Arc<Mutex<Box<dyn VideoDevice>>>,
    running: Arc<AtomicBool>,
    tx: Sender<RawFrameBuffer>,
    preview: Option<Arc<PreviewSink>>,
    stats: Arc<PipelineStats>,
    drop_late: bool,
) {
    while running.load(Ordering::Acquire) {
        let next = lock_device(&device).next_buffer();
        let mut buffer = match next {
            Ok(Some(buffer)) => buffer,
            Ok(None) => {
                stats.record_stall();
                thread::yield_now();
                continue;
            }
            Err(err) => {
                tracing::error!(error = %err, "Device stream failed; capture halted");
                running.store(false, Ordering::Release);
                stats.set_running(false);
                break;
            }
        };

        stats.record_captured();
        if let Some(preview) = &preview {
            preview.present(&mut buffer);
        }

        if drop_late {
            match tx.try_send(buffer) {
                Ok(()) => {}
                Err(TrySendError::Full(late)) => {
                    stats.record_dropped();
                    tracing::trace!(sequence = late.sequence(), "Dropped late frame");
                }
                Err(TrySendError::Disconnected(_)) => break,
            }
        } else if tx.send(buffer).is_err() {
            break;
        }
    }
}

fn delivery_loop(
    rx: Receiver<RawFrameBuffer>,
    sink: Arc<dyn FrameSink>,
    connection: SourceConnection,
    stats: Arc<PipelineStats>,
) {
    for buffer in rx.iter() {
        let sequence = buffer.sequence();
        let delivered = panic::catch_unwind(AssertUnwindSafe(|| {
            sink.on_frame_delivered(buffer, &connection);
        }));
        if let Err(payload) = delivered {
            stats.record_error();
            tracing::error!(
                sequence,
                reason = %panic_message(payload.as_ref()),
                "Frame sink panicked"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{MockDevice, MockProvider};
    use std::sync::atomic::AtomicU64;

    #[derive(Default)]
    struct CountingSink {
        frames: AtomicU64,
    }

    impl FrameSink for CountingSink {
        fn on_frame_delivered(&self, buffer: RawFrameBuffer, _connection: &SourceConnection) {
            self.frames.fetch_add(1, Ordering::SeqCst);
            buffer.release();
        }
    }

    fn source(device: MockDevice) -> FrameSource {
        FrameSource::initialize(&MockProvider::new(device), &CaptureConfig::default()).unwrap()
    }

    fn wait_for(condition: impl Fn() -> bool) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("condition not reached in time");
    }

    #[test]
    fn test_initialize_without_device_fails() {
        let result = FrameSource::initialize(&MockProvider::empty(), &CaptureConfig::default());
        assert!(matches!(result, Err(CaptureError::DeviceUnavailable)));
    }

    #[test]
    fn test_initialize_with_unbindable_device_fails() {
        let result = FrameSource::initialize(&MockProvider::unbindable(), &CaptureConfig::default());
        assert!(matches!(result, Err(CaptureError::InputBindingFailure { .. })));
    }

    #[test]
    fn test_initialize_rejects_invalid_config() {
        let provider = MockProvider::new(MockDevice::new());
        let result = FrameSource::initialize(&provider, &CaptureConfig::with_frame_rate(0));
        assert!(matches!(result, Err(CaptureError::Configuration(_))));
    }

    #[test]
    fn test_start_requires_sink() {
        let mut source = source(MockDevice::new().with_dimensions(4, 4));
        assert!(matches!(source.start(), Err(CaptureError::SinkNotBound)));
        assert!(!source.is_running());
    }

    #[test]
    fn test_frame_rate_is_pinned() {
        let mut source = source(MockDevice::new());
        source.set_frame_rate(25).unwrap();
        assert_eq!(source.frame_rate(), 25);
        assert!(source.set_frame_rate(0).is_err());
        // The configuration lock was released both times.
        source.set_frame_rate(10).unwrap();
        assert_eq!(source.frame_rate(), 10);
    }

    #[test]
    fn test_start_stop_idempotent() {
        let mut source = source(MockDevice::new().with_dimensions(4, 4).unpaced());
        let sink = Arc::new(CountingSink::default());
        source.bind_sink(sink.clone());
        source.configure_output(PixelFormat::Bgra8, true).unwrap();

        source.start().unwrap();
        source.start().unwrap();
        assert!(source.is_running());

        wait_for(|| sink.frames.load(Ordering::SeqCst) >= 5);

        source.stop();
        source.stop();
        assert!(!source.is_running());

        let delivered = sink.frames.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(sink.frames.load(Ordering::SeqCst), delivered);
    }

    #[test]
    fn test_frame_rate_follows_shortest_duration() {
        let mut source = source(MockDevice::new());
        source
            .set_frame_rate_bounds(Duration::from_millis(10), Duration::from_millis(100))
            .unwrap();
        assert_eq!(source.frame_rate(), 100);
    }

    /// Mock device whose stream fails once, on the given `next_buffer` call.
    struct FailsOnce {
        inner: MockDevice,
        calls: u64,
        fail_on: u64,
    }

    impl VideoDevice for FailsOnce {
        fn info(&self) -> &DeviceInfo {
            self.inner.info()
        }
        fn lock_for_configuration(&mut self) -> Result<(), DeviceError> {
            self.inner.lock_for_configuration()
        }
        fn unlock_for_configuration(&mut self) {
            self.inner.unlock_for_configuration()
        }
        fn set_frame_duration_bounds(
            &mut self,
            min: Duration,
            max: Duration,
        ) -> Result<(), DeviceError> {
            self.inner.set_frame_duration_bounds(min, max)
        }
        fn configure_output(
            &mut self,
            format: PixelFormat,
            quality: QualityPreset,
        ) -> Result<(), DeviceError> {
            self.inner.configure_output(format, quality)
        }
        fn start_streaming(&mut self) -> Result<(), DeviceError> {
            self.inner.start_streaming()
        }
        fn stop_streaming(&mut self) {
            self.inner.stop_streaming()
        }
        fn next_buffer(&mut self) -> Result<Option<RawFrameBuffer>, DeviceError> {
            self.calls += 1;
            if self.calls == self.fail_on {
                return Err(DeviceError::StreamFailed("usb reset".to_string()));
            }
            self.inner.next_buffer()
        }
    }

    struct FailsOnceProvider(Mutex<Option<FailsOnce>>);

    impl DeviceProvider for FailsOnceProvider {
        fn default_video_device(&self) -> Option<DeviceInfo> {
            Some(DeviceInfo {
                index: 0,
                name: "Flaky Camera".to_string(),
            })
        }

        fn open_input(
            &self,
            _device: &DeviceInfo,
            _config: &CaptureConfig,
        ) -> Result<Box<dyn VideoDevice>, DeviceError> {
            let device = self.0.lock().unwrap().take().unwrap();
            Ok(Box::new(device))
        }
    }

    #[test]
    fn test_start_after_device_failure_resumes_streaming() {
        let provider = FailsOnceProvider(Mutex::new(Some(FailsOnce {
            inner: MockDevice::new().with_dimensions(4, 4).unpaced(),
            calls: 0,
            fail_on: 3,
        })));
        let stats = Arc::new(PipelineStats::new());
        let mut source = FrameSource::initialize(&provider, &CaptureConfig::default())
            .unwrap()
            .with_stats(Arc::clone(&stats));
        source.configure_output(PixelFormat::Bgra8, false).unwrap();
        let sink = Arc::new(CountingSink::default());
        source.bind_sink(sink.clone());

        source.start().unwrap();
        wait_for(|| !source.is_running());
        assert!(!stats.snapshot().running);
        wait_for(|| sink.frames.load(Ordering::SeqCst) == 2);

        source.start().unwrap();
        assert!(source.is_running());
        assert!(stats.snapshot().running);
        wait_for(|| sink.frames.load(Ordering::SeqCst) >= 10);

        source.stop();
        assert!(!stats.snapshot().running);
    }

    #[test]
    fn test_unsupported_output_format_rejected() {
        let mut source = source(MockDevice::new());
        assert!(matches!(
            source.configure_output(PixelFormat::Rgba8, true),
            Err(CaptureError::Device(DeviceError::UnsupportedFormat(_)))
        ));
    }

    #[test]
    fn test_panicking_sink_does_not_kill_delivery() {
        struct FlakySink {
            frames: AtomicU64,
        }
        impl FrameSink for FlakySink {
            fn on_frame_delivered(&self, buffer: RawFrameBuffer, _: &SourceConnection) {
                let n = self.frames.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    panic!("first frame explodes");
                }
                buffer.release();
            }
        }

        let device = MockDevice::new().with_dimensions(4, 4).unpaced();
        let pool = device.pool();
        let mut source = source(device);
        let sink = Arc::new(FlakySink {
            frames: AtomicU64::new(0),
        });
        source.bind_sink(sink.clone());
        source.start().unwrap();

        wait_for(|| sink.frames.load(Ordering::SeqCst) >= 3);
        source.stop();
        assert_eq!(pool.stats().outstanding, 0);
    }
}
