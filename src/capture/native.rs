//! Native camera backend built on nokhwa.
//!
//! The nokhwa camera handle is created and used on a dedicated worker
//! thread; [`NativeDevice`] talks to it over channels. Decoded RGBA frames
//! are repacked into pool buffers as premultiplied BGRA so they look like
//! any other session output.
//!
//! A frame nokhwa fails to fetch or decode is still delivered, without pixel
//! memory, so the failure is reported for that frame alone. Only a stream
//! that cannot be opened ends the session. The worker never blocks on the
//! frame channel.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{
    ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
    Resolution,
};
use nokhwa::Camera;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::buffer::{FrameLayout, PixelFormat, RawFrameBuffer};
use super::config::{CaptureConfig, QualityPreset};
use super::device::{DeviceError, DeviceInfo, DeviceProvider, VideoDevice};
use super::pool::BufferPool;

/// Discovers cameras through the platform's native backend.
#[derive(Debug, Default)]
pub struct NativeProvider;

impl DeviceProvider for NativeProvider {
    fn default_video_device(&self) -> Option<DeviceInfo> {
        let cameras = match nokhwa::query(ApiBackend::Auto) {
            Ok(cameras) => cameras,
            Err(err) => {
                tracing::warn!(error = %err, "Camera enumeration failed");
                return None;
            }
        };

        cameras.first().map(|camera| DeviceInfo {
            index: match camera.index() {
                CameraIndex::Index(index) => *index,
                CameraIndex::String(_) => 0,
            },
            name: camera.human_name(),
        })
    }

    fn open_input(
        &self,
        device: &DeviceInfo,
        config: &CaptureConfig,
    ) -> Result<Box<dyn VideoDevice>, DeviceError> {
        let device = NativeDevice::open(device.clone(), config)?;
        Ok(Box::new(device))
    }
}

enum Command {
    SetFrameDuration(Duration),
    Start,
    Stop,
}

type FrameResult = Result<RawFrameBuffer, DeviceError>;

/// A real camera driven from a worker thread.
pub struct NativeDevice {
    info: DeviceInfo,
    commands: Option<Sender<Command>>,
    frames: Receiver<FrameResult>,
    worker: Option<JoinHandle<()>>,
    frame_duration: Duration,
    config_locked: bool,
    streaming: bool,
}

impl NativeDevice {
    /// Opens the camera and waits until the worker reports the outcome.
    pub fn open(info: DeviceInfo, config: &CaptureConfig) -> Result<Self, DeviceError> {
        let requested = match config.quality {
            QualityPreset::MaxResolution => RequestedFormatType::AbsoluteHighestResolution,
            QualityPreset::Exact => RequestedFormatType::Closest(CameraFormat::new(
                Resolution::new(config.width, config.height),
                FrameFormat::MJPEG,
                config.frame_rate,
            )),
        };

        let (command_tx, command_rx) = bounded(8);
        let (frame_tx, frame_rx) = bounded(1);
        let (ready_tx, ready_rx) = bounded(1);
        let pool = BufferPool::new(config.buffer_pool_size);
        let index = info.index;
        let frame_duration = config.frame_duration();

        let worker = thread::Builder::new()
            .name("nokhwa-camera".to_string())
            .spawn(move || {
                camera_worker(
                    index,
                    requested,
                    frame_duration,
                    pool,
                    command_rx,
                    frame_tx,
                    ready_tx,
                )
            })
            .map_err(|e| DeviceError::OpenFailed(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                let _ = worker.join();
                return Err(err);
            }
            Err(_) => {
                let _ = worker.join();
                return Err(DeviceError::OpenFailed(
                    "camera worker exited during startup".to_string(),
                ));
            }
        }

        Ok(Self {
            info,
            commands: Some(command_tx),
            frames: frame_rx,
            worker: Some(worker),
            frame_duration,
            config_locked: false,
            streaming: false,
        })
    }

    fn send(&self, command: Command) -> Result<(), DeviceError> {
        self.commands
            .as_ref()
            .ok_or(DeviceError::Disconnected)?
            .send(command)
            .map_err(|_| DeviceError::Disconnected)
    }
}

impl VideoDevice for NativeDevice {
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
        self.send(Command::SetFrameDuration(min))?;
        self.frame_duration = min;
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
            self.send(Command::Start)?;
            self.streaming = true;
        }
        Ok(())
    }

    fn stop_streaming(&mut self) {
        if self.streaming {
            let _ = self.send(Command::Stop);
            self.streaming = false;
        }
    }

    fn next_buffer(&mut self) -> Result<Option<RawFrameBuffer>, DeviceError> {
        if !self.streaming {
            return Err(DeviceError::NotStreaming);
        }
        match self.frames.recv_timeout(self.frame_duration * 2) {
            Ok(Ok(buffer)) => Ok(Some(buffer)),
            Ok(Err(err)) => Err(err),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(DeviceError::Disconnected),
        }
    }
}

impl Drop for NativeDevice {
    fn drop(&mut self) {
        let commands = self.commands.take();
        let frames = std::mem::replace(&mut self.frames, crossbeam_channel::never());
        if let Some(worker) = self.worker.take() {
            if close_worker(commands, frames, worker).is_err() {
                tracing::error!(device = %self.info.name, "Camera worker panicked");
            }
        }
    }
}

/// Closes both channels, then waits for the worker.
///
/// Dropping the command sender tells the worker to exit. Dropping the frame
/// receiver first wakes a worker blocked on a full frame channel.
fn close_worker(
    commands: Option<Sender<Command>>,
    frames: Receiver<FrameResult>,
    worker: JoinHandle<()>,
) -> thread::Result<()> {
    drop(commands);
    drop(frames);
    worker.join()
}

fn camera_worker(
    index: u32,
    requested: RequestedFormatType,
    mut frame_duration: Duration,
    pool: BufferPool,
    commands: Receiver<Command>,
    frames: Sender<FrameResult>,
    ready: Sender<Result<(), DeviceError>>,
) {
    let format = RequestedFormat::new::<RgbAFormat>(requested);
    let mut camera = match Camera::new(CameraIndex::Index(index), format) {
        Ok(camera) => camera,
        Err(err) => {
            let _ = ready.send(Err(DeviceError::OpenFailed(err.to_string())));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    let mut streaming = false;
    let mut sequence = 0u64;
    let mut started_at = Instant::now();
    let mut next_deadline = Instant::now();

    loop {
        let command = if streaming {
            match commands.try_recv() {
                Ok(command) => Some(command),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => break,
            }
        } else {
            match commands.recv() {
                Ok(command) => Some(command),
                Err(_) => break,
            }
        };

        if let Some(command) = command {
            match command {
                Command::SetFrameDuration(duration) => {
                    frame_duration = duration;
                    let fps = (1.0 / duration.as_secs_f64()).round().max(1.0) as u32;
                    if let Err(err) = camera.set_frame_rate(fps) {
                        tracing::warn!(fps, error = %err, "Camera rejected frame rate; pacing in software");
                    }
                }
                Command::Start => match camera.open_stream() {
                    Ok(()) => {
                        streaming = true;
                        started_at = Instant::now();
                        next_deadline = started_at;
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "Failed to open camera stream");
                        let _ = frames.try_send(Err(DeviceError::StreamFailed(err.to_string())));
                    }
                },
                Command::Stop => {
                    if let Err(err) = camera.stop_stream() {
                        tracing::warn!(error = %err, "Failed to stop camera stream");
                    }
                    streaming = false;
                }
            }
            continue;
        }

        let now = Instant::now();
        if next_deadline > now {
            thread::sleep(next_deadline - now);
        }
        next_deadline = next_deadline.max(now) + frame_duration;

        let read = camera.frame().and_then(|raw| raw.decode_image::<RgbAFormat>());
        let pixels = match &read {
            Ok(image) => Ok((image.width(), image.height(), image.as_raw().as_slice())),
            Err(err) => Err(err.to_string()),
        };
        let Some(buffer) = package_frame(pixels, &pool, sequence + 1, started_at.elapsed()) else {
            tracing::trace!("Buffer pool exhausted; camera frame skipped");
            continue;
        };
        sequence += 1;

        // A full slot means the session has not picked up the last frame yet.
        if frames.try_send(Ok(buffer)).is_err() {
            tracing::trace!(sequence, "Camera frame discarded; consumer busy");
        }
    }

    if streaming {
        let _ = camera.stop_stream();
    }
}

/// Repacks one camera read into a premultiplied BGRA pool buffer.
///
/// A failed read yields a frame without pixel memory. Returns `None` when
/// the pool has no buffer free.
fn package_frame(
    pixels: Result<(u32, u32, &[u8]), String>,
    pool: &BufferPool,
    sequence: u64,
    presentation_time: Duration,
) -> Option<RawFrameBuffer> {
    let (width, height, rgba) = match pixels {
        Ok(pixels) => pixels,
        Err(reason) => {
            tracing::warn!(sequence, %reason, "Camera frame unreadable");
            return Some(RawFrameBuffer::without_store(sequence, presentation_time));
        }
    };

    let mut store = pool.acquire(FrameLayout::packed(width, height, PixelFormat::Bgra8))?;
    for (dst, src) in store.data_mut().chunks_exact_mut(4).zip(rgba.chunks_exact(4)) {
        let alpha = u16::from(src[3]);
        let premultiply = |c: u8| ((u16::from(c) * alpha + 127) / 255) as u8;
        dst[0] = premultiply(src[2]);
        dst[1] = premultiply(src[1]);
        dst[2] = premultiply(src[0]);
        dst[3] = src[3];
    }
    Some(RawFrameBuffer::new(Box::new(store), sequence, presentation_time))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreadable_frame_is_delivered_without_pixels() {
        let pool = BufferPool::new(1);
        let buffer = package_frame(
            Err("corrupt jpeg".to_string()),
            &pool,
            7,
            Duration::from_millis(70),
        )
        .unwrap();

        assert_eq!(buffer.sequence(), 7);
        assert!(!buffer.has_pixel_store());
        assert_eq!(pool.stats().outstanding, 0);
    }

    #[test]
    fn test_frame_repacked_as_premultiplied_bgra() {
        let pool = BufferPool::new(1);
        let rgba = [200, 100, 50, 255, 200, 100, 50, 0];
        let mut buffer = package_frame(Ok((2, 1, &rgba[..])), &pool, 1, Duration::ZERO).unwrap();

        let lock = buffer.lock_pixels().unwrap();
        assert_eq!(lock.bytes().unwrap(), &[50, 100, 200, 255, 0, 0, 0, 0]);
    }

    #[test]
    fn test_close_worker_wakes_blocked_sender() {
        let (command_tx, command_rx) = bounded::<Command>(4);
        let (frame_tx, frame_rx) = bounded::<FrameResult>(1);
        let worker = thread::spawn(move || {
            let _ = frame_tx.send(Err(DeviceError::StreamFailed("first".to_string())));
            // The slot is full and nobody reads it.
            let _ = frame_tx.send(Err(DeviceError::StreamFailed("second".to_string())));
            while command_rx.recv().is_ok() {}
        });

        let (done_tx, done_rx) = bounded(1);
        thread::spawn(move || {
            let joined = close_worker(Some(command_tx), frame_rx, worker).is_ok();
            let _ = done_tx.send(joined);
        });
        assert_eq!(done_rx.recv_timeout(Duration::from_secs(5)), Ok(true));
    }

    #[test]
    fn test_exhausted_pool_skips_frame() {
        let pool = BufferPool::new(1);
        let rgba = [0u8; 4];
        let _held = package_frame(Ok((1, 1, &rgba[..])), &pool, 1, Duration::ZERO).unwrap();
        assert!(package_frame(Ok((1, 1, &rgba[..])), &pool, 2, Duration::ZERO).is_none());
    }
}
