//! Wiring of source, sampler, events and preview into one pipeline.

use std::sync::Arc;

use crate::capture::{
    CaptureConfig, CaptureError, DeviceProvider, FrameSource, PreviewConfig,
};
use crate::events::EventChannel;
use crate::metrics::PipelineStats;
use crate::preview::PreviewSink;
use crate::sampler::FrameSampler;

/// A fully wired capture pipeline.
///
/// Built stopped, so consumers can subscribe to [`events`](Self::events)
/// before the first frame arrives. Dropping the pipeline stops the session.
#[derive(Debug)]
pub struct CapturePipeline {
    source: FrameSource,
    events: Arc<EventChannel>,
    preview: Option<Arc<PreviewSink>>,
    stats: Arc<PipelineStats>,
}

impl CapturePipeline {
    /// Binds the default device and wires a sampler to it. No preview.
    pub fn build(provider: &dyn DeviceProvider, config: &CaptureConfig) -> Result<Self, CaptureError> {
        Self::assemble(provider, config, None)
    }

    /// Like [`build`](Self::build), plus a preview surface fed from the
    /// capture thread.
    pub fn with_preview(
        provider: &dyn DeviceProvider,
        config: &CaptureConfig,
        surface: &PreviewConfig,
    ) -> Result<Self, CaptureError> {
        surface.validate()?;
        Self::assemble(provider, config, Some(Arc::new(PreviewSink::new(*surface))))
    }

    fn assemble(
        provider: &dyn DeviceProvider,
        config: &CaptureConfig,
        preview: Option<Arc<PreviewSink>>,
    ) -> Result<Self, CaptureError> {
        let stats = Arc::new(PipelineStats::new());
        let mut source = FrameSource::initialize(provider, config)?.with_stats(Arc::clone(&stats));

        source.configure_output(config.pixel_format, config.drop_late_frames)?;
        source.set_frame_rate(config.frame_rate)?;

        let events = Arc::new(EventChannel::with_stats(Arc::clone(&stats)));
        let sampler = FrameSampler::with_stats(Arc::clone(&events), Arc::clone(&stats));
        source.bind_sink(Arc::new(sampler));

        if let Some(preview) = &preview {
            source.attach_preview(Arc::clone(preview));
        }

        tracing::debug!(
            device = %source.device_info().name,
            fps = source.frame_rate(),
            preview = preview.is_some(),
            "Capture pipeline assembled"
        );

        Ok(Self {
            source,
            events,
            preview,
            stats,
        })
    }

    /// Starts capturing. A no-op if already running.
    pub fn start(&mut self) -> Result<(), CaptureError> {
        self.source.start()
    }

    /// Stops capturing. A no-op if not running.
    pub fn stop(&mut self) {
        self.source.stop();
    }

    /// Returns true while the session is delivering frames.
    pub fn is_running(&self) -> bool {
        self.source.is_running()
    }

    /// The channel `ImageCaptured` / `CaptureError` events are published on.
    pub fn events(&self) -> &Arc<EventChannel> {
        &self.events
    }

    /// The preview surface, if one was attached.
    pub fn preview(&self) -> Option<&Arc<PreviewSink>> {
        self.preview.as_ref()
    }

    /// Live counters for this pipeline.
    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }

    /// The underlying frame source.
    pub fn source(&self) -> &FrameSource {
        &self.source
    }

    /// Mutable access to the frame source, e.g. to change the frame rate.
    pub fn source_mut(&mut self) -> &mut FrameSource {
        &mut self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{ConfigError, MockDevice, MockProvider};
    use std::thread;
    use std::time::Duration;

    fn config() -> CaptureConfig {
        CaptureConfig {
            drop_late_frames: false,
            ..CaptureConfig::with_frame_rate(100)
        }
    }

    #[test]
    fn test_build_is_stopped_and_pinned() {
        let provider = MockProvider::new(MockDevice::new().with_dimensions(8, 8));
        let pipeline = CapturePipeline::build(&provider, &config()).unwrap();

        assert!(!pipeline.is_running());
        assert_eq!(pipeline.source().frame_rate(), 100);
        assert!(pipeline.preview().is_none());
        assert!(!pipeline.stats().snapshot().running);
    }

    #[test]
    fn test_build_without_device() {
        let result = CapturePipeline::build(&MockProvider::empty(), &config());
        assert!(matches!(result, Err(CaptureError::DeviceUnavailable)));
    }

    #[test]
    fn test_invalid_preview_surface_rejected() {
        let provider = MockProvider::new(MockDevice::new());
        let surface = PreviewConfig {
            width: 0.0,
            height: 300.0,
        };
        let result = CapturePipeline::with_preview(&provider, &config(), &surface);
        assert!(matches!(
            result,
            Err(CaptureError::Configuration(ConfigError::InvalidPreviewSize))
        ));
    }

    #[test]
    fn test_preview_receives_frames_and_clears_on_stop() {
        let provider = MockProvider::new(MockDevice::new().with_dimensions(16, 9));
        let mut pipeline =
            CapturePipeline::with_preview(&provider, &config(), &PreviewConfig::default()).unwrap();
        let preview = Arc::clone(pipeline.preview().unwrap());

        pipeline.start().unwrap();
        for _ in 0..200 {
            if preview.latest_frame().is_some() {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        let viewport = preview.viewport().unwrap();
        assert_eq!(viewport.width, 400.0);

        pipeline.stop();
        assert!(preview.latest_frame().is_none());
    }
}
