//! Metrics collection and registry.

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use thiserror::Error;

use super::StatsSnapshot;

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// Prometheus metrics registry for a capture pipeline.
pub struct MetricsRegistry {
    registry: Registry,

    session_running: IntGauge,

    // Device side
    frames_captured: IntCounter,
    frames_dropped: IntCounter,
    frames_stalled: IntCounter,

    // Sampler side
    images_emitted: IntCounter,
    errors_emitted: IntCounter,
    listener_failures: IntCounter,
}

impl MetricsRegistry {
    /// Creates a new metrics registry with all pipeline metrics registered.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let session_running = IntGauge::new(
            "frame_capture_session_running",
            "Whether the capture session is running (1=running, 0=stopped)",
        )?;
        let frames_captured = IntCounter::new(
            "frame_capture_frames_captured_total",
            "Frames handed out by the capture device",
        )?;
        let frames_dropped = IntCounter::new(
            "frame_capture_frames_dropped_total",
            "Frames discarded because the sampler was still busy",
        )?;
        let frames_stalled = IntCounter::new(
            "frame_capture_frames_stalled_total",
            "Device ticks with no free buffer in the pool",
        )?;
        let images_emitted = IntCounter::new(
            "frame_capture_images_emitted_total",
            "Frames converted into captured images",
        )?;
        let errors_emitted = IntCounter::new(
            "frame_capture_errors_emitted_total",
            "Frames that ended in a capture error",
        )?;
        let listener_failures = IntCounter::new(
            "frame_capture_listener_failures_total",
            "Event listener callbacks that panicked",
        )?;

        registry.register(Box::new(session_running.clone()))?;
        registry.register(Box::new(frames_captured.clone()))?;
        registry.register(Box::new(frames_dropped.clone()))?;
        registry.register(Box::new(frames_stalled.clone()))?;
        registry.register(Box::new(images_emitted.clone()))?;
        registry.register(Box::new(errors_emitted.clone()))?;
        registry.register(Box::new(listener_failures.clone()))?;

        Ok(Self {
            registry,
            session_running,
            frames_captured,
            frames_dropped,
            frames_stalled,
            images_emitted,
            errors_emitted,
            listener_failures,
        })
    }

    /// Updates all metrics from a snapshot of pipeline counters.
    pub fn update(&self, snapshot: &StatsSnapshot) {
        self.session_running.set(i64::from(snapshot.running));

        // Counters only move forward, so increment by the difference.
        advance(&self.frames_captured, snapshot.frames_captured);
        advance(&self.frames_dropped, snapshot.frames_dropped);
        advance(&self.frames_stalled, snapshot.frames_stalled);
        advance(&self.images_emitted, snapshot.images_emitted);
        advance(&self.errors_emitted, snapshot.errors_emitted);
        advance(&self.listener_failures, snapshot.listener_failures);
    }

    /// Returns the underlying Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

fn advance(counter: &IntCounter, total: u64) {
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_creation() {
        let registry = MetricsRegistry::new();
        assert!(registry.is_ok());
    }

    #[test]
    fn test_metrics_update() {
        let registry = MetricsRegistry::new().unwrap();

        let snapshot = StatsSnapshot {
            running: true,
            frames_captured: 12,
            frames_dropped: 2,
            frames_stalled: 0,
            images_emitted: 9,
            errors_emitted: 1,
            listener_failures: 0,
        };
        registry.update(&snapshot);

        let output = registry.encode().unwrap();
        assert!(output.contains("frame_capture_session_running 1"));
        assert!(output.contains("frame_capture_frames_captured_total 12"));
        assert!(output.contains("frame_capture_images_emitted_total 9"));
        assert!(output.contains("frame_capture_errors_emitted_total 1"));
    }

    #[test]
    fn test_counters_never_go_backwards() {
        let registry = MetricsRegistry::new().unwrap();

        registry.update(&StatsSnapshot {
            frames_captured: 10,
            ..StatsSnapshot::default()
        });
        registry.update(&StatsSnapshot {
            frames_captured: 4,
            ..StatsSnapshot::default()
        });

        let output = registry.encode().unwrap();
        assert!(output.contains("frame_capture_frames_captured_total 10"));
        assert!(output.contains("frame_capture_session_running 0"));
    }

    #[test]
    fn test_metrics_encode() {
        let registry = MetricsRegistry::new().unwrap();
        let output = registry.encode().unwrap();

        assert!(output.contains("frame_capture_frames_dropped_total"));
        assert!(output.contains("frame_capture_frames_stalled_total"));
        assert!(output.contains("frame_capture_listener_failures_total"));
    }
}
