//! Lock-free counters shared by the capture and delivery threads.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Running totals for one capture pipeline.
#[derive(Debug, Default)]
pub struct PipelineStats {
    running: AtomicBool,
    frames_captured: AtomicU64,
    frames_dropped: AtomicU64,
    frames_stalled: AtomicU64,
    images_emitted: AtomicU64,
    errors_emitted: AtomicU64,
    listener_failures: AtomicU64,
}

/// A point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Whether the session is currently running.
    pub running: bool,
    /// Frames handed out by the device.
    pub frames_captured: u64,
    /// Frames discarded because the sampler was still busy.
    pub frames_dropped: u64,
    /// Ticks where the device had no free buffer.
    pub frames_stalled: u64,
    /// `ImageCaptured` outcomes.
    pub images_emitted: u64,
    /// `CaptureError` outcomes.
    pub errors_emitted: u64,
    /// Listener callbacks that panicked.
    pub listener_failures: u64,
}

impl PipelineStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    pub(crate) fn record_captured(&self) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_stall(&self) {
        self.frames_stalled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_image(&self) {
        self.images_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.errors_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_listener_failure(&self) {
        self.listener_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Copies the current counter values.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            running: self.running.load(Ordering::Acquire),
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_stalled: self.frames_stalled.load(Ordering::Relaxed),
            images_emitted: self.images_emitted.load(Ordering::Relaxed),
            errors_emitted: self.errors_emitted.load(Ordering::Relaxed),
            listener_failures: self.listener_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stats = PipelineStats::new();
        stats.record_captured();
        stats.record_captured();
        stats.record_dropped();
        stats.record_image();
        stats.record_error();
        stats.set_running(true);

        let snapshot = stats.snapshot();
        assert!(snapshot.running);
        assert_eq!(snapshot.frames_captured, 2);
        assert_eq!(snapshot.frames_dropped, 1);
        assert_eq!(snapshot.images_emitted, 1);
        assert_eq!(snapshot.errors_emitted, 1);
        assert_eq!(snapshot.listener_failures, 0);
    }
}
