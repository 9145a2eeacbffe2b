//! Observer list carrying capture events to registered consumers.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use super::{panic_message, CaptureEvent};
use crate::metrics::PipelineStats;

/// Callback invoked for each event, on the delivery thread.
pub type Listener = Arc<dyn Fn(&CaptureEvent) + Send + Sync>;

/// Handle returned by [`EventChannel::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

/// Fan-out of [`CaptureEvent`]s to zero or more listeners.
///
/// Emission iterates over a snapshot of the listener list, so listeners may
/// subscribe or unsubscribe (themselves included) while being notified.
/// A listener that panics is logged and skipped; the others still run.
pub struct EventChannel {
    listeners: RwLock<BTreeMap<SubscriptionId, Listener>>,
    receivers: RwLock<BTreeMap<SubscriptionId, Sender<CaptureEvent>>>,
    next_id: AtomicU64,
    stats: Arc<PipelineStats>,
}

impl EventChannel {
    /// Creates a channel with no listeners.
    pub fn new() -> Self {
        Self::with_stats(Arc::new(PipelineStats::new()))
    }

    /// Creates a channel that records listener failures in `stats`.
    pub fn with_stats(stats: Arc<PipelineStats>) -> Self {
        Self {
            listeners: RwLock::new(BTreeMap::new()),
            receivers: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            stats,
        }
    }

    /// Registers a listener.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&CaptureEvent) + Send + Sync + 'static,
    {
        let id = self.allocate_id();
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(listener));
        tracing::debug!(subscription = id.0, "Listener subscribed");
        id
    }

    /// Registers a subscription that forwards events into a bounded channel.
    ///
    /// Events that do not fit are discarded rather than blocking the
    /// delivery thread. Once the receiver is dropped the subscription is
    /// removed on the next emission.
    pub fn subscribe_channel(&self, capacity: usize) -> (SubscriptionId, Receiver<CaptureEvent>) {
        let (tx, rx) = bounded(capacity.max(1));
        let id = self.allocate_id();
        self.receivers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);
        tracing::debug!(subscription = id.0, capacity, "Channel subscribed");
        (id, rx)
    }

    fn allocate_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Removes a subscription. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
            || self
                .receivers
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id)
                .is_some();
        if removed {
            tracing::debug!(subscription = id.0, "Listener unsubscribed");
        }
        removed
    }

    /// Number of registered subscriptions, listeners and channels alike.
    pub fn subscriber_count(&self) -> usize {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        let receivers = self
            .receivers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        listeners + receivers
    }

    /// Returns true if at least one listener is registered.
    pub fn has_subscribers(&self) -> bool {
        self.subscriber_count() > 0
    }

    /// Delivers `event` to every subscription, returning how many completed.
    ///
    /// Channels whose receiver is gone are unsubscribed.
    pub fn emit(&self, event: &CaptureEvent) -> usize {
        let snapshot: Vec<(SubscriptionId, Listener)> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, listener)| (*id, Arc::clone(listener)))
            .collect();

        let mut delivered = 0;
        for (id, listener) in snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(()) => delivered += 1,
                Err(payload) => {
                    self.stats.record_listener_failure();
                    tracing::error!(
                        subscription = id.0,
                        sequence = event.sequence(),
                        reason = %panic_message(payload.as_ref()),
                        "Listener notification failed"
                    );
                }
            }
        }
        delivered + self.forward(event)
    }

    fn forward(&self, event: &CaptureEvent) -> usize {
        let snapshot: Vec<(SubscriptionId, Sender<CaptureEvent>)> = self
            .receivers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut delivered = 0;
        for (id, tx) in snapshot {
            match tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    delivered += 1;
                    tracing::warn!(
                        subscription = id.0,
                        sequence = event.sequence(),
                        "Event receiver full; event discarded"
                    );
                }
                Err(TrySendError::Disconnected(_)) => {
                    self.receivers
                        .write()
                        .unwrap_or_else(PoisonError::into_inner)
                        .remove(&id);
                    tracing::debug!(subscription = id.0, "Event receiver dropped; unsubscribed");
                }
            }
        }
        delivered
    }
}

impl Default for EventChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventChannel")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
