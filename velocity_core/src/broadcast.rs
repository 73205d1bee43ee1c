//! Snapshot broadcasting - latest-wins delivery to a dynamic observer set
//!
//! ```text
//!  frame loop                      delivery loop                observers
//!  ──────────                      ─────────────                ─────────
//!  publish(snapshot) ──► [ single slot ] ──► serialize once ──► [slot] ──► ws 1
//!   (never blocks,        (overwritten if                    ├► [slot] ──► ws 2
//!    coalesces)            not yet drained)                  └► [slot] ──► ws 3
//! ```
//!
//! Both hand-offs are `tokio::sync::watch` slots: memory is bounded by one
//! snapshot plus one payload per observer, however slow an observer is.
//! An observer registering mid-stream only sees payloads delivered after
//! it registered.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::snapshot::Snapshot;

/// Destination for the snapshots produced after each frame.
pub trait SnapshotSink: Send {
    /// Hand a snapshot off for delivery. Must not block.
    fn publish(&self, snapshot: Snapshot);
}

/// Errors raised by the observer registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BroadcastError {
    #[error("Broadcaster is shut down")]
    Closed,
}

// ============================================================================
// PUBLISHER (frame loop side)
// ============================================================================

/// Non-blocking, coalescing entry point used by the frame loop.
#[derive(Debug, Clone)]
pub struct SnapshotPublisher {
    slot: Arc<watch::Sender<Option<Arc<Snapshot>>>>,
}

impl SnapshotSink for SnapshotPublisher {
    fn publish(&self, snapshot: Snapshot) {
        // Replaces any snapshot the delivery loop has not drained yet
        self.slot.send_replace(Some(Arc::new(snapshot)));
    }
}

// ============================================================================
// OBSERVER REGISTRY
// ============================================================================

#[derive(Debug, Default)]
struct RegistryInner {
    observers: HashMap<u64, watch::Sender<Arc<str>>>,
    closed: bool,
}

/// The set of connected observers. Cheap to clone; all clones share state.
#[derive(Debug, Clone, Default)]
pub struct ObserverRegistry {
    inner: Arc<Mutex<RegistryInner>>,
    next_id: Arc<AtomicU64>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add an observer. It receives payloads delivered from now on.
    pub fn register(&self) -> Result<Observer, BroadcastError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(BroadcastError::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(Arc::<str>::from(""));
        inner.observers.insert(id, tx);
        tracing::debug!(observer = id, total = inner.observers.len(), "observer registered");

        Ok(Observer {
            id,
            rx,
            registry: self.clone(),
        })
    }

    /// Number of currently registered observers.
    pub fn len(&self) -> usize {
        self.lock().observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().observers.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Overwrite every observer's slot with `payload`. Returns the number
    /// of observers reached.
    fn deliver(&self, payload: Arc<str>) -> usize {
        let mut inner = self.lock();
        inner.observers.retain(|_, tx| !tx.is_closed());
        for tx in inner.observers.values() {
            tx.send_replace(payload.clone());
        }
        inner.observers.len()
    }

    fn remove(&self, id: u64) {
        if self.lock().observers.remove(&id).is_some() {
            tracing::debug!(observer = id, "observer removed");
        }
    }

    /// Refuse new observers and drop existing slots, which ends every
    /// [`Observer::next`] stream.
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        inner.observers.clear();
    }
}

/// Receiving end held by one observer connection.
#[derive(Debug)]
pub struct Observer {
    id: u64,
    rx: watch::Receiver<Arc<str>>,
    registry: ObserverRegistry,
}

impl Observer {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next payload. Intermediate payloads are skipped if the
    /// observer falls behind. Returns `None` once the registry is closed.
    pub async fn next(&mut self) -> Option<Arc<str>> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

impl Drop for Observer {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}

// ============================================================================
// BROADCASTER (delivery loop)
// ============================================================================

/// Owns the delivery loop between the publisher slot and the observers.
#[derive(Debug)]
pub struct SnapshotBroadcaster {
    latest: watch::Receiver<Option<Arc<Snapshot>>>,
    observers: ObserverRegistry,
}

impl SnapshotBroadcaster {
    /// Create a broadcaster and the publisher handle feeding it.
    pub fn new() -> (Self, SnapshotPublisher) {
        let (tx, rx) = watch::channel(None);
        let broadcaster = Self {
            latest: rx,
            observers: ObserverRegistry::new(),
        };
        let publisher = SnapshotPublisher { slot: Arc::new(tx) };
        (broadcaster, publisher)
    }

    /// Registry handle for the component accepting observer connections.
    pub fn observers(&self) -> ObserverRegistry {
        self.observers.clone()
    }

    /// Deliver snapshots until `shutdown` fires or every publisher is gone,
    /// then close the registry.
    pub async fn run(mut self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                changed = self.latest.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let latest = self.latest.borrow_and_update().clone();
                    if let Some(snapshot) = latest {
                        self.deliver(&snapshot);
                    }
                }
            }
        }

        self.observers.close();
        tracing::info!("snapshot delivery stopped");
    }

    fn deliver(&self, snapshot: &Snapshot) {
        if self.observers.is_empty() {
            tracing::trace!("no observers, snapshot dropped");
            return;
        }

        match snapshot.to_json() {
            Ok(json) => {
                let reached = self.observers.deliver(Arc::from(json));
                tracing::trace!(
                    objects = snapshot.len(),
                    observers = reached,
                    "snapshot delivered"
                );
            }
            Err(e) => tracing::warn!(error = %e, "snapshot dropped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ObjectId;
    use crate::geo::GeoPosition;
    use crate::snapshot::SnapshotEntry;
    use std::time::Duration;
    use tokio::time::timeout;

    fn snapshot_with(velocity: f64) -> Snapshot {
        Snapshot::new(vec![SnapshotEntry {
            id: ObjectId::new(vec![0x01]),
            velocity_kmh: velocity,
            position: GeoPosition::new(1.0, 2.0).unwrap(),
        }])
    }

    fn velocity_of(payload: &str) -> f64 {
        let value: serde_json::Value = serde_json::from_str(payload).unwrap();
        value["data"][0]["velocity"].as_f64().unwrap()
    }

    #[test]
    fn test_publish_without_delivery_loop_never_blocks() {
        let (_broadcaster, publisher) = SnapshotBroadcaster::new();
        for i in 0..10_000 {
            publisher.publish(snapshot_with(i as f64));
        }
    }

    #[tokio::test]
    async fn test_observer_receives_published_snapshot() {
        let (broadcaster, publisher) = SnapshotBroadcaster::new();
        let registry = broadcaster.observers();
        let mut observer = registry.register().unwrap();

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(broadcaster.run(shutdown.clone()));

        publisher.publish(snapshot_with(12.5));
        let payload = timeout(Duration::from_secs(1), observer.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(velocity_of(&payload), 12.5);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_slow_observer_sees_latest_only() {
        let (broadcaster, publisher) = SnapshotBroadcaster::new();
        let registry = broadcaster.observers();
        let mut slow = registry.register().unwrap();
        let mut fast = registry.register().unwrap();

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(broadcaster.run(shutdown.clone()));

        for v in 1..=5 {
            publisher.publish(snapshot_with(v as f64));
            // Fast observer keeps up
            let payload = timeout(Duration::from_secs(1), fast.next()).await.unwrap().unwrap();
            assert_eq!(velocity_of(&payload), v as f64);
        }

        // Slow observer never read; it only holds the newest payload
        let payload = timeout(Duration::from_secs(1), slow.next()).await.unwrap().unwrap();
        assert_eq!(velocity_of(&payload), 5.0);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_late_observer_gets_no_history() {
        let (broadcaster, publisher) = SnapshotBroadcaster::new();
        let registry = broadcaster.observers();
        let mut early = registry.register().unwrap();

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(broadcaster.run(shutdown.clone()));

        publisher.publish(snapshot_with(1.0));
        timeout(Duration::from_secs(1), early.next()).await.unwrap().unwrap();

        let mut late = registry.register().unwrap();
        assert!(timeout(Duration::from_millis(50), late.next()).await.is_err());

        publisher.publish(snapshot_with(2.0));
        let payload = timeout(Duration::from_secs(1), late.next()).await.unwrap().unwrap();
        assert_eq!(velocity_of(&payload), 2.0);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_observer_is_removed() {
        let registry = ObserverRegistry::new();
        let a = registry.register().unwrap();
        let _b = registry.register().unwrap();
        assert_eq!(registry.len(), 2);

        drop(a);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_observers() {
        let (broadcaster, _publisher) = SnapshotBroadcaster::new();
        let registry = broadcaster.observers();
        let mut observer = registry.register().unwrap();

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(broadcaster.run(shutdown.clone()));
        shutdown.cancel();
        task.await.unwrap();

        assert!(observer.next().await.is_none());
        assert!(registry.is_closed());
        assert_eq!(registry.register().unwrap_err(), BroadcastError::Closed);
    }
}
