//! The TRACKING store - per-object state keyed by detector identity
//!
//! Each object id seen in the input gets a `TrackedObjectState` holding its
//! velocity window. Time is driven entirely by frame timestamps:
//! eviction compares `last_seen_ms` against the timestamp of the frame
//! currently being processed, never against the wall clock.

use std::collections::HashMap;

use crate::frame::ObjectId;
use crate::geo::GeoPosition;
use crate::snapshot::{Snapshot, SnapshotEntry};
use crate::velocity::{PositionSample, VelocityWindow, WindowUpdate, DEFAULT_WINDOW_CAPACITY};

/// Default time-to-live of an unseen object (stream milliseconds).
pub const DEFAULT_EVICTION_TTL_MS: u64 = 2000;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the TrackingStore
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackingConfig {
    /// Objects unseen for at least this long are evicted (default: 2000 ms)
    pub eviction_ttl_ms: u64,

    /// Samples kept per object for smoothing (default: 20)
    pub window_capacity: usize,
}

impl TrackingConfig {
    /// Create a validated configuration.
    ///
    /// The full-window update needs an oldest *pair*, so the window must
    /// hold at least two samples.
    pub fn new(eviction_ttl_ms: u64, window_capacity: usize) -> Result<Self, TrackingError> {
        if window_capacity < 2 {
            return Err(TrackingError::InvalidConfig(format!(
                "window capacity must be at least 2, got {window_capacity}"
            )));
        }
        if eviction_ttl_ms == 0 {
            return Err(TrackingError::InvalidConfig(
                "eviction TTL must be positive".to_string(),
            ));
        }
        Ok(Self {
            eviction_ttl_ms,
            window_capacity,
        })
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            eviction_ttl_ms: DEFAULT_EVICTION_TTL_MS,
            window_capacity: DEFAULT_WINDOW_CAPACITY,
        }
    }
}

// ============================================================================
// TRACKED OBJECT (Internal State)
// ============================================================================

/// Tracking state of one physical object.
#[derive(Debug, Clone)]
pub struct TrackedObjectState {
    /// Detector-assigned identity, stable across frames
    pub id: ObjectId,

    /// Sample history and smoothed speed
    window: VelocityWindow,
}

impl TrackedObjectState {
    fn new(id: ObjectId, first: PositionSample, capacity: usize) -> Self {
        Self {
            id,
            window: VelocityWindow::new(first, capacity),
        }
    }

    pub fn velocity_kmh(&self) -> f64 {
        self.window.velocity_kmh()
    }

    /// Timestamp of the newest sample.
    pub fn last_seen_ms(&self) -> u64 {
        self.window.newest().timestamp_ms
    }

    /// Position of the newest sample.
    pub fn last_position(&self) -> GeoPosition {
        self.window.newest().position
    }

    pub fn history_len(&self) -> usize {
        self.window.len()
    }

    pub fn window(&self) -> &VelocityWindow {
        &self.window
    }
}

// ============================================================================
// TRACKING STORE
// ============================================================================

/// Mapping from object identity to tracking state.
///
/// Owned exclusively by the frame loop; observers only ever see the
/// detached copies returned by [`TrackingStore::snapshot`].
#[derive(Debug, Default)]
pub struct TrackingStore {
    objects: HashMap<ObjectId, TrackedObjectState>,
    config: TrackingConfig,
}

impl TrackingStore {
    pub fn new(config: TrackingConfig) -> Self {
        Self {
            objects: HashMap::new(),
            config,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(TrackingConfig::default())
    }

    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    /// Record a sighting and return the object's current velocity (km/h).
    ///
    /// Unknown ids start a single-sample history at 0 km/h. A sighting
    /// whose timestamp does not advance past the previous one leaves the
    /// velocity unchanged.
    pub fn upsert(&mut self, id: &ObjectId, position: GeoPosition, timestamp_ms: u64) -> f64 {
        let sample = PositionSample::new(position, timestamp_ms);

        match self.objects.get_mut(id) {
            Some(state) => match state.window.push(sample) {
                WindowUpdate::Accepted { velocity_kmh } => velocity_kmh,
                WindowUpdate::DegenerateTimeDelta { velocity_kmh } => {
                    tracing::debug!(
                        object = %id,
                        timestamp_ms,
                        last_seen_ms = state.last_seen_ms(),
                        "non-advancing timestamp, velocity unchanged"
                    );
                    velocity_kmh
                }
            },
            None => {
                let state =
                    TrackedObjectState::new(id.clone(), sample, self.config.window_capacity);
                let velocity = state.velocity_kmh();
                self.objects.insert(id.clone(), state);
                velocity
            }
        }
    }

    /// Remove every object unseen for at least the configured TTL.
    ///
    /// Returns the number of evicted objects.
    pub fn evict_stale(&mut self, current_timestamp_ms: u64) -> usize {
        self.evict_older_than(current_timestamp_ms, self.config.eviction_ttl_ms)
    }

    /// Remove every object with `current - last_seen >= ttl_ms`.
    pub fn evict_older_than(&mut self, current_timestamp_ms: u64, ttl_ms: u64) -> usize {
        let before = self.objects.len();
        self.objects.retain(|id, state| {
            let keep = current_timestamp_ms.saturating_sub(state.last_seen_ms()) < ttl_ms;
            if !keep {
                tracing::debug!(
                    object = %id,
                    last_seen_ms = state.last_seen_ms(),
                    "evicting stale object"
                );
            }
            keep
        });
        before - self.objects.len()
    }

    /// Detached copy of every tracked object, ordered by id.
    pub fn snapshot(&self) -> Snapshot {
        let mut entries: Vec<SnapshotEntry> = self
            .objects
            .values()
            .map(|state| SnapshotEntry {
                id: state.id.clone(),
                velocity_kmh: state.velocity_kmh(),
                position: state.last_position(),
            })
            .collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        Snapshot::new(entries)
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn get(&self, id: &ObjectId) -> Option<&TrackedObjectState> {
        self.objects.get(id)
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.objects.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn objects(&self) -> impl Iterator<Item = &TrackedObjectState> {
        self.objects.values()
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// Errors that can occur while building tracking inputs.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TrackingError {
    #[error("Invalid coordinates: {0}")]
    InvalidCoordinates(String),

    #[error("Invalid tracking configuration: {0}")]
    InvalidConfig(String),
}

// ============================================================================
// TESTS
// ============================================================================
