//! Windowed velocity estimation.
//!
//! Every object keeps a bounded history of position samples. The reported
//! speed is a moving average over the pairwise speeds between consecutive
//! samples, maintained incrementally:
//!
//! ```text
//! filling  (len < N):  v' = (v * len + v(last, new)) / (len + 1)
//! full     (len == N): v' = v + (v(last, new) - v(h[0], h[1])) / N
//! ```
//!
//! The creation sample counts as a zero-speed slot, so for constant motion
//! the estimate settles at `(N - 1) / N` of the true speed.

use std::collections::VecDeque;

use crate::geo::{distance_m, GeoPosition};

/// Default number of samples kept per object.
pub const DEFAULT_WINDOW_CAPACITY: usize = 20;

/// A position observed at a frame's capture time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSample {
    pub position: GeoPosition,
    /// Capture timestamp of the frame (Unix milliseconds)
    pub timestamp_ms: u64,
}

impl PositionSample {
    pub fn new(position: GeoPosition, timestamp_ms: u64) -> Self {
        Self {
            position,
            timestamp_ms,
        }
    }
}

/// Instantaneous speed in km/h travelling from `earlier` to `later`.
///
/// Returns `None` when `later` is not strictly after `earlier`; a zero (or
/// negative) time delta has no defined speed.
pub fn instantaneous_kmh(earlier: &PositionSample, later: &PositionSample) -> Option<f64> {
    if later.timestamp_ms <= earlier.timestamp_ms {
        return None;
    }
    let dt_s = (later.timestamp_ms - earlier.timestamp_ms) as f64 / 1000.0;
    Some(distance_m(earlier.position, later.position) / dt_s * 3.6)
}

/// Outcome of pushing a sample into a window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WindowUpdate {
    /// The sample was appended and the estimate recomputed.
    Accepted { velocity_kmh: f64 },
    /// The sample's timestamp did not advance past the newest sample.
    /// History and estimate are left untouched.
    DegenerateTimeDelta { velocity_kmh: f64 },
}

impl WindowUpdate {
    pub fn velocity_kmh(&self) -> f64 {
        match *self {
            WindowUpdate::Accepted { velocity_kmh } => velocity_kmh,
            WindowUpdate::DegenerateTimeDelta { velocity_kmh } => velocity_kmh,
        }
    }
}

/// Bounded sample history plus the smoothed speed derived from it.
///
/// Invariants:
/// - history is never empty
/// - `history.len() <= capacity`
/// - timestamps in history are strictly increasing
/// - `velocity_kmh >= 0`
#[derive(Debug, Clone)]
pub struct VelocityWindow {
    history: VecDeque<PositionSample>,
    capacity: usize,
    velocity_kmh: f64,
}

impl VelocityWindow {
    /// Start a window from the first sighting. Velocity starts at 0.
    ///
    /// `capacity` must be at least 2; `TrackingConfig` enforces this.
    pub fn new(first: PositionSample, capacity: usize) -> Self {
        let mut history = VecDeque::with_capacity(capacity);
        history.push_back(first);
        Self {
            history,
            capacity,
            velocity_kmh: 0.0,
        }
    }

    /// Fold a new sample into the window.
    pub fn push(&mut self, sample: PositionSample) -> WindowUpdate {
        let newest = self.newest();
        let v_new = match instantaneous_kmh(&newest, &sample) {
            Some(v) => v,
            None => {
                return WindowUpdate::DegenerateTimeDelta {
                    velocity_kmh: self.velocity_kmh,
                }
            }
        };

        let len = self.history.len();
        let updated = if len >= self.capacity {
            // Strictly increasing timestamps guarantee the oldest pair is defined
            let v_oldest = instantaneous_kmh(&self.history[0], &self.history[1]).unwrap_or(0.0);
            let updated = self.velocity_kmh + (v_new - v_oldest) / self.capacity as f64;
            self.history.pop_front();
            updated
        } else {
            (self.velocity_kmh * len as f64 + v_new) / (len + 1) as f64
        };

        self.history.push_back(sample);
        self.velocity_kmh = updated.max(0.0);

        WindowUpdate::Accepted {
            velocity_kmh: self.velocity_kmh,
        }
    }

    pub fn velocity_kmh(&self) -> f64 {
        self.velocity_kmh
    }

    /// The most recent sample.
    pub fn newest(&self) -> PositionSample {
        // history is never empty: created with one sample, pop only precedes a push
        self.history[self.history.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples from oldest to newest.
    pub fn samples(&self) -> impl Iterator<Item = &PositionSample> {
        self.history.iter()
    }
}
