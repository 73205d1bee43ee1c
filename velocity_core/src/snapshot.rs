//! Point-in-time view of all tracked objects, and its observer payload.
//!
//! Payload shape delivered to observers:
//!
//! ```text
//! { "data": [ { "id": "<hex>", "velocity": 12.5,
//!               "coordinates": { "lat": 52.1, "lng": 13.4 } }, ... ] }
//! ```

use serde::Serialize;

use crate::error::ProcessError;
use crate::frame::ObjectId;
use crate::geo::GeoPosition;

/// One tracked object as seen at snapshot time.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotEntry {
    pub id: ObjectId,
    pub velocity_kmh: f64,
    pub position: GeoPosition,
}

/// Owned copy of the store's contents; shares nothing with the store.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot {
    entries: Vec<SnapshotEntry>,
}

impl Snapshot {
    pub fn new(entries: Vec<SnapshotEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[SnapshotEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn find(&self, id: &ObjectId) -> Option<&SnapshotEntry> {
        self.entries.iter().find(|e| &e.id == id)
    }

    /// Serialize into the observer payload.
    pub fn to_json(&self) -> Result<String, ProcessError> {
        let payload = SnapshotPayload {
            data: self.entries.iter().map(SnapshotRecord::from).collect(),
        };
        serde_json::to_string(&payload).map_err(|e| ProcessError::EncodeFailure(e.to_string()))
    }
}

// ============================================================================
// WIRE PAYLOAD
// ============================================================================

#[derive(Debug, Serialize)]
struct SnapshotPayload {
    data: Vec<SnapshotRecord>,
}

#[derive(Debug, Serialize)]
struct SnapshotRecord {
    id: String,
    velocity: f64,
    coordinates: Coordinates,
}

#[derive(Debug, Serialize)]
struct Coordinates {
    lat: f64,
    lng: f64,
}

impl From<&SnapshotEntry> for SnapshotRecord {
    fn from(entry: &SnapshotEntry) -> Self {
        Self {
            id: entry.id.to_hex(),
            velocity: entry.velocity_kmh,
            coordinates: Coordinates {
                lat: entry.position.latitude(),
                lng: entry.position.longitude(),
            },
        }
    }
}
