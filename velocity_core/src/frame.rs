//! Decoded frame model.
//!
//! Frames reach the processor already validated: every detection carries
//! an identifier and a `GeoPosition`, which cannot hold invalid
//! coordinates. Fields the tracker does not interpret (source id, class,
//! bounding box) are carried through untouched.

use std::fmt;

/// Detector-assigned object identity (opaque bytes).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ObjectId(Vec<u8>);

impl ObjectId {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Lowercase hex encoding, as used in snapshot payloads.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl From<Vec<u8>> for ObjectId {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Pixel-space bounding box of a detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
}

/// One observed object within a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub object_id: ObjectId,

    /// Geographic position of the object
    pub position: crate::geo::GeoPosition,

    /// Annotation slot of the wire message.
    ///
    /// Inbound it holds the detector confidence; outbound it is overwritten
    /// with the object's velocity in km/h. Downstream consumers rely on
    /// reading velocity from this field.
    pub annotation: f64,

    pub class_id: u32,

    pub bounding_box: Option<BoundingBox>,
}

/// One unit of input: a capture timestamp and its detections.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Frame {
    pub source_id: String,

    /// Capture time (Unix milliseconds); the tracker's only clock
    pub timestamp_utc_ms: u64,

    pub detections: Vec<Detection>,
}
