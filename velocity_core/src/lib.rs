//! Velocity Core - object tracking and speed estimation for geo-referenced detections
//!
//! One stage of a video-analytics pipeline: every frame carries detections
//! with a geographic position. This library
//! 1. **Tracks** each object id across frames (`tracking`)
//! 2. **Estimates** a windowed moving-average speed per object (`velocity`)
//! 3. **Annotates** each detection with that speed (`processor`)
//! 4. **Broadcasts** latest-wins snapshots of all tracked objects (`broadcast`)
//!
//! Time is taken from frame timestamps only; the wall clock never affects
//! velocities or eviction.

pub mod broadcast;
pub mod codec;
pub mod error;
pub mod frame;
pub mod geo;
pub mod processor;
pub mod snapshot;
pub mod tracking;
pub mod velocity;

// Re-export key types for convenience
pub use broadcast::{
    BroadcastError, Observer, ObserverRegistry, SnapshotBroadcaster, SnapshotPublisher,
    SnapshotSink,
};
pub use codec::{FrameCodec, ProtoFrameCodec};
pub use error::ProcessError;
pub use frame::{BoundingBox, Detection, Frame, ObjectId};
pub use geo::{distance_m, GeoPosition, EARTH_RADIUS_M};
pub use processor::{FrameProcessor, ProcessedFrame};
pub use snapshot::{Snapshot, SnapshotEntry};
pub use tracking::{
    TrackedObjectState, TrackingConfig, TrackingError, TrackingStore, DEFAULT_EVICTION_TTL_MS,
};
pub use velocity::{
    instantaneous_kmh, PositionSample, VelocityWindow, WindowUpdate, DEFAULT_WINDOW_CAPACITY,
};
