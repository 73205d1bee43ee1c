//! Velocity analyzer pipeline stage
//!
//! Reads tracked detections from a Redis stream, annotates each with the
//! object's speed over ground, writes the frames to an output stream and
//! serves live snapshots of every tracked object over a websocket.

pub mod config;
pub mod metrics;
pub mod observers;
pub mod stage;

pub use config::StageConfig;
pub use metrics::StageMetrics;
pub use stage::{run, FrameLoop, LoopExit};
