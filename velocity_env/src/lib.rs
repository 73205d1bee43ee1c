//! Velocity Analyzer Transport Layer
//!
//! The stage pulls encoded frames from an input stream and pushes annotated
//! frames to an output stream, one message at a time. This crate hides the
//! broker behind two traits so the frame loop runs unchanged against
//! **Production** (Redis Streams) and **Tests** (in-memory channels).
//!
//! # Example
//!
//! ```ignore
//! use velocity_env::{FrameSink, FrameSource, stream_key};
//!
//! async fn relay<Src: FrameSource, Snk: FrameSink>(src: &Src, snk: &Snk) {
//!     while let Ok(msg) = src.recv().await {
//!         let out = stream_key("velocityanalyzer", msg.stream_id());
//!         snk.send(&out, msg.payload).await.ok();
//!     }
//! }
//! ```

mod error;
mod memory;
mod redis_impl;
mod transport;
mod types;

pub use error::TransportError;
pub use memory::{channel_sink, channel_source, ChannelSink, ChannelSource};
pub use redis_impl::{RedisConfig, RedisSink, RedisSource, PAYLOAD_FIELD};
pub use transport::{FrameSink, FrameSource};
pub use types::{stream_id, stream_key, StreamMessage};
