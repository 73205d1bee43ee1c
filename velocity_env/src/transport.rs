//! Stream transport abstraction for the velocity analyzer stage.

use async_trait::async_trait;

use crate::error::TransportError;
use crate::types::StreamMessage;

/// Inbound side: pulls one message at a time.
///
/// # Implementations
///
/// - **Production**: `RedisSource` - Redis Streams `XREAD BLOCK`
/// - **Tests**: `ChannelSource` - tokio mpsc channel
///
/// Ordering and durability are the transport's concern; the stage only
/// relies on messages arriving one by one in stream order.
#[async_trait]
pub trait FrameSource: Send + Sync + 'static {
    /// Waits for the next message.
    ///
    /// # Returns
    /// * `Ok(message)` - The next message in stream order
    /// * `Err(TransportError::Closed)` - The input ended
    /// * `Err(_)` - The transport failed and cannot continue
    ///
    /// # Cancellation
    /// Dropping the future before it resolves must not corrupt the source;
    /// a message that was not returned is not considered consumed.
    async fn recv(&self) -> Result<StreamMessage, TransportError>;
}

/// Outbound side: pushes one message at a time.
#[async_trait]
pub trait FrameSink: Send + Sync + 'static {
    /// Appends a payload to the given stream.
    ///
    /// # Returns
    /// * `Ok(())` - The message was accepted by the transport
    /// * `Err(_)` - The transport failed and cannot continue
    async fn send(&self, stream_key: &str, payload: Vec<u8>) -> Result<(), TransportError>;
}
