//! Error types for the velocity analyzer transport layer.

use thiserror::Error;

/// Errors that can occur while pulling or pushing stream messages.
///
/// Every variant except `Closed` means the transport is unusable and the
/// stage should shut down.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not establish a connection to the broker
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Pulling the next message failed
    #[error("Receive error: {0}")]
    ReceiveError(String),

    /// Pushing a message failed
    #[error("Send error: {0}")]
    SendError(String),

    /// The other end of the stream went away (end of input)
    #[error("Stream closed")]
    Closed,
}

impl TransportError {
    /// Creates a connection error.
    pub fn connection(msg: impl std::fmt::Display) -> Self {
        Self::ConnectionError(msg.to_string())
    }

    /// Creates a receive error.
    pub fn receive(msg: impl std::fmt::Display) -> Self {
        Self::ReceiveError(msg.to_string())
    }

    /// Creates a send error.
    pub fn send(msg: impl std::fmt::Display) -> Self {
        Self::SendError(msg.to_string())
    }
}
