//! Production transport backed by Redis Streams.
//!
//! Inbound frames are read with `XREAD BLOCK` starting at `$`, so a stage
//! that (re)starts only sees messages appended after it connected. Outbound
//! frames are appended with `XADD MAXLEN ~ n`, trimming the output stream
//! to roughly `n` entries.

use std::collections::VecDeque;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamMaxlen, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use tokio::sync::Mutex;

use crate::error::TransportError;
use crate::transport::{FrameSink, FrameSource};
use crate::types::StreamMessage;

/// Stream entry field holding the encoded frame.
pub const PAYLOAD_FIELD: &str = "proto_data";

/// Connection settings for the Redis transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
}

impl RedisConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `redis://host:port`
    pub fn url(&self) -> String {
        format!("redis://{}:{}", self.host, self.port)
    }

    /// Opens an auto-reconnecting connection.
    pub async fn connect(&self) -> Result<ConnectionManager, TransportError> {
        let url = self.url();
        let client = redis::Client::open(url.as_str())
            .map_err(|e| TransportError::connection(format!("{url}: {e}")))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| TransportError::connection(format!("{url}: {e}")))?;
        tracing::info!(url = %url, "connected to redis");
        Ok(manager)
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self::new("localhost", 6379)
    }
}

// ============================================================================
// SOURCE
// ============================================================================

#[derive(Debug)]
struct ReadState {
    /// Last delivered entry id, `$` until the first entry arrives
    last_id: String,
    /// Entries fetched but not yet handed out
    pending: VecDeque<StreamMessage>,
}

/// Reads one stream with `XREAD BLOCK`.
pub struct RedisSource {
    conn: ConnectionManager,
    stream_key: String,
    block_ms: usize,
    state: Mutex<ReadState>,
}

impl RedisSource {
    /// Connects and prepares to read new entries of `stream_key`.
    pub async fn connect(
        config: &RedisConfig,
        stream_key: impl Into<String>,
        block_ms: usize,
    ) -> Result<Self, TransportError> {
        let conn = config.connect().await?;
        Ok(Self::with_connection(conn, stream_key, block_ms))
    }

    pub fn with_connection(
        conn: ConnectionManager,
        stream_key: impl Into<String>,
        block_ms: usize,
    ) -> Self {
        Self {
            conn,
            stream_key: stream_key.into(),
            block_ms,
            state: Mutex::new(ReadState {
                last_id: "$".to_string(),
                pending: VecDeque::new(),
            }),
        }
    }

    pub fn stream_key(&self) -> &str {
        &self.stream_key
    }

    /// One blocking read. Returns `None` when the block timeout elapsed.
    async fn read_batch(&self, last_id: &str) -> Result<Option<StreamReadReply>, TransportError> {
        let opts = StreamReadOptions::default().block(self.block_ms).count(1);
        let mut conn = self.conn.clone();
        conn.xread_options(&[self.stream_key.as_str()], &[last_id], &opts)
            .await
            .map_err(TransportError::receive)
    }
}

#[async_trait]
impl FrameSource for RedisSource {
    async fn recv(&self) -> Result<StreamMessage, TransportError> {
        let mut state = self.state.lock().await;

        loop {
            if let Some(message) = state.pending.pop_front() {
                return Ok(message);
            }

            let Some(reply) = self.read_batch(&state.last_id).await? else {
                tracing::trace!(stream = %self.stream_key, "xread timed out, polling again");
                continue;
            };

            for key in reply.keys {
                for entry in key.ids {
                    state.last_id = entry.id.clone();
                    match entry.get::<Vec<u8>>(PAYLOAD_FIELD) {
                        Some(payload) => state
                            .pending
                            .push_back(StreamMessage::new(key.key.clone(), payload)),
                        None => tracing::warn!(
                            stream = %key.key,
                            entry = %entry.id,
                            field = PAYLOAD_FIELD,
                            "entry without payload field skipped"
                        ),
                    }
                }
            }
        }
    }
}

// ============================================================================
// SINK
// ============================================================================

/// Appends to output streams with `XADD MAXLEN ~ n`.
pub struct RedisSink {
    conn: ConnectionManager,
    max_len: usize,
}

impl RedisSink {
    pub async fn connect(config: &RedisConfig, max_len: usize) -> Result<Self, TransportError> {
        let conn = config.connect().await?;
        Ok(Self::with_connection(conn, max_len))
    }

    pub fn with_connection(conn: ConnectionManager, max_len: usize) -> Self {
        Self { conn, max_len }
    }
}

#[async_trait]
impl FrameSink for RedisSink {
    async fn send(&self, stream_key: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let mut conn = self.conn.clone();
        let _id: String = conn
            .xadd_maxlen(
                stream_key,
                StreamMaxlen::Approx(self.max_len),
                "*",
                &[(PAYLOAD_FIELD, payload.as_slice())],
            )
            .await
            .map_err(TransportError::send)?;
        Ok(())
    }
}
