//! In-memory transport over tokio mpsc channels.
//!
//! Used by tests and local runs without a broker. Dropping every sender
//! of a [`ChannelSource`] ends the input with `TransportError::Closed`.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::transport::{FrameSink, FrameSource};
use crate::types::StreamMessage;

/// Inbound channel transport.
pub struct ChannelSource {
    /// Receiver behind a tokio mutex so `recv` can take `&self`
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<StreamMessage>>>,
}

impl ChannelSource {
    pub fn new(rx: mpsc::Receiver<StreamMessage>) -> Self {
        Self {
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
        }
    }
}

#[async_trait]
impl FrameSource for ChannelSource {
    async fn recv(&self) -> Result<StreamMessage, TransportError> {
        let mut rx = self.rx.lock().await;
        rx.recv().await.ok_or(TransportError::Closed)
    }
}

/// Outbound channel transport.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<StreamMessage>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<StreamMessage>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send(&self, stream_key: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.tx
            .send(StreamMessage::new(stream_key, payload))
            .await
            .map_err(|_| TransportError::send("Channel closed"))
    }
}

/// Creates a source and the sender feeding it.
pub fn channel_source(buffer: usize) -> (mpsc::Sender<StreamMessage>, ChannelSource) {
    let (tx, rx) = mpsc::channel(buffer);
    (tx, ChannelSource::new(rx))
}

/// Creates a sink and the receiver draining it.
pub fn channel_sink(buffer: usize) -> (ChannelSink, mpsc::Receiver<StreamMessage>) {
    let (tx, rx) = mpsc::channel(buffer);
    (ChannelSink::new(tx), rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_source_yields_in_order_then_closes() {
        let (tx, source) = channel_source(4);
        tx.send(StreamMessage::new("in:s1", vec![1])).await.unwrap();
        tx.send(StreamMessage::new("in:s1", vec![2])).await.unwrap();
        drop(tx);

        assert_eq!(source.recv().await.unwrap().payload, vec![1]);
        assert_eq!(source.recv().await.unwrap().payload, vec![2]);
        assert!(matches!(source.recv().await, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_sink_forwards_key_and_payload() {
        let (sink, mut rx) = channel_sink(4);
        sink.send("out:s1", vec![9, 9]).await.unwrap();

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.stream_key, "out:s1");
        assert_eq!(msg.payload, vec![9, 9]);
    }

    #[tokio::test]
    async fn test_sink_reports_closed_receiver() {
        let (sink, rx) = channel_sink(1);
        drop(rx);
        assert!(matches!(
            sink.send("out:s1", vec![]).await,
            Err(TransportError::SendError(_))
        ));
    }
}
