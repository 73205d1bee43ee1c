//! Common types for the transport abstraction.

/// One message pulled from (or pushed to) a stream.
///
/// The payload is opaque bytes; decoding is the frame codec's concern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMessage {
    /// Full stream key, e.g. `objecttracker:stream1`
    pub stream_key: String,

    /// The raw message bytes
    pub payload: Vec<u8>,
}

impl StreamMessage {
    /// Creates a new message for the given stream.
    pub fn new(stream_key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            stream_key: stream_key.into(),
            payload,
        }
    }

    /// The stream id: the part of the key after the first `:`.
    ///
    /// Keys without a prefix are their own id.
    pub fn stream_id(&self) -> &str {
        stream_id(&self.stream_key)
    }

    /// Returns the payload size in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

/// Extracts the stream id from a `<prefix>:<id>` key.
pub fn stream_id(stream_key: &str) -> &str {
    match stream_key.split_once(':') {
        Some((_, id)) => id,
        None => stream_key,
    }
}

/// Builds a `<prefix>:<id>` stream key.
pub fn stream_key(prefix: &str, stream_id: &str) -> String {
    format!("{prefix}:{stream_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_id_extraction() {
        assert_eq!(stream_id("objecttracker:stream1"), "stream1");
        assert_eq!(stream_id("a:b:c"), "b:c");
        assert_eq!(stream_id("bare"), "bare");
    }

    #[test]
    fn test_stream_key_roundtrip() {
        let key = stream_key("velocityanalyzer", "stream1");
        assert_eq!(key, "velocityanalyzer:stream1");

        let msg = StreamMessage::new(key, vec![1, 2, 3]);
        assert_eq!(msg.stream_id(), "stream1");
        assert_eq!(msg.size(), 3);
    }
}
