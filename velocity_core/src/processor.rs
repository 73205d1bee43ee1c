//! Frame Processor - drives the tracker once per inbound frame.
//!
//! # Pipeline
//!
//! ```text
//! bytes ──decode──► Frame ──upsert × N──► annotate ──evict──► re-encode ──► bytes
//!                                                     │
//!                                                     └──► snapshot ──► SnapshotSink
//! ```
//!
//! Frames are handled strictly one at a time, in arrival order. Decoding
//! (including detection validation) finishes before the store is touched,
//! so a rejected frame leaves no trace.

use crate::broadcast::SnapshotSink;
use crate::codec::FrameCodec;
use crate::error::ProcessError;
use crate::frame::Frame;
use crate::tracking::{TrackingConfig, TrackingStore};

/// Result of handling one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedFrame {
    /// Encoded, annotated frame ready for the outbound stream
    pub payload: Vec<u8>,

    /// Number of detections annotated
    pub detections: usize,

    /// Objects tracked after eviction
    pub tracked_objects: usize,

    /// Objects evicted while handling this frame
    pub evicted: usize,
}

/// Owns the tracking store and applies frames to it.
pub struct FrameProcessor<C, S> {
    store: TrackingStore,
    codec: C,
    snapshots: S,
}

impl<C, S> FrameProcessor<C, S>
where
    C: FrameCodec,
    S: SnapshotSink,
{
    pub fn new(config: TrackingConfig, codec: C, snapshots: S) -> Self {
        Self {
            store: TrackingStore::new(config),
            codec,
            snapshots,
        }
    }

    /// Read-only access to the tracking state.
    pub fn store(&self) -> &TrackingStore {
        &self.store
    }

    /// Decode, track, annotate and re-encode one inbound message, then
    /// publish a snapshot of the store.
    ///
    /// # Errors
    /// - `DecodeFailure` / `InvalidDetection`: nothing was mutated and no
    ///   snapshot was published.
    /// - `EncodeFailure`: the store was updated and a snapshot published,
    ///   but the annotated frame cannot be forwarded.
    pub fn process(&mut self, payload: &[u8]) -> Result<ProcessedFrame, ProcessError> {
        let mut frame = self.codec.decode(payload)?;
        let evicted = self.apply(&mut frame);

        let encoded = self.codec.annotate(payload, &frame);
        self.snapshots.publish(self.store.snapshot());

        Ok(ProcessedFrame {
            payload: encoded?,
            detections: frame.detections.len(),
            tracked_objects: self.store.len(),
            evicted,
        })
    }

    /// Track every detection, write velocities into the annotation slots
    /// and sweep stale objects using the frame's timestamp.
    ///
    /// Returns the number of evicted objects.
    pub fn apply(&mut self, frame: &mut Frame) -> usize {
        let timestamp = frame.timestamp_utc_ms;

        for detection in &mut frame.detections {
            detection.annotation = self
                .store
                .upsert(&detection.object_id, detection.position, timestamp);
        }

        let evicted = self.store.evict_stale(timestamp);
        tracing::trace!(
            timestamp_ms = timestamp,
            detections = frame.detections.len(),
            tracked = self.store.len(),
            evicted,
            "frame applied"
        );
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{proto, ProtoFrameCodec};
    use crate::frame::ObjectId;
    use crate::snapshot::Snapshot;
    use approx::assert_relative_eq;
    use prost::Message;
    use std::sync::{Arc, Mutex};

    /// Records every published snapshot.
    #[derive(Clone, Default)]
    struct RecordingSink {
        published: Arc<Mutex<Vec<Snapshot>>>,
    }

    impl SnapshotSink for RecordingSink {
        fn publish(&self, snapshot: Snapshot) {
            self.published.lock().unwrap().push(snapshot);
        }
    }

    impl RecordingSink {
        fn count(&self) -> usize {
            self.published.lock().unwrap().len()
        }

        fn last(&self) -> Snapshot {
            self.published.lock().unwrap().last().cloned().unwrap()
        }
    }

    fn processor() -> (FrameProcessor<ProtoFrameCodec, RecordingSink>, RecordingSink) {
        let sink = RecordingSink::default();
        let processor =
            FrameProcessor::new(TrackingConfig::default(), ProtoFrameCodec, sink.clone());
        (processor, sink)
    }

    fn detection(id: &[u8], lat: f64, lng: f64) -> proto::Detection {
        proto::Detection {
            bounding_box: Some(proto::BoundingBox {
                min_x: 10.0,
                min_y: 20.0,
                max_x: 30.0,
                max_y: 40.0,
            }),
            class_id: 2,
            confidence: 0.9,
            object_id: id.to_vec(),
            geo_coordinate: Some(proto::GeoCoordinate {
                latitude: lat,
                longitude: lng,
            }),
        }
    }

    fn message(timestamp: u64, detections: Vec<proto::Detection>) -> Vec<u8> {
        proto::SaeMessage {
            frame: Some(proto::VideoFrame {
                source_id: "stream1".to_string(),
                timestamp_utc_ms: timestamp,
            }),
            detections,
        }
        .encode_to_vec()
    }

    fn decode(bytes: &[u8]) -> proto::SaeMessage {
        proto::SaeMessage::decode(bytes).unwrap()
    }

    #[test]
    fn test_first_frame_annotates_zero() {
        let (mut processor, sink) = processor();
        let out = processor
            .process(&message(0, vec![detection(b"A", 0.0, 0.0)]))
            .unwrap();

        assert_eq!(out.detections, 1);
        assert_eq!(out.tracked_objects, 1);
        assert_eq!(decode(&out.payload).detections[0].confidence, 0.0);
        assert_eq!(sink.count(), 1);
        assert_eq!(sink.last().len(), 1);
    }

    #[test]
    fn test_velocity_written_to_annotation() {
        let (mut processor, sink) = processor();
        processor
            .process(&message(0, vec![detection(b"A", 0.0, 0.0)]))
            .unwrap();
        let out = processor
            .process(&message(1000, vec![detection(b"A", 0.0, 0.001)]))
            .unwrap();

        let annotated = decode(&out.payload).detections[0].confidence;
        let state = processor.store().get(&ObjectId::new(b"A".to_vec())).unwrap();
        assert!(annotated > 0.0);
        assert_eq!(annotated, state.velocity_kmh());
        assert_eq!(state.history_len(), 2);
        // ~400 km/h instantaneous, halved by the creation slot of the mean
        assert_relative_eq!(annotated, 200.15, epsilon = 0.1);

        let snapshot = sink.last();
        assert_eq!(snapshot.find(&ObjectId::new(b"A".to_vec())).unwrap().velocity_kmh, annotated);
    }

    #[test]
    fn test_output_preserves_other_fields() {
        let (mut processor, _sink) = processor();
        let input = message(
            5000,
            vec![detection(b"A", 48.1, 11.5), detection(b"B", -33.9, 151.2)],
        );
        let out = processor.process(&input).unwrap();

        let before = decode(&input);
        let after = decode(&out.payload);
        assert_eq!(before.frame, after.frame);
        assert_eq!(before.detections.len(), after.detections.len());
        for (b, a) in before.detections.iter().zip(after.detections.iter()) {
            assert_eq!(b.object_id, a.object_id);
            assert_eq!(b.geo_coordinate, a.geo_coordinate);
            assert_eq!(b.bounding_box, a.bounding_box);
            assert_eq!(b.class_id, a.class_id);
        }
    }

    #[test]
    fn test_stale_object_evicted_by_unrelated_frame() {
        let (mut processor, sink) = processor();
        processor
            .process(&message(0, vec![detection(b"A", 0.0, 0.0)]))
            .unwrap();
        let out = processor
            .process(&message(2500, vec![detection(b"B", 1.0, 1.0)]))
            .unwrap();

        assert_eq!(out.evicted, 1);
        let snapshot = sink.last();
        assert!(snapshot.find(&ObjectId::new(b"A".to_vec())).is_none());
        assert!(snapshot.find(&ObjectId::new(b"B".to_vec())).is_some());
    }

    #[test]
    fn test_object_kept_just_under_ttl() {
        let (mut processor, sink) = processor();
        processor
            .process(&message(0, vec![detection(b"A", 0.0, 0.0)]))
            .unwrap();
        processor.process(&message(1999, vec![])).unwrap();
        assert_eq!(sink.last().len(), 1);

        processor.process(&message(2000, vec![])).unwrap();
        assert!(sink.last().is_empty());
    }

    #[test]
    fn test_invalid_detection_rejects_whole_frame() {
        let (mut processor, sink) = processor();
        let mut bad = detection(b"B", 0.0, 0.0);
        bad.geo_coordinate = None;

        let err = processor
            .process(&message(0, vec![detection(b"A", 0.0, 0.0), bad]))
            .unwrap_err();

        assert!(matches!(err, ProcessError::InvalidDetection { index: 1, .. }));
        assert!(processor.store().is_empty());
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn test_decode_failure_leaves_store_untouched() {
        let (mut processor, sink) = processor();
        processor
            .process(&message(0, vec![detection(b"A", 0.0, 0.0)]))
            .unwrap();

        let err = processor.process(b"\x0a\xff\xff").unwrap_err();
        assert_eq!(err.kind(), "decode");
        assert_eq!(processor.store().len(), 1);
        assert_eq!(sink.count(), 1);
    }

    #[test]
    fn test_repeated_id_in_one_frame() {
        let (mut processor, _sink) = processor();
        let out = processor
            .process(&message(
                0,
                vec![detection(b"A", 0.0, 0.0), detection(b"A", 0.0, 0.001)],
            ))
            .unwrap();

        // Second sighting shares the frame timestamp: velocity unchanged
        let after = decode(&out.payload);
        assert_eq!(after.detections[0].confidence, 0.0);
        assert_eq!(after.detections[1].confidence, 0.0);
        assert_eq!(processor.store().len(), 1);
    }
}
