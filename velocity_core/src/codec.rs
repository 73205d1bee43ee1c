//! Frame ⇄ bytes codec.
//!
//! The pipeline exchanges protobuf `SaeMessage`s. Messages are declared
//! here with `prost` derives; decoding converts them into the validated
//! [`Frame`] model so that no invalid detection ever reaches the tracker.
//!
//! The outbound message is the inbound one with only the `confidence`
//! field of each detection rewritten. Every other byte, including fields
//! this stage does not declare, is passed through as received.

use prost::encoding::{decode_key, decode_varint, encode_key, encode_varint, WireType};
use prost::Message;

use crate::error::ProcessError;
use crate::frame::{BoundingBox, Detection, Frame, ObjectId};
use crate::geo::GeoPosition;

/// Converts between wire bytes and frames.
pub trait FrameCodec: Send + Sync {
    /// Decode and validate one inbound message.
    ///
    /// # Errors
    /// - `DecodeFailure` for malformed bytes or a missing frame header
    /// - `InvalidDetection` for a detection without a usable position
    fn decode(&self, bytes: &[u8]) -> Result<Frame, ProcessError>;

    /// Re-encode `inbound` with each detection's annotation taken from
    /// `frame`, which must be the result of decoding `inbound`.
    fn annotate(&self, inbound: &[u8], frame: &Frame) -> Result<Vec<u8>, ProcessError>;
}

// ============================================================================
// WIRE MESSAGES
// ============================================================================

pub mod proto {
    //! Protobuf messages exchanged with neighbouring stages.

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct SaeMessage {
        #[prost(message, optional, tag = "1")]
        pub frame: Option<VideoFrame>,
        #[prost(message, repeated, tag = "2")]
        pub detections: Vec<Detection>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct VideoFrame {
        #[prost(string, tag = "1")]
        pub source_id: String,
        #[prost(uint64, tag = "2")]
        pub timestamp_utc_ms: u64,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Detection {
        #[prost(message, optional, tag = "1")]
        pub bounding_box: Option<BoundingBox>,
        #[prost(uint32, tag = "2")]
        pub class_id: u32,
        /// Confidence inbound, velocity (km/h) outbound
        #[prost(double, tag = "3")]
        pub confidence: f64,
        #[prost(bytes = "vec", tag = "4")]
        pub object_id: Vec<u8>,
        #[prost(message, optional, tag = "5")]
        pub geo_coordinate: Option<GeoCoordinate>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct BoundingBox {
        #[prost(float, tag = "1")]
        pub min_x: f32,
        #[prost(float, tag = "2")]
        pub min_y: f32,
        #[prost(float, tag = "3")]
        pub max_x: f32,
        #[prost(float, tag = "4")]
        pub max_y: f32,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct GeoCoordinate {
        #[prost(double, tag = "1")]
        pub latitude: f64,
        #[prost(double, tag = "2")]
        pub longitude: f64,
    }
}

// ============================================================================
// PROTOBUF CODEC
// ============================================================================

/// Protobuf implementation of [`FrameCodec`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ProtoFrameCodec;

impl ProtoFrameCodec {
    pub fn new() -> Self {
        Self
    }

    fn detection_from_proto(
        index: usize,
        msg: proto::Detection,
    ) -> Result<Detection, ProcessError> {
        let coordinate = msg
            .geo_coordinate
            .ok_or_else(|| ProcessError::invalid_detection(index, "missing geo_coordinate"))?;
        let position = GeoPosition::new(coordinate.latitude, coordinate.longitude)
            .map_err(|e| ProcessError::invalid_detection(index, e.to_string()))?;

        Ok(Detection {
            object_id: ObjectId::from(msg.object_id),
            position,
            annotation: msg.confidence,
            class_id: msg.class_id,
            bounding_box: msg.bounding_box.map(|b| BoundingBox {
                min_x: b.min_x,
                min_y: b.min_y,
                max_x: b.max_x,
                max_y: b.max_y,
            }),
        })
    }
}

impl FrameCodec for ProtoFrameCodec {
    fn decode(&self, bytes: &[u8]) -> Result<Frame, ProcessError> {
        let msg = proto::SaeMessage::decode(bytes)
            .map_err(|e| ProcessError::DecodeFailure(e.to_string()))?;
        let header = msg
            .frame
            .ok_or_else(|| ProcessError::DecodeFailure("missing frame header".to_string()))?;

        let detections = msg
            .detections
            .into_iter()
            .enumerate()
            .map(|(index, d)| Self::detection_from_proto(index, d))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Frame {
            source_id: header.source_id,
            timestamp_utc_ms: header.timestamp_utc_ms,
            detections,
        })
    }

    fn annotate(&self, inbound: &[u8], frame: &Frame) -> Result<Vec<u8>, ProcessError> {
        let mut annotations = frame.detections.iter().map(|d| d.annotation);
        let mut out = Vec::with_capacity(inbound.len() + 9 * frame.detections.len());
        let mut rest = inbound;

        while !rest.is_empty() {
            let field = next_field(&mut rest)?;
            if field.tag != DETECTIONS_TAG || field.wire_type != WireType::LengthDelimited {
                out.extend_from_slice(field.raw);
                continue;
            }

            let annotation = annotations
                .next()
                .ok_or_else(|| encode_failure("message has more detections than the frame"))?;
            let detection = with_confidence(field.body, annotation)?;
            encode_key(DETECTIONS_TAG, WireType::LengthDelimited, &mut out);
            encode_varint(detection.len() as u64, &mut out);
            out.extend_from_slice(&detection);
        }

        if annotations.next().is_some() {
            return Err(encode_failure("frame has more detections than the message"));
        }
        Ok(out)
    }
}

// ============================================================================
// WIRE-LEVEL REWRITING
// ============================================================================

/// `SaeMessage.detections`
const DETECTIONS_TAG: u32 = 2;

/// `Detection.confidence`
const CONFIDENCE_TAG: u32 = 3;

/// One encoded field of a message.
struct WireField<'a> {
    tag: u32,
    wire_type: WireType,
    /// Key and value exactly as received
    raw: &'a [u8],
    /// Payload of a length-delimited field, empty otherwise
    body: &'a [u8],
}

fn encode_failure(reason: impl std::fmt::Display) -> ProcessError {
    ProcessError::EncodeFailure(reason.to_string())
}

/// Split the next field off `buf`.
fn next_field<'a>(buf: &mut &'a [u8]) -> Result<WireField<'a>, ProcessError> {
    let start: &'a [u8] = *buf;
    let (tag, wire_type) = decode_key(buf).map_err(encode_failure)?;

    let mut body: &'a [u8] = &[];
    match wire_type {
        WireType::Varint => {
            decode_varint(buf).map_err(encode_failure)?;
        }
        WireType::SixtyFourBit => advance(buf, 8)?,
        WireType::ThirtyTwoBit => advance(buf, 4)?,
        WireType::LengthDelimited => {
            let len = decode_varint(buf).map_err(encode_failure)? as usize;
            let value: &'a [u8] = *buf;
            body = value.get(..len).ok_or_else(|| encode_failure("truncated field"))?;
            advance(buf, len)?;
        }
        WireType::StartGroup | WireType::EndGroup => {
            return Err(encode_failure(format!("group field {tag} not supported")));
        }
    }

    let consumed = start.len() - buf.len();
    Ok(WireField {
        tag,
        wire_type,
        raw: &start[..consumed],
        body,
    })
}

fn advance(buf: &mut &[u8], n: usize) -> Result<(), ProcessError> {
    let rest: &[u8] = *buf;
    *buf = rest.get(n..).ok_or_else(|| encode_failure("truncated field"))?;
    Ok(())
}

/// Copy an encoded detection, replacing its confidence with `value`.
fn with_confidence(detection: &[u8], value: f64) -> Result<Vec<u8>, ProcessError> {
    let mut out = Vec::with_capacity(detection.len() + 9);
    let mut written = false;
    let mut rest = detection;

    while !rest.is_empty() {
        let field = next_field(&mut rest)?;
        if field.tag != CONFIDENCE_TAG {
            out.extend_from_slice(field.raw);
        } else if !written {
            put_confidence(value, &mut out);
            written = true;
        }
    }

    if !written {
        put_confidence(value, &mut out);
    }
    Ok(out)
}

fn put_confidence(value: f64, out: &mut Vec<u8>) {
    encode_key(CONFIDENCE_TAG, WireType::SixtyFourBit, out);
    out.extend_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire_detection(id: &[u8], coordinate: Option<(f64, f64)>) -> proto::Detection {
        proto::Detection {
            bounding_box: Some(proto::BoundingBox {
                min_x: 0.1,
                min_y: 0.2,
                max_x: 0.3,
                max_y: 0.4,
            }),
            class_id: 2,
            confidence: 0.87,
            object_id: id.to_vec(),
            geo_coordinate: coordinate.map(|(latitude, longitude)| proto::GeoCoordinate {
                latitude,
                longitude,
            }),
        }
    }

    fn wire_message(detections: Vec<proto::Detection>) -> Vec<u8> {
        proto::SaeMessage {
            frame: Some(proto::VideoFrame {
                source_id: "cam-1".to_string(),
                timestamp_utc_ms: 1_700_000_000_000,
            }),
            detections,
        }
        .encode_to_vec()
    }

    #[test]
    fn test_decode_valid_message() {
        let codec = ProtoFrameCodec::new();
        let bytes = wire_message(vec![wire_detection(b"\x01\x02", Some((52.5, 13.4)))]);

        let frame = codec.decode(&bytes).unwrap();
        assert_eq!(frame.source_id, "cam-1");
        assert_eq!(frame.timestamp_utc_ms, 1_700_000_000_000);
        assert_eq!(frame.detections.len(), 1);

        let detection = &frame.detections[0];
        assert_eq!(detection.object_id.to_hex(), "0102");
        assert_eq!(detection.position.latitude(), 52.5);
        assert_eq!(detection.annotation, 0.87);
        assert_eq!(detection.class_id, 2);
    }

    #[test]
    fn test_decode_garbage() {
        let codec = ProtoFrameCodec::new();
        let err = codec.decode(&[0xff, 0xff, 0xff]).unwrap_err();
        assert_eq!(err.kind(), "decode");
    }

    #[test]
    fn test_decode_missing_header() {
        let codec = ProtoFrameCodec::new();
        let bytes = proto::SaeMessage {
            frame: None,
            detections: vec![],
        }
        .encode_to_vec();
        assert!(matches!(codec.decode(&bytes), Err(ProcessError::DecodeFailure(_))));
    }

    #[test]
    fn test_decode_missing_position() {
        let codec = ProtoFrameCodec::new();
        let bytes = wire_message(vec![
            wire_detection(b"a", Some((1.0, 1.0))),
            wire_detection(b"b", None),
        ]);

        match codec.decode(&bytes) {
            Err(ProcessError::InvalidDetection { index, .. }) => assert_eq!(index, 1),
            other => panic!("expected InvalidDetection, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_nan_position() {
        let codec = ProtoFrameCodec::new();
        let bytes = wire_message(vec![wire_detection(b"a", Some((f64::NAN, 1.0)))]);
        assert_eq!(codec.decode(&bytes).unwrap_err().kind(), "invalid_detection");
    }

    #[test]
    fn test_annotate_rewrites_confidence_only() {
        let codec = ProtoFrameCodec::new();
        let original = wire_message(vec![
            wire_detection(b"a", Some((10.0, 20.0))),
            wire_detection(b"b", Some((-33.9, 151.2))),
        ]);

        let mut frame = codec.decode(&original).unwrap();
        frame.detections[0].annotation = 55.0;
        let encoded = codec.annotate(&original, &frame).unwrap();
        let out = proto::SaeMessage::decode(encoded.as_slice()).unwrap();
        let input = proto::SaeMessage::decode(original.as_slice()).unwrap();

        assert_eq!(out.frame, input.frame);
        assert_eq!(out.detections[0].confidence, 55.0);
        for (o, i) in out.detections.iter().zip(input.detections.iter()) {
            assert_eq!(o.object_id, i.object_id);
            assert_eq!(o.geo_coordinate, i.geo_coordinate);
            assert_eq!(o.bounding_box, i.bounding_box);
            assert_eq!(o.class_id, i.class_id);
        }
        assert_eq!(out.detections[1], input.detections[1]);
    }

    #[test]
    fn test_annotate_unchanged_frame_is_byte_identical() {
        let codec = ProtoFrameCodec::new();
        let original = wire_message(vec![wire_detection(b"a", Some((1.0, 2.0)))]);
        let frame = codec.decode(&original).unwrap();
        assert_eq!(codec.annotate(&original, &frame).unwrap(), original);
    }

    #[test]
    fn test_annotate_adds_missing_confidence() {
        let codec = ProtoFrameCodec::new();
        let mut detection = wire_detection(b"a", Some((1.0, 2.0)));
        // proto3 omits a zero double on the wire
        detection.confidence = 0.0;
        let original = wire_message(vec![detection]);

        let mut frame = codec.decode(&original).unwrap();
        frame.detections[0].annotation = 12.5;
        let encoded = codec.annotate(&original, &frame).unwrap();
        let out = proto::SaeMessage::decode(encoded.as_slice()).unwrap();
        assert_eq!(out.detections[0].confidence, 12.5);
    }

    #[test]
    fn test_annotate_detection_count_mismatch() {
        let codec = ProtoFrameCodec::new();
        let original = wire_message(vec![wire_detection(b"a", Some((1.0, 2.0)))]);
        let mut frame = codec.decode(&original).unwrap();
        frame.detections.clear();
        assert_eq!(codec.annotate(&original, &frame).unwrap_err().kind(), "encode");
    }

    /// A newer upstream schema with fields this stage does not declare.
    mod upstream {
        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct SaeMessage {
            #[prost(message, optional, tag = "1")]
            pub frame: Option<VideoFrame>,
            #[prost(message, repeated, tag = "2")]
            pub detections: Vec<Detection>,
            #[prost(bytes = "vec", tag = "3")]
            pub metrics: Vec<u8>,
        }

        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct VideoFrame {
            #[prost(string, tag = "1")]
            pub source_id: String,
            #[prost(uint64, tag = "2")]
            pub timestamp_utc_ms: u64,
            #[prost(bytes = "vec", tag = "3")]
            pub frame_data: Vec<u8>,
        }

        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct Detection {
            #[prost(uint32, tag = "2")]
            pub class_id: u32,
            #[prost(double, tag = "3")]
            pub confidence: f64,
            #[prost(bytes = "vec", tag = "4")]
            pub object_id: Vec<u8>,
            #[prost(message, optional, tag = "5")]
            pub geo_coordinate: Option<super::proto::GeoCoordinate>,
            #[prost(string, tag = "6")]
            pub extra: String,
        }
    }

    #[test]
    fn test_annotate_keeps_undeclared_fields() {
        let codec = ProtoFrameCodec::new();
        let input = upstream::SaeMessage {
            frame: Some(upstream::VideoFrame {
                source_id: "cam-1".to_string(),
                timestamp_utc_ms: 42,
                frame_data: vec![1, 2, 3, 4],
            }),
            detections: vec![upstream::Detection {
                class_id: 7,
                confidence: 0.5,
                object_id: b"obj".to_vec(),
                geo_coordinate: Some(proto::GeoCoordinate {
                    latitude: 48.0,
                    longitude: 11.0,
                }),
                extra: "keep-me".to_string(),
            }],
            metrics: vec![9, 9, 9],
        };
        let bytes = input.encode_to_vec();

        let mut frame = codec.decode(&bytes).unwrap();
        frame.detections[0].annotation = 88.0;
        let encoded = codec.annotate(&bytes, &frame).unwrap();
        let out = upstream::SaeMessage::decode(encoded.as_slice()).unwrap();

        assert_eq!(out.metrics, vec![9, 9, 9]);
        assert_eq!(out.frame, input.frame);
        assert_eq!(out.detections[0].extra, "keep-me");
        assert_eq!(out.detections[0].object_id, b"obj".to_vec());
        assert_eq!(out.detections[0].class_id, 7);
        assert_eq!(out.detections[0].confidence, 88.0);
    }
}
