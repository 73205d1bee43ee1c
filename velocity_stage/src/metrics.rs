//! Prometheus metrics for the velocity analyzer stage
//!
//! Metrics live on a stage-owned [`Registry`] rather than the process-wide
//! default one, so several stages (or tests) can coexist in one process.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use velocity_core::{Frame, FrameCodec, ProcessError};

/// Latency buckets in seconds, 2.5 ms up to 250 ms
const DURATION_BUCKETS: &[f64] = &[
    0.0025, 0.005, 0.0075, 0.01, 0.025, 0.05, 0.075, 0.1, 0.15, 0.2, 0.25,
];

/// Codec timings are far below a frame's budget
const CODEC_BUCKETS: &[f64] = &[
    0.00005, 0.0001, 0.00025, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025,
];

const NAMESPACE: &str = "velocity_analyzer";

/// All stage metrics. Cheap to clone; clones share the same series.
#[derive(Clone)]
pub struct StageMetrics {
    registry: Registry,

    /// Frames pulled from the input stream
    pub frames: IntCounter,

    /// Detections annotated with a velocity
    pub objects: IntCounter,

    /// Frames dropped, labelled by reason
    pub dropped_frames: IntCounterVec,

    /// Objects currently tracked
    pub tracked_objects: IntGauge,

    /// Decode through encode, per frame
    pub get_duration: Histogram,

    /// Time spent pushing one frame downstream
    pub publish_duration: Histogram,

    /// Decoding one inbound message
    pub deserialization_duration: Histogram,

    /// Re-encoding one outbound message
    pub serialization_duration: Histogram,
}

impl StageMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let frames = IntCounter::with_opts(
            Opts::new("frame_counter", "Number of frames pulled from the input stream")
                .namespace(NAMESPACE),
        )?;
        let objects = IntCounter::with_opts(
            Opts::new("object_counter", "Number of detections annotated with a velocity")
                .namespace(NAMESPACE),
        )?;
        let dropped_frames = IntCounterVec::new(
            Opts::new("dropped_frames", "Number of frames dropped, by reason").namespace(NAMESPACE),
            &["reason"],
        )?;
        let tracked_objects = IntGauge::with_opts(
            Opts::new("tracked_objects", "Number of objects currently tracked")
                .namespace(NAMESPACE),
        )?;
        let get_duration = Histogram::with_opts(
            HistogramOpts::new("get_duration", "Time spent processing one frame (seconds)")
                .namespace(NAMESPACE)
                .buckets(DURATION_BUCKETS.to_vec()),
        )?;
        let publish_duration = Histogram::with_opts(
            HistogramOpts::new(
                "redis_publish_duration",
                "Time spent publishing one frame (seconds)",
            )
            .namespace(NAMESPACE)
            .buckets(DURATION_BUCKETS.to_vec()),
        )?;
        let deserialization_duration = Histogram::with_opts(
            HistogramOpts::new(
                "proto_deserialization_duration",
                "Time spent deserializing an input proto (seconds)",
            )
            .namespace(NAMESPACE)
            .buckets(CODEC_BUCKETS.to_vec()),
        )?;
        let serialization_duration = Histogram::with_opts(
            HistogramOpts::new(
                "proto_serialization_duration",
                "Time spent creating a serialized output proto (seconds)",
            )
            .namespace(NAMESPACE)
            .buckets(CODEC_BUCKETS.to_vec()),
        )?;

        registry.register(Box::new(frames.clone()))?;
        registry.register(Box::new(objects.clone()))?;
        registry.register(Box::new(dropped_frames.clone()))?;
        registry.register(Box::new(tracked_objects.clone()))?;
        registry.register(Box::new(get_duration.clone()))?;
        registry.register(Box::new(publish_duration.clone()))?;
        registry.register(Box::new(deserialization_duration.clone()))?;
        registry.register(Box::new(serialization_duration.clone()))?;

        Ok(Self {
            registry,
            frames,
            objects,
            dropped_frames,
            tracked_objects,
            get_duration,
            publish_duration,
            deserialization_duration,
            serialization_duration,
        })
    }

    pub fn record_dropped(&self, reason: &str) {
        self.dropped_frames.with_label_values(&[reason]).inc();
    }

    /// Text exposition format of every registered metric.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/metrics", get(metrics_handler))
            .with_state(self.clone())
    }
}

/// Wraps a codec and records how long each decode and re-encode takes.
pub struct TimedCodec<C> {
    inner: C,
    decode: Histogram,
    encode: Histogram,
}

impl<C: FrameCodec> TimedCodec<C> {
    pub fn new(inner: C, metrics: &StageMetrics) -> Self {
        Self {
            inner,
            decode: metrics.deserialization_duration.clone(),
            encode: metrics.serialization_duration.clone(),
        }
    }
}

impl<C: FrameCodec> FrameCodec for TimedCodec<C> {
    fn decode(&self, bytes: &[u8]) -> Result<Frame, ProcessError> {
        let _timer = self.decode.start_timer();
        self.inner.decode(bytes)
    }

    fn annotate(&self, inbound: &[u8], frame: &Frame) -> Result<Vec<u8>, ProcessError> {
        let _timer = self.encode.start_timer();
        self.inner.annotate(inbound, frame)
    }
}

async fn metrics_handler(State(metrics): State<StageMetrics>) -> impl IntoResponse {
    match metrics.render() {
        Ok(body) => {
            let headers = [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)];
            (StatusCode::OK, headers, body).into_response()
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Serve `GET /metrics` on an already bound listener until `shutdown` fires.
pub async fn serve_metrics(
    listener: TcpListener,
    metrics: StageMetrics,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    tracing::info!(addr = %listener.local_addr()?, "metrics endpoint listening");

    axum::serve(listener, metrics.router())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
