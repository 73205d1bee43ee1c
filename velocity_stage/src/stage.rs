//! The stage: pull a frame, annotate it, push it, repeat.
//!
//! ```text
//!  FrameSource ──recv──► FrameProcessor ──send──► FrameSink
//!                              │
//!                              └── SnapshotPublisher ──► delivery loop ──► websocket observers
//! ```
//!
//! Per-frame failures are logged and counted; only transport failures end
//! the loop.

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use velocity_core::{
    FrameCodec, FrameProcessor, ProtoFrameCodec, SnapshotBroadcaster, SnapshotSink, TrackingConfig,
};
use velocity_env::{
    stream_key, FrameSink, FrameSource, RedisSink, RedisSource, StreamMessage, TransportError,
};

use crate::config::StageConfig;
use crate::metrics::{serve_metrics, StageMetrics, TimedCodec};
use crate::observers::serve_observers;

/// Why the frame loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The shutdown token fired
    Cancelled,
    /// The input stream ended
    InputClosed,
}

/// Drives frames from a source through the processor into a sink.
pub struct FrameLoop<Src, Snk, C, S> {
    source: Src,
    sink: Snk,
    processor: FrameProcessor<C, S>,
    output_prefix: String,
    metrics: StageMetrics,
}

impl<Src, Snk, C, S> FrameLoop<Src, Snk, C, S>
where
    Src: FrameSource,
    Snk: FrameSink,
    C: FrameCodec,
    S: SnapshotSink,
{
    pub fn new(
        source: Src,
        sink: Snk,
        processor: FrameProcessor<C, S>,
        output_prefix: impl Into<String>,
        metrics: StageMetrics,
    ) -> Self {
        Self {
            source,
            sink,
            processor,
            output_prefix: output_prefix.into(),
            metrics,
        }
    }

    pub fn processor(&self) -> &FrameProcessor<C, S> {
        &self.processor
    }

    /// Run until cancelled, until the input closes, or until a transport
    /// error. A frame already pulled is always finished before the token is
    /// looked at again.
    pub async fn run(&mut self, shutdown: &CancellationToken) -> Result<LoopExit, TransportError> {
        loop {
            let message = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(LoopExit::Cancelled),
                received = self.source.recv() => match received {
                    Ok(message) => message,
                    Err(TransportError::Closed) => return Ok(LoopExit::InputClosed),
                    Err(e) => return Err(e),
                },
            };

            self.handle(message).await?;
        }
    }

    /// Process one message and forward the result. Per-frame failures are
    /// swallowed here; only a failing sink is returned.
    pub async fn handle(&mut self, message: StreamMessage) -> Result<(), TransportError> {
        self.metrics.frames.inc();

        let timer = self.metrics.get_duration.start_timer();
        let result = self.processor.process(&message.payload);
        timer.observe_duration();

        self.metrics.tracked_objects.set(self.processor.store().len() as i64);

        let processed = match result {
            Ok(processed) => processed,
            Err(e) => {
                tracing::warn!(
                    stream = %message.stream_key,
                    reason = e.kind(),
                    error = %e,
                    "frame dropped"
                );
                self.metrics.record_dropped(e.kind());
                return Ok(());
            }
        };

        self.metrics.objects.inc_by(processed.detections as u64);
        if processed.evicted > 0 {
            tracing::debug!(
                evicted = processed.evicted,
                tracked = processed.tracked_objects,
                "stale objects evicted"
            );
        }

        let output_key = stream_key(&self.output_prefix, message.stream_id());
        let timer = self.metrics.publish_duration.start_timer();
        self.sink.send(&output_key, processed.payload).await?;
        timer.observe_duration();

        tracing::trace!(
            stream = %output_key,
            detections = processed.detections,
            tracked = processed.tracked_objects,
            "frame forwarded"
        );
        Ok(())
    }
}

/// Wire up Redis, the metrics endpoint, the snapshot websocket and the
/// frame loop, and run until `shutdown` fires or the input fails.
pub async fn run(config: StageConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    let tracking: TrackingConfig = config
        .tracking_config()
        .context("invalid tracking configuration")?;
    let metrics = StageMetrics::new().context("failed to create metrics")?;

    let metrics_addr = config.metrics_addr();
    let metrics_listener = TcpListener::bind(metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics endpoint on {metrics_addr}"))?;
    let ws_listener = TcpListener::bind(config.websocket_addr)
        .await
        .with_context(|| format!("failed to bind websocket on {}", config.websocket_addr))?;

    let redis = config.redis_config();
    let input_key = config.input_stream_key();
    let source = RedisSource::connect(&redis, input_key.clone(), config.read_block_ms).await?;
    let sink = RedisSink::connect(&redis, config.output_stream_maxlen).await?;

    let (broadcaster, publisher) = SnapshotBroadcaster::new();
    let registry = broadcaster.observers();

    let delivery = tokio::spawn(broadcaster.run(shutdown.clone()));
    let metrics_server = tokio::spawn(serve_metrics(
        metrics_listener,
        metrics.clone(),
        shutdown.clone(),
    ));
    let ws_server = tokio::spawn(serve_observers(ws_listener, registry, shutdown.clone()));

    let codec = TimedCodec::new(ProtoFrameCodec::new(), &metrics);
    let processor = FrameProcessor::new(tracking, codec, publisher);
    let mut frame_loop = FrameLoop::new(
        source,
        sink,
        processor,
        config.output_stream_prefix.clone(),
        metrics,
    );

    tracing::info!(
        input = %input_key,
        output_prefix = %config.output_stream_prefix,
        ttl_ms = tracking.eviction_ttl_ms,
        window = tracking.window_capacity,
        "velocity stage started"
    );

    let outcome = frame_loop.run(&shutdown).await;
    shutdown.cancel();

    if let Err(e) = delivery.await {
        tracing::warn!(error = %e, "delivery task failed");
    }
    for (name, server) in [("metrics", metrics_server), ("websocket", ws_server)] {
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(server = name, error = %e, "server stopped with error"),
            Err(e) => tracing::warn!(server = name, error = %e, "server task failed"),
        }
    }

    match outcome {
        Ok(exit) => {
            tracing::info!(reason = ?exit, "velocity stage stopped");
            Ok(())
        }
        Err(e) => Err(e).context("frame loop stopped on transport failure"),
    }
}
