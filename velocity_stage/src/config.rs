//! Stage configuration, from command-line flags or environment variables.

use std::net::SocketAddr;

use clap::Parser;
use velocity_core::{
    TrackingConfig, TrackingError, DEFAULT_EVICTION_TTL_MS, DEFAULT_WINDOW_CAPACITY,
};
use velocity_env::{stream_key, RedisConfig};

#[derive(Parser, Debug, Clone)]
#[command(name = "velocity-stage")]
#[command(about = "Annotates tracked detections with their speed over ground", long_about = None)]
pub struct StageConfig {
    /// Log filter used when RUST_LOG is not set
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "REDIS_HOST", default_value = "localhost")]
    pub redis_host: String,

    #[arg(long, env = "REDIS_PORT", default_value_t = 6379)]
    pub redis_port: u16,

    /// Stream id shared by the input and output keys
    #[arg(long, env = "REDIS_STREAM_ID", default_value = "stream1")]
    pub stream_id: String,

    #[arg(long, env = "REDIS_INPUT_STREAM_PREFIX", default_value = "objecttracker")]
    pub input_stream_prefix: String,

    #[arg(long, env = "REDIS_OUTPUT_STREAM_PREFIX", default_value = "velocityanalyzer")]
    pub output_stream_prefix: String,

    /// Approximate length the output stream is trimmed to
    #[arg(long, env = "REDIS_OUTPUT_STREAM_MAXLEN", default_value_t = 10)]
    pub output_stream_maxlen: usize,

    /// How long one XREAD blocks before polling again
    #[arg(long, env = "REDIS_READ_BLOCK_MS", default_value_t = 2000)]
    pub read_block_ms: usize,

    /// Port of the Prometheus /metrics endpoint (bound on 0.0.0.0)
    #[arg(long, env = "PROMETHEUS_PORT", default_value_t = 8000)]
    pub prometheus_port: u16,

    /// Listen address of the snapshot websocket
    #[arg(long, env = "WEBSOCKET_ADDR", default_value = "127.0.0.1:8765")]
    pub websocket_addr: SocketAddr,

    /// Objects not seen for this long (frame time) are dropped
    #[arg(long, env = "EVICTION_TTL_MS", default_value_t = DEFAULT_EVICTION_TTL_MS)]
    pub eviction_ttl_ms: u64,

    /// Positions kept per object for the velocity average
    #[arg(long, env = "WINDOW_CAPACITY", default_value_t = DEFAULT_WINDOW_CAPACITY)]
    pub window_capacity: usize,
}

impl StageConfig {
    /// Validated tracker settings.
    pub fn tracking_config(&self) -> Result<TrackingConfig, TrackingError> {
        TrackingConfig::new(self.eviction_ttl_ms, self.window_capacity)
    }

    pub fn redis_config(&self) -> RedisConfig {
        RedisConfig::new(self.redis_host.clone(), self.redis_port)
    }

    /// `<input_prefix>:<stream_id>`
    pub fn input_stream_key(&self) -> String {
        stream_key(&self.input_stream_prefix, &self.stream_id)
    }

    pub fn metrics_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.prometheus_port))
    }
}
