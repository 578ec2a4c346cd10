//! streamdigest_core: gjør store treningsstrømmer (HR, watt, fart, høyde, GPS)
//! om til kompakte, token-budsjetterte sammendrag for en LLM-orkestrator.

pub mod config;
pub mod detectors;
pub mod dispatcher;
pub mod error;
pub mod features;
pub mod metrics;
pub mod monitor;
pub mod pagination;
pub mod render;
pub mod source;
pub mod stats;
pub mod summary;
pub mod types;

pub use config::{global, init_global, load_config, save_config, StreamConfig};
pub use detectors::{
    analyze_trends, detect_inflection_points, detect_spikes, filter_and_cap, Detection, FilterLimits,
};
pub use dispatcher::{ProcessingMode, StreamDispatcher, StreamProcessor, StreamRequest};
pub use error::{ErrorKind, StreamProcessingError, StreamResult};
pub use features::{extract_features, extract_lap_features, stream_statistics};
pub use metrics::{correlations, elevation_analysis, heart_rate_drift, normalized_power};
pub use monitor::{EventSink, Monitor, NoopSink, OperationEvent, OperationLog, PerfAggregate, PerfCounters};
pub use pagination::{
    estimate_text_tokens, estimate_tokens, estimate_total_pages, optimal_page_size, request_data_chunk, should_process,
    slice_stream, slice_telemetry,
};
pub use source::{CancelToken, FetchError, RateLimiter, StaticSource, StravaClient, TelemetrySource};
pub use stats::{
    compute_boolean_stats, compute_float_stats, compute_int_stats, compute_location_stats,
    percentile, variability_metrics,
};
pub use summary::{SummarizeError, Summarizer, TelemetryDigest};
pub use types::*;
