use serde::Serialize;
use thiserror::Error;

use crate::source::CancelToken;
use crate::types::{DerivedFeatures, FeatureSummary, InflectionPoint, Spike, StreamStatistics, Trend};

const DIGEST_TOP_FEATURES: usize = 5;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SummarizeError {
    #[error("summarizer unavailable: {0}")]
    Unavailable(String),
    #[error("summary request rejected: {0}")]
    Rejected(String),
    #[error("summary generation failed: {0}")]
    Failed(String),
}

/// Statistisk sammendrag som sendes til oppsummereren. Aldri rå arrays.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryDigest {
    pub summary: FeatureSummary,
    pub statistics: StreamStatistics,
    pub inflection_count: usize,
    pub trend_count: usize,
    pub spike_count: usize,
    pub top_trends: Vec<Trend>,
    pub top_spikes: Vec<Spike>,
    pub top_inflections: Vec<InflectionPoint>,
    pub lap_count: usize,
}

impl TelemetryDigest {
    pub fn from_features(f: &DerivedFeatures) -> Self {
        fn strongest<T: Clone>(xs: &[T], mag: impl Fn(&T) -> f64) -> Vec<T> {
            let mut v: Vec<T> = xs.to_vec();
            v.sort_by(|a, b| mag(b).total_cmp(&mag(a)));
            v.truncate(DIGEST_TOP_FEATURES);
            v
        }

        Self {
            summary: f.summary.clone(),
            statistics: f.statistics.clone(),
            inflection_count: f.inflection_points.len(),
            trend_count: f.trends.len(),
            spike_count: f.spikes.len(),
            top_trends: strongest(&f.trends, |t| t.magnitude),
            top_spikes: strongest(&f.spikes, |s| s.magnitude),
            top_inflections: strongest(&f.inflection_points, |p| p.magnitude),
            lap_count: f.lap_analysis.as_ref().map_or(0, |l| l.laps.len()),
        }
    }

    /// Kompakt JSON for prompt-kontekst.
    pub fn to_context_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Oppsummerings-backend (LLM). Kun kontrakten ligger her.
pub trait Summarizer: Send + Sync {
    fn summarize(
        &self,
        cancel: &CancelToken,
        digest: &TelemetryDigest,
        activity_id: i64,
        prompt: &str,
    ) -> Result<String, SummarizeError>;
}
