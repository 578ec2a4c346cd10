use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Feilkategorier som krysser komponentgrenser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    StravaApiFailure,
    ContextExceeded,
    ProcessingFailure,
    InvalidRequest,
    DataCorrupted,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::StravaApiFailure => "strava_api_failure",
            ErrorKind::ContextExceeded => "context_exceeded",
            ErrorKind::ProcessingFailure => "processing_failure",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::DataCorrupted => "data_corrupted",
            ErrorKind::Unknown => "unknown",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            ErrorKind::StravaApiFailure => "Could not retrieve stream data from the activity provider",
            ErrorKind::ContextExceeded => "Stream data is too large for the available context window",
            ErrorKind::ProcessingFailure => "Stream processing failed",
            ErrorKind::InvalidRequest => "The stream request is invalid",
            ErrorKind::DataCorrupted => "Stream data is missing or corrupted",
            ErrorKind::Unknown => "An unexpected error occurred while processing streams",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Strukturert feil med nok tilstand til å rendre gjenopprettingsforslag
/// uten å regne noe på nytt.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct StreamProcessingError {
    pub kind: ErrorKind,
    pub message: String,
    pub activity_id: Option<i64>,
    pub processing_mode: Option<String>,
    pub data_size: Option<usize>,
    pub available_tokens: Option<usize>,
    pub alternatives: Vec<String>,
    pub context: BTreeMap<String, String>,
    #[source]
    pub source: Option<BoxError>,
}

pub type StreamResult<T> = Result<T, StreamProcessingError>;

impl StreamProcessingError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            activity_id: None,
            processing_mode: None,
            data_size: None,
            available_tokens: None,
            alternatives: Vec::new(),
            context: BTreeMap::new(),
            source: None,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    pub fn processing(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProcessingFailure, message)
    }

    pub fn data_corrupted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DataCorrupted, message)
    }

    pub fn with_activity(mut self, activity_id: i64) -> Self {
        self.activity_id = Some(activity_id);
        self
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.processing_mode = Some(mode.into());
        self
    }

    pub fn with_sizes(mut self, data_size: usize, available_tokens: usize) -> Self {
        self.data_size = Some(data_size);
        self.available_tokens = Some(available_tokens);
        self
    }

    pub fn with_alternatives<I, S>(mut self, alternatives: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.alternatives = alternatives.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.context.insert(key.into(), value.to_string());
        self
    }

    pub fn with_source<E>(mut self, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(err));
        self
    }

    /// Fyll inn aktivitet/modus bare der de mangler (når feilen passerer en ny grense).
    pub fn or_activity(mut self, activity_id: i64) -> Self {
        self.activity_id.get_or_insert(activity_id);
        self
    }

    pub fn or_mode(mut self, mode: &str) -> Self {
        if self.processing_mode.is_none() {
            self.processing_mode = Some(mode.to_string());
        }
        self
    }

    /// Konkrete forslag, nøklet på feiltype.
    pub fn recovery_suggestions(&self) -> Vec<String> {
        let s: &[&str] = match self.kind {
            ErrorKind::StravaApiFailure => &[
                "Wait a few minutes and retry; the provider may be rate limiting requests",
                "Verify the activity ID exists and belongs to the connected athlete",
                "Reconnect the account if authorization has expired",
                "Request fewer stream types or a lower resolution",
            ],
            ErrorKind::ContextExceeded => &[
                "Use processing_mode 'derived' for a statistical summary",
                "Use processing_mode 'ai-summary' with a focused summary_prompt",
                "Paginate with page_number/page_size to fetch the data in chunks",
                "Request fewer stream types or resolution 'low'",
            ],
            ErrorKind::ProcessingFailure => &[
                "Retry with processing_mode 'raw' to inspect the data directly",
                "Request a smaller page of data",
                "Retry the request; the failure may be transient",
            ],
            ErrorKind::InvalidRequest => &[
                "Check processing_mode: one of 'raw', 'derived', 'ai-summary', 'auto'",
                "Provide a non-empty summary_prompt when using 'ai-summary'",
                "Use page_number >= 1 and page_size > 0, or page_size = -1 for the full dataset",
            ],
            ErrorKind::DataCorrupted => &[
                "Re-fetch the activity streams; the recorded data may be incomplete",
                "Request a different set of stream types",
                "Try resolution 'low' to reduce the amount of data",
                "Check whether the activity was recorded with sensors attached",
            ],
            ErrorKind::Unknown => &[
                "Retry the request",
                "Use processing_mode 'raw' to narrow down the problem",
            ],
        };
        s.iter().map(|x| x.to_string()).collect()
    }

    /// Endelig melding til konsumenten: beskrivelse, kontekst, alternativer, forslag.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("❌ {} ({})\n", self.kind.description(), self.kind));
        out.push_str(&format!("Details: {}\n", self.message));
        if let Some(src) = &self.source {
            out.push_str(&format!("Cause: {src}\n"));
        }

        let mut ctx: Vec<String> = Vec::new();
        if let Some(id) = self.activity_id {
            ctx.push(format!("activity_id={id}"));
        }
        if let Some(mode) = &self.processing_mode {
            ctx.push(format!("processing_mode={mode}"));
        }
        if let Some(size) = self.data_size {
            ctx.push(format!("data_size={size}"));
        }
        if let Some(tokens) = self.available_tokens {
            ctx.push(format!("available_tokens={tokens}"));
        }
        for (k, v) in &self.context {
            ctx.push(format!("{k}={v}"));
        }
        if !ctx.is_empty() {
            out.push_str("\nContext:\n");
            for c in ctx {
                out.push_str(&format!("  - {c}\n"));
            }
        }

        if !self.alternatives.is_empty() {
            out.push_str("\nAlternative processing modes:\n");
            for a in &self.alternatives {
                out.push_str(&format!("  - {a}\n"));
            }
        }

        out.push_str("\nSuggestions:\n");
        for (i, s) in self.recovery_suggestions().iter().enumerate() {
            out.push_str(&format!("  {}. {s}\n", i + 1));
        }
        out
    }
}
