//! Modus-dispatcher: raw / derived / ai-summary / auto, med deterministisk
//! fallback-kjede og en nødsti som alltid returnerer et rendret svar.
//!
//! Kjeden:
//!   ai-summary → [derived, raw]
//!   derived    → [raw]
//!   raw        → [derived]
//!   ukjent     → [raw, derived]
//!
//! Et vellykket fallback merkes `<modus>-fallback` og innholdet får en synlig
//! melding først. Feiler alt, blir det en `data_corrupted`-melding med
//! forslag, levert som vanlig resultat (aldri panikk, aldri `Err` ut).

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::StreamConfig;
use crate::error::{ErrorKind, StreamProcessingError, StreamResult};
use crate::features::extract_features;
use crate::monitor::{EventSink, NoopSink, OperationEvent};
use crate::pagination::{canonical_size, estimate_text_tokens, estimate_tokens, request_data_chunk};
use crate::render::{fallback_notice, render_ai_summary, render_derived, render_menu, render_raw};
use crate::source::{CancelToken, TelemetrySource};
use crate::summary::{Summarizer, TelemetryDigest};
use crate::types::{Lap, ProcessedStreamResult, Resolution, StreamType, Telemetry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessingMode {
    Raw,
    Derived,
    AiSummary,
    Auto,
}

impl ProcessingMode {
    pub const EXPLICIT: [ProcessingMode; 3] =
        [ProcessingMode::Raw, ProcessingMode::Derived, ProcessingMode::AiSummary];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingMode::Raw => "raw",
            ProcessingMode::Derived => "derived",
            ProcessingMode::AiSummary => "ai-summary",
            ProcessingMode::Auto => "auto",
        }
    }

    /// Moduser som prøves (i rekkefølge) når denne feiler.
    pub fn fallback_chain(&self) -> &'static [ProcessingMode] {
        match self {
            ProcessingMode::AiSummary => &[ProcessingMode::Derived, ProcessingMode::Raw],
            ProcessingMode::Derived => &[ProcessingMode::Raw],
            ProcessingMode::Raw => &[ProcessingMode::Derived],
            ProcessingMode::Auto => &[ProcessingMode::Raw, ProcessingMode::Derived],
        }
    }
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "raw" => Ok(ProcessingMode::Raw),
            "derived" => Ok(ProcessingMode::Derived),
            "ai-summary" | "summary" => Ok(ProcessingMode::AiSummary),
            "auto" | "" => Ok(ProcessingMode::Auto),
            other => Err(format!("unknown processing mode '{other}'")),
        }
    }
}

/// Kjeden for moduser vi ikke kjenner igjen.
const UNKNOWN_MODE_CHAIN: [ProcessingMode; 2] = [ProcessingMode::Raw, ProcessingMode::Derived];

/// Parametre fra orkestratoren for ett verktøykall.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamRequest {
    pub tool_call_id: String,
    pub activity_id: i64,
    /// Tom = alle strømmer.
    pub stream_types: Vec<StreamType>,
    pub resolution: Resolution,
    pub processing_mode: Option<String>,
    /// 1-basert. `None` = hele datasettet, eller side 1 når `page_size` er positiv.
    pub page_number: Option<usize>,
    /// Negativ = hele datasettet. `None` = konfigurert standard.
    pub page_size: Option<i64>,
    pub summary_prompt: Option<String>,
    pub laps: Vec<Lap>,
}

impl StreamRequest {
    pub fn new(tool_call_id: impl Into<String>, activity_id: i64) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            activity_id,
            ..Default::default()
        }
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.processing_mode = Some(mode.into());
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.summary_prompt = Some(prompt.into());
        self
    }

    pub fn with_page(mut self, page_number: usize, page_size: i64) -> Self {
        self.page_number = Some(page_number);
        self.page_size = Some(page_size);
        self
    }

    fn requested_mode(&self) -> Option<&str> {
        self.processing_mode
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
    }
}

/// Kontrakt for prosessering av gitt telemetri.
pub trait StreamProcessor: Send + Sync {
    fn process(&self, request: &StreamRequest, telemetry: Option<&Telemetry>) -> ProcessedStreamResult;
}

struct ModeOutput {
    content: String,
    data: Option<Telemetry>,
}

pub struct StreamDispatcher {
    cfg: StreamConfig,
    summarizer: Option<Arc<dyn Summarizer>>,
    sink: Arc<dyn EventSink>,
}

impl StreamDispatcher {
    pub fn new(cfg: StreamConfig) -> Self {
        Self {
            cfg,
            summarizer: None,
            sink: Arc::new(NoopSink),
        }
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &StreamConfig {
        &self.cfg
    }

    /// Henter (hele datasettet eller ønsket side) og prosesserer.
    /// Hentefeil rendres som `strava_api_failure`; ingen modus-fallback,
    /// siden det ikke finnes data å falle tilbake på.
    pub fn handle(
        &self,
        request: &StreamRequest,
        source: &dyn TelemetrySource,
        cancel: &CancelToken,
    ) -> ProcessedStreamResult {
        let started = Instant::now();
        match self.fetch(request, source, cancel) {
            Ok((telemetry, page)) => {
                let size = canonical_size(&telemetry).unwrap_or(0);
                let mut ev = OperationEvent::new("fetch_streams", true);
                ev.activity_id = Some(request.activity_id);
                ev.duration_ms = started.elapsed().as_millis() as u64;
                ev.data_size = size;
                self.sink.record(ev);

                let mut result = self.process_with_cancel(request, Some(&telemetry), cancel);
                if let Some((page, page_size)) = page {
                    let header = format!(
                        "Page {page} (page_size {page_size}, {} points)\n\n",
                        telemetry.point_count()
                    );
                    result.content.insert_str(0, &header);
                }
                result
            }
            Err(err) => {
                warn!("activity {}: fetch failed: {err}", request.activity_id);
                let mut ev = OperationEvent::new("fetch_streams", false);
                ev.activity_id = Some(request.activity_id);
                ev.duration_ms = started.elapsed().as_millis() as u64;
                ev.detail = Some(err.to_string());
                self.sink.record(ev);

                let err = err
                    .or_activity(request.activity_id)
                    .or_mode(request.requested_mode().unwrap_or("auto"))
                    .with_sizes(0, self.cfg.max_context_tokens)
                    .with_alternatives(ProcessingMode::EXPLICIT.iter().map(|m| m.as_str()));
                ProcessedStreamResult {
                    tool_call_id: request.tool_call_id.clone(),
                    content: err.render(),
                    processing_mode: "error".to_string(),
                    options: err.alternatives.clone(),
                    data: None,
                    error: Some(err.kind),
                }
            }
        }
    }

    /// Side og sidestørrelse som skal hentes; `None` = hele datasettet.
    fn page_window(&self, request: &StreamRequest) -> StreamResult<Option<(usize, i64)>> {
        let window = match (request.page_number, request.page_size) {
            (None, None) => return Ok(None),
            (None, Some(size)) if size < 0 => return Ok(None),
            (None, Some(size)) => (1, size),
            (Some(0), _) => {
                return Err(StreamProcessingError::invalid_request("page_number is 1-based; got 0"))
            }
            (Some(p), size) => (p, size.unwrap_or(self.cfg.default_page_size)),
        };
        if window.1 == 0 {
            return Err(StreamProcessingError::invalid_request("page_size must not be zero"));
        }
        Ok(Some(window))
    }

    fn fetch(
        &self,
        request: &StreamRequest,
        source: &dyn TelemetrySource,
        cancel: &CancelToken,
    ) -> StreamResult<(Telemetry, Option<(usize, i64)>)> {
        let window = self.page_window(request)?;
        let (page, page_size) = window.unwrap_or((1, -1));
        debug!(
            "activity {}: fetching page {page} (page_size {page_size}, {})",
            request.activity_id,
            request.resolution.as_str()
        );
        let telemetry = request_data_chunk(
            source,
            request.activity_id,
            &request.stream_types,
            request.resolution,
            page,
            page_size,
            cancel,
        )?;
        Ok((telemetry, window))
    }

    /// Som `StreamProcessor::process`, men med avbruddssignal for oppsummereren.
    pub fn process_with_cancel(
        &self,
        request: &StreamRequest,
        telemetry: Option<&Telemetry>,
        cancel: &CancelToken,
    ) -> ProcessedStreamResult {
        let started = Instant::now();
        let requested = request.requested_mode();

        let result = match requested.map(str::parse::<ProcessingMode>) {
            None | Some(Ok(ProcessingMode::Auto)) => self.process_auto(request, telemetry, cancel),
            Some(Ok(mode)) => {
                let first = self.attempt(mode, request, telemetry, cancel);
                self.run_chain(request, telemetry, mode.as_str(), first, mode.fallback_chain(), cancel)
            }
            Some(Err(msg)) => {
                let label = requested.unwrap_or("unknown");
                let first = Err(StreamProcessingError::invalid_request(msg)
                    .with_activity(request.activity_id)
                    .with_mode(label)
                    .with_alternatives(ProcessingMode::EXPLICIT.iter().map(|m| m.as_str())));
                self.run_chain(request, telemetry, label, first, &UNKNOWN_MODE_CHAIN, cancel)
            }
        };

        let mut ev = OperationEvent::new("process_streams", result.error.is_none());
        ev.activity_id = Some(request.activity_id);
        ev.processing_mode = Some(result.processing_mode.clone());
        ev.duration_ms = started.elapsed().as_millis() as u64;
        ev.data_size = telemetry.and_then(|t| canonical_size(t).ok()).unwrap_or(0);
        ev.detail = result.error.map(|k| k.to_string());
        self.sink.record(ev);

        result
    }

    /// Ingen modus valgt: rå når det passer, ellers meny.
    fn process_auto(
        &self,
        request: &StreamRequest,
        telemetry: Option<&Telemetry>,
        cancel: &CancelToken,
    ) -> ProcessedStreamResult {
        let raw = ProcessingMode::Raw;
        let Some(t) = telemetry else {
            let first = self.attempt(raw, request, telemetry, cancel);
            return self.run_chain(request, telemetry, raw.as_str(), first, raw.fallback_chain(), cancel);
        };

        match estimate_tokens(t, &self.cfg) {
            Ok(tokens) if tokens > self.cfg.max_context_tokens => {
                info!(
                    "activity {}: ≈{tokens} tokens exceeds budget {}; offering menu",
                    request.activity_id, self.cfg.max_context_tokens
                );
                ProcessedStreamResult {
                    tool_call_id: request.tool_call_id.clone(),
                    content: render_menu(request.activity_id, t, tokens, &self.cfg),
                    processing_mode: ProcessingMode::Auto.as_str().to_string(),
                    options: ProcessingMode::EXPLICIT.iter().map(|m| m.as_str().to_string()).collect(),
                    data: None,
                    error: None,
                }
            }
            Ok(_) => {
                let first = self.attempt(raw, request, telemetry, cancel);
                self.run_chain(request, telemetry, raw.as_str(), first, raw.fallback_chain(), cancel)
            }
            Err(e) => self.run_chain(request, telemetry, raw.as_str(), Err(e), raw.fallback_chain(), cancel),
        }
    }

    fn run_chain(
        &self,
        request: &StreamRequest,
        telemetry: Option<&Telemetry>,
        requested: &str,
        first: StreamResult<ModeOutput>,
        chain: &[ProcessingMode],
        cancel: &CancelToken,
    ) -> ProcessedStreamResult {
        let primary = match first {
            Ok(out) => return self.success(request, requested, requested, out),
            Err(e) => e,
        };
        warn!(
            "activity {}: '{requested}' processing failed: {primary}",
            request.activity_id
        );

        let mut attempted = vec![requested.to_string()];
        for mode in chain {
            attempted.push(mode.as_str().to_string());
            match self.attempt(*mode, request, telemetry, cancel) {
                Ok(mut out) => {
                    info!(
                        "activity {}: falling back from '{requested}' to '{mode}'",
                        request.activity_id
                    );
                    let notice = fallback_notice(requested, mode.as_str(), &primary.to_string());
                    out.content.insert_str(0, &notice);
                    let label = format!("{}-fallback", mode.as_str());
                    return self.success(request, &label, mode.as_str(), out);
                }
                Err(e) => warn!("activity {}: fallback '{mode}' failed: {e}", request.activity_id),
            }
        }

        self.emergency(request, telemetry, primary, &attempted)
    }

    fn success(&self, request: &StreamRequest, label: &str, used: &str, out: ModeOutput) -> ProcessedStreamResult {
        ProcessedStreamResult {
            tool_call_id: request.tool_call_id.clone(),
            content: out.content,
            processing_mode: label.to_string(),
            options: ProcessingMode::EXPLICIT
                .iter()
                .map(|m| m.as_str())
                .filter(|m| *m != used)
                .map(String::from)
                .collect(),
            data: out.data,
            error: None,
        }
    }

    /// Alle moduser feilet: strukturert `data_corrupted` med forslag.
    fn emergency(
        &self,
        request: &StreamRequest,
        telemetry: Option<&Telemetry>,
        primary: StreamProcessingError,
        attempted: &[String],
    ) -> ProcessedStreamResult {
        let data_size = telemetry.and_then(|t| canonical_size(t).ok()).unwrap_or(0);
        let err = StreamProcessingError::data_corrupted(format!(
            "all processing modes failed for activity {}",
            request.activity_id
        ))
        .with_activity(request.activity_id)
        .with_mode(attempted.first().map(String::as_str).unwrap_or("auto"))
        .with_sizes(data_size, self.cfg.max_context_tokens)
        .with_alternatives(ProcessingMode::EXPLICIT.iter().map(|m| m.as_str()))
        .with_context("attempted_modes", attempted.join(" → "))
        .with_context("primary_error", primary.kind)
        .with_source(primary);

        warn!("activity {}: emergency path: {err}", request.activity_id);
        ProcessedStreamResult {
            tool_call_id: request.tool_call_id.clone(),
            content: err.render(),
            processing_mode: "error".to_string(),
            options: err.alternatives.clone(),
            data: None,
            error: Some(err.kind),
        }
    }

    fn attempt(
        &self,
        mode: ProcessingMode,
        request: &StreamRequest,
        telemetry: Option<&Telemetry>,
        cancel: &CancelToken,
    ) -> StreamResult<ModeOutput> {
        debug!("activity {}: attempting '{mode}'", request.activity_id);
        let out = match mode {
            ProcessingMode::Raw => self.raw(request, telemetry),
            ProcessingMode::Derived => self.derived(request, telemetry),
            ProcessingMode::AiSummary => self.ai_summary(request, telemetry, cancel),
            // auto løses før vi kommer hit; behandles som rå
            ProcessingMode::Auto => self.raw(request, telemetry),
        };
        out.map_err(|e| e.or_activity(request.activity_id).or_mode(mode.as_str()))
    }

    fn raw(&self, request: &StreamRequest, telemetry: Option<&Telemetry>) -> StreamResult<ModeOutput> {
        let t = telemetry.ok_or_else(|| {
            StreamProcessingError::data_corrupted("telemetry is nil; nothing to format")
        })?;
        let tokens = estimate_tokens(t, &self.cfg)?;
        // selve dataene legges bare ved når de får plass
        let data = (tokens <= self.cfg.max_context_tokens).then(|| t.clone());
        Ok(ModeOutput {
            content: render_raw(request.activity_id, t, tokens),
            data,
        })
    }

    fn derived(&self, request: &StreamRequest, telemetry: Option<&Telemetry>) -> StreamResult<ModeOutput> {
        let features = extract_features(telemetry, &request.laps)?;
        Ok(ModeOutput {
            content: render_derived(request.activity_id, &features),
            data: None,
        })
    }

    fn ai_summary(
        &self,
        request: &StreamRequest,
        telemetry: Option<&Telemetry>,
        cancel: &CancelToken,
    ) -> StreamResult<ModeOutput> {
        let prompt = request
            .summary_prompt
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                StreamProcessingError::invalid_request("ai-summary requires a non-empty summary_prompt")
            })?;
        let summarizer = self.summarizer.as_ref().ok_or_else(|| {
            StreamProcessingError::processing("no summarizer is configured for ai-summary")
        })?;

        let features = extract_features(telemetry, &request.laps)?;
        let digest = TelemetryDigest::from_features(&features);
        let context = digest.to_context_string();
        let context_tokens = estimate_text_tokens(&context, &self.cfg);
        if context_tokens > self.cfg.max_context_tokens {
            return Err(StreamProcessingError::new(
                ErrorKind::ContextExceeded,
                format!(
                    "summary context ≈{context_tokens} tokens exceeds budget {}",
                    self.cfg.max_context_tokens
                ),
            )
            .with_sizes(context.len(), self.cfg.max_context_tokens));
        }
        let text = summarizer
            .summarize(cancel, &digest, request.activity_id, prompt)
            .map_err(|e| StreamProcessingError::processing("summary generation failed").with_source(e))?;
        if text.trim().is_empty() {
            return Err(StreamProcessingError::processing("summarizer returned an empty summary"));
        }
        Ok(ModeOutput {
            content: render_ai_summary(request.activity_id, &text),
            data: None,
        })
    }
}

impl StreamProcessor for StreamDispatcher {
    fn process(&self, request: &StreamRequest, telemetry: Option<&Telemetry>) -> ProcessedStreamResult {
        self.process_with_cancel(request, telemetry, &CancelToken::new())
    }
}
