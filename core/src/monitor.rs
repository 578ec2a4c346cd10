//! Operasjonslogg og ytelsestellere.
//!
//! Begge deles mellom samtidige kall og er beskyttet med mutex (loggen) eller
//! atomiske prometheus-tellere + mutex-aggregat. Opprettes eksplisitt ved
//! oppstart og injiseres i dispatcheren; `flush()` er nedstenging.
//! Registrering feiler aldri og blokkerer aldri hovedløpet utover en kort lås.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use log::warn;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_LOG_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationEvent {
    pub timestamp: DateTime<Utc>,
    pub operation: String,
    pub activity_id: Option<i64>,
    pub processing_mode: Option<String>,
    pub duration_ms: u64,
    pub data_size: usize,
    pub success: bool,
    pub detail: Option<String>,
}

impl OperationEvent {
    pub fn new(operation: impl Into<String>, success: bool) -> Self {
        Self {
            timestamp: Utc::now(),
            operation: operation.into(),
            activity_id: None,
            processing_mode: None,
            duration_ms: 0,
            data_size: 0,
            success,
            detail: None,
        }
    }
}

/// Fire-and-forget mottaker av strukturerte hendelser.
pub trait EventSink: Send + Sync {
    fn record(&self, event: OperationEvent);
}

/// Sink som kaster alt.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn record(&self, _event: OperationEvent) {}
}

struct LogState {
    entries: VecDeque<OperationEvent>,
    file: Option<BufWriter<File>>,
}

/// Append-only logg i minnet, valgfritt speilet til JSON-lines på disk.
pub struct OperationLog {
    capacity: usize,
    state: Mutex<LogState>,
}

impl OperationLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(LogState {
                entries: VecDeque::new(),
                file: None,
            }),
        }
    }

    pub fn with_file(capacity: usize, path: &str) -> std::io::Result<Self> {
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        let log = Self::new(capacity);
        log.lock().file = Some(BufWriter::new(f));
        Ok(log)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LogState> {
        // forgiftet lås: fortsett med dataene som finnes
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn append(&self, event: OperationEvent) {
        let mut st = self.lock();
        if let Some(f) = st.file.as_mut() {
            let line = serde_json::to_string(&event).unwrap_or_default();
            if let Err(e) = writeln!(f, "{line}") {
                warn!("operation log write failed: {e}");
            }
        }
        if st.entries.len() >= self.capacity {
            st.entries.pop_front();
        }
        st.entries.push_back(event);
    }

    pub fn entries(&self) -> Vec<OperationEvent> {
        self.lock().entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn flush(&self) {
        if let Some(f) = self.lock().file.as_mut() {
            if let Err(e) = f.flush() {
                warn!("operation log flush failed: {e}");
            }
        }
    }
}

/// Løpende aggregat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PerfAggregate {
    pub operations: u64,
    pub failures: u64,
    pub fallbacks: u64,
    pub total_duration_ms: u64,
    pub total_bytes: u64,
}

impl PerfAggregate {
    pub fn avg_duration_ms(&self) -> f64 {
        if self.operations == 0 {
            0.0
        } else {
            self.total_duration_ms as f64 / self.operations as f64
        }
    }
}

/// Prometheus-tellere i et eget register (ingen global tilstand).
pub struct PerfCounters {
    registry: Registry,
    operations: IntCounterVec,
    fallbacks: IntCounterVec,
    bytes: IntCounterVec,
    duration: HistogramVec,
    aggregate: Mutex<PerfAggregate>,
}

impl PerfCounters {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("streamdigest".into()), None)?;

        let operations = IntCounterVec::new(
            Opts::new("operations_total", "Stream operations by outcome"),
            &["operation", "outcome"],
        )?;
        let fallbacks = IntCounterVec::new(
            Opts::new("fallbacks_total", "Successful fallbacks by substituted mode"),
            &["mode"],
        )?;
        let bytes = IntCounterVec::new(
            Opts::new("processed_bytes_total", "Canonical telemetry bytes processed"),
            &["operation"],
        )?;
        let duration = HistogramVec::new(
            HistogramOpts::new("operation_duration_seconds", "Operation latency")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
            &["operation"],
        )?;

        registry.register(Box::new(operations.clone()))?;
        registry.register(Box::new(fallbacks.clone()))?;
        registry.register(Box::new(bytes.clone()))?;
        registry.register(Box::new(duration.clone()))?;

        Ok(Self {
            registry,
            operations,
            fallbacks,
            bytes,
            duration,
            aggregate: Mutex::new(PerfAggregate::default()),
        })
    }

    pub fn observe(&self, event: &OperationEvent) {
        let outcome = if event.success { "success" } else { "failure" };
        self.operations
            .with_label_values(&[event.operation.as_str(), outcome])
            .inc();
        self.bytes
            .with_label_values(&[event.operation.as_str()])
            .inc_by(event.data_size as u64);
        self.duration
            .with_label_values(&[event.operation.as_str()])
            .observe(event.duration_ms as f64 / 1000.0);

        let is_fallback = event
            .processing_mode
            .as_deref()
            .filter(|m| m.ends_with("-fallback"));
        if let Some(mode) = is_fallback {
            self.fallbacks.with_label_values(&[mode]).inc();
        }

        let mut agg = self.aggregate.lock().unwrap_or_else(|p| p.into_inner());
        agg.operations += 1;
        if !event.success {
            agg.failures += 1;
        }
        if is_fallback.is_some() {
            agg.fallbacks += 1;
        }
        agg.total_duration_ms += event.duration_ms;
        agg.total_bytes += event.data_size as u64;
    }

    pub fn snapshot(&self) -> PerfAggregate {
        *self.aggregate.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Prometheus tekstformat.
    pub fn export_text(&self) -> String {
        let mut buf = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buf) {
            warn!("metrics export failed: {e}");
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

/// Konkret sink: logg + tellere.
pub struct Monitor {
    log: OperationLog,
    counters: PerfCounters,
}

impl Monitor {
    pub fn new() -> prometheus::Result<Self> {
        Ok(Self {
            log: OperationLog::new(DEFAULT_LOG_CAPACITY),
            counters: PerfCounters::new()?,
        })
    }

    /// Som `new`, men speiler loggen til fil. Feil ved åpning gir kun minnelogg.
    pub fn with_log_file(path: &str) -> prometheus::Result<Self> {
        let log = match OperationLog::with_file(DEFAULT_LOG_CAPACITY, path) {
            Ok(l) => l,
            Err(e) => {
                warn!("could not open operation log {path}: {e}; keeping it in memory only");
                OperationLog::new(DEFAULT_LOG_CAPACITY)
            }
        };
        Ok(Self {
            log,
            counters: PerfCounters::new()?,
        })
    }

    pub fn log(&self) -> &OperationLog {
        &self.log
    }

    pub fn counters(&self) -> &PerfCounters {
        &self.counters
    }

    /// Nedstenging: skriv ut bufret logg.
    pub fn flush(&self) {
        self.log.flush();
    }
}

impl EventSink for Monitor {
    fn record(&self, event: OperationEvent) {
        self.counters.observe(&event);
        self.log.append(event);
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.flush();
    }
}
