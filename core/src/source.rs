// core/src/source.rs
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, warn};
use serde::Deserialize;
use serde_path_to_error as spte;
use thiserror::Error;
use ureq::Agent;

use crate::config::StreamConfig;
use crate::error::{ErrorKind, StreamProcessingError};
use crate::types::{LatLng, Resolution, StreamType, Telemetry};

pub const STRAVA_API_BASE: &str = "https://www.strava.com/api/v3";

/// Feilkategorier fra telemetrikilden. Alle mappes til `strava_api_failure`
/// (unntatt avbrudd) når de krysser dispatcheren.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },
    #[error("activity not found")]
    NotFound,
    #[error("not authorized to read activity streams")]
    Unauthorized,
    #[error("provider unavailable (status {status})")]
    ServiceUnavailable { status: u16 },
    #[error("request timed out")]
    Timeout,
    #[error("request cancelled")]
    Cancelled,
    #[error("could not decode streams: {0}")]
    Decode(String),
    #[error("transport error: {0}")]
    Transport(String),
}

impl FetchError {
    /// Kan kalleren prøve igjen? Dette laget prøver aldri selv.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::RateLimited { .. }
                | FetchError::ServiceUnavailable { .. }
                | FetchError::Timeout
                | FetchError::Transport(_)
        )
    }

    fn category(&self) -> &'static str {
        match self {
            FetchError::RateLimited { .. } => "rate_limited",
            FetchError::NotFound => "not_found",
            FetchError::Unauthorized => "unauthorized",
            FetchError::ServiceUnavailable { .. } => "service_unavailable",
            FetchError::Timeout => "timeout",
            FetchError::Cancelled => "cancelled",
            FetchError::Decode(_) => "decode",
            FetchError::Transport(_) => "transport",
        }
    }

    /// Pakk inn som strukturert feil ved komponentgrensen.
    pub fn into_stream_error(self, activity_id: i64) -> StreamProcessingError {
        let kind = match self {
            FetchError::Cancelled => ErrorKind::ProcessingFailure,
            _ => ErrorKind::StravaApiFailure,
        };
        let mut err = StreamProcessingError::new(kind, format!("stream fetch failed: {self}"))
            .with_activity(activity_id)
            .with_context("failure_category", self.category())
            .with_context("retryable", self.is_retryable());
        if let FetchError::RateLimited { retry_after_secs } = &self {
            err = err.with_context("retry_after_secs", retry_after_secs);
        }
        err.with_source(self)
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Avbrudd / frist
// ──────────────────────────────────────────────────────────────────────────────

/// Avbruddssignal med valgfri frist, trådet gjennom alle blocking-kall.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: Some(deadline),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Tid igjen til fristen (`None` = ingen frist).
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn check(&self) -> Result<(), FetchError> {
        if self.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        match self.remaining() {
            Some(left) if left.is_zero() => Err(FetchError::Timeout),
            _ => Ok(()),
        }
    }

    /// Klient-timeout forkortet til gjenstående frist.
    pub fn effective_timeout(&self, client_timeout: Duration) -> Duration {
        match self.remaining() {
            Some(left) => left.min(client_timeout),
            None => client_timeout,
        }
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Token-bucket
// ──────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// N forespørsler per fast vindu, fylles jevnt opp. Avvisning rapporteres,
/// ingen automatisk retry.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    window: Duration,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(requests: u32, window: Duration) -> Self {
        let capacity = requests.max(1) as f64;
        Self {
            capacity,
            window: if window.is_zero() { Duration::from_secs(1) } else { window },
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn from_config(cfg: &StreamConfig) -> Self {
        Self::new(cfg.rate_limit_requests, Duration::from_secs(cfg.rate_limit_window_secs))
    }

    /// Tar ett token, ellers `Err(ventetid til neste token)`.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let mut b = self.bucket.lock().unwrap_or_else(|p| p.into_inner());
        let now = Instant::now();
        let per_sec = self.capacity / self.window.as_secs_f64();
        let elapsed = now.duration_since(b.last_refill).as_secs_f64();
        b.tokens = (b.tokens + elapsed * per_sec).min(self.capacity);
        b.last_refill = now;

        if b.tokens >= 1.0 {
            b.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - b.tokens;
            Err(Duration::from_secs_f64(missing / per_sec))
        }
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Kilde-trait
// ──────────────────────────────────────────────────────────────────────────────

/// Telemetrikilde (prod: StravaClient, test: StaticSource).
pub trait TelemetrySource: Send + Sync {
    fn fetch_streams(
        &self,
        activity_id: i64,
        stream_types: &[StreamType],
        resolution: Resolution,
        cancel: &CancelToken,
    ) -> Result<Telemetry, FetchError>;
}

// ──────────────────────────────────────────────────────────────────────────────
// Strava (blocking, ureq)
// ──────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct StreamData<T> {
    data: Vec<T>,
}

/// `key_by_type=true`-svaret. Heltallsstrømmer kan inneholde `null`.
#[derive(Debug, Default, Deserialize)]
struct StreamsResponse {
    #[serde(default)]
    time: Option<StreamData<i64>>,
    #[serde(default)]
    distance: Option<StreamData<f64>>,
    #[serde(default)]
    heartrate: Option<StreamData<Option<i32>>>,
    #[serde(default)]
    watts: Option<StreamData<Option<i32>>>,
    #[serde(default)]
    cadence: Option<StreamData<Option<i32>>>,
    #[serde(default)]
    altitude: Option<StreamData<f64>>,
    #[serde(default)]
    velocity_smooth: Option<StreamData<f64>>,
    #[serde(default)]
    temp: Option<StreamData<Option<i32>>>,
    #[serde(default)]
    moving: Option<StreamData<bool>>,
    #[serde(default)]
    grade_smooth: Option<StreamData<f64>>,
    #[serde(default)]
    latlng: Option<StreamData<LatLng>>,
}

fn sentinel(s: Option<StreamData<Option<i32>>>) -> Option<Vec<i32>> {
    s.map(|d| d.data.into_iter().map(|v| v.unwrap_or(0)).collect())
}

/// Dekoder strømsvar; `null` i heltallsstrømmer blir 0-sentinelen.
pub fn decode_streams(body: &str) -> Result<Telemetry, FetchError> {
    let mut de = serde_json::Deserializer::from_str(body);
    let r: StreamsResponse = spte::deserialize(&mut de)
        .map_err(|e| FetchError::Decode(format!("at {}: {}", e.path(), e.inner())))?;

    Ok(Telemetry {
        time: r.time.map(|d| d.data),
        distance: r.distance.map(|d| d.data),
        heartrate: sentinel(r.heartrate),
        watts: sentinel(r.watts),
        cadence: sentinel(r.cadence),
        altitude: r.altitude.map(|d| d.data),
        velocity_smooth: r.velocity_smooth.map(|d| d.data),
        temp: sentinel(r.temp),
        moving: r.moving.map(|d| d.data),
        grade_smooth: r.grade_smooth.map(|d| d.data),
        latlng: r.latlng.map(|d| d.data),
    })
}

/// HTTP-status → feilkategori.
pub fn map_status(status: u16, retry_after: Option<u64>) -> FetchError {
    match status {
        429 => FetchError::RateLimited {
            retry_after_secs: retry_after.unwrap_or(60),
        },
        404 => FetchError::NotFound,
        401 | 403 => FetchError::Unauthorized,
        500..=599 => FetchError::ServiceUnavailable { status },
        other => FetchError::Transport(format!("unexpected status {other}")),
    }
}

/// Strava-klient – enkel blocking-versjon (ureq) med fast timeout.
pub struct StravaClient {
    agent: Agent,
    base_url: String,
    access_token: String,
    timeout: Duration,
    limiter: Option<Arc<RateLimiter>>,
}

impl StravaClient {
    /// Klienten får egen token-bucket fra `rate_limit_*`; bruk
    /// `with_rate_limiter` for å dele én på tvers av klienter.
    pub fn new(access_token: impl Into<String>, cfg: &StreamConfig) -> Self {
        let timeout = Duration::from_secs(cfg.request_timeout_secs.max(1));
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            agent,
            base_url: STRAVA_API_BASE.to_string(),
            access_token: access_token.into(),
            timeout,
            limiter: Some(Arc::new(RateLimiter::from_config(cfg))),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Delt token-bucket (én per applikasjon, ikke per klient).
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn streams_url(&self, activity_id: i64, stream_types: &[StreamType], resolution: Resolution) -> String {
        let keys: Vec<&str> = if stream_types.is_empty() {
            StreamType::ALL.iter().map(|s| s.as_str()).collect()
        } else {
            stream_types.iter().map(|s| s.as_str()).collect()
        };
        format!(
            "{}/activities/{}/streams?keys={}&key_by_type=true&resolution={}",
            self.base_url,
            activity_id,
            keys.join(","),
            resolution.as_str()
        )
    }
}

fn is_timeout(t: &ureq::Transport) -> bool {
    std::error::Error::source(t)
        .and_then(|s| s.downcast_ref::<std::io::Error>())
        .map(|io| matches!(io.kind(), std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock))
        .unwrap_or(false)
}

impl TelemetrySource for StravaClient {
    fn fetch_streams(
        &self,
        activity_id: i64,
        stream_types: &[StreamType],
        resolution: Resolution,
        cancel: &CancelToken,
    ) -> Result<Telemetry, FetchError> {
        cancel.check()?;

        if let Some(limiter) = &self.limiter {
            if let Err(wait) = limiter.try_acquire() {
                warn!("rate limit reached, activity {activity_id} rejected for {:.1}s", wait.as_secs_f64());
                return Err(FetchError::RateLimited {
                    retry_after_secs: wait.as_secs().max(1),
                });
            }
        }

        let url = self.streams_url(activity_id, stream_types, resolution);
        let timeout = cancel.effective_timeout(self.timeout);
        debug!("GET {url} (timeout {:?})", timeout);

        let result = self
            .agent
            .get(&url)
            .set("Authorization", &format!("Bearer {}", self.access_token))
            .timeout(timeout)
            .call();

        // kallet kan ikke avbrytes underveis; sjekk igjen etterpå
        cancel.check()?;

        match result {
            Ok(resp) => {
                let body = resp
                    .into_string()
                    .map_err(|e| FetchError::Transport(e.to_string()))?;
                decode_streams(&body)
            }
            Err(ureq::Error::Status(code, resp)) => {
                let retry_after = resp.header("Retry-After").and_then(|v| v.trim().parse().ok());
                let err = map_status(code, retry_after);
                warn!("stream fetch for activity {activity_id} failed: {err}");
                Err(err)
            }
            Err(ureq::Error::Transport(t)) => {
                if is_timeout(&t) {
                    Err(FetchError::Timeout)
                } else {
                    Err(FetchError::Transport(t.to_string()))
                }
            }
        }
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Statisk kilde (tester, avspilling av fil)
// ──────────────────────────────────────────────────────────────────────────────

fn every_nth<T: Clone>(xs: &Option<Vec<T>>, step: usize) -> Option<Vec<T>> {
    xs.as_ref()
        .map(|v| v.iter().step_by(step).cloned().collect())
}

/// Nedsampling slik kilden gjør det: low ≈ hver 8., medium ≈ hver 3., high = alt.
pub fn downsample(t: &Telemetry, resolution: Resolution) -> Telemetry {
    let step = match resolution {
        Resolution::Low => 8,
        Resolution::Medium => 3,
        Resolution::High => 1,
    };
    if step == 1 {
        return t.clone();
    }
    Telemetry {
        time: every_nth(&t.time, step),
        distance: every_nth(&t.distance, step),
        heartrate: every_nth(&t.heartrate, step),
        watts: every_nth(&t.watts, step),
        cadence: every_nth(&t.cadence, step),
        altitude: every_nth(&t.altitude, step),
        velocity_smooth: every_nth(&t.velocity_smooth, step),
        temp: every_nth(&t.temp, step),
        moving: every_nth(&t.moving, step),
        grade_smooth: every_nth(&t.grade_smooth, step),
        latlng: every_nth(&t.latlng, step),
    }
}

/// Kilde i minnet. Teller kall slik at tester kan verifisere henteadferd.
#[derive(Debug, Default)]
pub struct StaticSource {
    telemetry: Option<Telemetry>,
    failure: Option<FetchError>,
    calls: AtomicUsize,
}

impl StaticSource {
    pub fn new(telemetry: Telemetry) -> Self {
        Self {
            telemetry: Some(telemetry),
            failure: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(err: FetchError) -> Self {
        Self {
            telemetry: None,
            failure: Some(err),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TelemetrySource for StaticSource {
    fn fetch_streams(
        &self,
        _activity_id: i64,
        stream_types: &[StreamType],
        resolution: Resolution,
        cancel: &CancelToken,
    ) -> Result<Telemetry, FetchError> {
        cancel.check()?;
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        let mut t = match &self.telemetry {
            Some(t) => downsample(t, resolution),
            None => return Err(FetchError::NotFound),
        };
        t.retain_streams(stream_types);
        Ok(t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limiter_rejects_after_capacity() {
        let l = RateLimiter::new(2, Duration::from_secs(3600));
        assert!(l.try_acquire().is_ok());
        assert!(l.try_acquire().is_ok());
        let wait = l.try_acquire().unwrap_err();
        assert!(wait.as_secs() > 0);
    }

    #[test]
    fn cancelled_token_fails_check() {
        let c = CancelToken::new();
        assert!(c.check().is_ok());
        c.cancel();
        assert_eq!(c.check(), Err(FetchError::Cancelled));
    }

    #[test]
    fn expired_deadline_is_timeout() {
        let c = CancelToken::with_deadline(Instant::now());
        assert_eq!(c.check(), Err(FetchError::Timeout));
    }

    #[test]
    fn null_samples_decode_to_zero_sentinel() {
        let body = r#"{
            "time": {"data": [0, 1, 2]},
            "heartrate": {"data": [120, null, 124]},
            "latlng": {"data": [[59.9, 10.7], [59.91, 10.71], [59.92, 10.72]]}
        }"#;
        let t = decode_streams(body).unwrap();
        assert_eq!(t.heartrate, Some(vec![120, 0, 124]));
        assert_eq!(t.latlng.as_ref().map(Vec::len), Some(3));
        assert!(t.watts.is_none());
    }

    #[test]
    fn decode_error_names_the_path() {
        let err = decode_streams(r#"{"time": {"data": ["x"]}}"#).unwrap_err();
        match err {
            FetchError::Decode(msg) => assert!(msg.contains("time.data"), "{msg}"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn status_mapping_is_distinguishable() {
        assert_eq!(map_status(429, Some(30)), FetchError::RateLimited { retry_after_secs: 30 });
        assert_eq!(map_status(404, None), FetchError::NotFound);
        assert_eq!(map_status(403, None), FetchError::Unauthorized);
        assert_eq!(map_status(503, None), FetchError::ServiceUnavailable { status: 503 });
        assert!(map_status(429, None).is_retryable());
        assert!(!map_status(401, None).is_retryable());
    }

    #[test]
    fn static_source_downsamples_and_filters() {
        let t = Telemetry {
            time: Some((0..24).collect()),
            heartrate: Some(vec![130; 24]),
            ..Default::default()
        };
        let src = StaticSource::new(t);
        let low = src
            .fetch_streams(1, &[StreamType::Heartrate], Resolution::Low, &CancelToken::new())
            .unwrap();
        assert_eq!(low.heartrate.map(|h| h.len()), Some(3));
        assert!(low.time.is_none());
        assert_eq!(src.calls(), 1);
    }

    #[test]
    fn exhausted_limiter_rejects_before_any_request() {
        let cfg = StreamConfig {
            rate_limit_requests: 1,
            rate_limit_window_secs: 3600,
            ..Default::default()
        };
        let limiter = Arc::new(RateLimiter::from_config(&cfg));
        assert!(limiter.try_acquire().is_ok());

        // porten er lukket; avvisningen må komme før HTTP-kallet
        let client = StravaClient::new("tok", &cfg)
            .with_base_url("http://127.0.0.1:9")
            .with_rate_limiter(limiter.clone());
        let err = client
            .fetch_streams(7, &[], Resolution::High, &CancelToken::new())
            .unwrap_err();
        match &err {
            FetchError::RateLimited { retry_after_secs } => assert!(*retry_after_secs >= 1),
            other => panic!("unexpected {other:?}"),
        }
        assert!(err.is_retryable());
    }

    #[test]
    fn client_limiter_follows_config() {
        let cfg = StreamConfig {
            rate_limit_requests: 1,
            rate_limit_window_secs: 3600,
            ..Default::default()
        };
        let client = StravaClient::new("tok", &cfg);
        let limiter = client.limiter.as_ref().unwrap();
        assert!(limiter.try_acquire().is_ok());
        assert!(limiter.try_acquire().is_err());
    }

    #[test]
    fn streams_url_lists_keys_and_resolution() {
        let client = StravaClient::new("tok", &StreamConfig::default()).with_base_url("http://localhost:9/");
        let url = client.streams_url(7, &[StreamType::Heartrate, StreamType::Watts], Resolution::Low);
        assert_eq!(
            url,
            "http://localhost:9/activities/7/streams?keys=heartrate,watts&key_by_type=true&resolution=low"
        );
    }
}
