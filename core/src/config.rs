use std::path::Path;

use log::{info, warn};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_path_to_error as spte;

use crate::error::{StreamProcessingError, StreamResult};

pub const DEFAULT_MAX_CONTEXT_TOKENS: usize = 15_000;
pub const DEFAULT_TOKEN_PER_CHAR_RATIO: f64 = 0.25; // ~4 tegn per token
pub const DEFAULT_PAGE_SIZE: i64 = 1_000;
pub const DEFAULT_MAX_PAGE_SIZE: usize = 5_000;
pub const MIN_PAGE_SIZE: usize = 100;

/// Prosessvid konfigurasjon. Lastes én gang ved oppstart, kun lesing etterpå.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub max_context_tokens: usize,
    pub token_per_char_ratio: f64,
    pub default_page_size: i64,
    pub max_page_size: usize,
    /// Fast klient-timeout for blocking-henting (sek).
    pub request_timeout_secs: u64,
    /// Token-bucket: N forespørsler per vindu.
    pub rate_limit_requests: u32,
    pub rate_limit_window_secs: u64,
    /// JSON-lines speil av operasjonsloggen (valgfri).
    pub operation_log_path: Option<String>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: DEFAULT_MAX_CONTEXT_TOKENS,
            token_per_char_ratio: DEFAULT_TOKEN_PER_CHAR_RATIO,
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
            request_timeout_secs: 30,
            rate_limit_requests: 100,
            rate_limit_window_secs: 900,
            operation_log_path: None,
        }
    }
}

impl StreamConfig {
    /// Defaults + overstyring fra `STREAMDIGEST_*` miljøvariabler.
    pub fn from_env() -> StreamResult<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    fn from_lookup<F>(lookup: F) -> StreamResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        fn parse<T: std::str::FromStr>(key: &str, raw: String) -> StreamResult<T> {
            raw.trim().parse::<T>().map_err(|_| {
                StreamProcessingError::invalid_request(format!("invalid value for {key}: '{raw}'"))
                    .with_context("env", key)
            })
        }

        if let Some(v) = lookup("STREAMDIGEST_MAX_CONTEXT_TOKENS") {
            cfg.max_context_tokens = parse("STREAMDIGEST_MAX_CONTEXT_TOKENS", v)?;
        }
        if let Some(v) = lookup("STREAMDIGEST_TOKEN_PER_CHAR_RATIO") {
            cfg.token_per_char_ratio = parse("STREAMDIGEST_TOKEN_PER_CHAR_RATIO", v)?;
        }
        if let Some(v) = lookup("STREAMDIGEST_DEFAULT_PAGE_SIZE") {
            cfg.default_page_size = parse("STREAMDIGEST_DEFAULT_PAGE_SIZE", v)?;
        }
        if let Some(v) = lookup("STREAMDIGEST_MAX_PAGE_SIZE") {
            cfg.max_page_size = parse("STREAMDIGEST_MAX_PAGE_SIZE", v)?;
        }
        if let Some(v) = lookup("STREAMDIGEST_REQUEST_TIMEOUT_SECS") {
            cfg.request_timeout_secs = parse("STREAMDIGEST_REQUEST_TIMEOUT_SECS", v)?;
        }
        if let Some(v) = lookup("STREAMDIGEST_RATE_LIMIT_REQUESTS") {
            cfg.rate_limit_requests = parse("STREAMDIGEST_RATE_LIMIT_REQUESTS", v)?;
        }
        if let Some(v) = lookup("STREAMDIGEST_RATE_LIMIT_WINDOW_SECS") {
            cfg.rate_limit_window_secs = parse("STREAMDIGEST_RATE_LIMIT_WINDOW_SECS", v)?;
        }
        if let Some(v) = lookup("STREAMDIGEST_OPERATION_LOG") {
            cfg.operation_log_path = Some(v);
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> StreamResult<()> {
        if self.max_context_tokens == 0 {
            return Err(StreamProcessingError::invalid_request(
                "max_context_tokens must be greater than zero",
            ));
        }
        if !self.token_per_char_ratio.is_finite() || self.token_per_char_ratio <= 0.0 {
            return Err(StreamProcessingError::invalid_request(format!(
                "token_per_char_ratio must be positive, got {}",
                self.token_per_char_ratio
            )));
        }
        if self.max_page_size < MIN_PAGE_SIZE {
            return Err(StreamProcessingError::invalid_request(format!(
                "max_page_size must be at least {MIN_PAGE_SIZE}, got {}",
                self.max_page_size
            )));
        }
        if self.rate_limit_window_secs == 0 {
            return Err(StreamProcessingError::invalid_request(
                "rate_limit_window_secs must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Leser konfig fra disk (JSON).
/// Hvis filen ikke finnes, returneres default-konfig.
pub fn load_config(path: &str) -> StreamResult<StreamConfig> {
    if !Path::new(path).exists() {
        warn!("config {path} not found, using defaults");
        return Ok(StreamConfig::default());
    }

    let contents = std::fs::read_to_string(path).map_err(|e| {
        StreamProcessingError::invalid_request(format!("could not read config {path}"))
            .with_source(e)
    })?;
    let mut de = serde_json::Deserializer::from_str(&contents);
    let cfg: StreamConfig = spte::deserialize(&mut de).map_err(|e| {
        StreamProcessingError::invalid_request(format!("config parse at {}: {}", e.path(), e.inner()))
            .with_context("path", path)
    })?;
    cfg.validate()?;
    info!(
        "config loaded from {path} (max_context_tokens={}, ratio={})",
        cfg.max_context_tokens, cfg.token_per_char_ratio
    );
    Ok(cfg)
}

/// Lagrer konfig som pretty JSON.
pub fn save_config(cfg: &StreamConfig, path: &str) -> StreamResult<()> {
    let json = serde_json::to_string_pretty(cfg).map_err(|e| {
        StreamProcessingError::processing("could not serialize config").with_source(e)
    })?;
    std::fs::write(path, json).map_err(|e| {
        StreamProcessingError::processing(format!("could not write config {path}")).with_source(e)
    })?;
    info!("config saved to {path}");
    Ok(())
}

static GLOBAL: OnceCell<StreamConfig> = OnceCell::new();

/// Setter den prosessvide konfigen. Kan kun gjøres én gang.
pub fn init_global(cfg: StreamConfig) -> StreamResult<&'static StreamConfig> {
    cfg.validate()?;
    GLOBAL.set(cfg).map_err(|_| {
        StreamProcessingError::invalid_request("global stream config is already initialized")
    })?;
    Ok(global())
}

/// Prosessvid konfig; defaults hvis `init_global` aldri ble kalt.
pub fn global() -> &'static StreamConfig {
    GLOBAL.get_or_init(StreamConfig::default)
}
