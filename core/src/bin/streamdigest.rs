use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use streamdigest_core::{
    global, init_global, load_config, CancelToken, Lap, Monitor, StaticSource, StreamConfig,
    StreamDispatcher, StreamProcessor, StreamRequest, Telemetry,
};

/// Kjør dispatcheren på en lagret telemetrifil og skriv resultatet som JSON.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Telemetri (JSON, ett array per strømtype)
    telemetry: PathBuf,

    /// raw | derived | ai-summary | auto
    #[arg(long)]
    mode: Option<String>,

    /// Side (1-basert); uten --page-size brukes konfigurert standard
    #[arg(long)]
    page: Option<usize>,

    /// Sidestørrelse; alene gir side 1, negativ = hele datasettet
    #[arg(long, allow_negative_numbers = true)]
    page_size: Option<i64>,

    /// Konfigurasjonsfil (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overstyr token-budsjettet
    #[arg(long)]
    max_tokens: Option<usize>,

    /// Runder (JSON-array)
    #[arg(long)]
    laps: Option<PathBuf>,

    /// Speil operasjonsloggen til fil (JSON lines)
    #[arg(long, env = "STREAMDIGEST_OPERATION_LOG")]
    operation_log: Option<String>,

    /// Aktivitets-id i rapporten
    #[arg(long, default_value_t = 0)]
    activity_id: i64,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &PathBuf) -> Result<T> {
    let raw = fs::read_to_string(path).with_context(|| format!("kunne ikke lese {}", path.display()))?;
    let de = &mut serde_json::Deserializer::from_str(&raw);
    serde_path_to_error::deserialize(de).with_context(|| format!("ugyldig JSON i {}", path.display()))
}

/// Logg til stderr så stdout bare inneholder JSON-resultatet.
fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "streamdigest_core=warn,streamdigest=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging();

    let mut cfg = match &args.config {
        Some(p) => load_config(&p.to_string_lossy())?,
        None => StreamConfig::from_env()?,
    };
    if let Some(t) = args.max_tokens {
        cfg.max_context_tokens = t;
    }
    if args.operation_log.is_some() {
        cfg.operation_log_path = args.operation_log.clone();
    }
    init_global(cfg)?;

    let telemetry: Telemetry = read_json(&args.telemetry)?;
    let laps: Vec<Lap> = match &args.laps {
        Some(p) => read_json(p)?,
        None => Vec::new(),
    };

    let monitor = match &global().operation_log_path {
        Some(path) => Monitor::with_log_file(path)?,
        None => Monitor::new()?,
    };
    let monitor = Arc::new(monitor);

    let mut request = StreamRequest::new("cli", args.activity_id);
    request.processing_mode = args.mode.clone();
    request.laps = laps;

    let dispatcher = StreamDispatcher::new(global().clone()).with_sink(monitor.clone());
    let result = if args.page.is_some() || args.page_size.is_some() {
        // filen spiller rollen som kilde; siden kuttes som ved henting
        let source = StaticSource::new(telemetry);
        request.page_number = args.page;
        request.page_size = args.page_size;
        dispatcher.handle(&request, &source, &CancelToken::new())
    } else {
        dispatcher.process(&request, Some(&telemetry))
    };

    println!("{}", serde_json::to_string_pretty(&result)?);
    monitor.flush();
    Ok(())
}
