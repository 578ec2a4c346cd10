use std::sync::{Arc, Mutex};

use streamdigest_core::*;

fn ride(n: usize) -> Telemetry {
    Telemetry {
        time: Some((0..n as i64).collect()),
        heartrate: Some((0..n).map(|i| 130 + (i % 25) as i32).collect()),
        watts: Some((0..n).map(|i| 190 + (i % 50) as i32).collect()),
        velocity_smooth: Some((0..n).map(|i| 8.0 + (i % 10) as f64 * 0.1).collect()),
        ..Default::default()
    }
}

struct Offline;

impl Summarizer for Offline {
    fn summarize(&self, _: &CancelToken, _: &TelemetryDigest, _: i64, _: &str) -> Result<String, SummarizeError> {
        Err(SummarizeError::Unavailable("model endpoint offline".into()))
    }
}

/// Husker konteksten den fikk.
#[derive(Default)]
struct Recording {
    seen: Mutex<Vec<String>>,
}

impl Summarizer for Recording {
    fn summarize(&self, _: &CancelToken, digest: &TelemetryDigest, activity_id: i64, prompt: &str) -> Result<String, SummarizeError> {
        self.seen.lock().unwrap().push(digest.to_context_string());
        Ok(format!("Activity {activity_id}: {prompt} -> steady aerobic ride."))
    }
}

#[test]
fn ai_summary_failure_falls_back_to_derived_with_notice() {
    let d = StreamDispatcher::new(StreamConfig::default()).with_summarizer(Arc::new(Offline));
    let req = StreamRequest::new("call-1", 11).with_mode("ai-summary").with_prompt("How did it go?");
    let res = d.process(&req, Some(&ride(300)));

    assert_eq!(res.processing_mode, "derived-fallback");
    assert_eq!(res.tool_call_id, "call-1");
    assert!(res.content.starts_with("⚠️ Requested 'ai-summary' processing failed"));
    assert!(res.content.contains("Derived analysis for activity 11"));
    assert!(res.error.is_none());
}

#[test]
fn every_mode_failing_on_nil_data_is_data_corrupted() {
    let d = StreamDispatcher::new(StreamConfig::default()).with_summarizer(Arc::new(Offline));
    let req = StreamRequest::new("call-2", 12).with_mode("ai-summary").with_prompt("summary please");
    let res = d.process(&req, None);

    assert_eq!(res.error, Some(ErrorKind::DataCorrupted));
    assert_eq!(res.processing_mode, "error");
    assert!(res.content.contains("(data_corrupted)"));
    assert!(res.content.contains("attempted_modes=ai-summary → derived → raw"));
    assert!(res.content.contains("Suggestions:"));
    assert_eq!(res.options, vec!["raw", "derived", "ai-summary"]);
}

#[test]
fn auto_with_nil_data_also_ends_in_emergency() {
    let d = StreamDispatcher::new(StreamConfig::default());
    let res = d.process(&StreamRequest::new("c", 1), None);
    assert_eq!(res.error, Some(ErrorKind::DataCorrupted));
}

#[test]
fn small_data_without_mode_is_raw_with_payload() {
    let d = StreamDispatcher::new(StreamConfig::default());
    let t = ride(40);
    let res = d.process(&StreamRequest::new("c", 3), Some(&t));
    assert_eq!(res.processing_mode, "raw");
    assert_eq!(res.data.as_ref(), Some(&t));
    assert!(res.content.contains("heartrate (bpm): 40 points"));
    assert_eq!(res.options, vec!["derived", "ai-summary"]);
}

#[test]
fn large_data_without_mode_returns_a_menu() {
    let cfg = StreamConfig {
        max_context_tokens: 200,
        ..Default::default()
    };
    let d = StreamDispatcher::new(cfg);
    let res = d.process(&StreamRequest::new("c", 4), Some(&ride(500)));

    assert_eq!(res.processing_mode, "auto");
    assert_eq!(res.options, vec!["raw", "derived", "ai-summary"]);
    assert!(res.data.is_none());
    assert!(res.content.contains("page_size 100 gives about 5 pages"));
}

#[test]
fn explicit_raw_over_budget_leaves_payload_out() {
    let cfg = StreamConfig {
        max_context_tokens: 200,
        ..Default::default()
    };
    let d = StreamDispatcher::new(cfg);
    let res = d.process(&StreamRequest::new("c", 5).with_mode("raw"), Some(&ride(500)));
    assert_eq!(res.processing_mode, "raw");
    assert!(res.data.is_none());
    assert!(res.content.contains("500 points"));
}

#[test]
fn ai_summary_without_prompt_falls_back() {
    let rec = Arc::new(Recording::default());
    let d = StreamDispatcher::new(StreamConfig::default()).with_summarizer(rec.clone());
    let res = d.process(&StreamRequest::new("c", 6).with_mode("ai-summary").with_prompt("  "), Some(&ride(200)));
    assert_eq!(res.processing_mode, "derived-fallback");
    assert!(res.content.contains("summary_prompt"));
    assert!(rec.seen.lock().unwrap().is_empty());
}

#[test]
fn ai_summary_gets_a_digest_not_raw_arrays() {
    let rec = Arc::new(Recording::default());
    let d = StreamDispatcher::new(StreamConfig::default()).with_summarizer(rec.clone());
    let res = d.process(
        &StreamRequest::new("c", 7).with_mode("ai-summary").with_prompt("Pacing?"),
        Some(&ride(600)),
    );
    assert_eq!(res.processing_mode, "ai-summary");
    assert!(res.content.contains("steady aerobic ride"));

    let seen = rec.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    let ctx: serde_json::Value = serde_json::from_str(&seen[0]).unwrap();
    assert_eq!(ctx["summary"]["total_points"], 600);
    assert!(ctx.get("heartrate").is_none());
    assert!(ctx.get("watts").is_none());
}

#[test]
fn oversized_summary_context_falls_back_to_derived() {
    let rec = Arc::new(Recording::default());
    let cfg = StreamConfig {
        max_context_tokens: 20,
        ..Default::default()
    };
    let d = StreamDispatcher::new(cfg).with_summarizer(rec.clone());
    let res = d.process(
        &StreamRequest::new("c", 15).with_mode("ai-summary").with_prompt("Pacing?"),
        Some(&ride(300)),
    );
    assert_eq!(res.processing_mode, "derived-fallback");
    assert!(res.content.contains("context_exceeded"));
    assert!(res.content.contains("exceeds budget 20"));
    assert!(rec.seen.lock().unwrap().is_empty());
}

#[test]
fn unknown_mode_tries_raw_first() {
    let d = StreamDispatcher::new(StreamConfig::default());
    let res = d.process(&StreamRequest::new("c", 8).with_mode("fancy"), Some(&ride(30)));
    assert_eq!(res.processing_mode, "raw-fallback");
    assert!(res.content.contains("Requested 'fancy' processing failed"));
}

#[test]
fn fetch_failure_is_rendered_as_api_error() {
    let d = StreamDispatcher::new(StreamConfig::default());
    let src = StaticSource::failing(FetchError::NotFound);
    let res = d.handle(&StreamRequest::new("c", 9).with_mode("derived"), &src, &CancelToken::new());
    assert_eq!(res.error, Some(ErrorKind::StravaApiFailure));
    assert_eq!(res.processing_mode, "error");
    assert!(res.content.contains("failure_category=not_found"));
    assert!(res.content.contains("data_size=0"));
    assert!(res.content.contains("available_tokens=15000"));
    assert!(res.content.contains("Alternative processing modes"));
    assert_eq!(res.options, vec!["raw", "derived", "ai-summary"]);
}

#[test]
fn unavailable_service_lists_alternatives() {
    let d = StreamDispatcher::new(StreamConfig::default());
    let src = StaticSource::failing(FetchError::ServiceUnavailable { status: 503 });
    let res = d.handle(&StreamRequest::new("c", 9), &src, &CancelToken::new());
    assert_eq!(res.error, Some(ErrorKind::StravaApiFailure));
    assert!(res.content.contains("processing_mode=auto"));
    assert!(res.content.contains("available_tokens="));
    assert_eq!(res.options.len(), 3);
}

#[test]
fn page_size_without_page_number_fetches_first_page() {
    let d = StreamDispatcher::new(StreamConfig::default());
    let src = StaticSource::new(ride(500));
    let mut req = StreamRequest::new("c", 10).with_mode("raw");
    req.page_size = Some(100);
    let res = d.handle(&req, &src, &CancelToken::new());
    assert!(res.content.starts_with("Page 1 (page_size 100, 100 points)"));
    assert_eq!(res.data.unwrap().point_count(), 100);

    // negativ størrelse uten side = hele datasettet
    req.page_size = Some(-1);
    let res = d.handle(&req, &src, &CancelToken::new());
    assert!(res.content.starts_with("--- Stream data for activity 10 ---"));
    assert_eq!(res.data.unwrap().point_count(), 500);
}

#[test]
fn handle_processes_the_requested_page() {
    let d = StreamDispatcher::new(StreamConfig::default());
    let src = StaticSource::new(ride(250));
    let req = StreamRequest::new("c", 10).with_mode("raw").with_page(3, 100);
    let res = d.handle(&req, &src, &CancelToken::new());
    assert!(res.content.starts_with("Page 3 (page_size 100, 50 points)"));
    assert_eq!(res.processing_mode, "raw");
    assert_eq!(res.data.unwrap().point_count(), 50);
}

#[test]
fn page_zero_is_an_invalid_request() {
    let d = StreamDispatcher::new(StreamConfig::default());
    let src = StaticSource::new(ride(10));
    let mut req = StreamRequest::new("c", 10);
    req.page_number = Some(0);
    let res = d.handle(&req, &src, &CancelToken::new());
    assert_eq!(res.error, Some(ErrorKind::InvalidRequest));
    assert_eq!(src.calls(), 0);
}

#[test]
fn monitor_records_operations_and_fallbacks() {
    let monitor = Arc::new(Monitor::new().unwrap());
    let d = StreamDispatcher::new(StreamConfig::default())
        .with_summarizer(Arc::new(Offline))
        .with_sink(monitor.clone());
    let src = StaticSource::new(ride(120));

    let req = StreamRequest::new("c", 13).with_mode("ai-summary").with_prompt("?");
    let res = d.handle(&req, &src, &CancelToken::new());
    assert_eq!(res.processing_mode, "derived-fallback");
    d.process(&StreamRequest::new("c", 13), None);

    let ops: Vec<String> = monitor.log().entries().into_iter().map(|e| e.operation).collect();
    assert_eq!(ops, vec!["fetch_streams", "process_streams", "process_streams"]);

    let agg = monitor.counters().snapshot();
    assert_eq!(agg.operations, 3);
    assert_eq!(agg.fallbacks, 1);
    assert_eq!(agg.failures, 1);
    assert!(monitor.counters().export_text().contains("streamdigest_operations_total"));
}

#[test]
fn dispatch_is_idempotent() {
    let d = StreamDispatcher::new(StreamConfig::default());
    let t = ride(900);
    let req = StreamRequest::new("c", 14).with_mode("derived");
    assert_eq!(d.process(&req, Some(&t)), d.process(&req, Some(&t)));
}
