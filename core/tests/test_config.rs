use std::fs;

use streamdigest_core::*;

#[test]
fn test_save_and_load_config() {
    let path = "tests/tmp_config_roundtrip.json";
    let _ = fs::remove_file(path);

    let cfg = StreamConfig {
        max_context_tokens: 9_000,
        token_per_char_ratio: 0.3,
        operation_log_path: Some("ops.jsonl".to_string()),
        ..Default::default()
    };
    save_config(&cfg, path).expect("save_config failed");
    let loaded = load_config(path).expect("load_config failed");
    assert_eq!(loaded, cfg);

    let _ = fs::remove_file(path);
}

#[test]
fn missing_config_gives_defaults() {
    let cfg = load_config("tests/does_not_exist.json").unwrap();
    assert_eq!(cfg, StreamConfig::default());
    assert_eq!(cfg.max_context_tokens, 15_000);
    assert_eq!(cfg.default_page_size, 1_000);
}

#[test]
fn partial_config_fills_in_defaults() {
    let path = "tests/tmp_config_partial.json";
    fs::write(path, r#"{ "max_page_size": 2000 }"#).unwrap();
    let cfg = load_config(path).unwrap();
    assert_eq!(cfg.max_page_size, 2_000);
    assert_eq!(cfg.rate_limit_requests, 100);
    let _ = fs::remove_file(path);
}

#[test]
fn bad_config_names_the_field() {
    let path = "tests/tmp_config_bad.json";
    fs::write(path, r#"{ "max_context_tokens": "lots" }"#).unwrap();
    let err = load_config(path).unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidRequest);
    assert!(err.message.contains("max_context_tokens"), "{}", err.message);
    let _ = fs::remove_file(path);
}

#[test]
fn invalid_values_fail_validation() {
    let path = "tests/tmp_config_small_page.json";
    fs::write(path, r#"{ "max_page_size": 10 }"#).unwrap();
    assert!(load_config(path).is_err());
    let _ = fs::remove_file(path);
}

#[test]
fn operation_log_is_mirrored_to_disk() {
    let path = "tests/tmp_operation_log.jsonl";
    let _ = fs::remove_file(path);
    {
        let monitor = Monitor::with_log_file(path).unwrap();
        let mut ev = OperationEvent::new("process_streams", true);
        ev.activity_id = Some(77);
        monitor.record(ev);
        monitor.record(OperationEvent::new("fetch_streams", false));
        assert_eq!(monitor.log().len(), 2);
    } // drop flusher

    let text = fs::read_to_string(path).unwrap();
    let lines: Vec<OperationEvent> = text
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0].activity_id, Some(77));
    assert!(!lines[1].success);
    let _ = fs::remove_file(path);
}

// eneste test i denne binæren som rører den prosessvide konfigen
#[test]
fn global_config_is_set_once() {
    let cfg = StreamConfig {
        max_context_tokens: 7_777,
        ..Default::default()
    };
    let first = init_global(cfg.clone()).expect("first init_global failed");
    assert_eq!(first, &cfg);

    let err = init_global(StreamConfig::default()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidRequest);
    assert!(err.message.contains("already initialized"));
    assert_eq!(global().max_context_tokens, 7_777);
}
