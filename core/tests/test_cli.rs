use std::fs;
use std::process::Command;

use streamdigest_core::*;

fn write_ride(path: &str, n: usize) {
    let t = Telemetry {
        time: Some((0..n as i64).collect()),
        heartrate: Some((0..n).map(|i| 130 + (i % 20) as i32).collect()),
        ..Default::default()
    };
    fs::write(path, serde_json::to_string(&t).unwrap()).unwrap();
}

fn streamdigest(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_streamdigest"))
        .args(args)
        .env("RUST_LOG", "warn")
        .env_remove("STREAMDIGEST_OPERATION_LOG")
        .output()
        .expect("could not start streamdigest")
}

#[test]
fn page_size_alone_prints_first_page() {
    let path = "tests/tmp_cli_page.json";
    write_ride(path, 300);

    let out = streamdigest(&[path, "--page-size", "100", "--mode", "raw"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let res: ProcessedStreamResult = serde_json::from_slice(&out.stdout).unwrap();
    assert!(res.content.starts_with("Page 1 (page_size 100, 100 points)"));
    assert_eq!(res.data.map(|d| d.point_count()), Some(100));

    let _ = fs::remove_file(path);
}

#[test]
fn library_warnings_reach_stderr() {
    let path = "tests/tmp_cli_warn.json";
    write_ride(path, 50);

    let out = streamdigest(&[path, "--config", "tests/does_not_exist.json"]);
    assert!(out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("not found, using defaults"), "{stderr}");
    // stdout er ren JSON
    let res: ProcessedStreamResult = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(res.processing_mode, "raw");

    let _ = fs::remove_file(path);
}
