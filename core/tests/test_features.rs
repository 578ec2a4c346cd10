use serde::Deserialize;
use streamdigest_core::*;

// 1 Hz-utdrag fra en rolig tempoøkt
const RIDE_CSV: &str = "\
time,heartrate,watts,cadence,velocity,altitude,distance,moving
0,0,0,0,0.0,102.0,0.0,false
1,118,150,82,6.1,102.1,6.1,true
2,121,165,84,6.5,102.3,12.6,true
3,124,180,86,6.9,102.6,19.5,true
4,127,195,88,7.2,102.9,26.7,true
5,131,210,89,7.5,103.3,34.2,true
6,134,220,90,7.7,103.6,41.9,true
7,137,0,0,7.6,103.8,49.5,true
8,138,230,91,7.8,104.1,57.3,true
9,140,240,92,8.0,104.5,65.3,true
10,141,235,91,8.1,104.4,73.4,true
11,141,228,90,8.0,104.2,81.4,true
";

#[derive(Debug, Deserialize)]
struct Row {
    time: i64,
    heartrate: i32,
    watts: i32,
    cadence: i32,
    velocity: f64,
    altitude: f64,
    distance: f64,
    moving: bool,
}

fn load_csv(data: &str) -> Telemetry {
    let mut rdr = csv::Reader::from_reader(data.as_bytes());
    let rows: Vec<Row> = rdr.deserialize().collect::<Result<_, _>>().unwrap();
    Telemetry {
        time: Some(rows.iter().map(|r| r.time).collect()),
        heartrate: Some(rows.iter().map(|r| r.heartrate).collect()),
        watts: Some(rows.iter().map(|r| r.watts).collect()),
        cadence: Some(rows.iter().map(|r| r.cadence).collect()),
        velocity_smooth: Some(rows.iter().map(|r| r.velocity).collect()),
        altitude: Some(rows.iter().map(|r| r.altitude).collect()),
        distance: Some(rows.iter().map(|r| r.distance).collect()),
        moving: Some(rows.iter().map(|r| r.moving).collect()),
        ..Default::default()
    }
}

/// En time med bølgende puls/watt og en lang stigning.
fn hour_ride() -> Telemetry {
    let n = 3600usize;
    Telemetry {
        time: Some((0..n as i64).collect()),
        heartrate: Some(
            (0..n)
                .map(|i| (140.0 + 15.0 * (i as f64 / 240.0).sin()) as i32)
                .collect(),
        ),
        watts: Some(
            (0..n)
                .map(|i| if i == 1800 { 950 } else { (210.0 + 40.0 * (i as f64 / 240.0).sin()) as i32 })
                .collect(),
        ),
        velocity_smooth: Some((0..n).map(|i| 9.0 + (i as f64 / 600.0).cos()).collect()),
        altitude: Some((0..n).map(|i| 100.0 + i as f64 * 0.1).collect()),
        distance: Some((0..n).map(|i| i as f64 * 9.0).collect()),
        ..Default::default()
    }
}

#[test]
fn csv_fixture_summary_masks_sentinels() {
    let t = load_csv(RIDE_CSV);
    let f = extract_features(Some(&t), &[]).unwrap();

    assert_eq!(f.summary.total_points, 12);
    assert_eq!(f.summary.duration_seconds, 11.0);
    assert!((f.summary.total_distance_m - 81.4).abs() < 1e-9);

    // 0 i puls/watt er "ingen avlesning"
    let hr = f.statistics.heartrate.unwrap();
    assert_eq!(hr.count, 11);
    assert_eq!(hr.min, 118.0);
    let w = f.statistics.watts.unwrap();
    assert_eq!(w.count, 10);

    // 0.0 i fart er en ekte verdi
    assert_eq!(f.statistics.velocity_smooth.unwrap().count, 12);

    let moving = f.summary.moving_time_percent.unwrap();
    assert!((moving - 11.0 / 12.0 * 100.0).abs() < 1e-9);

    let elev = f.summary.elevation.unwrap();
    assert!((elev.gain - 2.5).abs() < 1e-9);
    assert!((elev.loss - 0.3).abs() < 1e-9);
    assert!((elev.net - 2.2).abs() < 1e-9);
    assert_eq!(elev.max_altitude, 104.5);
}

#[test]
fn missing_telemetry_is_data_corrupted() {
    let err = extract_features(None, &[]).unwrap_err();
    assert_eq!(err.kind, ErrorKind::DataCorrupted);
}

#[test]
fn extraction_is_deterministic() {
    let t = hour_ride();
    let a = extract_features(Some(&t), &[]).unwrap();
    let b = extract_features(Some(&t), &[]).unwrap();
    assert_eq!(a.summary, b.summary);
    assert_eq!(a.statistics, b.statistics);
    assert_eq!(a.inflection_points, b.inflection_points);
    assert_eq!(a.trends, b.trends);
    assert_eq!(a.spikes, b.spikes);
}

#[test]
fn detector_output_is_capped_and_time_ordered() {
    let f = extract_features(Some(&hour_ride()), &[]).unwrap();
    assert!(f.inflection_points.len() <= 20);
    assert!(f.trends.len() <= 15);
    assert!(f.spikes.len() <= 10);

    for w in f.inflection_points.windows(2) {
        assert!(w[0].time <= w[1].time);
    }
    assert!(f.spikes.iter().any(|s| s.metric == "watts" && s.index == 1800));
    assert!(f
        .trends
        .iter()
        .any(|t| t.metric == "altitude" && t.direction == Direction::Increasing));
}

#[test]
fn summary_carries_np_drift_and_correlation() {
    let f = extract_features(Some(&hour_ride()), &[]).unwrap();
    let np = f.summary.normalized_power.unwrap();
    let avg = f.summary.avg_power.unwrap();
    assert!(np >= avg - 1.0, "np {np} avg {avg}");
    assert!(f.summary.heart_rate_drift.is_some());

    // puls og watt følger samme sinus
    let c = f.summary.correlations.unwrap();
    assert!(c.power_heart_rate > 0.8, "{}", c.power_heart_rate);
}

#[test]
fn heart_rate_peak_is_found_near_forty_seconds() {
    let hr = [120.0, 125.0, 130.0, 140.0, 150.0, 145.0, 140.0, 135.0, 130.0, 125.0, 120.0];
    let times: Vec<f64> = (0..11).map(|i| i as f64 * 10.0).collect();
    let pts = detect_inflection_points(&hr, &times, "heartrate", 0.5);
    assert!(!pts.is_empty());
    let peak = pts
        .iter()
        .find(|p| p.direction == InflectionKind::Peak)
        .unwrap();
    assert_eq!(peak.value, 150.0);
    assert!((peak.time - 40.0).abs() <= 10.0);
}

#[test]
fn power_and_heart_rate_correlate() {
    let t = Telemetry {
        watts: Some(vec![100, 200, 300, 400, 500]),
        heartrate: Some(vec![120, 140, 160, 180, 200]),
        ..Default::default()
    };
    let c = correlations(&t);
    assert!((c.power_heart_rate - 1.0).abs() < 0.1);
    assert_eq!(c.cadence_power, 0.0);
}

#[test]
fn steady_climb_is_one_merged_trend() {
    let times: Vec<f64> = (0..900).map(f64::from).collect();
    let hr: Vec<f64> = times.iter().map(|t| 120.0 + t * 0.05).collect();
    let trends = analyze_trends(&hr, &times, "heartrate", 300.0);
    assert_eq!(trends.len(), 1);
    assert_eq!(trends[0].direction, Direction::Increasing);
    assert!(trends[0].confidence > 0.99);
    assert!((trends[0].magnitude - 44.85).abs() < 0.1);
}

fn two_lap_ride() -> Telemetry {
    Telemetry {
        time: Some((0..600).collect()),
        velocity_smooth: Some((0..600).map(|i| if i < 300 { 8.0 } else { 10.0 }).collect()),
        watts: Some((0..600).map(|i| if i < 300 { 200 } else { 260 }).collect()),
        ..Default::default()
    }
}

fn lap(idx: u32, start: usize, end: usize) -> Lap {
    Lap {
        lap_index: idx,
        name: format!("Lap {idx}"),
        start_index: start,
        end_index: end,
        ..Default::default()
    }
}

#[test]
fn laps_are_compared_by_speed() {
    let t = two_lap_ride();
    let laps = [lap(1, 0, 299), lap(2, 300, 599), lap(3, 1000, 1100)];
    let a = extract_lap_features(&t, &laps).unwrap();

    // runde 3 ligger utenfor og hoppes over
    assert_eq!(a.laps.len(), 2);
    assert_eq!(a.laps[0].duration_seconds, 299.0);
    assert_eq!(a.laps[1].avg_power, Some(260.0));
    assert_eq!(a.comparisons.fastest_lap, 2);
    assert_eq!(a.comparisons.slowest_lap, 1);
    assert!((a.comparisons.speed_variation_percent - 100.0 / 9.0).abs() < 1e-6);
    assert!((a.comparisons.consistency_score - (100.0 - 100.0 / 9.0)).abs() < 1e-6);
}

#[test]
fn lap_falls_back_to_recorded_averages() {
    let t = two_lap_ride();
    let mut l = lap(1, 0, 299);
    l.average_heartrate = Some(142.0);
    let a = extract_lap_features(&t, &[l]).unwrap();
    assert_eq!(a.laps[0].avg_heartrate, Some(142.0));
}

#[test]
fn lap_errors() {
    let t = two_lap_ride();
    assert_eq!(
        extract_lap_features(&t, &[]).unwrap_err().kind,
        ErrorKind::InvalidRequest
    );
    assert_eq!(
        extract_lap_features(&t, &[lap(1, 700, 800)]).unwrap_err().kind,
        ErrorKind::DataCorrupted
    );

    // feil i rundeanalysen stopper ikke resten
    let f = extract_features(Some(&t), &[lap(1, 700, 800)]).unwrap();
    assert!(f.lap_analysis.is_none());
    assert_eq!(f.summary.total_points, 600);
}
