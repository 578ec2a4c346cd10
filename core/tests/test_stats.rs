use streamdigest_core::*;

#[test]
fn int_stats_drop_zero_sentinel() {
    let s = compute_int_stats(&[0, 0, 100, 200]);
    assert_eq!(s.count, 2);
    assert_eq!(s.min, 100.0);
    assert_eq!(s.max, 200.0);
    assert!((s.mean - 150.0).abs() < 1e-9);
    assert!((s.range - 100.0).abs() < 1e-9);
}

#[test]
fn float_stats_keep_zeros() {
    let s = compute_float_stats(&[0.0, 0.0, 5.0, 10.0]);
    assert_eq!(s.count, 4);
    assert_eq!(s.min, 0.0);
    assert!((s.mean - 3.75).abs() < 1e-9);
}

#[test]
fn empty_series_give_zeroed_stats() {
    let s = compute_int_stats(&[0, 0]);
    assert_eq!(s.count, 0);
    assert_eq!(s.mean, 0.0);
    assert!(!s.coefficient_of_variation.is_nan());
}

#[test]
fn boolean_stats_empty_has_no_nan() {
    let b = compute_boolean_stats(&[]);
    assert_eq!(b.total, 0);
    assert_eq!(b.true_percent, 0.0);
    assert_eq!(b.false_percent, 0.0);

    let b = compute_boolean_stats(&[true, true, false, true]);
    assert_eq!(b.true_count, 3);
    assert!((b.true_percent - 75.0).abs() < 1e-9);
}

#[test]
fn percentile_interpolates_and_hits_extremes() {
    let xs: Vec<f64> = (1..=10).map(f64::from).collect();
    assert!((percentile(&xs, 0.5) - 5.5).abs() < 1e-9);
    assert_eq!(percentile(&xs, 0.0), 1.0);
    assert_eq!(percentile(&xs, 1.0), 10.0);

    // monoton
    let mut prev = f64::MIN;
    for i in 0..=20 {
        let v = percentile(&xs, i as f64 / 20.0);
        assert!(v >= prev);
        prev = v;
    }
}

#[test]
fn location_stats_skip_null_island() {
    let l = compute_location_stats(&[[0.0, 0.0], [40.71, -74.0], [40.75, -73.99], [0.0, 0.0]]);
    assert_eq!(l.total_points, 2);
    assert_eq!((l.start_lat, l.start_lng), (40.71, -74.0));
    assert_eq!((l.end_lat, l.end_lng), (40.75, -73.99));
    assert_eq!(l.bounding_box.min_lat, 40.71);
    assert_eq!(l.bounding_box.max_lng, -73.99);
}

#[test]
fn variability_of_constant_series_is_zero() {
    let (cv, iqr, mad) = variability_metrics(&[5.0, 5.0, 5.0, 5.0]);
    assert_eq!(cv, 0.0);
    assert_eq!(iqr, 0.0);
    assert_eq!(mad, 0.0);
}
