//! Feature-aggregator: samler statistikk, detektorer og fysiologiske mål
//! til en avgrenset `DerivedFeatures`-rapport, med valgfri rundeanalyse.

use log::{debug, warn};

use crate::detectors::{
    analyze_trends, detect_inflection_points, detect_spikes, filter_and_cap, min_magnitude_for,
    FilterLimits, SPIKE_THRESHOLD_STD_DEVS, TREND_WINDOW_SECS,
};
use crate::error::{StreamProcessingError, StreamResult};
use crate::metrics::{correlations, elevation_analysis, heart_rate_drift, normalized_power};
use crate::stats::{
    compute_boolean_stats, compute_float_stats, compute_int_stats, compute_location_stats,
    variability_metrics,
};
use crate::types::{
    DerivedFeatures, FeatureSummary, Lap, LapAnalysis, LapComparisons, LapSummary, MetricStats,
    StreamStatistics, Telemetry,
};

/// Heltallsstrøm → f64 med 0-sentinel maskert som NaN (indekser bevares).
fn masked_ints(xs: &[i32]) -> Vec<f64> {
    xs.iter()
        .map(|v| if *v == 0 { f64::NAN } else { *v as f64 })
        .collect()
}

fn non_empty(s: MetricStats) -> Option<MetricStats> {
    (s.count > 0).then_some(s)
}

/// Bygger hele rapporten. Feiler kun når telemetri mangler.
pub fn extract_features(telemetry: Option<&Telemetry>, laps: &[Lap]) -> StreamResult<DerivedFeatures> {
    let t = telemetry.ok_or_else(|| {
        StreamProcessingError::data_corrupted("telemetry is nil; nothing to extract features from")
    })?;

    let statistics = stream_statistics(t);
    let summary = feature_summary(t, &statistics);
    let (inflection_points, trends, spikes) = detect_features(t);

    let lap_analysis = if laps.is_empty() {
        None
    } else {
        match extract_lap_features(t, laps) {
            Ok(a) => Some(a),
            Err(e) => {
                warn!("lap analysis skipped: {e}");
                None
            }
        }
    };

    debug!(
        "features extracted: {} points, {} inflections, {} trends, {} spikes",
        summary.total_points,
        inflection_points.len(),
        trends.len(),
        spikes.len()
    );

    Ok(DerivedFeatures {
        summary,
        statistics,
        inflection_points,
        trends,
        spikes,
        lap_analysis,
    })
}

pub fn stream_statistics(t: &Telemetry) -> StreamStatistics {
    StreamStatistics {
        heartrate: t.heartrate.as_deref().map(compute_int_stats).and_then(non_empty),
        watts: t.watts.as_deref().map(compute_int_stats).and_then(non_empty),
        cadence: t.cadence.as_deref().map(compute_int_stats).and_then(non_empty),
        temp: t.temp.as_deref().map(compute_int_stats).and_then(non_empty),
        distance: t.distance.as_deref().map(compute_float_stats).and_then(non_empty),
        altitude: t.altitude.as_deref().map(compute_float_stats).and_then(non_empty),
        velocity_smooth: t.velocity_smooth.as_deref().map(compute_float_stats).and_then(non_empty),
        grade_smooth: t.grade_smooth.as_deref().map(compute_float_stats).and_then(non_empty),
        moving: t.moving.as_deref().map(compute_boolean_stats),
        latlng: t
            .latlng
            .as_deref()
            .map(compute_location_stats)
            .filter(|l| l.total_points > 0),
    }
}

fn feature_summary(t: &Telemetry, s: &StreamStatistics) -> FeatureSummary {
    let total_distance_m = t
        .distance
        .as_deref()
        .and_then(|d| d.iter().copied().filter(|x| x.is_finite()).reduce(f64::max))
        .unwrap_or(0.0);

    let normalized_power = t
        .watts
        .as_deref()
        .map(|w| normalized_power(w, t.time.as_deref()))
        .filter(|np| *np > 0.0);

    let correlations = match (&t.heartrate, &t.watts, &t.velocity_smooth, &t.cadence) {
        (Some(_), Some(_), _, _) | (Some(_), _, Some(_), _) | (_, Some(_), _, Some(_)) => {
            Some(correlations(t))
        }
        _ => None,
    };

    FeatureSummary {
        available_streams: t.available_streams().iter().map(|s| s.to_string()).collect(),
        total_points: t.point_count(),
        duration_seconds: t.duration_seconds(),
        total_distance_m,
        elevation: t
            .altitude
            .as_deref()
            .and_then(|a| elevation_analysis(a, t.distance.as_deref(), t.time.as_deref())),
        avg_speed: s.velocity_smooth.map(|m| m.mean),
        max_speed: s.velocity_smooth.map(|m| m.max),
        avg_heartrate: s.heartrate.map(|m| m.mean),
        max_heartrate: s.heartrate.map(|m| m.max),
        avg_power: s.watts.map(|m| m.mean),
        max_power: s.watts.map(|m| m.max),
        normalized_power,
        avg_cadence: s.cadence.map(|m| m.mean),
        max_cadence: s.cadence.map(|m| m.max),
        avg_temperature: s.temp.map(|m| m.mean),
        min_temperature: s.temp.map(|m| m.min),
        max_temperature: s.temp.map(|m| m.max),
        moving_time_percent: s.moving.filter(|b| b.total > 0).map(|b| b.true_percent),
        heart_rate_drift: t
            .heartrate
            .as_deref()
            .and_then(|h| heart_rate_drift(h, t.time.as_deref())),
        correlations,
    }
}

/// Kjører detektorene per metrikk, så felles filter/cap per kategori.
fn detect_features(
    t: &Telemetry,
) -> (
    Vec<crate::types::InflectionPoint>,
    Vec<crate::types::Trend>,
    Vec<crate::types::Spike>,
) {
    let mut series: Vec<(&str, Vec<f64>)> = Vec::new();
    if let Some(h) = &t.heartrate {
        series.push(("heartrate", masked_ints(h)));
    }
    if let Some(w) = &t.watts {
        series.push(("watts", masked_ints(w)));
    }
    if let Some(c) = &t.cadence {
        series.push(("cadence", masked_ints(c)));
    }
    if let Some(v) = &t.velocity_smooth {
        series.push(("velocity_smooth", v.clone()));
    }
    if let Some(a) = &t.altitude {
        series.push(("altitude", a.clone()));
    }

    let mut inflections = Vec::new();
    let mut trends = Vec::new();
    let mut spikes = Vec::new();

    for (metric, values) in &series {
        let times = t.times_for(values.len());
        // hysterese: halve minsteutslaget, resten tas av etterfilteret
        let swing = min_magnitude_for(metric) / 2.0;
        inflections.extend(detect_inflection_points(values, &times, metric, swing));
        trends.extend(analyze_trends(values, &times, metric, TREND_WINDOW_SECS));
        // høyde er glatt; spikes der er støy fra barometer/GPS-bytte, ikke fysiologi
        if *metric != "altitude" {
            spikes.extend(detect_spikes(values, &times, metric, SPIKE_THRESHOLD_STD_DEVS));
        }
    }

    (
        filter_and_cap(inflections, FilterLimits::INFLECTIONS),
        filter_and_cap(trends, FilterLimits::TRENDS),
        filter_and_cap(spikes, FilterLimits::SPIKES),
    )
}

// ──────────────────────────────────────────────────────────────────────────────
// Runder
// ──────────────────────────────────────────────────────────────────────────────

fn avg_nonzero(xs: &[i32]) -> Option<f64> {
    let v: Vec<f64> = xs.iter().filter(|x| **x > 0).map(|x| *x as f64).collect();
    (!v.is_empty()).then(|| v.iter().sum::<f64>() / v.len() as f64)
}

fn max_nonzero(xs: &[i32]) -> Option<f64> {
    xs.iter().filter(|x| **x > 0).max().map(|x| *x as f64)
}

fn clip<T>(xs: Option<&Vec<T>>, start: usize, end: usize) -> Option<&[T]> {
    let xs = xs?;
    if start >= xs.len() {
        return None;
    }
    Some(&xs[start..end.min(xs.len())])
}

fn lap_summary(t: &Telemetry, lap: &Lap) -> Option<LapSummary> {
    let points = t.point_count();
    if lap.start_index >= points || lap.end_index < lap.start_index {
        return None;
    }
    let start = lap.start_index;
    let end = (lap.end_index + 1).min(points); // end_index er inkluderende

    let start_time = t.time_at(start);
    let end_time = t.time_at(end - 1);
    let duration_seconds = if t.time.is_some() {
        (end_time - start_time).max(0.0)
    } else {
        lap.elapsed_time as f64
    };

    let distance_m = match clip(t.distance.as_ref(), start, end) {
        Some([first, .., last]) => (last - first).max(0.0),
        _ => lap.distance,
    };

    let speed = clip(t.velocity_smooth.as_ref(), start, end).map(compute_float_stats);
    let (avg_speed, max_speed) = match speed {
        Some(s) if s.count > 0 => (s.mean, s.max),
        _ if duration_seconds > 0.0 && distance_m > 0.0 => (distance_m / duration_seconds, lap.max_speed),
        _ => (lap.average_speed, lap.max_speed),
    };

    let hr = clip(t.heartrate.as_ref(), start, end);
    let watts = clip(t.watts.as_ref(), start, end);
    let cadence = clip(t.cadence.as_ref(), start, end);

    Some(LapSummary {
        lap_index: lap.lap_index,
        name: lap.name.clone(),
        start_index: start,
        end_index: end - 1,
        start_time,
        end_time,
        duration_seconds,
        distance_m,
        avg_speed,
        max_speed,
        avg_heartrate: hr.and_then(avg_nonzero).or(lap.average_heartrate),
        max_heartrate: hr.and_then(max_nonzero).or(lap.max_heartrate),
        avg_power: watts.and_then(avg_nonzero).or(lap.average_watts),
        max_power: watts.and_then(max_nonzero),
        avg_cadence: cadence.and_then(avg_nonzero),
    })
}

/// Én `LapSummary` per gyldig runde + sammenligning (raskeste/tregeste og
/// konsistens). Feiler når ingen runder er gitt eller ingen er gyldige.
pub fn extract_lap_features(telemetry: &Telemetry, laps: &[Lap]) -> StreamResult<LapAnalysis> {
    if laps.is_empty() {
        return Err(StreamProcessingError::invalid_request("no laps provided for lap analysis"));
    }

    let mut summaries = Vec::with_capacity(laps.len());
    for lap in laps {
        match lap_summary(telemetry, lap) {
            Some(s) => summaries.push(s),
            None => warn!(
                "lap {} ({}..={}) outside telemetry of {} points, skipped",
                lap.lap_index,
                lap.start_index,
                lap.end_index,
                telemetry.point_count()
            ),
        }
    }
    if summaries.is_empty() {
        return Err(StreamProcessingError::data_corrupted("no lap overlaps the telemetry")
            .with_context("laps", laps.len()));
    }

    let comparisons = compare_laps(&summaries);
    Ok(LapAnalysis {
        laps: summaries,
        comparisons,
    })
}

fn compare_laps(laps: &[LapSummary]) -> LapComparisons {
    // første runde vinner ved likhet
    let mut fastest = &laps[0];
    let mut slowest = &laps[0];
    for l in &laps[1..] {
        if l.avg_speed > fastest.avg_speed {
            fastest = l;
        }
        if l.avg_speed < slowest.avg_speed {
            slowest = l;
        }
    }

    let speeds: Vec<f64> = laps.iter().map(|l| l.avg_speed).collect();
    let (cv, _, _) = variability_metrics(&speeds);
    let speed_variation_percent = cv * 100.0;

    LapComparisons {
        fastest_lap: fastest.lap_index,
        slowest_lap: slowest.lap_index,
        speed_variation_percent,
        consistency_score: (100.0 - speed_variation_percent).clamp(0.0, 100.0),
    }
}
