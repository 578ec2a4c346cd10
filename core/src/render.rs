use crate::config::StreamConfig;
use crate::pagination::optimal_page_size;
use crate::types::{DerivedFeatures, MetricStats, Telemetry};

fn range_line<T: Copy + PartialOrd + std::fmt::Display>(label: &str, xs: &[T]) -> String {
    let mut it = xs.iter().copied();
    match it.next() {
        None => format!("  {label}: 0 points\n"),
        Some(first) => {
            let (lo, hi) = it.fold((first, first), |(lo, hi), x| {
                (if x < lo { x } else { lo }, if x > hi { x } else { hi })
            });
            format!("  {label}: {} points, range {lo}–{hi}\n", xs.len())
        }
    }
}

fn float_range_line(label: &str, xs: &[f64]) -> String {
    let finite: Vec<f64> = xs.iter().copied().filter(|x| x.is_finite()).collect();
    match (
        finite.iter().copied().reduce(f64::min),
        finite.iter().copied().reduce(f64::max),
    ) {
        (Some(lo), Some(hi)) => format!("  {label}: {} points, range {lo:.1}–{hi:.1}\n", xs.len()),
        _ => format!("  {label}: {} points\n", xs.len()),
    }
}

/// Rå-modus: antall og spenn per strøm, ingen feature-uttrekk.
pub fn render_raw(activity_id: i64, t: &Telemetry, estimated_tokens: usize) -> String {
    let mut out = format!(
        "--- Stream data for activity {activity_id} ---\n{} points across {} streams (≈{estimated_tokens} tokens)\n",
        t.point_count(),
        t.available_streams().len()
    );
    if let Some(x) = &t.time { out.push_str(&range_line("time (s)", x)); }
    if let Some(x) = &t.distance { out.push_str(&float_range_line("distance (m)", x)); }
    if let Some(x) = &t.heartrate { out.push_str(&range_line("heartrate (bpm)", x)); }
    if let Some(x) = &t.watts { out.push_str(&range_line("watts (W)", x)); }
    if let Some(x) = &t.cadence { out.push_str(&range_line("cadence (rpm)", x)); }
    if let Some(x) = &t.altitude { out.push_str(&float_range_line("altitude (m)", x)); }
    if let Some(x) = &t.velocity_smooth { out.push_str(&float_range_line("velocity_smooth (m/s)", x)); }
    if let Some(x) = &t.temp { out.push_str(&range_line("temp (°C)", x)); }
    if let Some(x) = &t.grade_smooth { out.push_str(&float_range_line("grade_smooth (%)", x)); }
    if let Some(x) = &t.moving {
        let moving = x.iter().filter(|m| **m).count();
        out.push_str(&format!("  moving: {moving}/{} samples moving\n", x.len()));
    }
    if let Some(x) = &t.latlng {
        out.push_str(&format!("  latlng: {} points\n", x.len()));
    }
    out
}

fn stats_line(label: &str, unit: &str, s: &MetricStats) -> String {
    format!(
        "  {label}: avg {:.1}{unit}, median {:.1}, min {:.1}, max {:.1}, sd {:.1} (cv {:.2}, n={})\n",
        s.mean, s.median, s.min, s.max, s.std_dev, s.coefficient_of_variation, s.count
    )
}

fn clock(secs: f64) -> String {
    let s = secs.max(0.0).round() as u64;
    format!("{}:{:02}:{:02}", s / 3600, (s % 3600) / 60, s % 60)
}

/// Statistikk-fokusert rapport fra `DerivedFeatures`.
pub fn render_derived(activity_id: i64, f: &DerivedFeatures) -> String {
    let s = &f.summary;
    let mut out = format!("--- Derived analysis for activity {activity_id} ---\n");
    out.push_str(&format!(
        "Streams: {}\nPoints: {}, duration {}, distance {:.2} km\n",
        s.available_streams.join(", "),
        s.total_points,
        clock(s.duration_seconds),
        s.total_distance_m / 1000.0
    ));
    if let Some(m) = s.moving_time_percent {
        out.push_str(&format!("Moving: {m:.1}% of samples\n"));
    }
    if let Some(e) = &s.elevation {
        out.push_str(&format!(
            "Elevation: +{:.0} m / -{:.0} m (net {:.0} m, {:.0}–{:.0} m, {:.0} m/h climbing)\n",
            e.gain, e.loss, e.net, e.min_altitude, e.max_altitude, e.climb_rate_m_per_hour
        ));
    }
    if let Some(np) = s.normalized_power {
        out.push_str(&format!("Normalized power: {np:.0} W\n"));
    }
    if let Some(d) = &s.heart_rate_drift {
        out.push_str(&format!(
            "HR drift: {:.1} → {:.1} bpm ({:+.1} bpm/h, {:+.1}%)\n",
            d.first_half_avg, d.second_half_avg, d.drift_bpm_per_hour, d.drift_percent
        ));
    }
    if let Some(c) = &s.correlations {
        out.push_str(&format!(
            "Correlations: power↔HR {:.2}, speed↔HR {:.2}, cadence↔power {:.2}\n",
            c.power_heart_rate, c.speed_heart_rate, c.cadence_power
        ));
    }

    out.push_str("\nStatistics:\n");
    let st = &f.statistics;
    if let Some(x) = &st.heartrate { out.push_str(&stats_line("heartrate", " bpm", x)); }
    if let Some(x) = &st.watts { out.push_str(&stats_line("watts", " W", x)); }
    if let Some(x) = &st.cadence { out.push_str(&stats_line("cadence", " rpm", x)); }
    if let Some(x) = &st.velocity_smooth { out.push_str(&stats_line("speed", " m/s", x)); }
    if let Some(x) = &st.altitude { out.push_str(&stats_line("altitude", " m", x)); }
    if let Some(x) = &st.grade_smooth { out.push_str(&stats_line("grade", "%", x)); }
    if let Some(x) = &st.temp { out.push_str(&stats_line("temp", " °C", x)); }
    if let Some(l) = &st.latlng {
        out.push_str(&format!(
            "  route: ({:.5}, {:.5}) → ({:.5}, {:.5}), {} GPS fixes\n",
            l.start_lat, l.start_lng, l.end_lat, l.end_lng, l.total_points
        ));
    }

    if !f.trends.is_empty() {
        out.push_str(&format!("\nTrends ({}):\n", f.trends.len()));
        for t in &f.trends {
            out.push_str(&format!(
                "  {} {} by {:.1} from {} to {} (confidence {:.2})\n",
                t.metric,
                t.direction.as_str(),
                t.magnitude,
                clock(t.start_time),
                clock(t.end_time),
                t.confidence
            ));
        }
    }
    if !f.inflection_points.is_empty() {
        out.push_str(&format!("\nInflection points ({}):\n", f.inflection_points.len()));
        for p in &f.inflection_points {
            out.push_str(&format!(
                "  {} {} at {} ({:.1}, swing {:.1})\n",
                p.metric,
                p.direction.as_str(),
                clock(p.time),
                p.value,
                p.magnitude
            ));
        }
    }
    if !f.spikes.is_empty() {
        out.push_str(&format!("\nSpikes ({}):\n", f.spikes.len()));
        for sp in &f.spikes {
            out.push_str(&format!(
                "  {} {:.1} at {} ({:+.1} sd)\n",
                sp.metric,
                sp.value,
                clock(sp.time),
                sp.z_score
            ));
        }
    }
    if let Some(laps) = &f.lap_analysis {
        out.push_str(&format!("\nLaps ({}):\n", laps.laps.len()));
        for l in &laps.laps {
            let hr = l.avg_heartrate.map(|h| format!(", {h:.0} bpm")).unwrap_or_default();
            let w = l.avg_power.map(|p| format!(", {p:.0} W")).unwrap_or_default();
            out.push_str(&format!(
                "  #{} {}: {}, {:.2} km, {:.2} m/s{hr}{w}\n",
                l.lap_index,
                l.name,
                clock(l.duration_seconds),
                l.distance_m / 1000.0,
                l.avg_speed
            ));
        }
        let c = &laps.comparisons;
        out.push_str(&format!(
            "  fastest #{}, slowest #{}, variation {:.1}%, consistency {:.0}/100\n",
            c.fastest_lap, c.slowest_lap, c.speed_variation_percent, c.consistency_score
        ));
    }
    out
}

/// Meny når dataene er for store og ingen modus er valgt.
pub fn render_menu(
    activity_id: i64,
    t: &Telemetry,
    estimated_tokens: usize,
    cfg: &StreamConfig,
) -> String {
    let page_size = optimal_page_size(cfg.max_context_tokens, cfg);
    let pages = t.point_count().div_ceil(page_size).max(1);
    format!(
        "Stream data for activity {activity_id} is large: ≈{estimated_tokens} tokens \
         ({} points) against a budget of {} tokens.\n\
         Choose how to continue:\n\
         \x20 - raw: counts and ranges per stream, no analysis\n\
         \x20 - derived: statistics, trends, spikes and inflection points\n\
         \x20 - ai-summary: a narrative summary (requires summary_prompt)\n\
         Or paginate: page_size {page_size} gives about {pages} pages (page_number 1..={pages}).\n",
        t.point_count(),
        cfg.max_context_tokens
    )
}

pub fn render_ai_summary(activity_id: i64, text: &str) -> String {
    format!("--- AI summary for activity {activity_id} ---\n{}\n", text.trim())
}

/// Synlig melding om at en annen modus ble brukt.
pub fn fallback_notice(requested: &str, used: &str, reason: &str) -> String {
    format!(
        "⚠️ Requested '{requested}' processing failed ({reason}); showing '{used}' output instead.\n\n"
    )
}
