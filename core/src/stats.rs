//! Rene numeriske sammendrag over én strøm.
//!
//! Heltallsmetrikker (puls, watt, kadens, temperatur) bruker 0 som
//! "ingen avlesning" og filtrerer den bort. Flyttallsmetrikker (distanse,
//! høyde, fart, stigning) beholder 0 som en gyldig verdi.

use crate::types::{BooleanStats, BoundingBox, LatLng, LocationStats, MetricStats};

/// Statistikk for heltallsstrømmer. Nuller droppes før beregning.
pub fn compute_int_stats(values: &[i32]) -> MetricStats {
    let xs: Vec<f64> = values
        .iter()
        .filter(|v| **v != 0)
        .map(|v| *v as f64)
        .collect();
    stats_from(xs)
}

/// Samme statistikk for flyttall, men nuller beholdes.
/// Ikke-endelige verdier (NaN/inf) hoppes over.
pub fn compute_float_stats(values: &[f64]) -> MetricStats {
    let xs: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    stats_from(xs)
}

fn stats_from(mut xs: Vec<f64>) -> MetricStats {
    if xs.is_empty() {
        return MetricStats::default();
    }
    xs.sort_by(f64::total_cmp);

    let n = xs.len() as f64;
    let mean = xs.iter().sum::<f64>() / n;
    let std_dev = population_std_dev(&xs, mean);
    let min = xs[0];
    let max = xs[xs.len() - 1];

    MetricStats {
        min,
        max,
        mean,
        median: percentile(&xs, 0.5),
        std_dev,
        coefficient_of_variation: if mean != 0.0 { std_dev / mean } else { 0.0 },
        range: max - min,
        q25: percentile(&xs, 0.25),
        q75: percentile(&xs, 0.75),
        count: xs.len(),
    }
}

#[inline]
pub(crate) fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        0.0
    } else {
        xs.iter().sum::<f64>() / xs.len() as f64
    }
}

#[inline]
pub(crate) fn population_std_dev(xs: &[f64], mean: f64) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / xs.len() as f64;
    var.sqrt()
}

/// Percentil med lineær interpolasjon, rang = p·(n−1).
/// Forventer sortert input. p=0 ⇒ min, p=1 ⇒ maks.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let p = if p.is_finite() { p.clamp(0.0, 1.0) } else { 0.0 };
    let rank = p * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

pub fn compute_boolean_stats(values: &[bool]) -> BooleanStats {
    let total = values.len();
    if total == 0 {
        return BooleanStats::default();
    }
    let true_count = values.iter().filter(|v| **v).count();
    let false_count = total - true_count;
    BooleanStats {
        true_count,
        false_count,
        total,
        true_percent: true_count as f64 / total as f64 * 100.0,
        false_percent: false_count as f64 / total as f64 * 100.0,
    }
}

/// Start/slutt/bounding box over gyldige GPS-par. (0,0) er manglende fix.
pub fn compute_location_stats(pairs: &[LatLng]) -> LocationStats {
    let valid: Vec<&LatLng> = pairs
        .iter()
        .filter(|p| !(p[0] == 0.0 && p[1] == 0.0) && p[0].is_finite() && p[1].is_finite())
        .collect();

    let (first, last) = match (valid.first(), valid.last()) {
        (Some(f), Some(l)) => (*f, *l),
        _ => return LocationStats::default(),
    };

    let mut bbox = BoundingBox {
        min_lat: first[0],
        max_lat: first[0],
        min_lng: first[1],
        max_lng: first[1],
    };
    for p in &valid {
        bbox.min_lat = bbox.min_lat.min(p[0]);
        bbox.max_lat = bbox.max_lat.max(p[0]);
        bbox.min_lng = bbox.min_lng.min(p[1]);
        bbox.max_lng = bbox.max_lng.max(p[1]);
    }

    LocationStats {
        start_lat: first[0],
        start_lng: first[1],
        end_lat: last[0],
        end_lng: last[1],
        bounding_box: bbox,
        total_points: valid.len(),
    }
}

/// Variabilitet: (variasjonskoeffisient, IQR, median absolutt avvik).
pub fn variability_metrics(values: &[f64]) -> (f64, f64, f64) {
    let mut xs: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if xs.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    xs.sort_by(f64::total_cmp);

    let m = mean(&xs);
    let sd = population_std_dev(&xs, m);
    let cv = if m != 0.0 { sd / m } else { 0.0 };
    let iqr = percentile(&xs, 0.75) - percentile(&xs, 0.25);

    let med = percentile(&xs, 0.5);
    let mut dev: Vec<f64> = xs.iter().map(|x| (x - med).abs()).collect();
    dev.sort_by(f64::total_cmp);
    let mad = percentile(&dev, 0.5);

    (cv, iqr, mad)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn std_dev_is_population() {
        let xs = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let m = mean(&xs);
        assert!((population_std_dev(&xs, m) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn non_finite_floats_are_skipped() {
        let s = compute_float_stats(&[1.0, f64::NAN, 3.0]);
        assert_eq!(s.count, 2);
        assert!((s.mean - 2.0).abs() < 1e-12);
    }
}
