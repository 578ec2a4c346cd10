//! Vendepunkter, trender og spikes over én metrikkstrøm, pluss felles
//! etterfiltrering (minste utslag, minste tidsavstand, top-k).
//!
//! Verdier som ikke er endelige (NaN) regnes som hull. Aggregatoren bruker
//! dette til å maskere 0-sentinelen i heltallsstrømmer uten å forskyve indekser.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};

use ordered_float::OrderedFloat;

use crate::stats::{mean, population_std_dev};
use crate::types::{Direction, InflectionKind, InflectionPoint, Spike, Trend};

pub const MAX_INFLECTION_POINTS: usize = 20;
pub const MAX_TRENDS: usize = 15;
pub const MAX_SPIKES: usize = 10;

/// Færre rå-treff enn dette ⇒ filtreringen hoppes over helt, slik at korte
/// eller glisne økter fortsatt får resultater. Heuristikk, se DESIGN.md.
pub const SPARSE_RESULT_THRESHOLD: usize = 5;

pub const INFLECTION_MIN_SPACING_SECS: f64 = 30.0;
pub const SPIKE_MIN_SPACING_SECS: f64 = 30.0;
pub const SPIKE_THRESHOLD_STD_DEVS: f64 = 3.0;
pub const TREND_WINDOW_SECS: f64 = 300.0;

/// Minste meningsfulle utslag per metrikk (i metrikkens enhet).
pub fn min_magnitude_for(metric: &str) -> f64 {
    match metric {
        "heartrate" => 5.0,
        "watts" => 25.0,
        "cadence" => 5.0,
        "velocity_smooth" => 0.5,
        "altitude" => 5.0,
        "temp" => 1.0,
        "grade_smooth" => 1.0,
        _ => 1.0,
    }
}

#[inline]
fn time_or_index(times: &[f64], i: usize) -> f64 {
    times.get(i).copied().unwrap_or(i as f64)
}

fn finite_points(values: &[f64]) -> Vec<(usize, f64)> {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .map(|(i, v)| (i, *v))
        .collect()
}

/// Lokale retningsskifter (zig-zag med hysterese).
///
/// Et skifte bekreftes først når verdien har trukket seg mer enn
/// `min_swing_magnitude` tilbake fra kandidat-ekstremet. Utslaget er
/// avstanden fra forrige pivot til ekstremet.
pub fn detect_inflection_points(
    values: &[f64],
    times: &[f64],
    metric_name: &str,
    min_swing_magnitude: f64,
) -> Vec<InflectionPoint> {
    let pts = finite_points(values);
    if pts.len() < 3 {
        return Vec::new();
    }
    let thr = min_swing_magnitude.max(0.0);

    let mut out = Vec::new();
    let mut rising: Option<bool> = None;
    let mut pivot = pts[0].1;
    let mut ext = pts[0];

    let push = |out: &mut Vec<InflectionPoint>, (idx, val): (usize, f64), kind, pivot: f64| {
        out.push(InflectionPoint {
            index: idx,
            time: time_or_index(times, idx),
            metric: metric_name.to_string(),
            direction: kind,
            value: val,
            magnitude: (val - pivot).abs(),
        });
    };

    for &(i, v) in &pts[1..] {
        match rising {
            None => {
                if v - pivot > thr {
                    rising = Some(true);
                    ext = (i, v);
                } else if pivot - v > thr {
                    rising = Some(false);
                    ext = (i, v);
                }
            }
            Some(true) => {
                if v >= ext.1 {
                    ext = (i, v);
                } else if ext.1 - v > thr {
                    push(&mut out, ext, InflectionKind::Peak, pivot);
                    pivot = ext.1;
                    rising = Some(false);
                    ext = (i, v);
                }
            }
            Some(false) => {
                if v <= ext.1 {
                    ext = (i, v);
                } else if v - ext.1 > thr {
                    push(&mut out, ext, InflectionKind::Valley, pivot);
                    pivot = ext.1;
                    rising = Some(true);
                    ext = (i, v);
                }
            }
        }
    }

    out
}

/// Flagger punkter der |verdi − snitt| > terskel·stdavvik (global statistikk).
pub fn detect_spikes(
    values: &[f64],
    times: &[f64],
    metric_name: &str,
    threshold_std_devs: f64,
) -> Vec<Spike> {
    let pts = finite_points(values);
    if pts.len() < 3 {
        return Vec::new();
    }
    let xs: Vec<f64> = pts.iter().map(|(_, v)| *v).collect();
    let m = mean(&xs);
    let sd = population_std_dev(&xs, m);
    if sd < 1e-9 {
        return Vec::new();
    }

    pts.iter()
        .filter(|(_, v)| (v - m).abs() > threshold_std_devs * sd)
        .map(|&(i, v)| Spike {
            index: i,
            time: time_or_index(times, i),
            metric: metric_name.to_string(),
            value: v,
            magnitude: (v - m).abs(),
            z_score: (v - m) / sd,
        })
        .collect()
}

/// Minste kvadraters linje: (stigning, r²). Degenerert x ⇒ (0, 0).
fn linear_fit(xs: &[f64], ys: &[f64]) -> (f64, f64) {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return (0.0, 0.0);
    }
    let mx = mean(&xs[..n]);
    let my = mean(&ys[..n]);

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for i in 0..n {
        let dx = xs[i] - mx;
        let dy = ys[i] - my;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx < 1e-12 {
        return (0.0, 0.0);
    }
    let slope = sxy / sxx;
    let r2 = if syy < 1e-12 { 0.0 } else { (sxy * sxy) / (sxx * syy) };
    (slope, r2.clamp(0.0, 1.0))
}

#[derive(Debug, Clone)]
struct WindowFit {
    start_index: usize,
    end_index: usize,
    start_time: f64,
    end_time: f64,
    direction: Direction,
    change: f64,
    confidence: f64,
    n: usize,
}

/// Deler serien i faste tidsvinduer, tilpasser en linje per vindu,
/// klassifiserer retning mot metrikkens terskel og slår sammen naboer
/// med samme retning. Stabile vinduer rapporteres ikke.
pub fn analyze_trends(
    values: &[f64],
    times: &[f64],
    metric_name: &str,
    window_seconds: f64,
) -> Vec<Trend> {
    let pts = finite_points(values);
    if pts.len() < 3 {
        return Vec::new();
    }
    let window = if window_seconds.is_finite() && window_seconds > 0.0 { window_seconds } else { TREND_WINDOW_SECS };
    let stable_thr = min_magnitude_for(metric_name);

    let mut fits: Vec<WindowFit> = Vec::new();
    let t0 = time_or_index(times, pts[0].0);
    let mut bucket: Vec<(usize, f64, f64)> = Vec::new();
    let mut bucket_no = 0i64;

    let flush = |bucket: &mut Vec<(usize, f64, f64)>, fits: &mut Vec<WindowFit>| {
        if bucket.len() >= 3 {
            let ts: Vec<f64> = bucket.iter().map(|b| b.1).collect();
            let vs: Vec<f64> = bucket.iter().map(|b| b.2).collect();
            let (slope, r2) = linear_fit(&ts, &vs);
            let (first, last) = (bucket[0], bucket[bucket.len() - 1]);
            let change = slope * (last.1 - first.1);
            let direction = if change.abs() < stable_thr {
                Direction::Stable
            } else if change > 0.0 {
                Direction::Increasing
            } else {
                Direction::Decreasing
            };
            fits.push(WindowFit {
                start_index: first.0,
                end_index: last.0,
                start_time: first.1,
                end_time: last.1,
                direction,
                change,
                confidence: r2,
                n: bucket.len(),
            });
        }
        bucket.clear();
    };

    for &(i, v) in &pts {
        let t = time_or_index(times, i);
        let no = ((t - t0) / window).floor() as i64;
        if no != bucket_no && !bucket.is_empty() {
            flush(&mut bucket, &mut fits);
        }
        bucket_no = no;
        bucket.push((i, t, v));
    }
    flush(&mut bucket, &mut fits);

    // slå sammen nabovinduer med samme retning
    let mut merged: Vec<WindowFit> = Vec::with_capacity(fits.len());
    for f in fits {
        match merged.last_mut() {
            Some(prev) if prev.direction == f.direction => {
                let n = prev.n + f.n;
                prev.confidence = (prev.confidence * prev.n as f64 + f.confidence * f.n as f64) / n as f64;
                prev.n = n;
                prev.end_index = f.end_index;
                prev.end_time = f.end_time;
                prev.change += f.change;
            }
            _ => merged.push(f),
        }
    }

    merged
        .into_iter()
        .filter(|w| w.direction != Direction::Stable)
        .map(|w| Trend {
            start_index: w.start_index,
            end_index: w.end_index,
            start_time: w.start_time,
            end_time: w.end_time,
            metric: metric_name.to_string(),
            direction: w.direction,
            magnitude: w.change.abs(),
            confidence: w.confidence.clamp(0.0, 1.0),
        })
        .collect()
}

// ──────────────────────────────────────────────────────────────────────────────
// Etterfiltrering
// ──────────────────────────────────────────────────────────────────────────────

/// Felles tilgang for filter/cap over alle tre detektorene.
pub trait Detection {
    fn metric(&self) -> &str;
    fn time(&self) -> f64;
    fn magnitude(&self) -> f64;
}

impl Detection for InflectionPoint {
    fn metric(&self) -> &str { &self.metric }
    fn time(&self) -> f64 { self.time }
    fn magnitude(&self) -> f64 { self.magnitude }
}

impl Detection for Spike {
    fn metric(&self) -> &str { &self.metric }
    fn time(&self) -> f64 { self.time }
    fn magnitude(&self) -> f64 { self.magnitude }
}

impl Detection for Trend {
    fn metric(&self) -> &str { &self.metric }
    fn time(&self) -> f64 { self.start_time }
    fn magnitude(&self) -> f64 { self.magnitude }
}

#[derive(Debug, Clone, Copy)]
pub struct FilterLimits {
    pub min_spacing_secs: f64,
    pub max_count: usize,
}

impl FilterLimits {
    pub const INFLECTIONS: FilterLimits = FilterLimits {
        min_spacing_secs: INFLECTION_MIN_SPACING_SECS,
        max_count: MAX_INFLECTION_POINTS,
    };
    pub const SPIKES: FilterLimits = FilterLimits {
        min_spacing_secs: SPIKE_MIN_SPACING_SECS,
        max_count: MAX_SPIKES,
    };
    pub const TRENDS: FilterLimits = FilterLimits {
        min_spacing_secs: 0.0,
        max_count: MAX_TRENDS,
    };
}

/// 1) dropp under metrikkens minste utslag, 2) minste tidsavstand per metrikk
/// (sterkeste vinner), 3) behold de `max_count` største.
///
/// Resultatet sorteres på (tid, metrikk). Små rå-resultater returneres urørt.
pub fn filter_and_cap<T: Detection>(raw: Vec<T>, limits: FilterLimits) -> Vec<T> {
    if raw.len() < SPARSE_RESULT_THRESHOLD {
        return raw;
    }

    let mut by_metric: BTreeMap<String, Vec<T>> = BTreeMap::new();
    for d in raw {
        if d.magnitude() >= min_magnitude_for(d.metric()) {
            by_metric.entry(d.metric().to_string()).or_default().push(d);
        }
    }

    let mut spaced: Vec<T> = Vec::new();
    for (_, mut items) in by_metric {
        items.sort_by(|a, b| a.time().total_cmp(&b.time()));
        let mut kept: Vec<T> = Vec::with_capacity(items.len());
        for d in items {
            match kept.last_mut() {
                Some(last) if d.time() - last.time() < limits.min_spacing_secs => {
                    if d.magnitude() > last.magnitude() {
                        *last = d;
                    }
                }
                _ => kept.push(d),
            }
        }
        spaced.extend(kept);
    }

    let mut out = top_k_by_magnitude(spaced, limits.max_count);
    out.sort_by(|a, b| {
        a.time()
            .total_cmp(&b.time())
            .then_with(|| a.metric().cmp(b.metric()))
    });
    out
}

/// Delvis top-k via min-heap av størrelse k (O(n log k)).
/// Ved like utslag vinner tidligste posisjon.
pub fn top_k_by_magnitude<T: Detection>(items: Vec<T>, k: usize) -> Vec<T> {
    if items.len() <= k {
        return items;
    }
    let mut heap: BinaryHeap<Reverse<(OrderedFloat<f64>, Reverse<usize>)>> =
        BinaryHeap::with_capacity(k + 1);
    for (pos, it) in items.iter().enumerate() {
        heap.push(Reverse((OrderedFloat(it.magnitude()), Reverse(pos))));
        if heap.len() > k {
            heap.pop();
        }
    }

    let mut keep = vec![false; items.len()];
    for Reverse((_, Reverse(pos))) in heap {
        keep[pos] = true;
    }
    items
        .into_iter()
        .zip(keep)
        .filter_map(|(it, k)| k.then_some(it))
        .collect()
}
