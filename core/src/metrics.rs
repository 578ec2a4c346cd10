use crate::types::{Correlations, ElevationAnalysis, HeartRateDrift, Telemetry};

const NP_WINDOW_SECS: f64 = 30.0;
const MIN_NP_DURATION_SECS: f64 = 60.0;
const MIN_DRIFT_DURATION_SECS: f64 = 120.0;

/// Median tidssteg (sek). Faller tilbake til 1 Hz.
fn median_dt(time: &[i64]) -> f64 {
    let mut dts: Vec<f64> = time
        .windows(2)
        .map(|w| (w[1] - w[0]) as f64)
        .filter(|dt| *dt > 0.0)
        .collect();
    if dts.is_empty() {
        return 1.0;
    }
    dts.sort_by(f64::total_cmp);
    dts[dts.len() / 2]
}

/// Høydemeter: sum positive deltaer = stigning, sum |negative| = fall,
/// netto = siste − første. `None` uten minst to høydepunkter.
pub fn elevation_analysis(
    altitude: &[f64],
    distance: Option<&[f64]>,
    time: Option<&[i64]>,
) -> Option<ElevationAnalysis> {
    let alt: Vec<f64> = altitude.iter().copied().filter(|a| a.is_finite()).collect();
    if alt.len() < 2 {
        return None;
    }

    let mut gain = 0.0;
    let mut loss = 0.0;
    for w in alt.windows(2) {
        let d = w[1] - w[0];
        if d > 0.0 {
            gain += d;
        } else {
            loss += -d;
        }
    }
    let net = alt[alt.len() - 1] - alt[0];
    let min_altitude = alt.iter().copied().fold(f64::INFINITY, f64::min);
    let max_altitude = alt.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let hours = match time {
        Some([first, .., last]) if last > first => (*last - *first) as f64 / 3600.0,
        _ => 0.0,
    };
    let climb_rate_m_per_hour = if hours > 0.0 { gain / hours } else { 0.0 };

    let total_distance = match distance {
        Some([first, .., last]) => last - first,
        _ => 0.0,
    };
    let average_grade_percent = if total_distance > 1.0 {
        net / total_distance * 100.0
    } else {
        0.0
    };

    Some(ElevationAnalysis {
        gain,
        loss,
        net,
        min_altitude,
        max_altitude,
        climb_rate_m_per_hour,
        average_grade_percent,
    })
}

/// Normalized Power:
/// 1) 30s rullende snitt av kraft
/// 2) ^4-middel
/// 3) fjerderot
///
/// Returnerer 0 når økta er under ett minutt (for kort for vinduet).
/// 0-watt teller med her (frihjul er ekte data for NP).
pub fn normalized_power(power: &[i32], time: Option<&[i64]>) -> f64 {
    let duration = match time {
        Some([first, .., last]) => (*last - *first) as f64,
        _ => power.len() as f64, // antar 1 Hz
    };
    if duration < MIN_NP_DURATION_SECS || power.is_empty() {
        return 0.0;
    }

    let dt = time.map(median_dt).unwrap_or(1.0);
    let window = ((NP_WINDOW_SECS / dt).round() as usize).max(1);
    if power.len() < window {
        return 0.0;
    }

    let mut smooth = Vec::with_capacity(power.len() + 1 - window);
    let mut sum = 0.0f64;
    for i in 0..power.len() {
        sum += power[i].max(0) as f64;
        if i >= window {
            sum -= power[i - window].max(0) as f64;
        }
        if i + 1 >= window {
            smooth.push(sum / window as f64);
        }
    }
    if smooth.is_empty() {
        return 0.0;
    }

    let fourth_power_avg = smooth.iter().map(|x| x.powi(4)).sum::<f64>() / smooth.len() as f64;
    fourth_power_avg.powf(0.25)
}

/// Pulsdrift: snitt i første vs andre tidshalvdel (0 = ingen avlesning),
/// normalisert til bpm/time. `None` ved for lite data.
pub fn heart_rate_drift(hr: &[i32], time: Option<&[i64]>) -> Option<HeartRateDrift> {
    let n = hr.len();
    let times: Vec<f64> = (0..n)
        .map(|i| {
            time.and_then(|t| t.get(i))
                .map(|v| *v as f64)
                .unwrap_or(i as f64)
        })
        .collect();
    let (t_first, t_last) = (times.first().copied()?, times.last().copied()?);
    let duration = t_last - t_first;
    if duration < MIN_DRIFT_DURATION_SECS {
        return None;
    }
    let mid = t_first + duration / 2.0;

    let (mut s1, mut c1, mut s2, mut c2) = (0.0, 0usize, 0.0, 0usize);
    for (h, t) in hr.iter().zip(times.iter()) {
        if *h <= 0 {
            continue;
        }
        if *t < mid {
            s1 += *h as f64;
            c1 += 1;
        } else {
            s2 += *h as f64;
            c2 += 1;
        }
    }
    if c1 == 0 || c2 == 0 {
        return None;
    }

    let first_half_avg = s1 / c1 as f64;
    let second_half_avg = s2 / c2 as f64;
    let drift_bpm = second_half_avg - first_half_avg;
    // halvdelenes sentre ligger duration/2 fra hverandre
    let half_hours = (duration / 2.0) / 3600.0;

    Some(HeartRateDrift {
        first_half_avg,
        second_half_avg,
        drift_bpm,
        drift_bpm_per_hour: if half_hours > 0.0 { drift_bpm / half_hours } else { 0.0 },
        drift_percent: drift_bpm / first_half_avg * 100.0,
    })
}

/// Pearson-korrelasjon over par (x, y). n<2 eller null varians ⇒ 0.
pub fn pearson(pairs: &[(f64, f64)]) -> f64 {
    let n = pairs.len();
    if n < 2 {
        return 0.0;
    }
    let mx = pairs.iter().map(|p| p.0).sum::<f64>() / n as f64;
    let my = pairs.iter().map(|p| p.1).sum::<f64>() / n as f64;

    let mut cov = 0.0;
    let mut vx = 0.0;
    let mut vy = 0.0;
    for (x, y) in pairs {
        let dx = x - mx;
        let dy = y - my;
        cov += dx * dy;
        vx += dx * dx;
        vy += dy * dy;
    }
    let denom = (vx * vy).sqrt();
    if denom < 1e-12 {
        return 0.0;
    }
    (cov / denom).clamp(-1.0, 1.0)
}

/// Par for indekser som finnes i begge strømmene. 0 i heltallsstrømmer = hull.
fn int_pairs(a: &[i32], b: &[i32]) -> Vec<(f64, f64)> {
    a.iter()
        .zip(b.iter())
        .filter(|(x, y)| **x != 0 && **y != 0)
        .map(|(x, y)| (*x as f64, *y as f64))
        .collect()
}

fn float_int_pairs(a: &[f64], b: &[i32]) -> Vec<(f64, f64)> {
    a.iter()
        .zip(b.iter())
        .filter(|(x, y)| x.is_finite() && **y != 0)
        .map(|(x, y)| (*x, *y as f64))
        .collect()
}

/// Parvise korrelasjoner: watt↔puls, fart↔puls, kadens↔watt.
pub fn correlations(t: &Telemetry) -> Correlations {
    let power_heart_rate = match (&t.watts, &t.heartrate) {
        (Some(w), Some(h)) => pearson(&int_pairs(w, h)),
        _ => 0.0,
    };
    let speed_heart_rate = match (&t.velocity_smooth, &t.heartrate) {
        (Some(v), Some(h)) => pearson(&float_int_pairs(v, h)),
        _ => 0.0,
    };
    let cadence_power = match (&t.cadence, &t.watts) {
        (Some(c), Some(w)) => pearson(&int_pairs(c, w)),
        _ => 0.0,
    };
    Correlations {
        power_heart_rate,
        speed_heart_rate,
        cadence_power,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_dt_handles_two_second_recording() {
        let t: Vec<i64> = (0..10).map(|i| i * 2).collect();
        assert!((median_dt(&t) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn int_pairs_skip_sentinels() {
        let p = int_pairs(&[100, 0, 200], &[120, 130, 0]);
        assert_eq!(p, vec![(100.0, 120.0)]);
    }
}
