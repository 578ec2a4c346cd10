//! Token-budsjett og paginering.
//!
//! Størrelsen anslås fra kanonisk JSON (`serde_json`) ganget med en
//! konfigurert token-per-tegn-rate. Ingen eksakt tokenizer.

use log::debug;

use crate::config::{StreamConfig, MIN_PAGE_SIZE};
use crate::error::{StreamProcessingError, StreamResult};
use crate::source::{CancelToken, TelemetrySource};
use crate::types::{Resolution, StreamType, Telemetry};

/// Sikkerhetsmargin som holdes av fra budsjettet.
pub const SAFETY_MARGIN: f64 = 0.20;
/// Typisk serialisert størrelse for ett sample på tvers av strømmene (byte).
pub const AVG_SAMPLE_BYTES: f64 = 50.0;

/// Antall byte i kanonisk JSON-form.
pub fn canonical_size(telemetry: &Telemetry) -> StreamResult<usize> {
    serde_json::to_vec(telemetry)
        .map(|b| b.len())
        .map_err(|e| {
            StreamProcessingError::processing("could not serialize telemetry for size estimation")
                .with_source(e)
        })
}

fn tokens_for_bytes(bytes: usize, cfg: &StreamConfig) -> usize {
    (bytes as f64 * cfg.token_per_char_ratio).ceil() as usize
}

/// Anslått tokenmengde: byte × rate (rundet opp).
pub fn estimate_tokens(telemetry: &Telemetry, cfg: &StreamConfig) -> StreamResult<usize> {
    Ok(tokens_for_bytes(canonical_size(telemetry)?, cfg))
}

/// Samme anslag for ferdig tekst (prompt-kontekst o.l.).
pub fn estimate_text_tokens(text: &str, cfg: &StreamConfig) -> usize {
    tokens_for_bytes(text.len(), cfg)
}

/// Er dataene for store for kontekstvinduet?
pub fn should_process(telemetry: &Telemetry, cfg: &StreamConfig) -> StreamResult<bool> {
    Ok(estimate_tokens(telemetry, cfg)? > cfg.max_context_tokens)
}

/// Sidestørrelse som passer i `available_tokens` etter 20 % margin,
/// klemt til [100, max_page_size].
pub fn optimal_page_size(available_tokens: usize, cfg: &StreamConfig) -> usize {
    let usable = available_tokens as f64 * (1.0 - SAFETY_MARGIN);
    let per_sample = (AVG_SAMPLE_BYTES * cfg.token_per_char_ratio).max(f64::EPSILON);
    let raw = (usable / per_sample).floor();
    let upper = cfg.max_page_size.max(MIN_PAGE_SIZE);
    if !raw.is_finite() {
        return upper;
    }
    (raw as usize).clamp(MIN_PAGE_SIZE, upper)
}

/// Sideantall ut fra én lavoppløst prøve.
///
/// `page_size < 0` betyr hele datasettet uten paginering ⇒ alltid 1 side,
/// uavhengig av oppløsning.
pub fn estimate_total_pages(
    source: &dyn TelemetrySource,
    activity_id: i64,
    stream_types: &[StreamType],
    resolution: Resolution,
    page_size: i64,
    cancel: &CancelToken,
) -> StreamResult<usize> {
    if page_size < 0 {
        return Ok(1);
    }
    if page_size == 0 {
        return Err(StreamProcessingError::invalid_request("page_size must not be zero")
            .with_activity(activity_id));
    }

    let sample = source
        .fetch_streams(activity_id, stream_types, Resolution::Low, cancel)
        .map_err(|e| e.into_stream_error(activity_id))?;
    let low_points = sample.point_count();
    let estimated = (low_points as f64 * resolution.density_multiplier()).round() as usize;
    let pages = estimated.div_ceil(page_size as usize).max(1);

    debug!(
        "activity {activity_id}: {low_points} low-res points ≈ {estimated} at {} → {pages} pages of {page_size}",
        resolution.as_str()
    );
    Ok(pages)
}

/// Henter én side. `page_size < 0` henter hele datasettet uendret.
///
/// Kilden har ingen egen paginering, så hele datasettet hentes og kuttes
/// lokalt til `[(page−1)·page_size, page·page_size)`.
pub fn request_data_chunk(
    source: &dyn TelemetrySource,
    activity_id: i64,
    stream_types: &[StreamType],
    resolution: Resolution,
    page: usize,
    page_size: i64,
    cancel: &CancelToken,
) -> StreamResult<Telemetry> {
    let full = source
        .fetch_streams(activity_id, stream_types, resolution, cancel)
        .map_err(|e| e.into_stream_error(activity_id))?;
    if page_size < 0 {
        return Ok(full);
    }
    Ok(slice_telemetry(&full, page, page_size as usize))
}

/// Grensesikker kutting av én strøm. Manglende strøm ⇒ `None`,
/// slutt klippes til lengden, start utenfor ⇒ tom.
pub fn slice_stream<T: Clone>(stream: Option<&Vec<T>>, start: usize, end: usize) -> Option<Vec<T>> {
    let xs = stream?;
    let end = end.min(xs.len());
    if start >= end {
        return Some(Vec::new());
    }
    Some(xs[start..end].to_vec())
}

/// Kutter alle strømmer til side `page` (1-basert). Side 0 eller
/// sidestørrelse 0 gir tomme strømmer; aldri panikk.
pub fn slice_telemetry(t: &Telemetry, page: usize, page_size: usize) -> Telemetry {
    let (start, end) = if page == 0 || page_size == 0 {
        (0, 0)
    } else {
        let start = (page - 1).saturating_mul(page_size);
        (start, start.saturating_add(page_size))
    };

    Telemetry {
        time: slice_stream(t.time.as_ref(), start, end),
        distance: slice_stream(t.distance.as_ref(), start, end),
        heartrate: slice_stream(t.heartrate.as_ref(), start, end),
        watts: slice_stream(t.watts.as_ref(), start, end),
        cadence: slice_stream(t.cadence.as_ref(), start, end),
        altitude: slice_stream(t.altitude.as_ref(), start, end),
        velocity_smooth: slice_stream(t.velocity_smooth.as_ref(), start, end),
        temp: slice_stream(t.temp.as_ref(), start, end),
        moving: slice_stream(t.moving.as_ref(), start, end),
        grade_smooth: slice_stream(t.grade_smooth.as_ref(), start, end),
        latlng: slice_stream(t.latlng.as_ref(), start, end),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_stream_clips_end() {
        let v = vec![1, 2, 3, 4, 5];
        assert_eq!(slice_stream(Some(&v), 3, 10), Some(vec![4, 5]));
        assert_eq!(slice_stream(Some(&v), 10, 20), Some(vec![]));
        assert_eq!(slice_stream::<i32>(None, 0, 2), None);
    }

    #[test]
    fn huge_page_does_not_overflow() {
        let t = Telemetry {
            heartrate: Some(vec![120, 121]),
            ..Default::default()
        };
        let s = slice_telemetry(&t, usize::MAX, usize::MAX);
        assert_eq!(s.heartrate, Some(vec![]));
    }
}
