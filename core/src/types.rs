use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// GPS-par: [lat, lng]. (0,0) betyr manglende fix.
pub type LatLng = [f64; 2];

/// Parallelle strømmer for én aktivitet, nøklet på strømtype.
///
/// Indeks `i` peker på samme tidspunkt i alle strømmer, men lengdene kan
/// variere (en sensor kan være stille deler av økta). Alle konsumenter må
/// derfor sjekke grenser per strøm.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<Vec<i64>>, // sek fra start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<Vec<f64>>, // meter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartrate: Option<Vec<i32>>, // bpm, 0 = ingen avlesning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watts: Option<Vec<i32>>, // watt, 0 = ingen avlesning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cadence: Option<Vec<i32>>, // rpm
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<Vec<f64>>, // meter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocity_smooth: Option<Vec<f64>>, // m/s
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp: Option<Vec<i32>>, // °C
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moving: Option<Vec<bool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grade_smooth: Option<Vec<f64>>, // prosent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latlng: Option<Vec<LatLng>>,
}

impl Telemetry {
    /// Lengde på én strøm (0 hvis den mangler).
    pub fn stream_len(&self, stream: StreamType) -> usize {
        match stream {
            StreamType::Time => self.time.as_ref().map_or(0, Vec::len),
            StreamType::Distance => self.distance.as_ref().map_or(0, Vec::len),
            StreamType::Heartrate => self.heartrate.as_ref().map_or(0, Vec::len),
            StreamType::Watts => self.watts.as_ref().map_or(0, Vec::len),
            StreamType::Cadence => self.cadence.as_ref().map_or(0, Vec::len),
            StreamType::Altitude => self.altitude.as_ref().map_or(0, Vec::len),
            StreamType::VelocitySmooth => self.velocity_smooth.as_ref().map_or(0, Vec::len),
            StreamType::Temp => self.temp.as_ref().map_or(0, Vec::len),
            StreamType::Moving => self.moving.as_ref().map_or(0, Vec::len),
            StreamType::GradeSmooth => self.grade_smooth.as_ref().map_or(0, Vec::len),
            StreamType::Latlng => self.latlng.as_ref().map_or(0, Vec::len),
        }
    }

    fn is_present(&self, stream: StreamType) -> bool {
        match stream {
            StreamType::Time => self.time.is_some(),
            StreamType::Distance => self.distance.is_some(),
            StreamType::Heartrate => self.heartrate.is_some(),
            StreamType::Watts => self.watts.is_some(),
            StreamType::Cadence => self.cadence.is_some(),
            StreamType::Altitude => self.altitude.is_some(),
            StreamType::VelocitySmooth => self.velocity_smooth.is_some(),
            StreamType::Temp => self.temp.is_some(),
            StreamType::Moving => self.moving.is_some(),
            StreamType::GradeSmooth => self.grade_smooth.is_some(),
            StreamType::Latlng => self.latlng.is_some(),
        }
    }

    /// Strømmer som faktisk finnes, i fast rekkefølge.
    pub fn available_streams(&self) -> Vec<StreamType> {
        StreamType::ALL
            .iter()
            .copied()
            .filter(|s| self.is_present(*s))
            .collect()
    }

    /// Lengste strøm – brukes som "antall punkter".
    pub fn point_count(&self) -> usize {
        StreamType::ALL
            .iter()
            .map(|s| self.stream_len(*s))
            .max()
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.point_count() == 0
    }

    /// Tidsstempel (sek) for indeks `i`; faller tilbake til indeksen når
    /// tidsstrømmen mangler eller er kortere.
    pub fn time_at(&self, i: usize) -> f64 {
        self.time
            .as_ref()
            .and_then(|t| t.get(i))
            .map(|v| *v as f64)
            .unwrap_or(i as f64)
    }

    /// Tidsakse med samme lengde som `len`.
    pub fn times_for(&self, len: usize) -> Vec<f64> {
        (0..len).map(|i| self.time_at(i)).collect()
    }

    /// Varighet i sekunder (siste − første tid). 0 uten tidsstrøm.
    pub fn duration_seconds(&self) -> f64 {
        match self.time.as_deref() {
            Some([first, .., last]) => (*last - *first).max(0) as f64,
            _ => 0.0,
        }
    }

    /// Behold kun ønskede strømmer (tom liste = alle).
    pub fn retain_streams(&mut self, wanted: &[StreamType]) {
        if wanted.is_empty() {
            return;
        }
        let keep = |s: StreamType| wanted.contains(&s);
        if !keep(StreamType::Time) { self.time = None; }
        if !keep(StreamType::Distance) { self.distance = None; }
        if !keep(StreamType::Heartrate) { self.heartrate = None; }
        if !keep(StreamType::Watts) { self.watts = None; }
        if !keep(StreamType::Cadence) { self.cadence = None; }
        if !keep(StreamType::Altitude) { self.altitude = None; }
        if !keep(StreamType::VelocitySmooth) { self.velocity_smooth = None; }
        if !keep(StreamType::Temp) { self.temp = None; }
        if !keep(StreamType::Moving) { self.moving = None; }
        if !keep(StreamType::GradeSmooth) { self.grade_smooth = None; }
        if !keep(StreamType::Latlng) { self.latlng = None; }
    }
}

/// Strømtyper slik kilden navngir dem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamType {
    Time,
    Distance,
    Heartrate,
    Watts,
    Cadence,
    Altitude,
    VelocitySmooth,
    Temp,
    Moving,
    GradeSmooth,
    Latlng,
}

impl StreamType {
    pub const ALL: [StreamType; 11] = [
        StreamType::Time,
        StreamType::Distance,
        StreamType::Heartrate,
        StreamType::Watts,
        StreamType::Cadence,
        StreamType::Altitude,
        StreamType::VelocitySmooth,
        StreamType::Temp,
        StreamType::Moving,
        StreamType::GradeSmooth,
        StreamType::Latlng,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamType::Time => "time",
            StreamType::Distance => "distance",
            StreamType::Heartrate => "heartrate",
            StreamType::Watts => "watts",
            StreamType::Cadence => "cadence",
            StreamType::Altitude => "altitude",
            StreamType::VelocitySmooth => "velocity_smooth",
            StreamType::Temp => "temp",
            StreamType::Moving => "moving",
            StreamType::GradeSmooth => "grade_smooth",
            StreamType::Latlng => "latlng",
        }
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase();
        // aksepter vanlige aliaser fra eldre klienter
        let key = match key.as_str() {
            "heart_rate" | "hr" => "heartrate",
            "power" => "watts",
            "speed" | "velocity" => "velocity_smooth",
            "grade" => "grade_smooth",
            "temperature" => "temp",
            "elevation" => "altitude",
            other => other,
        };
        StreamType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == key)
            .ok_or_else(|| format!("unknown stream type '{s}'"))
    }
}

/// Oppløsning på hentede strømmer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Low,
    Medium,
    #[default]
    High,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Low => "low",
            Resolution::Medium => "medium",
            Resolution::High => "high",
        }
    }

    /// Tetthet relativt til `low` (low≈1×, medium≈3×, high≈8×).
    pub fn density_multiplier(&self) -> f64 {
        match self {
            Resolution::Low => 1.0,
            Resolution::Medium => 3.0,
            Resolution::High => 8.0,
        }
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Resolution::Low),
            "medium" => Ok(Resolution::Medium),
            "high" | "" => Ok(Resolution::High),
            other => Err(format!("unknown resolution '{other}'")),
        }
    }
}

/// Runde/lap slik kilden leverer den. Indeksene peker inn i strømmene.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Lap {
    #[serde(default)]
    pub lap_index: u32,
    #[serde(default)]
    pub name: String,
    pub start_index: usize,
    pub end_index: usize,
    #[serde(default)]
    pub elapsed_time: i64,
    #[serde(default)]
    pub moving_time: i64,
    #[serde(default)]
    pub distance: f64,
    #[serde(default)]
    pub average_speed: f64,
    #[serde(default)]
    pub max_speed: f64,
    #[serde(default)]
    pub average_heartrate: Option<f64>,
    #[serde(default)]
    pub max_heartrate: Option<f64>,
    #[serde(default)]
    pub average_watts: Option<f64>,
}

// ──────────────────────────────────────────────────────────────────────────────
// Statistikk
// ──────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub coefficient_of_variation: f64,
    pub range: f64,
    pub q25: f64,
    pub q75: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BooleanStats {
    pub true_count: usize,
    pub false_count: usize,
    pub total: usize,
    pub true_percent: f64,
    pub false_percent: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationStats {
    pub start_lat: f64,
    pub start_lng: f64,
    pub end_lat: f64,
    pub end_lng: f64,
    pub bounding_box: BoundingBox,
    pub total_points: usize,
}

// ──────────────────────────────────────────────────────────────────────────────
// Detektorer
// ──────────────────────────────────────────────────────────────────────────────

/// Retning på en trend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Increasing,
    Decreasing,
    Stable,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Increasing => "increasing",
            Direction::Decreasing => "decreasing",
            Direction::Stable => "stable",
        }
    }
}

/// Vendepunkt-type: topp (stigende→fallende) eller bunn (fallende→stigende).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InflectionKind {
    Peak,
    Valley,
}

impl InflectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InflectionKind::Peak => "peak",
            InflectionKind::Valley => "valley",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InflectionPoint {
    pub index: usize,
    pub time: f64,
    pub metric: String,
    pub direction: InflectionKind,
    pub value: f64,
    pub magnitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    pub start_index: usize,
    pub end_index: usize,
    pub start_time: f64,
    pub end_time: f64,
    pub metric: String,
    pub direction: Direction,
    pub magnitude: f64,
    pub confidence: f64, // 0..1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spike {
    pub index: usize,
    pub time: f64,
    pub metric: String,
    pub value: f64,
    pub magnitude: f64, // |verdi − snitt| i metrikkens enhet
    pub z_score: f64,
}

// ──────────────────────────────────────────────────────────────────────────────
// Avledede fysiologiske mål
// ──────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ElevationAnalysis {
    pub gain: f64,
    pub loss: f64,
    pub net: f64,
    pub min_altitude: f64,
    pub max_altitude: f64,
    pub climb_rate_m_per_hour: f64,
    pub average_grade_percent: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HeartRateDrift {
    pub first_half_avg: f64,
    pub second_half_avg: f64,
    pub drift_bpm: f64,
    pub drift_bpm_per_hour: f64,
    pub drift_percent: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Correlations {
    pub power_heart_rate: f64,
    pub speed_heart_rate: f64,
    pub cadence_power: f64,
}

// ──────────────────────────────────────────────────────────────────────────────
// Rapport
// ──────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureSummary {
    pub available_streams: Vec<String>,
    pub total_points: usize,
    pub duration_seconds: f64,
    pub total_distance_m: f64,
    pub elevation: Option<ElevationAnalysis>,
    pub avg_speed: Option<f64>,
    pub max_speed: Option<f64>,
    pub avg_heartrate: Option<f64>,
    pub max_heartrate: Option<f64>,
    pub avg_power: Option<f64>,
    pub max_power: Option<f64>,
    pub normalized_power: Option<f64>,
    pub avg_cadence: Option<f64>,
    pub max_cadence: Option<f64>,
    pub avg_temperature: Option<f64>,
    pub min_temperature: Option<f64>,
    pub max_temperature: Option<f64>,
    pub moving_time_percent: Option<f64>,
    pub heart_rate_drift: Option<HeartRateDrift>,
    pub correlations: Option<Correlations>,
}

/// Per-metrikk statistikk. Faste felt (ikke map) gir deterministisk rekkefølge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamStatistics {
    pub heartrate: Option<MetricStats>,
    pub watts: Option<MetricStats>,
    pub cadence: Option<MetricStats>,
    pub temp: Option<MetricStats>,
    pub distance: Option<MetricStats>,
    pub altitude: Option<MetricStats>,
    pub velocity_smooth: Option<MetricStats>,
    pub grade_smooth: Option<MetricStats>,
    pub moving: Option<BooleanStats>,
    pub latlng: Option<LocationStats>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LapSummary {
    pub lap_index: u32,
    pub name: String,
    pub start_index: usize,
    pub end_index: usize,
    pub start_time: f64,
    pub end_time: f64,
    pub duration_seconds: f64,
    pub distance_m: f64,
    pub avg_speed: f64,
    pub max_speed: f64,
    pub avg_heartrate: Option<f64>,
    pub max_heartrate: Option<f64>,
    pub avg_power: Option<f64>,
    pub max_power: Option<f64>,
    pub avg_cadence: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LapComparisons {
    pub fastest_lap: u32,
    pub slowest_lap: u32,
    pub speed_variation_percent: f64,
    pub consistency_score: f64, // 0..100
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LapAnalysis {
    pub laps: Vec<LapSummary>,
    pub comparisons: LapComparisons,
}

/// Avgrenset rapport fra feature-aggregatoren. Lages ferskt per forespørsel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedFeatures {
    pub summary: FeatureSummary,
    pub statistics: StreamStatistics,
    pub inflection_points: Vec<InflectionPoint>, // ≤ 20
    pub trends: Vec<Trend>,                      // ≤ 15
    pub spikes: Vec<Spike>,                      // ≤ 10
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lap_analysis: Option<LapAnalysis>,
}

// ──────────────────────────────────────────────────────────────────────────────
// Respons-konvolutt
// ──────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessedStreamResult {
    pub tool_call_id: String,
    pub content: String,
    pub processing_mode: String,
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Telemetry>,
    /// Satt når innholdet er en rendret feilmelding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<crate::error::ErrorKind>,
}
