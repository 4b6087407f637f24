//! Raw hotspot observations as exported by the INPE fire-detection portal.
//!
//! A numeric measurement is either absent (empty cell, `None`), flagged with the
//! `-999` sentinel ([`Measure::Missing`]) or an actual value. The sentinel never
//! takes part in arithmetic.

use std::fs;
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const SENTINEL: f64 = -999.0;

const TIMESTAMP_FORMATS: [&str; 4] = [
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%dT%H:%M:%S%.f",
];
const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%Y/%m/%d"];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Measure {
    Value(f64),
    Missing,
}

impl Measure {
    pub fn from_raw(raw: f64) -> Self {
        if raw == SENTINEL {
            Self::Missing
        } else {
            Self::Value(raw)
        }
    }

    pub fn value(self) -> Option<f64> {
        match self {
            Self::Value(v) => Some(v),
            Self::Missing => None,
        }
    }

    pub fn is_missing(self) -> bool {
        matches!(self, Self::Missing)
    }

    /// Value written back to tabular storage, sentinel included.
    pub fn to_raw(self) -> f64 {
        match self {
            Self::Value(v) => v,
            Self::Missing => SENTINEL,
        }
    }
}

/// Fields that the source flags with the sentinel and that imputation may repair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorProneField {
    Frp,
    DaysWithoutRain,
    Precipitation,
    FireRiskIndex,
}

impl ErrorProneField {
    pub const ALL: [ErrorProneField; 4] = [
        Self::Frp,
        Self::DaysWithoutRain,
        Self::Precipitation,
        Self::FireRiskIndex,
    ];
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp: Option<NaiveDateTime>,
    pub satellite: Option<String>,
    pub country: Option<String>,
    pub state: Option<String>,
    pub municipality: Option<String>,
    pub biome: Option<String>,
    pub days_without_rain: Option<Measure>,
    pub precipitation: Option<Measure>,
    pub fire_risk_index: Option<Measure>,
    pub frp: Option<Measure>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl Observation {
    pub fn date(&self) -> Option<NaiveDate> {
        self.timestamp.map(|ts| ts.date())
    }

    pub fn field(&self, field: ErrorProneField) -> Option<Measure> {
        match field {
            ErrorProneField::Frp => self.frp,
            ErrorProneField::DaysWithoutRain => self.days_without_rain,
            ErrorProneField::Precipitation => self.precipitation,
            ErrorProneField::FireRiskIndex => self.fire_risk_index,
        }
    }

    pub fn set_field(&mut self, field: ErrorProneField, value: Option<Measure>) {
        let slot = match field {
            ErrorProneField::Frp => &mut self.frp,
            ErrorProneField::DaysWithoutRain => &mut self.days_without_rain,
            ErrorProneField::Precipitation => &mut self.precipitation,
            ErrorProneField::FireRiskIndex => &mut self.fire_risk_index,
        };
        *slot = value;
    }

    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite() => Some((lat, lon)),
            _ => None,
        }
    }

    /// Every required field present and every error-prone field a non-negative value.
    pub fn is_clean(&self) -> bool {
        let required_present = self.timestamp.is_some()
            && self.satellite.is_some()
            && self.coordinates().is_some();
        required_present
            && ErrorProneField::ALL.iter().all(|field| {
                matches!(self.field(*field), Some(Measure::Value(v)) if v >= 0.0)
            })
    }
}

/// Country/biome restriction applied before partitioning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionFilter {
    pub country: String,
    pub biome: String,
}

impl Default for RegionFilter {
    fn default() -> Self {
        Self {
            country: "Brasil".to_string(),
            biome: "Amazônia".to_string(),
        }
    }
}

impl RegionFilter {
    pub fn matches(&self, obs: &Observation) -> bool {
        obs.country.as_deref() == Some(self.country.as_str())
            && obs.biome.as_deref() == Some(self.biome.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    Clean,
    NeedsRepair,
    OutOfRegion,
}

pub fn classify(obs: &Observation, region: &RegionFilter) -> Partition {
    if !region.matches(obs) {
        Partition::OutOfRegion
    } else if obs.is_clean() {
        Partition::Clean
    } else {
        Partition::NeedsRepair
    }
}

#[derive(Debug, Error)]
pub enum ObservationError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// One CSV line as exported, before coercion. Accepts both the English column
/// names and the Portuguese INPE export headers.
#[derive(Debug, Clone, Default, Deserialize)]
struct RawObservation {
    #[serde(rename = "DateTime", alias = "DataHora")]
    date_time: Option<String>,
    #[serde(rename = "Satellite", alias = "Satelite")]
    satellite: Option<String>,
    #[serde(rename = "Country", alias = "Pais")]
    country: Option<String>,
    #[serde(rename = "State", alias = "Estado")]
    state: Option<String>,
    #[serde(rename = "Municipality", alias = "Municipio")]
    municipality: Option<String>,
    #[serde(rename = "Biome", alias = "Bioma")]
    biome: Option<String>,
    #[serde(rename = "DaysWithoutRain", alias = "DiaSemChuva")]
    days_without_rain: Option<String>,
    #[serde(rename = "Precipitation", alias = "Precipitacao")]
    precipitation: Option<String>,
    #[serde(rename = "FireRiskIndex", alias = "RiscoFogo")]
    fire_risk_index: Option<String>,
    #[serde(rename = "FRP")]
    frp: Option<String>,
    #[serde(rename = "Latitude")]
    latitude: Option<String>,
    #[serde(rename = "Longitude")]
    longitude: Option<String>,
}

impl From<RawObservation> for Observation {
    fn from(raw: RawObservation) -> Self {
        Self {
            timestamp: raw.date_time.as_deref().and_then(parse_timestamp),
            satellite: non_empty(raw.satellite),
            country: non_empty(raw.country),
            state: non_empty(raw.state),
            municipality: non_empty(raw.municipality),
            biome: non_empty(raw.biome),
            days_without_rain: raw.days_without_rain.as_deref().and_then(parse_measure),
            precipitation: raw.precipitation.as_deref().and_then(parse_measure),
            fire_risk_index: raw.fire_risk_index.as_deref().and_then(parse_measure),
            frp: raw.frp.as_deref().and_then(parse_measure),
            latitude: raw.latitude.as_deref().and_then(parse_decimal),
            longitude: raw.longitude.as_deref().and_then(parse_decimal),
        }
    }
}

pub fn load_observations(path: &Path) -> Result<Vec<Observation>, ObservationError> {
    let file = fs::File::open(path)?;
    read_observations(file)
}

pub fn read_observations<R: std::io::Read>(reader: R) -> Result<Vec<Observation>, ObservationError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut out = Vec::new();
    for record in reader.deserialize::<RawObservation>() {
        out.push(Observation::from(record?));
    }

    debug!(
        component = "observation",
        event = "observation.read.finish",
        rows = out.len()
    );
    Ok(out)
}

/// Parses a number that may use a decimal comma. Malformed input is absent.
pub fn parse_decimal(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

pub fn parse_measure(raw: &str) -> Option<Measure> {
    parse_decimal(raw).map(Measure::from_raw)
}

pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    for format in TIMESTAMP_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(ts);
        }
    }
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(trimmed, format).ok())
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
