//! Daily aggregates to model features.
//!
//! Per row: calendar fields, cyclical month/day-of-year encodings, interaction
//! and polynomial terms, min-max normalized coordinates and trailing rolling
//! statistics over each municipality's own date-ordered series.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::f64::consts::PI;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};

use crate::aggregate::DailyAggregate;
use crate::risk::{categorize, RiskCategory};

pub const FEATURE_SCHEMA_VERSION: u32 = 1;

const MONTH_PERIOD: f64 = 12.0;
// leap years share the 365-day period
const DAY_OF_YEAR_PERIOD: f64 = 365.0;

const ROLLING_SOURCES: [&str; 3] = ["FireRiskIndex", "Precipitation", "DaysWithoutRain"];
const ROLLING_STATS: [&str; 5] = ["rollmean", "rollstd", "max", "min", "cumsum"];

const BASE_COLUMNS: [(&str, FeatureDType); 19] = [
    ("Year", FeatureDType::I64),
    ("Month", FeatureDType::I64),
    ("Day", FeatureDType::I64),
    ("DayOfYear", FeatureDType::I64),
    ("Month_sin", FeatureDType::F64),
    ("Month_cos", FeatureDType::F64),
    ("DayOfYear_sin", FeatureDType::F64),
    ("DayOfYear_cos", FeatureDType::F64),
    ("FRP", FeatureDType::F64),
    ("FireRiskIndex", FeatureDType::F64),
    ("DaysWithoutRain", FeatureDType::F64),
    ("Precipitation", FeatureDType::F64),
    ("Latitude", FeatureDType::F64),
    ("Longitude", FeatureDType::F64),
    ("Latitude_norm", FeatureDType::F64),
    ("Longitude_norm", FeatureDType::F64),
    ("FireRiskIndex_x_DaysWithoutRain", FeatureDType::F64),
    ("FireRiskIndex_squared", FeatureDType::F64),
    ("DaysWithoutRain_squared", FeatureDType::F64),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureDType {
    I64,
    F64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureColumn {
    pub name: String,
    pub dtype: FeatureDType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: u32,
    pub fingerprint: String,
    pub columns: Vec<FeatureColumn>,
}

impl FeatureSchema {
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub date: NaiveDate,
    pub municipality: String,
    pub risk_category: RiskCategory,
    /// One value per schema column, in schema order.
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    pub schema: FeatureSchema,
    pub rows: Vec<FeatureRow>,
}

impl FeatureTable {
    pub fn value(&self, row: usize, column: &str) -> Option<f64> {
        let idx = self.schema.index_of(column)?;
        self.rows.get(row)?.values.get(idx).copied()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureConfig {
    pub windows: Vec<u32>,
    pub schema_version: u32,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            windows: vec![7, 14, 30],
            schema_version: FEATURE_SCHEMA_VERSION,
        }
    }
}

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("invalid feature config: {0}")]
    InvalidConfig(String),
    #[error("non-finite value in {column} for {municipality} on {date}")]
    NonFiniteValue {
        column: String,
        municipality: String,
        date: NaiveDate,
    },
    #[error("schema version mismatch: expected {expected}, got {actual}")]
    SchemaVersionMismatch { expected: u32, actual: u32 },
    #[error("schema fingerprint mismatch: expected {expected}, got {actual}")]
    SchemaFingerprintMismatch { expected: String, actual: String },
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct RollingStats {
    mean: f64,
    std: f64,
    max: f64,
    min: f64,
    sum: f64,
}

impl RollingStats {
    fn in_stat_order(self) -> [f64; 5] {
        [self.mean, self.std, self.max, self.min, self.sum]
    }
}

/// Trailing buffers for one municipality, one per rolling source.
#[derive(Debug, Clone)]
struct SeriesWindow {
    series: [VecDeque<f64>; 3],
    max_window: usize,
}

impl SeriesWindow {
    fn new(max_window: usize) -> Self {
        Self {
            series: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
            max_window,
        }
    }

    fn push(&mut self, point: [f64; 3]) {
        for (buf, value) in self.series.iter_mut().zip(point) {
            buf.push_back(value);
            while buf.len() > self.max_window {
                buf.pop_front();
            }
        }
    }

    /// Statistics over the last `w` points, or fewer while the series is short.
    fn stats(&self, source: usize, w: usize) -> RollingStats {
        let buf = &self.series[source];
        let start = buf.len().saturating_sub(w);
        let window: Vec<f64> = buf.range(start..).copied().collect();
        let n = window.len() as f64;

        let sum = window.iter().sum::<f64>();
        let mean = sum / n;
        let std = if window.len() < 2 {
            0.0
        } else {
            let sq = window
                .iter()
                .map(|v| {
                    let d = *v - mean;
                    d * d
                })
                .sum::<f64>();
            (sq / (n - 1.0)).sqrt()
        };

        RollingStats {
            mean,
            std,
            max: window.iter().copied().fold(f64::MIN, f64::max),
            min: window.iter().copied().fold(f64::MAX, f64::min),
            sum,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Bounds {
    min: f64,
    max: f64,
}

impl Bounds {
    fn over(values: impl Iterator<Item = f64>) -> Self {
        values.fold(
            Bounds {
                min: f64::INFINITY,
                max: f64::NEG_INFINITY,
            },
            |b, v| Bounds {
                min: b.min.min(v),
                max: b.max.max(v),
            },
        )
    }

    /// A constant column normalizes to 0.
    fn normalize(self, v: f64) -> f64 {
        let span = self.max - self.min;
        if span > 0.0 {
            (v - self.min) / span
        } else {
            0.0
        }
    }
}

pub fn build_feature_schema(cfg: &FeatureConfig) -> FeatureSchema {
    let mut columns: Vec<FeatureColumn> = BASE_COLUMNS
        .iter()
        .map(|(name, dtype)| FeatureColumn {
            name: (*name).to_string(),
            dtype: *dtype,
        })
        .collect();

    for source in ROLLING_SOURCES {
        for stat in ROLLING_STATS {
            for window in &cfg.windows {
                columns.push(FeatureColumn {
                    name: rolling_column_name(source, stat, *window),
                    dtype: FeatureDType::F64,
                });
            }
        }
    }

    let fingerprint = schema_fingerprint(cfg.schema_version, &columns);

    debug!(
        component = "features",
        event = "features.schema.built",
        version = cfg.schema_version,
        windows = ?cfg.windows,
        column_count = columns.len(),
        fingerprint = fingerprint
    );

    FeatureSchema {
        version: cfg.schema_version,
        fingerprint,
        columns,
    }
}

pub fn rolling_column_name(source: &str, stat: &str, window: u32) -> String {
    format!("{source}_{stat}_{window}")
}

/// Derives the feature table for one file's daily aggregates.
///
/// Normalization bounds come from `daily` alone. Rolling windows count rows of
/// a municipality's series and need a single observation to yield a value.
/// Rows come out ordered by (date, municipality).
pub fn synthesize(
    daily: &[DailyAggregate],
    cfg: &FeatureConfig,
) -> Result<FeatureTable, FeatureError> {
    validate_config(cfg)?;
    let schema = build_feature_schema(cfg);
    let windows: Vec<usize> = cfg.windows.iter().map(|w| *w as usize).collect();
    let max_window = windows.iter().copied().max().unwrap_or(1);

    let lat_bounds = Bounds::over(daily.iter().map(|d| d.latitude_mean));
    let lon_bounds = Bounds::over(daily.iter().map(|d| d.longitude_mean));

    let mut by_municipality: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (idx, row) in daily.iter().enumerate() {
        by_municipality
            .entry(row.municipality.as_str())
            .or_default()
            .push(idx);
    }

    let mut rolling: Vec<Vec<f64>> = vec![Vec::new(); daily.len()];
    for indices in by_municipality.values_mut() {
        indices.sort_by_key(|idx| daily[*idx].date);
        let mut state = SeriesWindow::new(max_window);
        for idx in indices.iter() {
            let row = &daily[*idx];
            state.push([
                row.fire_risk_index_mean,
                row.precipitation_mean,
                row.days_without_rain_max,
            ]);
            rolling[*idx] = rolling_values(&state, &windows);
        }
    }

    let mut rows = Vec::with_capacity(daily.len());
    for (row, trailing) in daily.iter().zip(rolling) {
        let mut values = base_values(row, lat_bounds, lon_bounds);
        values.extend(trailing);

        if let Some(bad) = values.iter().position(|v| !v.is_finite()) {
            return Err(FeatureError::NonFiniteValue {
                column: schema.columns[bad].name.clone(),
                municipality: row.municipality.clone(),
                date: row.date,
            });
        }

        rows.push(FeatureRow {
            date: row.date,
            municipality: row.municipality.clone(),
            risk_category: categorize(row.frp_sum),
            values,
        });
    }
    rows.sort_by(|a, b| (a.date, &a.municipality).cmp(&(b.date, &b.municipality)));

    info!(
        component = "features",
        event = "features.synthesize.finish",
        input_rows = daily.len(),
        output_rows = rows.len(),
        municipalities = by_municipality.len(),
        column_count = schema.columns.len()
    );

    Ok(FeatureTable { schema, rows })
}

pub fn assert_schema_compatible(
    expected_version: u32,
    expected_fingerprint: &str,
    actual: &FeatureSchema,
) -> Result<(), FeatureError> {
    if expected_version != actual.version {
        return Err(FeatureError::SchemaVersionMismatch {
            expected: expected_version,
            actual: actual.version,
        });
    }

    if expected_fingerprint != actual.fingerprint {
        return Err(FeatureError::SchemaFingerprintMismatch {
            expected: expected_fingerprint.to_string(),
            actual: actual.fingerprint.clone(),
        });
    }

    Ok(())
}

/// Sine and cosine of `value` on a cycle of length `period`.
pub fn cyclical(value: f64, period: f64) -> (f64, f64) {
    let angle = 2.0 * PI * value / period;
    (angle.sin(), angle.cos())
}

fn base_values(row: &DailyAggregate, lat: Bounds, lon: Bounds) -> Vec<f64> {
    let month = row.date.month() as f64;
    let day_of_year = row.date.ordinal() as f64;
    let (month_sin, month_cos) = cyclical(month, MONTH_PERIOD);
    let (doy_sin, doy_cos) = cyclical(day_of_year, DAY_OF_YEAR_PERIOD);
    let risk = row.fire_risk_index_mean;
    let days = row.days_without_rain_max;

    vec![
        row.date.year() as f64,
        month,
        row.date.day() as f64,
        day_of_year,
        month_sin,
        month_cos,
        doy_sin,
        doy_cos,
        row.frp_sum,
        risk,
        days,
        row.precipitation_mean,
        row.latitude_mean,
        row.longitude_mean,
        lat.normalize(row.latitude_mean),
        lon.normalize(row.longitude_mean),
        risk * days,
        risk * risk,
        days * days,
    ]
}

fn rolling_values(state: &SeriesWindow, windows: &[usize]) -> Vec<f64> {
    let mut out = Vec::with_capacity(ROLLING_SOURCES.len() * ROLLING_STATS.len() * windows.len());
    for source in 0..ROLLING_SOURCES.len() {
        let per_window: Vec<[f64; 5]> = windows
            .iter()
            .map(|w| state.stats(source, *w).in_stat_order())
            .collect();
        for stat in 0..ROLLING_STATS.len() {
            out.extend(per_window.iter().map(|stats| stats[stat]));
        }
    }
    out
}

fn validate_config(cfg: &FeatureConfig) -> Result<(), FeatureError> {
    if cfg.schema_version != FEATURE_SCHEMA_VERSION {
        return Err(FeatureError::InvalidConfig(format!(
            "schema_version must equal FEATURE_SCHEMA_VERSION ({FEATURE_SCHEMA_VERSION})"
        )));
    }

    if cfg.windows.is_empty() {
        return Err(FeatureError::InvalidConfig(
            "at least one rolling window is required".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for window in &cfg.windows {
        if *window == 0 {
            return Err(FeatureError::InvalidConfig(
                "windows entries must be > 0".to_string(),
            ));
        }
        if !seen.insert(*window) {
            return Err(FeatureError::InvalidConfig(
                "windows entries must be unique".to_string(),
            ));
        }
    }

    Ok(())
}

fn schema_fingerprint(version: u32, columns: &[FeatureColumn]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("version:{version};"));
    hasher.update("columns:");
    for column in columns {
        hasher.update(column.name.as_bytes());
        match column.dtype {
            FeatureDType::I64 => hasher.update(":i64;"),
            FeatureDType::F64 => hasher.update(":f64;"),
        }
    }
    hex::encode(hasher.finalize())
}
