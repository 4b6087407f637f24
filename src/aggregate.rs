//! Daily per-municipality aggregation of repaired observations.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::observation::{Measure, Observation};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyAggregate {
    pub date: NaiveDate,
    pub municipality: String,
    pub frp_sum: f64,
    pub fire_risk_index_mean: f64,
    pub days_without_rain_max: f64,
    pub precipitation_mean: f64,
    pub latitude_mean: f64,
    pub longitude_mean: f64,
}

#[derive(Debug, Default)]
struct Accumulator {
    frp: Vec<f64>,
    risk: Vec<f64>,
    days: Vec<f64>,
    precipitation: Vec<f64>,
    latitude: Vec<f64>,
    longitude: Vec<f64>,
}

impl Accumulator {
    fn push(&mut self, obs: &Observation) {
        push_valid(&mut self.frp, obs.frp);
        push_valid(&mut self.risk, obs.fire_risk_index);
        push_valid(&mut self.days, obs.days_without_rain);
        push_valid(&mut self.precipitation, obs.precipitation);
        self.latitude.extend(obs.latitude.filter(|v| v.is_finite()));
        self.longitude.extend(obs.longitude.filter(|v| v.is_finite()));
    }

    fn finish(self, date: NaiveDate, municipality: String) -> Option<DailyAggregate> {
        Some(DailyAggregate {
            date,
            municipality,
            frp_sum: sum(&self.frp)?,
            fire_risk_index_mean: mean(&self.risk)?,
            days_without_rain_max: max(&self.days)?,
            precipitation_mean: mean(&self.precipitation)?,
            latitude_mean: mean(&self.latitude)?,
            longitude_mean: mean(&self.longitude)?,
        })
    }
}

/// Collapses observations to one row per (date, municipality).
///
/// Sentinel and absent values are left out of every reduction. A group that
/// ends up with no valid value for any column yields no row. Output is
/// ordered by (date, municipality).
pub fn aggregate_daily(rows: &[Observation]) -> Vec<DailyAggregate> {
    let mut groups: BTreeMap<(NaiveDate, &str), Accumulator> = BTreeMap::new();
    let mut ungrouped = 0u64;

    for obs in rows {
        match (obs.date(), obs.municipality.as_deref()) {
            (Some(date), Some(municipality)) => {
                groups.entry((date, municipality)).or_default().push(obs);
            }
            _ => ungrouped += 1,
        }
    }

    let group_count = groups.len();
    let out: Vec<DailyAggregate> = groups
        .into_iter()
        .filter_map(|((date, municipality), acc)| acc.finish(date, municipality.to_string()))
        .collect();

    info!(
        component = "aggregate",
        event = "aggregate.finish",
        input_rows = rows.len(),
        ungrouped_rows = ungrouped,
        groups = group_count,
        output_rows = out.len(),
        incomplete_groups = group_count - out.len()
    );
    out
}

fn push_valid(values: &mut Vec<f64>, measure: Option<Measure>) {
    values.extend(measure.and_then(Measure::value));
}

fn sum(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum())
}

fn mean(values: &[f64]) -> Option<f64> {
    sum(values).map(|s| s / values.len() as f64)
}

fn max(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::max)
}
