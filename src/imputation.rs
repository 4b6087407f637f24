//! Spatio-temporal nearest-donor repair of sentinel-flagged measurements.
//!
//! Records that need repair borrow values from the closest clean record of the
//! same calendar day and municipality, as long as that donor lies within the
//! repair radius. Anything else is dropped.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::geo::haversine_km;
use crate::observation::{classify, ErrorProneField, Measure, Observation, Partition, RegionFilter};

pub const REPAIR_RADIUS_KM: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DonorMatch {
    /// Position of the donor in the pool passed to [`find_best_match`].
    pub index: usize,
    pub distance_km: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RepairPolicy {
    pub max_distance_km: f64,
}

impl Default for RepairPolicy {
    fn default() -> Self {
        Self {
            max_distance_km: REPAIR_RADIUS_KM,
        }
    }
}

impl RepairPolicy {
    /// The radius is inclusive.
    pub fn accepts(&self, distance_km: f64) -> bool {
        distance_km <= self.max_distance_km
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImputationReport {
    pub input_rows: u64,
    pub out_of_region_rows: u64,
    pub clean_rows: u64,
    pub repair_candidates: u64,
    pub repaired_rows: u64,
    pub dropped_rows: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImputationOutcome {
    /// Clean records followed by the repaired ones.
    pub rows: Vec<Observation>,
    pub report: ImputationReport,
}

/// Finds the donor closest to `target`.
///
/// `donors` must already be restricted to the target's date and municipality.
/// A single donor sitting on exactly the same coordinates is returned with a
/// distance of zero without evaluating the haversine formula. Among several
/// donors at the same minimal distance the first one in pool order wins.
pub fn find_best_match(target: &Observation, donors: &[&Observation]) -> Option<DonorMatch> {
    let (lat, lon) = target.coordinates()?;

    if let [only] = donors {
        let (donor_lat, donor_lon) = only.coordinates()?;
        if donor_lat == lat && donor_lon == lon {
            return Some(DonorMatch {
                index: 0,
                distance_km: 0.0,
            });
        }
        return Some(DonorMatch {
            index: 0,
            distance_km: haversine_km(lat, lon, donor_lat, donor_lon),
        });
    }

    let mut best: Option<DonorMatch> = None;
    for (index, donor) in donors.iter().enumerate() {
        let Some((donor_lat, donor_lon)) = donor.coordinates() else {
            continue;
        };
        let distance_km = haversine_km(lat, lon, donor_lat, donor_lon);
        // strict comparison keeps the first-seen donor on ties
        if best.map_or(true, |b| distance_km < b.distance_km) {
            best = Some(DonorMatch { index, distance_km });
        }
    }
    best
}

/// Returns a repaired copy of `record`, or `None` when it cannot be repaired.
///
/// Only fields in `fields` that hold the sentinel are overwritten; present
/// values and absent cells are left alone.
pub fn repair(
    record: &Observation,
    donors: &[&Observation],
    fields: &[ErrorProneField],
    policy: &RepairPolicy,
) -> Option<Observation> {
    let best = find_best_match(record, donors)?;
    if !policy.accepts(best.distance_km) {
        return None;
    }
    let donor = donors[best.index];

    let mut repaired = record.clone();
    for field in fields {
        if repaired.field(*field).is_some_and(Measure::is_missing) {
            repaired.set_field(*field, donor.field(*field));
        }
    }
    Some(repaired)
}

/// Clean records grouped by date, then municipality, preserving file order.
struct DonorIndex<'a> {
    groups: HashMap<NaiveDate, HashMap<&'a str, Vec<&'a Observation>>>,
}

impl<'a> DonorIndex<'a> {
    fn build(clean: &'a [Observation]) -> Self {
        let mut groups: HashMap<NaiveDate, HashMap<&'a str, Vec<&'a Observation>>> =
            HashMap::new();
        for obs in clean {
            if let (Some(date), Some(municipality)) = (obs.date(), obs.municipality.as_deref()) {
                groups
                    .entry(date)
                    .or_default()
                    .entry(municipality)
                    .or_default()
                    .push(obs);
            }
        }
        Self { groups }
    }

    fn pool_for(&self, target: &Observation) -> &[&'a Observation] {
        let (Some(date), Some(municipality)) = (target.date(), target.municipality.as_deref())
        else {
            return &[];
        };
        self.groups
            .get(&date)
            .and_then(|by_municipality| by_municipality.get(municipality))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Splits one file's records, repairs what can be repaired and returns the
/// aggregation input.
pub fn impute(
    observations: Vec<Observation>,
    region: &RegionFilter,
    policy: &RepairPolicy,
) -> ImputationOutcome {
    let mut report = ImputationReport {
        input_rows: observations.len() as u64,
        ..ImputationReport::default()
    };

    let mut clean = Vec::new();
    let mut needs_repair = Vec::new();
    for obs in observations {
        match classify(&obs, region) {
            Partition::Clean => clean.push(obs),
            Partition::NeedsRepair => needs_repair.push(obs),
            Partition::OutOfRegion => report.out_of_region_rows += 1,
        }
    }
    report.clean_rows = clean.len() as u64;
    report.repair_candidates = needs_repair.len() as u64;

    let repaired: Vec<Observation> = {
        let index = DonorIndex::build(&clean);
        needs_repair
            .iter()
            .filter_map(|record| {
                repair(
                    record,
                    index.pool_for(record),
                    &ErrorProneField::ALL,
                    policy,
                )
            })
            .collect()
    };
    report.repaired_rows = repaired.len() as u64;
    report.dropped_rows = report.repair_candidates - report.repaired_rows;

    if report.dropped_rows > 0 {
        warn!(
            component = "imputation",
            event = "imputation.rows_dropped",
            dropped_rows = report.dropped_rows,
            repair_candidates = report.repair_candidates,
            max_distance_km = policy.max_distance_km
        );
    }
    info!(
        component = "imputation",
        event = "imputation.finish",
        input_rows = report.input_rows,
        out_of_region_rows = report.out_of_region_rows,
        clean_rows = report.clean_rows,
        repaired_rows = report.repaired_rows,
        dropped_rows = report.dropped_rows
    );

    let mut rows = clean;
    rows.extend(repaired);
    ImputationOutcome { rows, report }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::parse_timestamp;

    fn obs(municipality: &str, ts: &str, lat: f64, lon: f64, frp: Measure) -> Observation {
        Observation {
            timestamp: parse_timestamp(ts),
            satellite: Some("AQUA_M-T".to_string()),
            country: Some("Brasil".to_string()),
            state: Some("AMAZONAS".to_string()),
            municipality: Some(municipality.to_string()),
            biome: Some("Amazônia".to_string()),
            days_without_rain: Some(Measure::Value(10.0)),
            precipitation: Some(Measure::Value(0.0)),
            fire_risk_index: Some(Measure::Value(20.0)),
            frp: Some(frp),
            latitude: Some(lat),
            longitude: Some(lon),
        }
    }

    fn target() -> Observation {
        obs("X", "2024-08-01 12:00:00", -3.0, -60.0, Measure::Missing)
    }

    /// Latitude offset, in degrees, that puts a point `km` north of the target.
    fn lat_offset_for_km(km: f64) -> f64 {
        (km / crate::geo::EARTH_RADIUS_KM).to_degrees()
    }

    #[test]
    fn empty_pool_has_no_match() {
        assert_eq!(find_best_match(&target(), &[]), None);
    }

    #[test]
    fn single_donor_on_same_site_short_circuits_to_zero() {
        let donor = obs("X", "2024-08-01 09:00:00", -3.0, -60.0, Measure::Value(50.0));
        let best = find_best_match(&target(), &[&donor]).expect("match expected");
        assert_eq!(best, DonorMatch { index: 0, distance_km: 0.0 });
    }

    #[test]
    fn single_donor_elsewhere_measures_target_to_donor() {
        let donor = obs("X", "2024-08-01 09:00:00", -3.2, -60.4, Measure::Value(50.0));
        let best = find_best_match(&target(), &[&donor]).expect("match expected");
        let expected = haversine_km(-3.0, -60.0, -3.2, -60.4);
        assert!((best.distance_km - expected).abs() < 1e-12);
        // reading the donor as (lon, lat) lands somewhere else entirely
        let transposed = haversine_km(-3.0, -60.0, -60.4, -3.2);
        assert!((best.distance_km - transposed).abs() > 1.0);
    }

    #[test]
    fn multiple_donors_pick_nearest() {
        let far = obs("X", "2024-08-01 01:00:00", -3.5, -60.0, Measure::Value(1.0));
        let near = obs("X", "2024-08-01 02:00:00", -3.01, -60.0, Measure::Value(2.0));
        let mid = obs("X", "2024-08-01 03:00:00", -3.1, -60.0, Measure::Value(3.0));
        let best = find_best_match(&target(), &[&far, &near, &mid]).expect("match expected");
        assert_eq!(best.index, 1);
    }

    #[test]
    fn ties_go_to_first_donor_in_pool_order() {
        let first = obs("X", "2024-08-01 01:00:00", -3.01, -60.0, Measure::Value(1.0));
        let second = obs("X", "2024-08-01 02:00:00", -3.01, -60.0, Measure::Value(2.0));
        let farther = obs("X", "2024-08-01 03:00:00", -3.2, -60.0, Measure::Value(3.0));

        let pool = [&farther, &first, &second];
        let best = find_best_match(&target(), &pool).expect("match expected");
        assert_eq!(best.index, 1);

        let repaired = repair(&target(), &pool, &ErrorProneField::ALL, &RepairPolicy::default())
            .expect("donor within radius");
        assert_eq!(repaired.frp, Some(Measure::Value(1.0)));
    }

    #[test]
    fn radius_is_inclusive() {
        let policy = RepairPolicy::default();
        assert!(policy.accepts(5.0));
        assert!(!policy.accepts(5.0001));
    }

    #[test]
    fn donor_on_the_radius_boundary_repairs_and_just_beyond_drops() {
        let donor = obs(
            "X",
            "2024-08-01 09:00:00",
            -3.0 + lat_offset_for_km(5.0),
            -60.0,
            Measure::Value(50.0),
        );
        let distance = find_best_match(&target(), &[&donor])
            .expect("match expected")
            .distance_km;
        assert!((distance - 5.0).abs() < 1e-9, "distance={distance}");

        let at_boundary = RepairPolicy {
            max_distance_km: distance,
        };
        assert!(repair(&target(), &[&donor], &ErrorProneField::ALL, &at_boundary).is_some());

        let beyond = RepairPolicy {
            max_distance_km: distance - 0.0001,
        };
        assert!(repair(&target(), &[&donor], &ErrorProneField::ALL, &beyond).is_none());

        let far_donor = obs(
            "X",
            "2024-08-01 09:00:00",
            -3.0 + lat_offset_for_km(5.0001),
            -60.0,
            Measure::Value(50.0),
        );
        assert!(repair(
            &target(),
            &[&far_donor],
            &ErrorProneField::ALL,
            &RepairPolicy::default()
        )
        .is_none());
    }

    #[test]
    fn repair_only_overwrites_sentinel_fields() {
        let mut record = target();
        record.precipitation = Some(Measure::Value(3.5));
        record.days_without_rain = None;
        record.fire_risk_index = Some(Measure::Missing);

        let mut donor = obs("X", "2024-08-01 09:00:00", -3.001, -60.001, Measure::Value(50.0));
        donor.precipitation = Some(Measure::Value(9.0));
        donor.fire_risk_index = Some(Measure::Value(0.7));

        let repaired = repair(&record, &[&donor], &ErrorProneField::ALL, &RepairPolicy::default())
            .expect("donor is within radius");
        assert_eq!(repaired.frp, Some(Measure::Value(50.0)));
        assert_eq!(repaired.fire_risk_index, Some(Measure::Value(0.7)));
        assert_eq!(repaired.precipitation, Some(Measure::Value(3.5)));
        assert_eq!(repaired.days_without_rain, None);
        // input is untouched
        assert_eq!(record.frp, Some(Measure::Missing));
    }

    #[test]
    fn repair_respects_requested_field_subset() {
        let mut record = target();
        record.fire_risk_index = Some(Measure::Missing);
        let donor = obs("X", "2024-08-01 09:00:00", -3.0, -60.0, Measure::Value(50.0));

        let repaired = repair(
            &record,
            &[&donor],
            &[ErrorProneField::Frp],
            &RepairPolicy::default(),
        )
        .expect("donor is on the same site");
        assert_eq!(repaired.frp, Some(Measure::Value(50.0)));
        assert_eq!(repaired.fire_risk_index, Some(Measure::Missing));
    }

    #[test]
    fn target_without_coordinates_is_unrepairable() {
        let mut record = target();
        record.latitude = None;
        let donor = obs("X", "2024-08-01 09:00:00", -3.0, -60.0, Measure::Value(50.0));
        assert!(repair(&record, &[&donor], &ErrorProneField::ALL, &RepairPolicy::default()).is_none());
    }

    #[test]
    fn donor_index_looks_up_by_date_and_municipality() {
        let clean = vec![
            obs("X", "2024-08-01 09:00:00", -3.0, -60.0, Measure::Value(50.0)),
            obs("X", "2024-08-01 10:00:00", -3.1, -60.0, Measure::Value(60.0)),
            obs("Y", "2024-08-01 09:00:00", -3.0, -60.0, Measure::Value(70.0)),
        ];
        let index = DonorIndex::build(&clean);

        // the target owns its own municipality string, unrelated to the index
        let pool = index.pool_for(&target());
        assert_eq!(pool.len(), 2);
        assert_eq!(pool[1].frp, Some(Measure::Value(60.0)));

        let mut other_day = target();
        other_day.timestamp = parse_timestamp("2024-08-02 12:00:00");
        assert!(index.pool_for(&other_day).is_empty());

        let mut nameless = target();
        nameless.municipality = None;
        assert!(index.pool_for(&nameless).is_empty());
    }

    #[test]
    fn impute_uses_same_day_same_municipality_donors_only() {
        let rows = vec![
            obs("X", "2024-08-01 09:00:00", -3.0, -60.0, Measure::Value(50.0)),
            obs("Y", "2024-08-01 09:00:00", -3.0, -60.0, Measure::Value(70.0)),
            obs("X", "2024-08-02 09:00:00", -3.0, -60.0, Measure::Value(90.0)),
            obs("X", "2024-08-01 12:00:00", -3.001, -60.001, Measure::Missing),
            obs("Z", "2024-08-01 12:00:00", -3.0, -60.0, Measure::Missing),
        ];

        let outcome = impute(rows, &RegionFilter::default(), &RepairPolicy::default());
        assert_eq!(outcome.report.input_rows, 5);
        assert_eq!(outcome.report.clean_rows, 3);
        assert_eq!(outcome.report.repair_candidates, 2);
        assert_eq!(outcome.report.repaired_rows, 1);
        assert_eq!(outcome.report.dropped_rows, 1);
        assert_eq!(outcome.rows.len(), 4);
        assert_eq!(outcome.rows[3].frp, Some(Measure::Value(50.0)));
    }

    #[test]
    fn out_of_region_rows_are_neither_donors_nor_repaired() {
        let mut foreign_donor = obs("X", "2024-08-01 09:00:00", -3.0, -60.0, Measure::Value(50.0));
        foreign_donor.biome = Some("Cerrado".to_string());
        let mut foreign_target = target();
        foreign_target.country = Some("Peru".to_string());
        let local_target = target();

        let outcome = impute(
            vec![foreign_donor, foreign_target, local_target],
            &RegionFilter::default(),
            &RepairPolicy::default(),
        );
        assert_eq!(outcome.report.out_of_region_rows, 2);
        assert_eq!(outcome.report.clean_rows, 0);
        assert_eq!(outcome.report.repair_candidates, 1);
        assert_eq!(outcome.report.dropped_rows, 1);
        assert!(outcome.rows.is_empty());
    }
}
