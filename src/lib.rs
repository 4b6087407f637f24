//! FireAI core crate.
//!
//! Turns INPE hotspot CSV exports into a daily per-municipality feature table:
//! - sentinel repair from the nearest same-day clean detection (within 5 km)
//! - daily aggregation per (date, municipality)
//! - calendar, cyclical, polynomial, normalized and rolling features
//! - batched persistence to SQLite

mod aggregate;
mod features;
mod geo;
mod imputation;
mod observability;
mod observation;
mod pipeline;
mod risk;
mod settings;
mod store;

pub use aggregate::{aggregate_daily, DailyAggregate};
pub use features::{
    assert_schema_compatible, build_feature_schema, cyclical, rolling_column_name, synthesize,
    FeatureColumn, FeatureConfig, FeatureDType, FeatureError, FeatureRow, FeatureSchema,
    FeatureTable, FEATURE_SCHEMA_VERSION,
};
pub use geo::{haversine_km, EARTH_RADIUS_KM};
pub use imputation::{
    find_best_match, impute, repair, DonorMatch, ImputationOutcome, ImputationReport,
    RepairPolicy, REPAIR_RADIUS_KM,
};
pub use observability::{
    init_logging, log_app_finish, log_app_start, logging_config_from_env, LogFormat,
    LoggingConfig, LoggingInitError, StageTimer, StageTiming,
};
pub use observation::{
    classify, load_observations, parse_decimal, parse_measure, parse_timestamp,
    read_observations, ErrorProneField, Measure, Observation, ObservationError, Partition,
    RegionFilter, SENTINEL,
};
pub use pipeline::{
    discover_csv_files, process_file, run_directory, run_files, FileFailure, FileReport,
    PipelineConfig, PipelineError, RunReport,
};
pub use risk::{categorize, RiskCategory, HIGH_RISK_MIN_FRP, MEDIUM_RISK_MIN_FRP};
pub use settings::{settings_from_env, Settings, SettingsError, DEFAULT_INSERT_BATCH_SIZE};
pub use store::{
    FeatureSink, PersistedRows, SqliteFeatureStore, StoreError, FEATURE_TABLE, RAW_TABLE,
    STORE_COLUMNS,
};
