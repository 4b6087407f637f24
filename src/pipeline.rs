//! Per-file driver: load, impute, aggregate, synthesize features, persist.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::aggregate::aggregate_daily;
use crate::features::{synthesize, FeatureConfig, FeatureError};
use crate::imputation::{impute, ImputationReport, RepairPolicy};
use crate::observability::{StageTimer, StageTiming};
use crate::observation::{load_observations, ObservationError, RegionFilter};
use crate::settings::Settings;
use crate::store::{FeatureSink, StoreError};

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub region: RegionFilter,
    pub repair: RepairPolicy,
    pub features: FeatureConfig,
    pub store_raw_observations: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            region: RegionFilter::default(),
            repair: RepairPolicy::default(),
            features: FeatureConfig::default(),
            store_raw_observations: false,
        }
    }
}

impl PipelineConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            region: settings.region.clone(),
            store_raw_observations: settings.store_raw_observations,
            ..Self::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to list {path}: {source}")]
    Discovery {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to load observations: {0}")]
    Load(#[from] ObservationError),
    #[error("feature synthesis failed: {0}")]
    Features(#[from] FeatureError),
    #[error("persistence failed: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReport {
    pub file: String,
    pub imputation: ImputationReport,
    pub daily_rows: u64,
    pub feature_rows: u64,
    pub persisted_rows: u64,
    pub raw_rows_persisted: u64,
    pub stage_timings: Vec<StageTiming>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFailure {
    pub file: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub files_discovered: usize,
    pub files: Vec<FileReport>,
    pub failures: Vec<FileFailure>,
    pub interrupted: bool,
}

/// `*.csv` files directly under `dir`, sorted by file name.
pub fn discover_csv_files(dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    let entries = fs::read_dir(dir).map_err(|source| PipelineError::Discovery {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| PipelineError::Discovery {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        let is_csv = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("csv"))
            .unwrap_or(false);
        if is_csv && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Runs every stage for one file and hands the result to `sink`.
pub fn process_file(
    path: &Path,
    cfg: &PipelineConfig,
    sink: &mut dyn FeatureSink,
) -> Result<FileReport, PipelineError> {
    let file = display_name(path);
    info!(
        component = "pipeline",
        event = "pipeline.file.start",
        file = %file
    );

    let mut report = FileReport {
        file: file.clone(),
        ..FileReport::default()
    };

    let timer = StageTimer::start("load", path);
    let observations = load_observations(path)?;
    report.stage_timings.push(timer.finish(observations.len()));

    let raw = if cfg.store_raw_observations {
        observations.clone()
    } else {
        Vec::new()
    };

    let timer = StageTimer::start("imputation", path);
    let imputed = impute(observations, &cfg.region, &cfg.repair);
    report.stage_timings.push(timer.finish(imputed.rows.len()));
    report.imputation = imputed.report;

    let timer = StageTimer::start("aggregate", path);
    let daily = aggregate_daily(&imputed.rows);
    report.stage_timings.push(timer.finish(daily.len()));
    report.daily_rows = daily.len() as u64;

    let timer = StageTimer::start("features", path);
    let table = synthesize(&daily, &cfg.features)?;
    report.stage_timings.push(timer.finish(table.len()));
    report.feature_rows = table.len() as u64;

    let timer = StageTimer::start("persist", path);
    let written = sink.persist_file(&file, &raw, &table)?;
    report.stage_timings.push(timer.finish(table.len() + raw.len()));
    report.persisted_rows = written.features;
    report.raw_rows_persisted = written.observations;

    info!(
        component = "pipeline",
        event = "pipeline.file.finish",
        file = %file,
        input_rows = report.imputation.input_rows,
        daily_rows = report.daily_rows,
        dropped_rows = report.imputation.dropped_rows,
        persisted_rows = report.persisted_rows
    );
    Ok(report)
}

/// Processes `files` in order. A failing file is logged and recorded, never
/// fatal to the run. `stop` is checked between files.
pub fn run_files(
    files: &[PathBuf],
    cfg: &PipelineConfig,
    sink: &mut dyn FeatureSink,
    stop: &AtomicBool,
) -> RunReport {
    let mut run = RunReport {
        files_discovered: files.len(),
        ..RunReport::default()
    };

    for path in files {
        if stop.load(Ordering::SeqCst) {
            warn!(
                component = "pipeline",
                event = "pipeline.interrupted",
                remaining_files = files.len() - run.files.len() - run.failures.len()
            );
            run.interrupted = true;
            break;
        }

        match process_file(path, cfg, sink) {
            Ok(report) => run.files.push(report),
            Err(err) => {
                let file = display_name(path);
                error!(
                    component = "pipeline",
                    event = "pipeline.file.failed",
                    file = %file,
                    error = %err
                );
                run.failures.push(FileFailure {
                    file,
                    error: err.to_string(),
                });
            }
        }
    }

    run
}

/// Discovers CSV files in `dir` and runs them through the pipeline.
pub fn run_directory(
    dir: &Path,
    cfg: &PipelineConfig,
    sink: &mut dyn FeatureSink,
    stop: &AtomicBool,
) -> Result<RunReport, PipelineError> {
    let files = discover_csv_files(dir)?;
    info!(
        component = "pipeline",
        event = "pipeline.discovered",
        dir = %dir.display(),
        files = files.len()
    );
    Ok(run_files(&files, cfg, sink, stop))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
