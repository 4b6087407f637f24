//! Shared logging configuration, initialization and stage instrumentation.

use std::env;
use std::path::Path;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::settings::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            include_target: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingInitError {
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing::subscriber::SetGlobalDefaultError),
}

pub fn logging_config_from_env() -> LoggingConfig {
    let mut config = LoggingConfig::default();

    if let Ok(level) = env::var("FIREAI_LOG_LEVEL") {
        let trimmed = level.trim();
        if !trimmed.is_empty() {
            config.level = trimmed.to_string();
        }
    }

    if let Ok(format) = env::var("FIREAI_LOG_FORMAT") {
        if let Some(parsed) = parse_log_format(&format) {
            config.format = parsed;
        }
    }

    if let Ok(include_target) = env::var("FIREAI_LOG_TARGET") {
        if let Some(parsed) = parse_bool(&include_target) {
            config.include_target = parsed;
        }
    }

    config
}

pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let env_filter =
        EnvFilter::try_new(config.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(config.include_target)
        .with_ansi(matches!(config.format, LogFormat::Pretty));

    match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.pretty().finish())?,
    }

    Ok(())
}

pub fn log_app_start(settings: &Settings, logging: &LoggingConfig) {
    info!(
        component = "pipeline",
        event = "app.start",
        app_name = %settings.app_name,
        app_version = %settings.app_version,
        environment = %settings.environment,
        csv_dir = %settings.csv_dir.display(),
        store_path = %settings.store_path.display(),
        log_level = %logging.level,
        log_format = ?logging.format
    );
}

pub fn log_app_finish(files_processed: usize, files_failed: usize, interrupted: bool) {
    info!(
        component = "pipeline",
        event = "app.finish",
        files_processed,
        files_failed,
        interrupted
    );
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTiming {
    pub stage: String,
    pub elapsed_ms: u64,
}

/// Brackets one pipeline stage for one input file.
#[derive(Debug)]
pub struct StageTimer {
    stage: &'static str,
    file: String,
    started: Instant,
}

impl StageTimer {
    pub fn start(stage: &'static str, file: &Path) -> Self {
        let file = file
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| file.display().to_string());
        debug!(
            component = "pipeline",
            event = "stage.start",
            stage,
            file = %file
        );
        Self {
            stage,
            file,
            started: Instant::now(),
        }
    }

    pub fn finish(self, output_rows: usize) -> StageTiming {
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        info!(
            component = "pipeline",
            event = "stage.finish",
            stage = self.stage,
            file = %self.file,
            output_rows,
            elapsed_ms
        );
        StageTiming {
            stage: self.stage.to_string(),
            elapsed_ms,
        }
    }
}

fn parse_log_format(raw: &str) -> Option<LogFormat> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "json" => Some(LogFormat::Json),
        "pretty" => Some(LogFormat::Pretty),
        _ => None,
    }
}

pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    fn env_lock() -> &'static Mutex<()> {
        static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    pub(crate) fn with_env_vars<R>(vars: &[(&str, Option<&str>)], f: impl FnOnce() -> R) -> R {
        let _guard = env_lock().lock().expect("env lock should not be poisoned");
        let previous: Vec<(String, Option<String>)> = vars
            .iter()
            .map(|(key, _)| ((*key).to_string(), env::var(key).ok()))
            .collect();

        for (key, value) in vars {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }

        let output = f();

        for (key, value) in previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }

        output
    }

    #[test]
    fn defaults_when_env_missing() {
        let cfg = with_env_vars(
            &[
                ("FIREAI_LOG_LEVEL", None),
                ("FIREAI_LOG_FORMAT", None),
                ("FIREAI_LOG_TARGET", None),
            ],
            logging_config_from_env,
        );

        assert_eq!(cfg, LoggingConfig::default());
    }

    #[test]
    fn parses_json_and_level_and_target_from_env() {
        let cfg = with_env_vars(
            &[
                ("FIREAI_LOG_LEVEL", Some("debug")),
                ("FIREAI_LOG_FORMAT", Some("json")),
                ("FIREAI_LOG_TARGET", Some("false")),
            ],
            logging_config_from_env,
        );

        assert_eq!(cfg.level, "debug");
        assert_eq!(cfg.format, LogFormat::Json);
        assert!(!cfg.include_target);
    }

    #[test]
    fn invalid_format_or_target_falls_back_to_defaults() {
        let cfg = with_env_vars(
            &[
                ("FIREAI_LOG_LEVEL", Some("trace")),
                ("FIREAI_LOG_FORMAT", Some("yaml")),
                ("FIREAI_LOG_TARGET", Some("maybe")),
            ],
            logging_config_from_env,
        );

        assert_eq!(cfg.level, "trace");
        assert_eq!(cfg.format, LogFormat::Pretty);
        assert!(cfg.include_target);
    }

    #[test]
    fn stage_timer_reports_stage_name() {
        let started = Instant::now();
        let timer = StageTimer::start("aggregate", Path::new("/data/focos_2024.csv"));
        let timing = timer.finish(3);
        assert_eq!(timing.stage, "aggregate");
        assert!(timing.elapsed_ms <= started.elapsed().as_millis() as u64);
    }
}
