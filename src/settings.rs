//! Environment-driven pipeline settings.

use std::env;
use std::path::PathBuf;

use thiserror::Error;

use crate::observability::parse_bool;
use crate::observation::RegionFilter;

pub const DEFAULT_INSERT_BATCH_SIZE: usize = 5_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub app_name: String,
    pub app_version: String,
    pub environment: String,
    pub csv_dir: PathBuf,
    pub store_path: PathBuf,
    pub insert_batch_size: usize,
    pub region: RegionFilter,
    pub store_raw_observations: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: "FireAI".to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "development".to_string(),
            csv_dir: PathBuf::from("data"),
            store_path: PathBuf::from("data/fireai.sqlite"),
            insert_batch_size: DEFAULT_INSERT_BATCH_SIZE,
            region: RegionFilter::default(),
            store_raw_observations: false,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("invalid value for {var}: '{value}' ({reason})")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: &'static str,
    },
}

pub fn settings_from_env() -> Result<Settings, SettingsError> {
    let mut settings = Settings::default();

    if let Some(value) = non_empty_var("FIREAI_APP_NAME") {
        settings.app_name = value;
    }
    if let Some(value) = non_empty_var("FIREAI_APP_VERSION") {
        settings.app_version = value;
    }
    if let Some(value) = non_empty_var("FIREAI_ENVIRONMENT") {
        settings.environment = value;
    }
    if let Some(value) = non_empty_var("FIREAI_CSV_DIR") {
        settings.csv_dir = PathBuf::from(value);
    }
    if let Some(value) = non_empty_var("FIREAI_STORE_PATH") {
        settings.store_path = PathBuf::from(value);
    }
    if let Some(value) = non_empty_var("FIREAI_COUNTRY") {
        settings.region.country = value;
    }
    if let Some(value) = non_empty_var("FIREAI_BIOME") {
        settings.region.biome = value;
    }

    if let Some(value) = non_empty_var("FIREAI_INSERT_BATCH_SIZE") {
        settings.insert_batch_size = match value.parse::<usize>() {
            Ok(0) => {
                return Err(SettingsError::InvalidValue {
                    var: "FIREAI_INSERT_BATCH_SIZE",
                    value,
                    reason: "must be > 0",
                })
            }
            Ok(parsed) => parsed,
            Err(_) => {
                return Err(SettingsError::InvalidValue {
                    var: "FIREAI_INSERT_BATCH_SIZE",
                    value,
                    reason: "not an unsigned integer",
                })
            }
        };
    }

    if let Some(value) = non_empty_var("FIREAI_STORE_RAW") {
        settings.store_raw_observations =
            parse_bool(&value).ok_or(SettingsError::InvalidValue {
                var: "FIREAI_STORE_RAW",
                value,
                reason: "expected a boolean",
            })?;
    }

    Ok(settings)
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::tests::with_env_vars;

    const ALL_VARS: [&str; 9] = [
        "FIREAI_APP_NAME",
        "FIREAI_APP_VERSION",
        "FIREAI_ENVIRONMENT",
        "FIREAI_CSV_DIR",
        "FIREAI_STORE_PATH",
        "FIREAI_COUNTRY",
        "FIREAI_BIOME",
        "FIREAI_INSERT_BATCH_SIZE",
        "FIREAI_STORE_RAW",
    ];

    fn vars_with<'a>(overrides: &[(&'a str, &'a str)]) -> Vec<(&'a str, Option<&'a str>)> {
        ALL_VARS
            .iter()
            .map(|key| {
                let value = overrides
                    .iter()
                    .find(|(k, _)| k == key)
                    .map(|(_, v)| *v);
                (*key, value)
            })
            .collect()
    }

    #[test]
    fn defaults_when_env_missing() {
        let settings = with_env_vars(&vars_with(&[]), settings_from_env).expect("defaults load");
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.insert_batch_size, 5_000);
        assert_eq!(settings.region.country, "Brasil");
        assert_eq!(settings.region.biome, "Amazônia");
    }

    #[test]
    fn overrides_are_applied() {
        let settings = with_env_vars(
            &vars_with(&[
                ("FIREAI_CSV_DIR", "/srv/focos"),
                ("FIREAI_STORE_PATH", "/srv/fireai.sqlite"),
                ("FIREAI_INSERT_BATCH_SIZE", "250"),
                ("FIREAI_BIOME", "Cerrado"),
                ("FIREAI_STORE_RAW", "yes"),
                ("FIREAI_ENVIRONMENT", "production"),
            ]),
            settings_from_env,
        )
        .expect("overrides load");

        assert_eq!(settings.csv_dir, PathBuf::from("/srv/focos"));
        assert_eq!(settings.store_path, PathBuf::from("/srv/fireai.sqlite"));
        assert_eq!(settings.insert_batch_size, 250);
        assert_eq!(settings.region.biome, "Cerrado");
        assert!(settings.store_raw_observations);
        assert_eq!(settings.environment, "production");
    }

    #[test]
    fn invalid_batch_size_is_rejected() {
        for raw in ["0", "-1", "many"] {
            let err = with_env_vars(
                &vars_with(&[("FIREAI_INSERT_BATCH_SIZE", raw)]),
                settings_from_env,
            )
            .expect_err("invalid batch size");
            assert!(matches!(
                err,
                SettingsError::InvalidValue {
                    var: "FIREAI_INSERT_BATCH_SIZE",
                    ..
                }
            ));
        }
    }

    #[test]
    fn invalid_store_raw_flag_is_rejected() {
        let err = with_env_vars(&vars_with(&[("FIREAI_STORE_RAW", "sometimes")]), settings_from_env)
            .expect_err("invalid flag");
        assert!(matches!(
            err,
            SettingsError::InvalidValue {
                var: "FIREAI_STORE_RAW",
                ..
            }
        ));
    }
}
