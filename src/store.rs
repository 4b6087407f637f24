//! SQLite persistence for feature tables (and, optionally, raw observations).

use std::path::Path;

use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Transaction};
use thiserror::Error;
use tracing::{debug, info};

use crate::features::{FeatureDType, FeatureRow, FeatureSchema, FeatureTable};
use crate::observation::{Measure, Observation};

pub const FEATURE_TABLE: &str = "fire_features";
pub const RAW_TABLE: &str = "raw_observations";

/// Persisted feature columns, in table order.
pub const STORE_COLUMNS: [&str; 25] = [
    "Year",
    "Month",
    "Day",
    "DayOfYear",
    "Month_cos",
    "Month_sin",
    "Municipality",
    "FireRiskIndex",
    "DayOfYear_sin",
    "DayOfYear_cos",
    "DaysWithoutRain",
    "Precipitation",
    "Latitude_norm",
    "Longitude_norm",
    "FireRiskIndex_max_14",
    "FireRiskIndex_squared",
    "Precipitation_min_7",
    "DaysWithoutRain_squared",
    "FireRiskIndex_x_DaysWithoutRain",
    "FireRiskIndex_rollmean_7",
    "Precipitation_cumsum_7",
    "Precipitation_cumsum_30",
    "DaysWithoutRain_rollmean_14",
    "Precipitation_rollmean_7",
    "RiskCategory",
];

const RAW_COLUMNS: [&str; 12] = [
    "DataHora",
    "Satelite",
    "Pais",
    "Estado",
    "Municipio",
    "Bioma",
    "DiaSemChuva",
    "Precipitacao",
    "RiscoFogo",
    "FRP",
    "Latitude",
    "Longitude",
];

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("feature schema is missing persisted column {0}")]
    MissingColumn(String),
    #[error("stored feature schema v{stored_version} ({stored_fingerprint}) differs from v{version} ({fingerprint})")]
    SchemaMismatch {
        stored_version: u32,
        stored_fingerprint: String,
        version: u32,
        fingerprint: String,
    },
    #[error("batch size must be > 0")]
    InvalidBatchSize,
}

/// Row counts written for one source file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistedRows {
    pub features: u64,
    pub observations: u64,
}

/// Destination for per-file pipeline output.
pub trait FeatureSink {
    /// Persists one file's feature table together with its parsed raw
    /// observations (`raw` may be empty). Either everything for the file is
    /// written or nothing is.
    fn persist_file(
        &mut self,
        source: &str,
        raw: &[Observation],
        table: &FeatureTable,
    ) -> Result<PersistedRows, StoreError>;
}

/// Where each persisted column comes from in a [`FeatureRow`].
#[derive(Debug, Clone, Copy)]
enum ColumnSource {
    Municipality,
    RiskCategory,
    Value { index: usize, dtype: FeatureDType },
}

pub struct SqliteFeatureStore {
    conn: Connection,
    batch_size: usize,
}

impl SqliteFeatureStore {
    pub fn open(path: &Path, batch_size: usize) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA temp_store=MEMORY;
            ",
        )?;
        Self::with_connection(conn, batch_size)
    }

    pub fn open_in_memory(batch_size: usize) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?, batch_size)
    }

    fn with_connection(conn: Connection, batch_size: usize) -> Result<Self, StoreError> {
        if batch_size == 0 {
            return Err(StoreError::InvalidBatchSize);
        }
        ensure_schema(&conn)?;
        Ok(Self { conn, batch_size })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn count_features(&self) -> Result<u64, StoreError> {
        count_rows(&self.conn, FEATURE_TABLE)
    }

    pub fn count_observations(&self) -> Result<u64, StoreError> {
        count_rows(&self.conn, RAW_TABLE)
    }

    pub fn stored_schema(&self) -> Result<Option<(u32, String)>, StoreError> {
        let stored = self
            .conn
            .query_row(
                "SELECT version, fingerprint FROM feature_schema_meta WHERE id = 1",
                [],
                |row| Ok((row.get::<_, u32>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        Ok(stored)
    }
}

impl FeatureSink for SqliteFeatureStore {
    fn persist_file(
        &mut self,
        source: &str,
        raw: &[Observation],
        table: &FeatureTable,
    ) -> Result<PersistedRows, StoreError> {
        let layout = column_layout(&table.schema)?;
        let batch_size = self.batch_size;

        let tx = self.conn.transaction()?;
        record_schema(&tx, &table.schema)?;

        let mut batches = 0u64;
        for chunk in table.rows.chunks(batch_size) {
            insert_feature_batch(&tx, &layout, chunk)?;
            batches += 1;
            debug!(
                component = "store",
                event = "store.batch.inserted",
                source,
                rows = chunk.len()
            );
        }
        for chunk in raw.chunks(batch_size) {
            insert_raw_batch(&tx, chunk)?;
            batches += 1;
        }
        tx.commit()?;

        let written = PersistedRows {
            features: table.rows.len() as u64,
            observations: raw.len() as u64,
        };
        info!(
            component = "store",
            event = "store.file.committed",
            source,
            feature_rows = written.features,
            raw_rows = written.observations,
            batches
        );
        Ok(written)
    }
}

fn ensure_schema(conn: &Connection) -> Result<(), StoreError> {
    let feature_columns: Vec<String> = STORE_COLUMNS
        .iter()
        .map(|name| format!("{name} {}", sql_type_for(name)))
        .collect();
    let raw_columns: Vec<String> = RAW_COLUMNS
        .iter()
        .map(|name| format!("{name} {}", raw_sql_type_for(name)))
        .collect();

    conn.execute_batch(&format!(
        "
        CREATE TABLE IF NOT EXISTS {FEATURE_TABLE} (
            {}
        );
        CREATE TABLE IF NOT EXISTS {RAW_TABLE} (
            {}
        );
        CREATE TABLE IF NOT EXISTS feature_schema_meta (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL,
            fingerprint TEXT NOT NULL
        );
        ",
        feature_columns.join(",\n            "),
        raw_columns.join(",\n            "),
    ))?;
    Ok(())
}

fn sql_type_for(column: &str) -> &'static str {
    match column {
        "Year" | "Month" | "Day" | "DayOfYear" => "INTEGER NOT NULL",
        "Municipality" | "RiskCategory" => "TEXT NOT NULL",
        _ => "REAL NOT NULL",
    }
}

fn raw_sql_type_for(column: &str) -> &'static str {
    match column {
        "DataHora" | "Satelite" | "Pais" | "Estado" | "Municipio" | "Bioma" => "TEXT",
        "DiaSemChuva" => "INTEGER",
        _ => "REAL",
    }
}

fn column_layout(schema: &FeatureSchema) -> Result<Vec<ColumnSource>, StoreError> {
    STORE_COLUMNS
        .iter()
        .map(|name| match *name {
            "Municipality" => Ok(ColumnSource::Municipality),
            "RiskCategory" => Ok(ColumnSource::RiskCategory),
            other => schema
                .index_of(other)
                .map(|index| ColumnSource::Value {
                    index,
                    dtype: schema.columns[index].dtype,
                })
                .ok_or_else(|| StoreError::MissingColumn(other.to_string())),
        })
        .collect()
}

/// Records the schema on first use and refuses a different one afterwards.
fn record_schema(tx: &Transaction<'_>, schema: &FeatureSchema) -> Result<(), StoreError> {
    let stored: Option<(u32, String)> = tx
        .query_row(
            "SELECT version, fingerprint FROM feature_schema_meta WHERE id = 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    match stored {
        None => {
            tx.execute(
                "INSERT INTO feature_schema_meta (id, version, fingerprint) VALUES (1, ?1, ?2)",
                params![schema.version, schema.fingerprint],
            )?;
            Ok(())
        }
        Some((version, fingerprint))
            if version == schema.version && fingerprint == schema.fingerprint =>
        {
            Ok(())
        }
        Some((stored_version, stored_fingerprint)) => Err(StoreError::SchemaMismatch {
            stored_version,
            stored_fingerprint,
            version: schema.version,
            fingerprint: schema.fingerprint.clone(),
        }),
    }
}

fn insert_feature_batch(
    tx: &Transaction<'_>,
    layout: &[ColumnSource],
    rows: &[FeatureRow],
) -> Result<(), StoreError> {
    let placeholders: Vec<String> = (1..=STORE_COLUMNS.len()).map(|i| format!("?{i}")).collect();
    let mut stmt = tx.prepare_cached(&format!(
        "INSERT INTO {FEATURE_TABLE} ({}) VALUES ({})",
        STORE_COLUMNS.join(", "),
        placeholders.join(", ")
    ))?;

    for row in rows {
        let values = layout.iter().map(|source| match source {
            ColumnSource::Municipality => rusqlite::types::Value::Text(row.municipality.clone()),
            ColumnSource::RiskCategory => {
                rusqlite::types::Value::Text(row.risk_category.as_str().to_string())
            }
            ColumnSource::Value {
                index,
                dtype: FeatureDType::I64,
            } => rusqlite::types::Value::Integer(row.values[*index] as i64),
            ColumnSource::Value {
                index,
                dtype: FeatureDType::F64,
            } => rusqlite::types::Value::Real(row.values[*index]),
        });
        stmt.execute(params_from_iter(values))?;
    }
    Ok(())
}

fn insert_raw_batch(tx: &Transaction<'_>, rows: &[Observation]) -> Result<(), StoreError> {
    let placeholders: Vec<String> = (1..=RAW_COLUMNS.len()).map(|i| format!("?{i}")).collect();
    let mut stmt = tx.prepare_cached(&format!(
        "INSERT INTO {RAW_TABLE} ({}) VALUES ({})",
        RAW_COLUMNS.join(", "),
        placeholders.join(", ")
    ))?;

    for row in rows {
        stmt.execute(params![
            row.timestamp
                .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string()),
            row.satellite,
            row.country,
            row.state,
            row.municipality,
            row.biome,
            row.days_without_rain
                .map(Measure::to_raw)
                .map(|v| v.round() as i64),
            row.precipitation.map(Measure::to_raw),
            row.fire_risk_index.map(Measure::to_raw),
            row.frp.map(Measure::to_raw),
            row.latitude,
            row.longitude,
        ])?;
    }
    Ok(())
}

fn count_rows(conn: &Connection, table: &str) -> Result<u64, StoreError> {
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
        row.get(0)
    })?;
    Ok(count as u64)
}
