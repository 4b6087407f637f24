use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fireai::{
    init_logging, log_app_finish, log_app_start, logging_config_from_env, run_directory,
    settings_from_env, PipelineConfig, RunReport, SqliteFeatureStore,
};
use tracing::warn;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // a missing .env is fine; the environment may already be set
    let _ = dotenvy::dotenv();

    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    let settings = settings_from_env()?;
    log_app_start(&settings, &logging_cfg);

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!(
                    component = "pipeline",
                    event = "app.interrupt_requested",
                    "stopping after the current file"
                );
                stop.store(true, Ordering::SeqCst);
            }
        });
    }

    let pipeline_cfg = PipelineConfig::from_settings(&settings);
    let batch_stop = Arc::clone(&stop);
    let report = tokio::task::spawn_blocking(
        move || -> Result<RunReport, Box<dyn std::error::Error + Send + Sync>> {
            let mut store =
                SqliteFeatureStore::open(&settings.store_path, settings.insert_batch_size)?;
            Ok(run_directory(
                &settings.csv_dir,
                &pipeline_cfg,
                &mut store,
                &batch_stop,
            )?)
        },
    )
    .await?
    .map_err(|err| -> Box<dyn std::error::Error> { err })?;

    log_app_finish(report.files.len(), report.failures.len(), report.interrupted);
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
