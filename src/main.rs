// nachweisbackup/src/main.rs
//! Backup engine of the Ausbildungsnachweis backend.
//!
//! Provides the scheduled backup service with its HTTP surface, plus one-shot
//! CLI commands for backup, restore, listing, deletion and retention.

mod api;
mod backup;
mod catalog;
mod config;
mod engine;
mod errors;
mod restore;
mod retention;
mod scheduler;
mod telemetry;
mod tools;
mod utils;

use anyhow::{Context, Result};
use config::AppConfig;
use dotenv::dotenv;
use engine::BackupEngine;
use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

const USAGE: &str = "usage: nachweisbackup [serve|backup|restore <file>|list|delete <file>|sweep]";

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    telemetry::init_tracing();

    match run_app().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{:#}", e), "operation failed");
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app() -> Result<()> {
    let config_path = config::config_path();
    let app_config = AppConfig::load_from_json(&config_path).with_context(|| {
        format!(
            "Failed to load application configuration from {}",
            config_path.display()
        )
    })?;
    // Captured once; content directories are never resolved against a later cwd.
    let working_dir = env::current_dir().context("Failed to determine working directory")?;

    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(|arg| arg.trim()).unwrap_or("serve");
    let file_arg = || args.get(2).map(String::as_str).context(USAGE);

    let engine = BackupEngine::from_app_config(&app_config, backend_root(&app_config, &working_dir));

    match command {
        "serve" => serve(config_path, app_config, working_dir).await,
        "backup" => {
            let result = engine.perform_backup().await.context("Backup process failed")?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        "restore" => {
            let filename = file_arg()?;
            let report = engine
                .restore_backup(filename)
                .await
                .with_context(|| format!("Restore of {} failed", filename))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        "list" => {
            for archive in engine.list_backups().context("Failed to list backups")? {
                println!(
                    "{}\t{}\t{}",
                    archive.created_at.format("%Y-%m-%d %H:%M:%S"),
                    archive.size,
                    archive.name
                );
            }
            Ok(())
        }
        "delete" => {
            let filename = file_arg()?;
            engine
                .delete_backup(filename)
                .with_context(|| format!("Failed to delete {}", filename))?;
            println!("Backup deleted: {}", filename);
            Ok(())
        }
        "sweep" => {
            let _guard = engine.try_lock().context("Retention sweep not started")?;
            let deleted = engine.cleanup_old_backups();
            println!("Deleted {} expired backup(s)", deleted.len());
            Ok(())
        }
        other => anyhow::bail!("Unknown command '{}'. {}", other, USAGE),
    }
}

fn backend_root(app_config: &AppConfig, working_dir: &Path) -> PathBuf {
    app_config
        .backend_root
        .clone()
        .unwrap_or_else(|| working_dir.to_path_buf())
}

/// Runs the cron trigger and the HTTP surface until Ctrl-C.
async fn serve(config_path: PathBuf, app_config: AppConfig, working_dir: PathBuf) -> Result<()> {
    let engine = Arc::new(BackupEngine::from_app_config(
        &app_config,
        backend_root(&app_config, &working_dir),
    ));
    let (engines, receiver) = watch::channel(engine);

    let scheduler = scheduler::spawn(receiver.clone()).context("Failed to register backup trigger")?;
    let reloader = tokio::spawn(reload_on_sighup(config_path, working_dir, engines));

    let state = api::ApiState::new(receiver, app_config.server.admin_token.clone());
    if app_config.server.admin_token.is_none() {
        warn!("server.adminToken is not set, every backup API request will be rejected");
    }

    let listener = tokio::net::TcpListener::bind(&app_config.server.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", app_config.server.bind_address))?;
    info!(address = %app_config.server.bind_address, "backup API listening");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    reloader.abort();
    scheduler.abort();
    info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

/// Rebuilds the engine from the config file on every SIGHUP. An invalid file
/// keeps the running engine. The admin token is fixed at startup.
async fn reload_on_sighup(
    config_path: PathBuf,
    working_dir: PathBuf,
    engines: watch::Sender<Arc<BackupEngine>>,
) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut hangups = match signal(SignalKind::hangup()) {
            Ok(hangups) => hangups,
            Err(e) => {
                warn!(error = %e, "SIGHUP handler not installed, configuration reload disabled");
                std::future::pending::<()>().await;
                return;
            }
        };

        while hangups.recv().await.is_some() {
            info!(config = %config_path.display(), "SIGHUP received, reloading configuration");
            match reload_engine(&config_path, &working_dir) {
                Ok(engine) => {
                    if engines.send(Arc::new(engine)).is_err() {
                        return;
                    }
                    info!("configuration reloaded");
                }
                Err(e) => error!(
                    error = %format!("{:#}", e),
                    "reload rejected, keeping previous configuration"
                ),
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = (&config_path, &working_dir);
        let _engines = engines;
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
fn reload_engine(config_path: &Path, working_dir: &Path) -> Result<BackupEngine> {
    let app_config = AppConfig::load_from_json(config_path)?;
    scheduler::parse_schedule(&app_config.backup.schedule_cron)?;
    Ok(BackupEngine::from_app_config(
        &app_config,
        backend_root(&app_config, working_dir),
    ))
}
