//! Folio application binary - composition root.
//!
//! 1. Load configuration from TOML and apply environment overrides
//! 2. Open the SQLite database
//! 3. Build the agent and pattern services behind the API state
//! 4. Start background jobs (audit recorder, cadence tick, planning,
//!    retention, pattern scans)
//! 5. Serve the axum REST API until ctrl-c

mod cli;

use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;

use folio_agent::{configured_model, AuditRecorder, RecurringTask};
use folio_api::auth::load_or_generate_token;
use folio_api::routes;
use folio_api::state::AppState;
use folio_core::config::FolioConfig;
use folio_core::types::Timestamp;
use folio_patterns::{RetryPolicy, ScanQueue};
use folio_storage::{Database, RetentionManager};

use cli::{expand_home, CliArgs};

fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Spawn a cron-driven job that stops with the shutdown signal.
fn spawn_recurring<F, Fut>(
    name: &str,
    expression: &str,
    shutdown: watch::Receiver<bool>,
    job: F,
) -> Result<(), Box<dyn std::error::Error>>
where
    F: FnMut(chrono::DateTime<chrono::Utc>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let task = RecurringTask::new(name, expression)?;
    tokio::spawn(async move {
        task.run(shutdown, job).await;
    });
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let mut config = FolioConfig::load_or_default(&config_file);
    config.apply_env();
    config.general.port = args.resolve_port(config.general.port);
    if let Some(dir) = args.resolve_data_dir() {
        config.general.data_dir = dir;
    }
    if let Some(level) = args.resolve_log_level() {
        config.general.log_level = level;
    }

    // Tracing.
    init_tracing(&config.general.log_level);
    tracing::info!("Starting Folio v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration loaded");

    // Storage.
    let data_dir = expand_home(&config.general.data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }
    let db_path = data_dir.join("folio.db");
    let database = Arc::new(Database::new(&db_path)?);
    tracing::info!(path = %db_path.display(), "SQLite database opened");

    // Services.
    let options = config.runtime_options();
    let model = configured_model(&config.agent, &options);
    if model.is_none() {
        tracing::info!("No language model configured, generation disabled");
    }
    let token = load_or_generate_token(&data_dir.join("api_token"));
    let state = AppState::new(config.clone(), Arc::clone(&database), model).with_token(token);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // === Background tasks ===

    let recorder = Arc::new(AuditRecorder::new(Arc::clone(&database)));
    tokio::spawn(recorder.run(state.events.appended(), shutdown_rx.clone()));

    let agent = Arc::clone(&state.agent);
    spawn_recurring(
        "cadence",
        &config.schedule.cadence_cron,
        shutdown_rx.clone(),
        move |now| {
            let agent = Arc::clone(&agent);
            async move {
                match agent.tick(now).await {
                    Ok(report) => tracing::debug!(
                        spaces = report.spaces_checked,
                        runs = report.runs.len(),
                        "Cadence tick completed"
                    ),
                    Err(e) => tracing::warn!(error = %e, "Cadence tick failed"),
                }
            }
        },
    )?;

    let agent = Arc::clone(&state.agent);
    spawn_recurring(
        "planning",
        &config.schedule.planning_cron,
        shutdown_rx.clone(),
        move |now| {
            let agent = Arc::clone(&agent);
            async move {
                match agent.planning_tick(now).await {
                    Ok(spaces) => tracing::debug!(spaces, "Planning tick completed"),
                    Err(e) => tracing::warn!(error = %e, "Planning tick failed"),
                }
            }
        },
    )?;

    let retention = Arc::new(RetentionManager::new(Arc::clone(&database)));
    let events = Arc::clone(&state.events);
    let retention_days = options.trash_retention_days;
    spawn_recurring(
        "retention",
        &config.schedule.retention_cron,
        shutdown_rx.clone(),
        move |_| {
            let retention = Arc::clone(&retention);
            let events = Arc::clone(&events);
            async move {
                if let Err(e) = retention.run_purge(retention_days, Timestamp::now(), events.as_ref()) {
                    tracing::warn!(error = %e, "Retention purge failed");
                }
            }
        },
    )?;

    let (queue, worker) = ScanQueue::new(
        state.patterns.clone(),
        RetryPolicy::from_config(&config.patterns),
    );
    tokio::spawn(worker.run(shutdown_rx.clone()));
    let patterns = Arc::clone(&state.patterns);
    spawn_recurring(
        "patterns",
        &config.schedule.patterns_cron,
        shutdown_rx.clone(),
        move |_| {
            let queue = queue.clone();
            let patterns = Arc::clone(&patterns);
            async move {
                if let Err(e) = queue.enqueue_eligible(&patterns) {
                    tracing::warn!(error = %e, "Failed to enqueue pattern scans");
                }
            }
        },
    )?;

    // === API server ===

    let port = state.config.general.port;
    let shutdown = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
        }
        tracing::info!("Shutdown requested");
        let _ = shutdown_tx.send(true);
    };

    if let Err(e) = routes::start_server(state, shutdown).await {
        tracing::error!(port, error = %e, "API server failed, is another instance running?");
        return Err(e.into());
    }

    tracing::info!("Folio stopped");
    Ok(())
}
