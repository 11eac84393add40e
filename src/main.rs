use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

use wayfinder::cli::{Args, Command};
use wayfinder::config::Config;
use wayfinder::crawler::Crawler;
use wayfinder::crawler::fetch::Downloader;
use wayfinder::crawler::gate::RateGate;
use wayfinder::embedder::EmbedderService;
use wayfinder::enricher::EnricherService;
use wayfinder::health::HealthState;
use wayfinder::logging;
use wayfinder::services::supervisor::Supervisor;
use wayfinder::services::{RoleExit, web::WebService};
use wayfinder::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let mut config = Config::from_env().expect("Failed to load config");
    apply_cli_overrides(&mut config, &args);

    logging::setup_logging(&config, args.tracing.clone());

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = ?config.app_env,
        "starting wayfinder"
    );

    let db_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .expect("Failed to create database pool");

    sqlx::migrate!()
        .run(&db_pool)
        .await
        .expect("Failed to run database migrations");

    info!(
        port = config.port,
        shutdown_timeout = format!("{:.2?}", config.shutdown_timeout),
        crawl_budget_ms = config.crawl.crawl_budget_ms,
        worker_count = config.worker.worker_count,
        "configuration loaded"
    );

    let health = HealthState::new();
    let app_state = AppState::new(db_pool.clone(), config.clone(), health.clone());

    let downloader = Arc::new(
        Downloader::new(config.crawl.crawl_page_size_limit_bytes)
            .expect("Failed to create downloader"),
    );
    let gate = Arc::new(RateGate::new(
        config.crawl.crawl_global_concurrency,
        config.crawl.crawl_per_host_concurrency,
    ));
    let crawler = Arc::new(Crawler::new(
        downloader,
        gate,
        Duration::from_millis(config.crawl.crawl_budget_ms),
        db_pool.clone(),
    ));

    let shutdown_timeout = config.shutdown_timeout;
    let port = config.port;

    let (run_web, run_scheduler, run_workers, run_embedder) = match &args.command {
        None | Some(Command::Serve { .. }) => (true, true, true, true),
        Some(Command::Api { .. }) => (true, false, false, false),
        Some(Command::Worker { .. }) => (false, false, true, false),
        Some(Command::Scheduler { .. }) => (false, true, false, false),
        Some(Command::Embedder) => (false, false, false, true),
    };

    let mut supervisor = Supervisor::new();

    if run_web {
        supervisor.spawn(WebService::new(port, app_state.clone()));
    }
    if run_scheduler || run_workers {
        supervisor.spawn(EnricherService::new(
            db_pool.clone(),
            crawler.clone(),
            config.clone(),
            run_scheduler,
            run_workers,
        ));
    }
    if run_embedder {
        supervisor.spawn(EmbedderService::new(db_pool.clone(), health.clone()));
    }

    info!(roles = supervisor.role_count(), "roles spawned");

    // Set up signal handling for both SIGINT (Ctrl+C) and SIGTERM
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
        info!("received ctrl+c, gracefully shutting down...");
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm_stream =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM signal handler");
        sigterm_stream.recv().await;
        info!("received SIGTERM, gracefully shutting down...");
    };

    #[cfg(not(unix))]
    let sigterm = async {
        // On non-Unix systems, create a future that never completes so the
        // select! below works the same way
        std::future::pending::<()>().await;
    };

    let mut exit_code = 0;

    tokio::select! {
        (role, exit) = supervisor.wait_any() => {
            // A role ended before any shutdown was requested
            match exit {
                RoleExit::Shutdown => {
                    info!(role, "role wound down on its own shutdown signal");
                }
                RoleExit::Stopped => {
                    warn!(role, "role stopped unexpectedly");
                    exit_code = 1;
                }
                RoleExit::Failed(e) => {
                    error!(role, error = ?e, "role failed");
                    exit_code = 1;
                }
            }

            exit_code = finish_shutdown(&mut supervisor, shutdown_timeout, exit_code).await;
        }
        _ = ctrl_c => {
            info!("user requested shutdown via ctrl+c");
            exit_code = finish_shutdown(&mut supervisor, shutdown_timeout, exit_code).await;
        }
        _ = sigterm => {
            info!("system requested shutdown via SIGTERM");
            exit_code = finish_shutdown(&mut supervisor, shutdown_timeout, exit_code).await;
        }
    }

    info!(exit_code, "application shutdown complete");
    std::process::exit(exit_code);
}

/// Stop remaining roles; exit code 2 when the grace period elapses with
/// roles still running.
async fn finish_shutdown(
    supervisor: &mut Supervisor,
    shutdown_timeout: Duration,
    exit_code: i32,
) -> i32 {
    match supervisor.stop(shutdown_timeout).await {
        Ok(elapsed) => {
            info!(
                remaining = format!("{:.2?}", shutdown_timeout.saturating_sub(elapsed)),
                "graceful shutdown complete"
            );
            exit_code
        }
        Err(laggards) => {
            warn!(
                pending_count = laggards.len(),
                pending_roles = ?laggards,
                "graceful shutdown elapsed - {} role(s) did not complete",
                laggards.len()
            );
            if exit_code == 0 { 2 } else { exit_code }
        }
    }
}

/// CLI flags override the corresponding environment configuration.
fn apply_cli_overrides(config: &mut Config, args: &Args) {
    match &args.command {
        Some(Command::Serve { port, worker_count }) => {
            if let Some(port) = port {
                config.port = *port;
            }
            if let Some(worker_count) = worker_count {
                config.worker.worker_count = *worker_count;
            }
        }
        Some(Command::Api { port }) => {
            if let Some(port) = port {
                config.port = *port;
            }
        }
        Some(Command::Worker {
            worker_count,
            worker_batch_size,
        }) => {
            if let Some(worker_count) = worker_count {
                config.worker.worker_count = *worker_count;
            }
            if let Some(batch_size) = worker_batch_size {
                config.worker.worker_batch_size = *batch_size;
            }
        }
        Some(Command::Scheduler {
            scheduler_sleep_seconds,
            scheduler_batch_size,
        }) => {
            if let Some(sleep) = scheduler_sleep_seconds {
                config.scheduler.scheduler_sleep_seconds = *sleep;
            }
            if let Some(batch_size) = scheduler_batch_size {
                config.scheduler.scheduler_batch_size = *batch_size;
            }
        }
        Some(Command::Embedder) | None => {}
    }
}
