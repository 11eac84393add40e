//! The enrichment pipeline role: a scheduler plus a pool of crawl workers
//! sharing one orchestrator.

pub mod scheduler;
pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::crawler::Crawler;
use crate::data::crawl_jobs;
use crate::services::Role;

use self::scheduler::Scheduler;
use self::worker::Worker;

/// Holds the shared resources (database pool, crawler) and drives the
/// Scheduler and Worker tasks for the lifetime of the role.
pub struct EnricherService {
    db_pool: PgPool,
    crawler: Arc<Crawler>,
    config: Config,
    run_scheduler: bool,
    run_workers: bool,
}

impl EnricherService {
    pub fn new(
        db_pool: PgPool,
        crawler: Arc<Crawler>,
        config: Config,
        run_scheduler: bool,
        run_workers: bool,
    ) -> Self {
        Self {
            db_pool,
            crawler,
            config,
            run_scheduler,
            run_workers,
        }
    }
}

#[async_trait::async_trait]
impl Role for EnricherService {
    fn name(&self) -> &'static str {
        "enricher"
    }

    /// Spawns the scheduler and the worker pool, then waits for shutdown
    /// and drains them.
    ///
    /// Jobs left `running` by a previous unclean shutdown are pushed back
    /// to `pending` first, so they re-enter the queue immediately.
    async fn run(&mut self, shutdown: CancellationToken) -> crate::error::Result<()> {
        match crawl_jobs::reap_all_running(&self.db_pool).await {
            Ok(0) => {}
            Ok(count) => warn!(count, "Reclaimed running jobs from previous run"),
            Err(e) => warn!(error = ?e, "Failed to reclaim running jobs"),
        }

        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        if self.run_scheduler {
            let scheduler = Scheduler::new(
                self.db_pool.clone(),
                self.config.freshness,
                self.config.scheduler,
                Duration::from_millis(self.config.crawl.crawl_budget_ms),
            );
            let token = shutdown.child_token();
            tasks.push(tokio::spawn(async move {
                scheduler.run(token).await;
            }));
            info!("Scheduler task spawned");
        }

        if self.run_workers {
            let idle_sleep = Duration::from_secs(self.config.worker.worker_sleep_seconds.max(1));
            let worker_count = self.config.worker.worker_count.max(1);
            for i in 0..worker_count {
                let worker = Worker::new(
                    i,
                    self.db_pool.clone(),
                    self.crawler.clone(),
                    self.config.worker.worker_batch_size,
                    idle_sleep,
                );
                let token = shutdown.child_token();
                tasks.push(tokio::spawn(async move {
                    worker.run(token).await;
                }));
            }
            info!(worker_count, "Spawned worker tasks");
        }

        shutdown.cancelled().await;
        info!("Enricher stopping, draining tasks");

        let results = futures::future::join_all(tasks).await;
        let panicked = results.iter().filter(|r| r.is_err()).count();
        if panicked > 0 {
            warn!(panicked, "Some enricher tasks panicked while draining");
            anyhow::bail!("{panicked} enricher task(s) panicked");
        }

        info!("Enricher tasks drained");
        Ok(())
    }
}
