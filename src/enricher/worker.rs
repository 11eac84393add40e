use crate::crawler::Crawler;
use crate::crawler::error::FetchError;
use crate::data::models::{CrawlJob, PageType, Venue};
use crate::data::{crawl_jobs, enrichment, pages, venues};
use crate::error::Result;
use crate::extract::{self, PageInput};
use sqlx::PgPool;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// A single worker instance.
///
/// Each worker runs in its own asynchronous task and continuously claims
/// batches of crawl jobs, runs the orchestrator, the extractor and the
/// unifying commit for each, and marks the job's terminal state.
pub struct Worker {
    id: usize, // For logging purposes
    db_pool: PgPool,
    crawler: Arc<Crawler>,
    batch_size: u32,
    idle_sleep: Duration,
}

impl Worker {
    pub fn new(
        id: usize,
        db_pool: PgPool,
        crawler: Arc<Crawler>,
        batch_size: u32,
        idle_sleep: Duration,
    ) -> Self {
        Self {
            id,
            db_pool,
            crawler,
            batch_size,
            idle_sleep,
        }
    }

    /// Runs the worker's main loop until `shutdown` fires.
    ///
    /// On shutdown, in-flight jobs finish (bounded by the crawl budget,
    /// their crawls observe the same token and fail with `shutdown`) and no
    /// further claims are issued.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(worker_id = self.id, "Worker started");

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let claimed = tokio::select! {
                claimed = crawl_jobs::claim_batch(self.batch_size, &self.db_pool) => claimed,
                _ = shutdown.cancelled() => break,
            };

            match claimed {
                Ok(jobs) if jobs.is_empty() => {
                    trace!(worker_id = self.id, "No jobs available, waiting");
                    tokio::select! {
                        _ = time::sleep(self.idle_sleep) => {}
                        _ = shutdown.cancelled() => break,
                    }
                }
                Ok(jobs) => {
                    let batch = self.process_batch(jobs, &shutdown);
                    tokio::pin!(batch);
                    let mut shutting_down = false;
                    tokio::select! {
                        _ = &mut batch => {}
                        _ = shutdown.cancelled() => {
                            shutting_down = true;
                        }
                    }
                    if shutting_down {
                        // In-flight jobs observe the cancellation and finish
                        // (bounded by the crawl budget) before we exit
                        batch.await;
                        break;
                    }
                }
                Err(e) => {
                    warn!(worker_id = self.id, error = ?e, "Failed to claim jobs");
                    tokio::select! {
                        _ = time::sleep(self.idle_sleep.max(Duration::from_secs(5))) => {}
                        _ = shutdown.cancelled() => break,
                    }
                }
            }
        }

        info!(worker_id = self.id, "Worker exiting gracefully");
    }

    /// Process one claimed batch, de-duplicating by venue: if the same venue
    /// appears twice, the second completion is a no-op success.
    async fn process_batch(&self, jobs: Vec<CrawlJob>, cancel: &CancellationToken) {
        let mut seen: HashSet<String> = HashSet::new();

        for job in jobs {
            let job_id = job.id;
            if !seen.insert(job.venue_id.clone()) {
                debug!(worker_id = self.id, job_id, venue_id = %job.venue_id, "duplicate venue in batch");
                if let Err(e) = crawl_jobs::complete(job_id, true, None, &self.db_pool).await {
                    error!(worker_id = self.id, job_id, error = ?e, "Failed to complete duplicate job");
                }
                continue;
            }

            debug!(worker_id = self.id, job_id, venue_id = %job.venue_id, "Processing job");
            match self.process_job(&job, cancel).await {
                Ok(()) => {
                    debug!(worker_id = self.id, job_id, "Job completed");
                }
                Err(JobFailure::Crawl(error)) => {
                    debug!(worker_id = self.id, job_id, code = error.code(), "Crawl failed");
                    if let Err(e) =
                        crawl_jobs::complete(job_id, false, Some(error.code()), &self.db_pool).await
                    {
                        error!(worker_id = self.id, job_id, error = ?e, "Failed to fail job");
                    }
                }
                Err(JobFailure::Internal(error)) => {
                    error!(worker_id = self.id, job_id, error = ?error, "Failed to process job");
                    if let Err(e) =
                        crawl_jobs::complete(job_id, false, Some("internal"), &self.db_pool).await
                    {
                        error!(worker_id = self.id, job_id, error = ?e, "Failed to fail job");
                    }
                }
            }
        }
    }

    /// Orchestrate -> extract -> unify for one job. The unifying commit
    /// writes the enrichment fields, the venue's `last_enriched_at` and the
    /// job's success state in one transaction.
    async fn process_job(&self, job: &CrawlJob, cancel: &CancellationToken) -> Result<(), JobFailure> {
        let venue = venues::get(&job.venue_id, &self.db_pool)
            .await
            .map_err(JobFailure::Internal)?
            .ok_or_else(|| JobFailure::Internal(anyhow::anyhow!("venue {} missing", job.venue_id)))?;

        let outcome = self
            .crawler
            .crawl_venue(&venue, cancel)
            .await
            .map_err(JobFailure::Crawl)?;

        let inputs = self.collect_inputs(&venue, &outcome).await;
        let updates = extract::extract_all(&venue, &inputs);
        debug!(
            worker_id = self.id,
            venue_id = %venue.id,
            pages = inputs.len(),
            updated_fields = updates.len(),
            "extraction complete"
        );

        enrichment::commit_job(&venue.id, job.id, &updates, &self.db_pool)
            .await
            .map_err(JobFailure::Internal)?;
        Ok(())
    }

    /// Extraction inputs: pages fetched in this crawl (with raw HTML for the
    /// structured path) plus stored pages still within their TTL.
    async fn collect_inputs(
        &self,
        venue: &Venue,
        outcome: &crate::crawler::CrawlOutcome,
    ) -> Vec<PageInput> {
        let mut inputs: Vec<PageInput> = outcome
            .pages
            .iter()
            .map(|page| PageInput {
                url: page.url.to_string(),
                page_type: page.page_type,
                fetched_at: page.fetched_at,
                html: Some(page.html.clone()),
                text: page.text.clone(),
            })
            .collect();

        match pages::valid_for_venue(&venue.id, &self.db_pool).await {
            Ok(stored) => {
                let current: HashSet<String> = inputs.iter().map(|p| p.url.clone()).collect();
                for page in stored {
                    if current.contains(&page.url) {
                        continue;
                    }
                    let Some(text) = page.cleaned_text else {
                        continue;
                    };
                    inputs.push(PageInput {
                        url: page.url,
                        page_type: page.page_type,
                        fetched_at: page.fetched_at,
                        html: None,
                        text,
                    });
                }
            }
            Err(e) => {
                warn!(venue_id = %venue.id, error = ?e, "failed to load stored pages");
            }
        }

        // Homepage first, then dedicated pages in type order, keeps the
        // description sources deterministic
        inputs.sort_by_key(|page| match page.page_type {
            PageType::Homepage => 0,
            PageType::Hours => 1,
            PageType::Menu => 2,
            PageType::Contact => 3,
            PageType::About => 4,
            PageType::Fees => 5,
            PageType::Other => 6,
        });
        inputs
    }
}

enum JobFailure {
    Crawl(FetchError),
    Internal(anyhow::Error),
}
