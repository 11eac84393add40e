use crate::config::{FreshnessConfig, SchedulerConfig};
use crate::data::models::{JobMode, Venue};
use crate::data::{crawl_jobs, venues};
use crate::error::Result;
use sqlx::PgPool;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Priority of query-driven jobs. Background tiers never reach it.
pub const REALTIME_PRIORITY: i16 = 10;

/// Jobs stuck in `running` past this multiple of the crawl budget are
/// reclaimable.
const STUCK_BUDGET_FACTOR: u32 = 2;

/// Periodically selects stale venues and enqueues prioritized background
/// refresh jobs, and reaps jobs abandoned by dead workers.
pub struct Scheduler {
    db_pool: PgPool,
    freshness: FreshnessConfig,
    config: SchedulerConfig,
    crawl_budget: Duration,
}

/// Background priority tier from popularity: well-known venues refresh
/// first, but never ahead of realtime work.
pub fn background_priority(popularity: Option<f64>) -> i16 {
    match popularity {
        Some(p) if p >= 0.8 => 3,
        Some(p) if p >= 0.5 => 2,
        Some(p) if p >= 0.2 => 1,
        _ => 0,
    }
}

/// Cap how many venues a single category or map cell contributes to one
/// cycle, so a dense locale cannot monopolize the refresh budget.
fn apply_quotas(candidates: Vec<Venue>, batch_size: usize) -> Vec<Venue> {
    let cap = (batch_size / 2).max(1);
    let mut per_category: HashMap<String, usize> = HashMap::new();
    let mut per_cell: HashMap<(i64, i64), usize> = HashMap::new();
    let mut kept = Vec::new();

    for venue in candidates {
        let category = venue
            .category_name
            .clone()
            .unwrap_or_else(|| "uncategorized".to_string());
        // ~11 km cells
        let cell = ((venue.lat * 10.0) as i64, (venue.lon * 10.0) as i64);

        let category_count = per_category.entry(category).or_insert(0);
        let cell_count = per_cell.entry(cell).or_insert(0);
        if *category_count >= cap || *cell_count >= cap {
            continue;
        }
        *category_count += 1;
        *cell_count += 1;
        kept.push(venue);

        if kept.len() >= batch_size {
            break;
        }
    }
    kept
}

impl Scheduler {
    pub fn new(
        db_pool: PgPool,
        freshness: FreshnessConfig,
        config: SchedulerConfig,
        crawl_budget: Duration,
    ) -> Self {
        Self {
            db_pool,
            freshness,
            config,
            crawl_budget,
        }
    }

    /// Runs the scheduler's main loop until `shutdown` fires.
    ///
    /// Cycle work runs in its own task under a child token, so an
    /// in-progress cycle is cancelled on shutdown and given a short grace
    /// period to finish before the task is abandoned.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!("Scheduler service started");

        let cycle_interval = Duration::from_secs(self.config.scheduler_sleep_seconds.max(1));
        let mut next_run = time::Instant::now();
        let mut current_work: Option<tokio::task::JoinHandle<()>> = None;

        loop {
            tokio::select! {
                _ = time::sleep_until(next_run) => {
                    let work_handle = tokio::spawn({
                        let db_pool = self.db_pool.clone();
                        let freshness = self.freshness;
                        let config = self.config;
                        let stuck_threshold = self.crawl_budget * STUCK_BUDGET_FACTOR;
                        let cancel = shutdown.child_token();

                        async move {
                            tokio::select! {
                                _ = async {
                                    match crawl_jobs::reap(stuck_threshold, &db_pool).await {
                                        Ok(0) => {}
                                        Ok(count) => warn!(count, "Reaped stuck jobs"),
                                        Err(e) => error!(error = ?e, "Failed to reap stuck jobs"),
                                    }

                                    if let Err(e) = Self::cycle(&db_pool, &freshness, &config).await {
                                        error!(error = ?e, "Failed to schedule refresh jobs");
                                    }
                                } => {}
                                _ = cancel.cancelled() => {
                                    debug!("Scheduling work cancelled gracefully");
                                }
                            }
                        }
                    });

                    current_work = Some(work_handle);
                    next_run = time::Instant::now() + cycle_interval;
                }
                _ = shutdown.cancelled() => {
                    info!("Scheduler received shutdown signal");

                    if let Some(handle) = current_work.take() {
                        // The cycle's child token is already cancelled with us
                        if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
                            warn!("Scheduling work did not complete within 5s, abandoning");
                        } else {
                            debug!("Scheduling work completed gracefully");
                        }
                    }

                    info!("Scheduler exiting gracefully");
                    break;
                }
            }
        }
    }

    /// One cycle: select venues whose any field is stale (or with no
    /// enrichment at all), skip venues that already have open jobs, apply
    /// per-category/per-area quotas, enqueue as background jobs with
    /// popularity-derived priority.
    #[tracing::instrument(skip_all)]
    async fn cycle(
        db_pool: &PgPool,
        freshness: &FreshnessConfig,
        config: &SchedulerConfig,
    ) -> Result<()> {
        let batch_size = config.scheduler_batch_size as usize;
        // Over-select so the quota pass still fills the batch
        let candidates = venues::select_stale(
            freshness,
            config.scheduler_top_percentile,
            (batch_size * 4) as i64,
            db_pool,
        )
        .await?;

        if candidates.is_empty() {
            debug!("No stale venues to schedule");
            return Ok(());
        }

        let ids: Vec<String> = candidates.iter().map(|venue| venue.id.clone()).collect();
        let open = crawl_jobs::venues_with_open_jobs(&ids, db_pool).await?;

        let eligible: Vec<Venue> = candidates
            .into_iter()
            .filter(|venue| !open.contains(&venue.id))
            .collect();
        let skipped = ids.len() - eligible.len();
        if skipped > 0 {
            debug!(count = skipped, "Skipped venues with existing jobs");
        }

        let selected = apply_quotas(eligible, batch_size);
        if selected.is_empty() {
            debug!("No eligible venues after quotas");
            return Ok(());
        }

        let jobs: Vec<(String, JobMode, i16)> = selected
            .iter()
            .map(|venue| {
                (
                    venue.id.clone(),
                    JobMode::Background,
                    background_priority(venue.popularity_confidence),
                )
            })
            .collect();

        let inserted = crawl_jobs::enqueue_batch(&jobs, db_pool).await?;
        let snapshot = crawl_jobs::snapshot(db_pool).await.unwrap_or_default();
        info!(
            enqueued = inserted.len(),
            queue_pending = snapshot.pending,
            queue_running = snapshot.running,
            "Refresh jobs scheduled"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn venue(id: &str, category: &str, lat: f64, lon: f64) -> Venue {
        Venue {
            id: id.into(),
            name: id.into(),
            category_name: Some(category.into()),
            category_weight: None,
            lat,
            lon,
            website: None,
            popularity_confidence: None,
            address_components: None,
            last_enriched_at: None,
        }
    }

    #[test]
    fn priority_tiers_from_popularity() {
        assert_eq!(background_priority(Some(0.95)), 3);
        assert_eq!(background_priority(Some(0.6)), 2);
        assert_eq!(background_priority(Some(0.3)), 1);
        assert_eq!(background_priority(Some(0.1)), 0);
        assert_eq!(background_priority(None), 0);
    }

    #[test]
    fn background_never_reaches_realtime() {
        for popularity in [None, Some(0.0), Some(0.5), Some(1.0)] {
            assert!(background_priority(popularity) < REALTIME_PRIORITY);
        }
    }

    #[test]
    fn category_quota_prevents_monopoly() {
        let candidates: Vec<Venue> = (0..10)
            .map(|i| venue(&format!("pub:{i}"), "pub", 51.0 + i as f64, -0.1))
            .chain((0..2).map(|i| venue(&format!("museum:{i}"), "museum", 40.0 + i as f64, 3.0)))
            .collect();

        let kept = apply_quotas(candidates, 8);
        let pubs = kept.iter().filter(|v| v.category_name.as_deref() == Some("pub")).count();
        assert_eq!(pubs, 4, "a single category is capped at half the batch");
        assert!(kept.iter().any(|v| v.category_name.as_deref() == Some("museum")));
    }

    #[test]
    fn area_quota_caps_one_cell() {
        let candidates: Vec<Venue> = (0..10)
            .map(|i| venue(&format!("a:{i}"), &format!("cat{i}"), 51.5012, -0.1234))
            .collect();

        let kept = apply_quotas(candidates, 8);
        assert_eq!(kept.len(), 4, "one map cell is capped at half the batch");
    }

    #[test]
    fn quota_respects_batch_size() {
        let candidates: Vec<Venue> = (0..50)
            .map(|i| venue(&format!("v:{i}"), &format!("cat{i}"), i as f64, i as f64))
            .collect();
        assert_eq!(apply_quotas(candidates, 8).len(), 8);
    }
}
