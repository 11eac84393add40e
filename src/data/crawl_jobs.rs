//! Database operations for the crawl job queue.

use crate::data::models::{CrawlJob, JobMode, JobState, QueueSnapshot};
use crate::error::Result;
use sqlx::PgPool;
use std::collections::HashSet;
use std::time::Duration;

/// How many times a stuck job is pushed back to `pending` before it is
/// failed outright with error `stuck`.
const MAX_REAPS: i16 = 3;

/// Insert one `pending` job and return its id.
///
/// Callers may enqueue duplicates for the same venue; the worker pool
/// collapses them per batch and the scheduler skips venues with open jobs.
pub async fn enqueue(venue_id: &str, mode: JobMode, priority: i16, db_pool: &PgPool) -> Result<i64> {
    let (id,): (i64,) = sqlx::query_as(
        "INSERT INTO crawl_jobs (venue_id, mode, priority) VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(venue_id)
    .bind(mode)
    .bind(priority)
    .fetch_one(db_pool)
    .await?;
    Ok(id)
}

/// Batch insert jobs using UNNEST for a single round-trip.
///
/// # Arguments
/// * `jobs` - Slice of `(venue_id, mode, priority)` tuples to insert
pub async fn enqueue_batch(
    jobs: &[(String, JobMode, i16)],
    db_pool: &PgPool,
) -> Result<Vec<CrawlJob>> {
    if jobs.is_empty() {
        return Ok(Vec::new());
    }

    let mut venue_ids: Vec<String> = Vec::with_capacity(jobs.len());
    let mut modes: Vec<String> = Vec::with_capacity(jobs.len());
    let mut priorities: Vec<i16> = Vec::with_capacity(jobs.len());

    for (venue_id, mode, priority) in jobs {
        venue_ids.push(venue_id.clone());
        modes.push(
            match mode {
                JobMode::Realtime => "realtime",
                JobMode::Background => "background",
            }
            .to_string(),
        );
        priorities.push(*priority);
    }

    let inserted = sqlx::query_as::<_, CrawlJob>(
        r#"
        INSERT INTO crawl_jobs (venue_id, mode, priority)
        SELECT v.venue_id, v.mode::job_mode, v.priority
        FROM UNNEST($1::text[], $2::text[], $3::smallint[])
            AS v(venue_id, mode, priority)
        RETURNING *
        "#,
    )
    .bind(&venue_ids)
    .bind(&modes)
    .bind(&priorities)
    .fetch_all(db_pool)
    .await?;

    Ok(inserted)
}

/// Atomically claim up to `batch_size` pending jobs, marking them `running`.
///
/// Uses `FOR UPDATE SKIP LOCKED` so multiple workers (and processes) can poll
/// the queue concurrently without handing the same job to two claimants.
/// Jobs come back ordered `priority DESC, id ASC` - realtime tiers first,
/// FIFO within a tier.
pub async fn claim_batch(batch_size: u32, db_pool: &PgPool) -> Result<Vec<CrawlJob>> {
    let mut tx = db_pool.begin().await?;

    let mut jobs = sqlx::query_as::<_, CrawlJob>(
        "UPDATE crawl_jobs SET state = 'running', started_at = NOW()
         WHERE id IN (
             SELECT id FROM crawl_jobs
             WHERE state = 'pending'
             ORDER BY priority DESC, id ASC
             LIMIT $1
             FOR UPDATE SKIP LOCKED
         )
         RETURNING *",
    )
    .bind(batch_size as i64)
    .fetch_all(&mut *tx)
    .await?;

    tx.commit().await?;

    // RETURNING gives no ordering guarantee; restore the claim order
    jobs.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));

    Ok(jobs)
}

/// Move a job to its terminal state.
///
/// The unifier calls this inside its own transaction for successful jobs;
/// this standalone variant covers failures and no-op completions.
pub async fn complete(job_id: i64, ok: bool, error: Option<&str>, db_pool: &PgPool) -> Result<()> {
    sqlx::query(
        "UPDATE crawl_jobs SET state = $2, finished_at = NOW(), error = $3 WHERE id = $1",
    )
    .bind(job_id)
    .bind(if ok { JobState::Success } else { JobState::Fail })
    .bind(error)
    .execute(db_pool)
    .await?;
    Ok(())
}

/// Fetch a single job by id.
pub async fn get(job_id: i64, db_pool: &PgPool) -> Result<Option<CrawlJob>> {
    let job = sqlx::query_as::<_, CrawlJob>("SELECT * FROM crawl_jobs WHERE id = $1")
        .bind(job_id)
        .fetch_optional(db_pool)
        .await?;
    Ok(job)
}

/// Counts by state, for `/health` and the enricher's depth log line.
pub async fn snapshot(db_pool: &PgPool) -> Result<QueueSnapshot> {
    let snapshot = sqlx::query_as::<_, QueueSnapshot>(
        "SELECT
            COUNT(*) FILTER (WHERE state = 'pending') AS pending,
            COUNT(*) FILTER (WHERE state = 'running') AS running,
            COUNT(*) FILTER (WHERE state = 'success') AS success,
            COUNT(*) FILTER (WHERE state = 'fail') AS fail
         FROM crawl_jobs",
    )
    .fetch_one(db_pool)
    .await?;
    Ok(snapshot)
}

/// Reclaim jobs stuck in `running` longer than `threshold`.
///
/// A stuck job goes back to `pending` with its `reap_count` incremented, or
/// to `fail` with error `stuck` once it has been reaped [`MAX_REAPS`] times.
/// This is the safety net for workers that died without completing (OOM
/// kill, crash, network partition); under normal operation the worker's own
/// crawl budget fires well before this threshold.
///
/// # Returns
/// The number of jobs that were reclaimed or failed.
pub async fn reap(threshold: Duration, db_pool: &PgPool) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE crawl_jobs
         SET state = CASE WHEN reap_count >= $2 THEN 'fail'::job_state ELSE 'pending'::job_state END,
             error = CASE WHEN reap_count >= $2 THEN 'stuck' ELSE error END,
             finished_at = CASE WHEN reap_count >= $2 THEN NOW() ELSE NULL END,
             started_at = CASE WHEN reap_count >= $2 THEN started_at ELSE NULL END,
             reap_count = reap_count + 1
         WHERE state = 'running'
           AND started_at < NOW() - make_interval(secs => $1::double precision)",
    )
    .bind(threshold.as_secs_f64())
    .bind(MAX_REAPS)
    .execute(db_pool)
    .await?;
    Ok(result.rows_affected())
}

/// Reclaim every `running` job regardless of age.
///
/// Intended to be called once at enricher startup to recover jobs left
/// running by a previous unclean shutdown.
pub async fn reap_all_running(db_pool: &PgPool) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE crawl_jobs
         SET state = 'pending', started_at = NULL, reap_count = reap_count + 1
         WHERE state = 'running'",
    )
    .execute(db_pool)
    .await?;
    Ok(result.rows_affected())
}

/// Of the given venues, return those that already have a pending or running
/// job. Used by the scheduler and the query endpoint to avoid piling up
/// duplicate work for one venue.
pub async fn venues_with_open_jobs(
    venue_ids: &[String],
    db_pool: &PgPool,
) -> Result<HashSet<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT DISTINCT venue_id FROM crawl_jobs
         WHERE venue_id = ANY($1) AND state IN ('pending', 'running')",
    )
    .bind(venue_ids)
    .fetch_all(db_pool)
    .await?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}
