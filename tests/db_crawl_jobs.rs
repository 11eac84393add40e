#[allow(dead_code)]
mod helpers;

use sqlx::PgPool;
use std::time::Duration;
use wayfinder::data::crawl_jobs;
use wayfinder::data::models::{JobMode, JobState};

// ── claim_batch ─────────────────────────────────────────────────────

#[sqlx::test]
async fn claim_empty_queue(pool: PgPool) {
    let jobs = crawl_jobs::claim_batch(8, &pool).await.unwrap();
    assert!(jobs.is_empty());
}

#[sqlx::test]
async fn claim_marks_running_and_sets_started_at(pool: PgPool) {
    helpers::insert_venue(&pool, "poi:1", "The Greyhound", "pub", 51.5, -0.1, None, None).await;
    let id = crawl_jobs::enqueue("poi:1", JobMode::Realtime, 10, &pool)
        .await
        .unwrap();

    let jobs = crawl_jobs::claim_batch(8, &pool).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].id, id);
    assert_eq!(jobs[0].state, JobState::Running);
    assert!(jobs[0].started_at.is_some());

    // A second claim must not observe the same job
    let again = crawl_jobs::claim_batch(8, &pool).await.unwrap();
    assert!(again.is_empty(), "running jobs must not be re-claimed");
}

#[sqlx::test]
async fn claim_orders_priority_desc_then_id_asc(pool: PgPool) {
    helpers::insert_venue(&pool, "poi:1", "A", "pub", 51.5, -0.1, None, None).await;
    helpers::insert_venue(&pool, "poi:2", "B", "pub", 51.5, -0.1, None, None).await;
    helpers::insert_venue(&pool, "poi:3", "C", "pub", 51.5, -0.1, None, None).await;

    let low = crawl_jobs::enqueue("poi:1", JobMode::Background, 0, &pool)
        .await
        .unwrap();
    let realtime = crawl_jobs::enqueue("poi:2", JobMode::Realtime, 10, &pool)
        .await
        .unwrap();
    let low_later = crawl_jobs::enqueue("poi:3", JobMode::Background, 0, &pool)
        .await
        .unwrap();

    let jobs = crawl_jobs::claim_batch(8, &pool).await.unwrap();
    let ids: Vec<i64> = jobs.iter().map(|job| job.id).collect();
    assert_eq!(ids, vec![realtime, low, low_later]);
}

#[sqlx::test]
async fn claim_respects_batch_size(pool: PgPool) {
    helpers::insert_venue(&pool, "poi:1", "A", "pub", 51.5, -0.1, None, None).await;
    for _ in 0..5 {
        crawl_jobs::enqueue("poi:1", JobMode::Background, 0, &pool)
            .await
            .unwrap();
    }

    let jobs = crawl_jobs::claim_batch(2, &pool).await.unwrap();
    assert_eq!(jobs.len(), 2);
}

// ── complete ────────────────────────────────────────────────────────

#[sqlx::test]
async fn complete_sets_terminal_state_and_finished_at(pool: PgPool) {
    helpers::insert_venue(&pool, "poi:1", "A", "pub", 51.5, -0.1, None, None).await;
    crawl_jobs::enqueue("poi:1", JobMode::Realtime, 10, &pool)
        .await
        .unwrap();
    let job = crawl_jobs::claim_batch(1, &pool).await.unwrap().remove(0);

    crawl_jobs::complete(job.id, false, Some("robots_disallowed"), &pool)
        .await
        .unwrap();

    let job = crawl_jobs::get(job.id, &pool).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Fail);
    assert_eq!(job.error.as_deref(), Some("robots_disallowed"));
    assert!(job.finished_at.unwrap() >= job.started_at.unwrap());
}

// ── reap ────────────────────────────────────────────────────────────

#[sqlx::test]
async fn reap_reclaims_stuck_running_jobs(pool: PgPool) {
    helpers::insert_venue(&pool, "poi:1", "A", "pub", 51.5, -0.1, None, None).await;
    let stuck_since = chrono::Utc::now() - chrono::Duration::minutes(5);
    let id = helpers::insert_job(
        &pool,
        "poi:1",
        JobMode::Background,
        0,
        JobState::Running,
        Some(stuck_since),
    )
    .await;

    let reaped = crawl_jobs::reap(Duration::from_secs(10), &pool).await.unwrap();
    assert_eq!(reaped, 1);

    let job = crawl_jobs::get(id, &pool).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Pending);
    assert_eq!(job.reap_count, 1);
}

#[sqlx::test]
async fn reap_leaves_recent_running_jobs_alone(pool: PgPool) {
    helpers::insert_venue(&pool, "poi:1", "A", "pub", 51.5, -0.1, None, None).await;
    let id = helpers::insert_job(
        &pool,
        "poi:1",
        JobMode::Background,
        0,
        JobState::Running,
        Some(chrono::Utc::now()),
    )
    .await;

    let reaped = crawl_jobs::reap(Duration::from_secs(60), &pool).await.unwrap();
    assert_eq!(reaped, 0);
    let job = crawl_jobs::get(id, &pool).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Running);
}

#[sqlx::test]
async fn repeatedly_reaped_job_fails_as_stuck(pool: PgPool) {
    helpers::insert_venue(&pool, "poi:1", "A", "pub", 51.5, -0.1, None, None).await;
    let stuck_since = chrono::Utc::now() - chrono::Duration::minutes(5);
    let id = helpers::insert_job(
        &pool,
        "poi:1",
        JobMode::Background,
        0,
        JobState::Running,
        Some(stuck_since),
    )
    .await;
    sqlx::query("UPDATE crawl_jobs SET reap_count = 3 WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await
        .unwrap();

    crawl_jobs::reap(Duration::from_secs(10), &pool).await.unwrap();

    let job = crawl_jobs::get(id, &pool).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Fail);
    assert_eq!(job.error.as_deref(), Some("stuck"));
}

#[sqlx::test]
async fn reap_all_running_recovers_after_unclean_shutdown(pool: PgPool) {
    helpers::insert_venue(&pool, "poi:1", "A", "pub", 51.5, -0.1, None, None).await;
    helpers::insert_job(
        &pool,
        "poi:1",
        JobMode::Background,
        0,
        JobState::Running,
        Some(chrono::Utc::now()),
    )
    .await;

    let recovered = crawl_jobs::reap_all_running(&pool).await.unwrap();
    assert_eq!(recovered, 1);

    let snapshot = crawl_jobs::snapshot(&pool).await.unwrap();
    assert_eq!(snapshot.pending, 1);
    assert_eq!(snapshot.running, 0);
}

// ── snapshot / open jobs ────────────────────────────────────────────

#[sqlx::test]
async fn snapshot_counts_by_state(pool: PgPool) {
    helpers::insert_venue(&pool, "poi:1", "A", "pub", 51.5, -0.1, None, None).await;
    crawl_jobs::enqueue("poi:1", JobMode::Background, 0, &pool)
        .await
        .unwrap();
    let id = crawl_jobs::enqueue("poi:1", JobMode::Realtime, 10, &pool)
        .await
        .unwrap();
    crawl_jobs::complete(id, true, None, &pool).await.unwrap();

    let snapshot = crawl_jobs::snapshot(&pool).await.unwrap();
    assert_eq!(snapshot.pending, 1);
    assert_eq!(snapshot.success, 1);
    assert_eq!(snapshot.depth(), 1);
}

#[sqlx::test]
async fn venues_with_open_jobs_ignores_terminal_states(pool: PgPool) {
    helpers::insert_venue(&pool, "poi:1", "A", "pub", 51.5, -0.1, None, None).await;
    helpers::insert_venue(&pool, "poi:2", "B", "pub", 51.5, -0.1, None, None).await;

    crawl_jobs::enqueue("poi:1", JobMode::Background, 0, &pool)
        .await
        .unwrap();
    let done = crawl_jobs::enqueue("poi:2", JobMode::Background, 0, &pool)
        .await
        .unwrap();
    crawl_jobs::complete(done, true, None, &pool).await.unwrap();

    let open = crawl_jobs::venues_with_open_jobs(
        &["poi:1".to_string(), "poi:2".to_string()],
        &pool,
    )
    .await
    .unwrap();

    assert!(open.contains("poi:1"));
    assert!(!open.contains("poi:2"));
}
