use chrono::{DateTime, Utc};
use sqlx::PgPool;
use wayfinder::data::models::{JobMode, JobState};

/// Insert a venue row directly via SQL.
pub async fn insert_venue(
    pool: &PgPool,
    id: &str,
    name: &str,
    category: &str,
    lat: f64,
    lon: f64,
    website: Option<&str>,
    popularity: Option<f64>,
) {
    sqlx::query(
        "INSERT INTO venues (id, name, category_name, location, website, popularity_confidence)
         VALUES ($1, $2, $3, ST_MakePoint($5, $4)::geography, $6, $7)",
    )
    .bind(id)
    .bind(name)
    .bind(category)
    .bind(lat)
    .bind(lon)
    .bind(website)
    .bind(popularity)
    .execute(pool)
    .await
    .expect("insert_venue failed");
}

/// Insert a crawl job in an explicit state, returning the generated ID.
pub async fn insert_job(
    pool: &PgPool,
    venue_id: &str,
    mode: JobMode,
    priority: i16,
    state: JobState,
    started_at: Option<DateTime<Utc>>,
) -> i64 {
    let (id,): (i64,) = sqlx::query_as(
        "INSERT INTO crawl_jobs (venue_id, mode, priority, state, started_at)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING id",
    )
    .bind(venue_id)
    .bind(mode)
    .bind(priority)
    .bind(state)
    .bind(started_at)
    .fetch_one(pool)
    .await
    .expect("insert_job failed");
    id
}
