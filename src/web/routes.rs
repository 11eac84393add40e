//! Web API endpoints: venue query, scrape control, health and readiness.

use axum::{
    Router,
    extract::{Path, State},
    response::Json,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use pgvector::Vector;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::config::FreshnessConfig;
use crate::data::models::{EnrichField, EnrichmentRow, JobMode};
use crate::data::{crawl_jobs, enrichment, venues};
use crate::embedder::vectorize;
use crate::enricher::scheduler::REALTIME_PRIORITY;
use crate::state::AppState;
use crate::web::error::{ApiError, db_error};

const RADIUS_RANGE: std::ops::RangeInclusive<u32> = 1..=100_000;

/// Creates the web server router
pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/query", post(query_venues))
        .route("/scrape", post(request_scrape))
        .route("/scrape/{job_id}", get(get_scrape_job))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(15)))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(app_state)
}

#[derive(Deserialize, Debug)]
struct QueryRequest {
    #[serde(default)]
    query: String,
    lat: f64,
    lon: f64,
    radius_m: Option<u32>,
    limit: Option<u32>,
    category: Option<String>,
}

/// Per-field freshness detail on a result card.
#[derive(Serialize, Debug, Default, PartialEq)]
struct Freshness {
    missing: Vec<&'static str>,
    stale: Vec<&'static str>,
    fresh: Vec<&'static str>,
    last_enriched_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, Debug)]
struct ResultCard {
    venue_id: String,
    name: String,
    category_name: Option<String>,
    lat: f64,
    lon: f64,
    distance_m: f64,
    popularity: Option<f64>,
    freshness: Freshness,
    sources_count: usize,
    summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    job_id: Option<i64>,
}

/// Classify every enrichment field for one venue. A field is missing when
/// it was never written (and not marked inapplicable), stale when its
/// timestamp predates the field's freshness window, fresh otherwise.
fn freshness_for(
    row: Option<&EnrichmentRow>,
    freshness: &FreshnessConfig,
    last_enriched_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Freshness {
    let mut result = Freshness {
        last_enriched_at,
        ..Default::default()
    };

    for field in EnrichField::ALL {
        let (updated_at, has_value) = match row {
            Some(row) => (
                row.updated_at_for(field),
                row.value_for(field).is_some() || row.is_not_applicable(field),
            ),
            None => (None, false),
        };

        match updated_at {
            Some(at) if has_value => {
                let window = chrono::Duration::days(field.window_days(freshness) as i64);
                if at < now - window {
                    result.stale.push(field.as_str());
                } else {
                    result.fresh.push(field.as_str());
                }
            }
            _ => result.missing.push(field.as_str()),
        }
    }

    result
}

/// POST /query: geographic venue search with freshness detail. Stale or
/// missing venues get a realtime crawl job enqueued and the resulting
/// `job_id` attached so callers can poll.
async fn query_venues(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<Vec<ResultCard>>, ApiError> {
    if !(-90.0..=90.0).contains(&request.lat) || !(-180.0..=180.0).contains(&request.lon) {
        return Err(ApiError::bad_request("lat/lon out of range"));
    }

    let radius_m = request
        .radius_m
        .unwrap_or(state.config.query_default_radius_m);
    if !RADIUS_RANGE.contains(&radius_m) {
        return Err(ApiError::bad_request("radius_m must be in [1, 100000]"));
    }

    let limit = request.limit.unwrap_or(15);
    if limit < 1 || limit > state.config.query_max_results {
        return Err(ApiError::bad_request(format!(
            "limit must be in [1, {}]",
            state.config.query_max_results
        )));
    }

    let query_vec = if request.query.trim().is_empty() {
        None
    } else {
        vectorize::embed(&request.query).map(Vector::from)
    };

    let hits = venues::geo_search(
        request.lat,
        request.lon,
        radius_m as f64,
        limit as i64,
        request.category.as_deref(),
        query_vec,
        &state.db_pool,
    )
    .await
    .map_err(db_error)?;

    let ids: Vec<String> = hits.iter().map(|hit| hit.venue.id.clone()).collect();
    let rows = enrichment::get_many(&ids, &state.db_pool)
        .await
        .map_err(db_error)?;
    let rows: HashMap<String, EnrichmentRow> =
        rows.into_iter().map(|row| (row.venue_id.clone(), row)).collect();

    let open_jobs = crawl_jobs::venues_with_open_jobs(&ids, &state.db_pool)
        .await
        .map_err(db_error)?;

    let now = Utc::now();
    let mut cards = Vec::with_capacity(hits.len());
    let mut enqueued = 0usize;

    for hit in hits {
        let venue = hit.venue;
        let row = rows.get(&venue.id);
        let freshness = freshness_for(row, &state.config.freshness, venue.last_enriched_at, now);

        // Stale or missing data triggers a realtime refresh, unless one is
        // already queued for this venue
        let needs_refresh = !freshness.missing.is_empty() || !freshness.stale.is_empty();
        let job_id = if needs_refresh && !open_jobs.contains(&venue.id) {
            match crawl_jobs::enqueue(&venue.id, JobMode::Realtime, REALTIME_PRIORITY, &state.db_pool)
                .await
            {
                Ok(id) => {
                    enqueued += 1;
                    Some(id)
                }
                Err(e) => {
                    tracing::warn!(venue_id = %venue.id, error = ?e, "failed to enqueue realtime job");
                    None
                }
            }
        } else {
            None
        };

        let sources_count = row
            .map(|row| {
                EnrichField::ALL
                    .iter()
                    .flat_map(|field| row.sources_for(*field))
                    .collect::<HashSet<_>>()
                    .len()
            })
            .unwrap_or(0);

        cards.push(ResultCard {
            venue_id: venue.id,
            name: venue.name,
            category_name: venue.category_name,
            lat: venue.lat,
            lon: venue.lon,
            distance_m: hit.distance_m,
            popularity: venue.popularity_confidence,
            freshness,
            sources_count,
            summary: row.and_then(|row| row.description.clone()),
            job_id,
        });
    }

    debug!(results = cards.len(), enqueued, "query served");
    Ok(Json(cards))
}

#[derive(Deserialize, Debug)]
struct ScrapeRequest {
    venue_ids: Vec<String>,
    mode: JobMode,
    priority: Option<i16>,
}

/// POST /scrape: enqueue crawl jobs for explicit venues.
async fn request_scrape(
    State(state): State<AppState>,
    Json(request): Json<ScrapeRequest>,
) -> Result<Json<Value>, ApiError> {
    if request.venue_ids.is_empty() {
        return Err(ApiError::bad_request("venue_ids must not be empty"));
    }

    let priority = match request.mode {
        JobMode::Realtime => request.priority.unwrap_or(REALTIME_PRIORITY),
        // Background work never outranks realtime
        JobMode::Background => request
            .priority
            .unwrap_or(0)
            .min(REALTIME_PRIORITY - 1),
    };

    let jobs: Vec<(String, JobMode, i16)> = request
        .venue_ids
        .iter()
        .map(|venue_id| (venue_id.clone(), request.mode, priority))
        .collect();

    let inserted = crawl_jobs::enqueue_batch(&jobs, &state.db_pool)
        .await
        .map_err(db_error)?;

    let job_ids: Vec<i64> = inserted.iter().map(|job| job.id).collect();
    Ok(Json(json!({ "job_ids": job_ids })))
}

/// GET /scrape/{job_id}: job state for polling, including which fields the
/// job's crawl refreshed once it succeeded.
async fn get_scrape_job(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let job = crawl_jobs::get(job_id, &state.db_pool)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::not_found(format!("unknown job {job_id}")))?;

    let updated_fields: Option<Vec<&'static str>> = match (job.state, job.started_at) {
        (crate::data::models::JobState::Success, Some(started_at)) => {
            let row = enrichment::get(&job.venue_id, &state.db_pool)
                .await
                .map_err(db_error)?;
            row.map(|row| {
                EnrichField::ALL
                    .iter()
                    .filter(|field| {
                        row.updated_at_for(**field)
                            .is_some_and(|at| at >= started_at)
                    })
                    .map(|field| field.as_str())
                    .collect()
            })
        }
        _ => None,
    };

    Ok(Json(json!({
        "job_id": job.id,
        "state": job.state,
        "started_at": job.started_at,
        "finished_at": job.finished_at,
        "error": job.error,
        "updated_fields": updated_fields,
    })))
}

/// GET /health
async fn health(State(state): State<AppState>) -> Json<Value> {
    let db_ok = sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(&state.db_pool)
        .await
        .is_ok();
    let depth = match crawl_jobs::snapshot(&state.db_pool).await {
        Ok(snapshot) => snapshot.depth(),
        Err(_) => -1,
    };

    Json(json!({
        "ok": db_ok,
        "db": db_ok,
        "queue_depth": depth,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /ready
async fn ready(State(state): State<AppState>) -> Json<Value> {
    let db_ok = sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(&state.db_pool)
        .await
        .is_ok();
    let model_ok = state.health.embedder_ready();

    Json(json!({
        // The embedder is optional; readiness follows the database alone
        "ready": db_ok,
        "db": db_ok,
        "model": model_ok,
    }))
}
