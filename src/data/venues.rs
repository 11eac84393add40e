//! Venue queries: geographic search, staleness selection, website updates.

use crate::config::FreshnessConfig;
use crate::data::models::Venue;
use crate::error::Result;
use pgvector::Vector;
use sqlx::PgPool;

/// All columns the [`Venue`] model needs, with the geography column unpacked
/// into plain coordinates.
const VENUE_COLUMNS: &str = "v.id, v.name, v.category_name, v.category_weight, \
     ST_Y(v.location::geometry) AS lat, ST_X(v.location::geometry) AS lon, \
     v.website, v.popularity_confidence, v.address_components, v.last_enriched_at";

/// A venue hit from a geographic search.
#[derive(sqlx::FromRow, Debug, Clone)]
pub struct VenueHit {
    #[sqlx(flatten)]
    pub venue: Venue,
    pub distance_m: f64,
}

pub async fn get(venue_id: &str, db_pool: &PgPool) -> Result<Option<Venue>> {
    let venue = sqlx::query_as::<_, Venue>(&format!(
        "SELECT {VENUE_COLUMNS} FROM venues v WHERE v.id = $1"
    ))
    .bind(venue_id)
    .fetch_optional(db_pool)
    .await?;
    Ok(venue)
}

/// Venues within `radius_m` of the given point, ranked by popularity-weighted
/// distance, optionally reranked by cosine similarity to a query embedding.
///
/// Null popularity ranks lowest (treated as 0.0). Venues without an
/// embedding simply get no similarity boost; the query never fails because
/// vectors are absent.
pub async fn geo_search(
    lat: f64,
    lon: f64,
    radius_m: f64,
    limit: i64,
    category: Option<&str>,
    query_vec: Option<Vector>,
    db_pool: &PgPool,
) -> Result<Vec<VenueHit>> {
    let sql = format!(
        r#"
        SELECT {VENUE_COLUMNS},
               ST_Distance(v.location, ST_MakePoint($2, $1)::geography) AS distance_m
        FROM venues v
        LEFT JOIN embeddings e ON e.venue_id = v.id
        WHERE ST_DWithin(v.location, ST_MakePoint($2, $1)::geography, $3)
          AND ($5::text IS NULL OR v.category_name ILIKE $5)
        ORDER BY
            ST_Distance(v.location, ST_MakePoint($2, $1)::geography)
                * (1.0 - 0.5 * COALESCE(v.popularity_confidence, 0.0))
                * (1.0 - 0.3 * COALESCE(
                      CASE WHEN $6::vector IS NULL THEN NULL
                           ELSE 1.0 - (e.embedding <=> $6::vector) END,
                      0.0))
        LIMIT $4
        "#
    );

    let hits = sqlx::query_as::<_, VenueHit>(&sql)
        .bind(lat)
        .bind(lon)
        .bind(radius_m)
        .bind(limit)
        .bind(category)
        .bind(query_vec)
        .fetch_all(db_pool)
        .await?;
    Ok(hits)
}

/// Venues due for a background refresh this scheduler cycle.
///
/// A venue qualifies when it has no enrichment row at all, or when any
/// populated field's timestamp predates that field's freshness window.
/// Venues in the top popularity percentile are always considered; below the
/// cutoff, ordering is popularity DESC (nulls last) so well-known venues
/// refresh first.
pub async fn select_stale(
    freshness: &FreshnessConfig,
    top_percentile: f64,
    limit: i64,
    db_pool: &PgPool,
) -> Result<Vec<Venue>> {
    let sql = format!(
        r#"
        WITH cutoff AS (
            SELECT percentile_cont($5) WITHIN GROUP (ORDER BY popularity_confidence)
                AS popularity FROM venues WHERE popularity_confidence IS NOT NULL
        )
        SELECT {VENUE_COLUMNS}
        FROM venues v
        LEFT JOIN enrichment en ON en.venue_id = v.id
        CROSS JOIN cutoff c
        WHERE en.venue_id IS NULL
           OR en.hours_updated_at        < NOW() - make_interval(days => $1)
           OR en.contact_updated_at      < NOW() - make_interval(days => $2)
           OR en.menu_url_updated_at     < NOW() - make_interval(days => $2)
           OR en.menu_items_updated_at   < NOW() - make_interval(days => $2)
           OR en.price_range_updated_at  < NOW() - make_interval(days => $2)
           OR en.description_updated_at  < NOW() - make_interval(days => $3)
           OR en.features_updated_at     < NOW() - make_interval(days => $3)
           OR en.amenities_updated_at    < NOW() - make_interval(days => $3)
           OR en.fees_updated_at         < NOW() - make_interval(days => $3)
        ORDER BY (v.popularity_confidence IS NOT NULL
                  AND v.popularity_confidence >= COALESCE(c.popularity, 1.0)) DESC,
                 v.popularity_confidence DESC NULLS LAST,
                 v.id ASC
        LIMIT $4
        "#
    );

    let venues = sqlx::query_as::<_, Venue>(&sql)
        .bind(freshness.fresh_hours_days as i32)
        .bind(freshness.fresh_menu_contact_price_days as i32)
        .bind(freshness.fresh_desc_features_days as i32)
        .bind(limit)
        .bind(top_percentile)
        .fetch_all(db_pool)
        .await?;
    Ok(venues)
}

/// Write a recovered website URL onto the venue row.
pub async fn set_website(venue_id: &str, website: &str, db_pool: &PgPool) -> Result<()> {
    sqlx::query("UPDATE venues SET website = $2 WHERE id = $1")
        .bind(venue_id)
        .bind(website)
        .execute(db_pool)
        .await?;
    Ok(())
}
