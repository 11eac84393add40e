//! Database operations for venue embeddings.

use crate::error::Result;
use pgvector::Vector;
use sqlx::PgPool;

/// Minimum amount of enrichment text a venue needs before it gets a vector.
pub const MIN_TEXT_CHARS: usize = 80;

/// Venues whose embedding is missing or expired, together with the
/// enrichment text the vector is computed from. Only venues with enough
/// text qualify.
pub async fn select_pending(limit: i64, db_pool: &PgPool) -> Result<Vec<(String, String)>> {
    let rows: Vec<(String, String)> = sqlx::query_as(
        r#"
        SELECT v.id,
               CONCAT_WS(' ', v.name, v.category_name, en.description,
                         en.features::text, en.amenities::text, en.price_range)
        FROM venues v
        JOIN enrichment en ON en.venue_id = v.id
        LEFT JOIN embeddings em ON em.venue_id = v.id
        WHERE (em.venue_id IS NULL OR em.valid_until < NOW())
          AND LENGTH(CONCAT_WS(' ', en.description, en.features::text, en.amenities::text)) >= $2
        ORDER BY v.popularity_confidence DESC NULLS LAST
        LIMIT $1
        "#,
    )
    .bind(limit)
    .bind(MIN_TEXT_CHARS as i32)
    .fetch_all(db_pool)
    .await?;
    Ok(rows)
}

pub async fn upsert(venue_id: &str, embedding: Vector, db_pool: &PgPool) -> Result<()> {
    sqlx::query(
        "INSERT INTO embeddings (venue_id, embedding, valid_until, updated_at)
         VALUES ($1, $2, NOW() + INTERVAL '30 days', NOW())
         ON CONFLICT (venue_id) DO UPDATE SET
            embedding = EXCLUDED.embedding,
            valid_until = EXCLUDED.valid_until,
            updated_at = EXCLUDED.updated_at",
    )
    .bind(venue_id)
    .bind(embedding)
    .execute(db_pool)
    .await?;
    Ok(())
}
