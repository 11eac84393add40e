//! Database operations for scraped pages.

use crate::data::models::{Discovery, PageType, ScrapedPage};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;

/// A page row ready to be persisted.
#[derive(Debug, Clone)]
pub struct NewPage {
    pub venue_id: String,
    pub url: String,
    pub page_type: PageType,
    pub valid_until: Option<DateTime<Utc>>,
    pub http_status: Option<i16>,
    pub content_type: Option<String>,
    pub content_hash: Option<String>,
    pub cleaned_text: Option<String>,
    pub discovered_via: Discovery,
    pub redirect_chain: Value,
    pub reason: Option<String>,
    pub size_bytes: Option<i32>,
    pub total_ms: Option<i32>,
    pub first_byte_ms: Option<i32>,
}

/// Result of persisting a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageWrite {
    /// A new row was created.
    Inserted(i64),
    /// A row with identical content already exists (possibly for another
    /// venue); no new row was created and the existing one is reused.
    DuplicateContent,
}

/// Insert a page row, collapsing byte-identical bodies onto one row.
///
/// `content_hash` is globally unique; re-fetching identical content does not
/// create a new row. Failed fetches carry a `reason` and a NULL hash, so any
/// number of them can coexist.
pub async fn insert(page: &NewPage, db_pool: &PgPool) -> Result<PageWrite> {
    let id: Option<(i64,)> = sqlx::query_as(
        r#"
        INSERT INTO scraped_pages (
            venue_id, url, page_type, valid_until, http_status, content_type,
            content_hash, cleaned_text, discovered_via, redirect_chain, reason,
            size_bytes, total_ms, first_byte_ms
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        ON CONFLICT (content_hash) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(&page.venue_id)
    .bind(&page.url)
    .bind(page.page_type)
    .bind(page.valid_until)
    .bind(page.http_status)
    .bind(&page.content_type)
    .bind(&page.content_hash)
    .bind(&page.cleaned_text)
    .bind(page.discovered_via)
    .bind(&page.redirect_chain)
    .bind(&page.reason)
    .bind(page.size_bytes)
    .bind(page.total_ms)
    .bind(page.first_byte_ms)
    .fetch_optional(db_pool)
    .await?;

    Ok(match id {
        Some((id,)) => PageWrite::Inserted(id),
        None => PageWrite::DuplicateContent,
    })
}

/// Successfully-fetched pages for a venue that are still within their TTL,
/// newest first. These are the extraction inputs alongside pages fetched in
/// the current crawl.
pub async fn valid_for_venue(venue_id: &str, db_pool: &PgPool) -> Result<Vec<ScrapedPage>> {
    let pages = sqlx::query_as::<_, ScrapedPage>(
        "SELECT * FROM scraped_pages
         WHERE venue_id = $1
           AND reason IS NULL
           AND cleaned_text IS NOT NULL
           AND (valid_until IS NULL OR valid_until > NOW())
         ORDER BY fetched_at DESC",
    )
    .bind(venue_id)
    .fetch_all(db_pool)
    .await?;
    Ok(pages)
}

/// URLs of stored pages for a venue. Enrichment source invariants are
/// checked against this set in tests.
pub async fn urls_for_venue(venue_id: &str, db_pool: &PgPool) -> Result<Vec<String>> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT url FROM scraped_pages WHERE venue_id = $1")
            .bind(venue_id)
            .fetch_all(db_pool)
            .await?;
    Ok(rows.into_iter().map(|(url,)| url).collect())
}
