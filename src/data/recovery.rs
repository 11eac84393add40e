//! Audit trail for inferred venue website URLs.

use crate::data::models::RecoveryMethod;
use crate::error::Result;
use sqlx::PgPool;

/// A candidate website URL with its derivation and confidence.
#[derive(Debug, Clone)]
pub struct NewCandidate {
    pub candidate_url: String,
    pub confidence: f64,
    pub method: RecoveryMethod,
    pub is_chosen: bool,
}

/// Persist all candidates considered for one venue in a single round-trip.
pub async fn insert_candidates(
    venue_id: &str,
    candidates: &[NewCandidate],
    db_pool: &PgPool,
) -> Result<()> {
    if candidates.is_empty() {
        return Ok(());
    }

    let mut urls: Vec<String> = Vec::with_capacity(candidates.len());
    let mut confidences: Vec<f64> = Vec::with_capacity(candidates.len());
    let mut methods: Vec<String> = Vec::with_capacity(candidates.len());
    let mut chosen: Vec<bool> = Vec::with_capacity(candidates.len());

    for candidate in candidates {
        urls.push(candidate.candidate_url.clone());
        confidences.push(candidate.confidence);
        methods.push(
            match candidate.method {
                RecoveryMethod::EmailDomain => "email_domain",
                RecoveryMethod::Search => "search",
                RecoveryMethod::Social => "social",
            }
            .to_string(),
        );
        chosen.push(candidate.is_chosen);
    }

    sqlx::query(
        r#"
        INSERT INTO recovery_candidates (venue_id, candidate_url, confidence, method, is_chosen)
        SELECT $1, v.url, v.confidence, v.method::recovery_method, v.is_chosen
        FROM UNNEST($2::text[], $3::double precision[], $4::text[], $5::boolean[])
            AS v(url, confidence, method, is_chosen)
        "#,
    )
    .bind(venue_id)
    .bind(&urls)
    .bind(&confidences)
    .bind(&methods)
    .bind(&chosen)
    .execute(db_pool)
    .await?;

    Ok(())
}
