//! Database operations for venue enrichment rows.
//!
//! All writes for one crawl job commit as a single transaction: the field
//! values, their timestamps, the merged source lists, the venue's
//! `last_enriched_at` and the job's terminal state.

use crate::data::models::{EnrichField, EnrichmentRow, JobState};
use crate::error::Result;
use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use serde_json::{Map, Value, json};
use sqlx::PgPool;

/// One field's contribution from a finished crawl.
#[derive(Debug, Clone)]
pub struct FieldUpdate {
    pub field: EnrichField,
    /// New value; `None` together with `not_applicable` marks an explicit
    /// absence (e.g. structured data stating admission is free).
    pub value: Option<Value>,
    pub sources: Vec<String>,
    pub not_applicable: bool,
}

pub async fn get(venue_id: &str, db_pool: &PgPool) -> Result<Option<EnrichmentRow>> {
    let row = sqlx::query_as::<_, EnrichmentRow>("SELECT * FROM enrichment WHERE venue_id = $1")
        .bind(venue_id)
        .fetch_optional(db_pool)
        .await?;
    Ok(row)
}

/// Enrichment rows for a set of venues, keyed by venue id on the caller side.
pub async fn get_many(venue_ids: &[String], db_pool: &PgPool) -> Result<Vec<EnrichmentRow>> {
    let rows =
        sqlx::query_as::<_, EnrichmentRow>("SELECT * FROM enrichment WHERE venue_id = ANY($1)")
            .bind(venue_ids)
            .fetch_all(db_pool)
            .await?;
    Ok(rows)
}

/// Apply a crawl job's field updates and close the job, atomically.
///
/// The existing row is read under `FOR UPDATE`, merged in memory (untouched
/// fields keep their value and timestamp; source lists union order-preserved
/// and de-duplicated), then written back whole. Two jobs for the same venue
/// therefore serialize on the row lock and neither clobbers the other's
/// untouched fields.
pub async fn commit_job(
    venue_id: &str,
    job_id: i64,
    updates: &[FieldUpdate],
    db_pool: &PgPool,
) -> Result<()> {
    let mut tx = db_pool.begin().await?;

    let existing = sqlx::query_as::<_, EnrichmentRow>(
        "SELECT * FROM enrichment WHERE venue_id = $1 FOR UPDATE",
    )
    .bind(venue_id)
    .fetch_optional(&mut *tx)
    .await?
    .unwrap_or_else(|| EnrichmentRow {
        venue_id: venue_id.to_string(),
        not_applicable: json!({}),
        sources: json!({}),
        ..Default::default()
    });

    let merged = merge(existing, updates, Utc::now());

    sqlx::query(
        r#"
        INSERT INTO enrichment (
            venue_id,
            hours, hours_updated_at,
            contact, contact_updated_at,
            description, description_updated_at,
            features, features_updated_at,
            menu_url, menu_url_updated_at,
            menu_items, menu_items_updated_at,
            price_range, price_range_updated_at,
            amenities, amenities_updated_at,
            fees, fees_updated_at,
            not_applicable, sources
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                  $15, $16, $17, $18, $19, $20, $21)
        ON CONFLICT (venue_id) DO UPDATE SET
            hours = EXCLUDED.hours, hours_updated_at = EXCLUDED.hours_updated_at,
            contact = EXCLUDED.contact, contact_updated_at = EXCLUDED.contact_updated_at,
            description = EXCLUDED.description, description_updated_at = EXCLUDED.description_updated_at,
            features = EXCLUDED.features, features_updated_at = EXCLUDED.features_updated_at,
            menu_url = EXCLUDED.menu_url, menu_url_updated_at = EXCLUDED.menu_url_updated_at,
            menu_items = EXCLUDED.menu_items, menu_items_updated_at = EXCLUDED.menu_items_updated_at,
            price_range = EXCLUDED.price_range, price_range_updated_at = EXCLUDED.price_range_updated_at,
            amenities = EXCLUDED.amenities, amenities_updated_at = EXCLUDED.amenities_updated_at,
            fees = EXCLUDED.fees, fees_updated_at = EXCLUDED.fees_updated_at,
            not_applicable = EXCLUDED.not_applicable, sources = EXCLUDED.sources
        "#,
    )
    .bind(&merged.venue_id)
    .bind(&merged.hours)
    .bind(merged.hours_updated_at)
    .bind(&merged.contact)
    .bind(merged.contact_updated_at)
    .bind(&merged.description)
    .bind(merged.description_updated_at)
    .bind(&merged.features)
    .bind(merged.features_updated_at)
    .bind(&merged.menu_url)
    .bind(merged.menu_url_updated_at)
    .bind(&merged.menu_items)
    .bind(merged.menu_items_updated_at)
    .bind(&merged.price_range)
    .bind(merged.price_range_updated_at)
    .bind(&merged.amenities)
    .bind(merged.amenities_updated_at)
    .bind(&merged.fees)
    .bind(merged.fees_updated_at)
    .bind(&merged.not_applicable)
    .bind(&merged.sources)
    .execute(&mut *tx)
    .await?;

    sqlx::query("UPDATE venues SET last_enriched_at = NOW() WHERE id = $1")
        .bind(venue_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query("UPDATE crawl_jobs SET state = $2, finished_at = NOW() WHERE id = $1")
        .bind(job_id)
        .bind(JobState::Success)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

/// Merge field updates into an existing row. Pure so it can be tested
/// without a database.
fn merge(mut row: EnrichmentRow, updates: &[FieldUpdate], now: DateTime<Utc>) -> EnrichmentRow {
    let mut sources: Map<String, Value> = row
        .sources
        .as_object()
        .cloned()
        .unwrap_or_default();
    let mut not_applicable: Map<String, Value> = row
        .not_applicable
        .as_object()
        .cloned()
        .unwrap_or_default();

    for update in updates {
        if update.value.is_none() && !update.not_applicable {
            continue;
        }

        set_field(&mut row, update.field, update.value.clone(), now);

        if update.not_applicable {
            not_applicable.insert(update.field.as_str().to_string(), Value::Bool(true));
        } else {
            not_applicable.remove(update.field.as_str());
        }

        // Order-preserving union of old and new source URLs
        let mut merged: IndexSet<String> = IndexSet::new();
        if let Some(existing) = sources.get(update.field.as_str()).and_then(Value::as_array) {
            merged.extend(existing.iter().filter_map(Value::as_str).map(str::to_owned));
        }
        merged.extend(update.sources.iter().cloned());
        sources.insert(
            update.field.as_str().to_string(),
            Value::Array(merged.into_iter().map(Value::String).collect()),
        );
    }

    row.sources = Value::Object(sources);
    row.not_applicable = Value::Object(not_applicable);
    row
}

fn set_field(row: &mut EnrichmentRow, field: EnrichField, value: Option<Value>, now: DateTime<Utc>) {
    let as_text = |v: &Option<Value>| -> Option<String> {
        v.as_ref().and_then(Value::as_str).map(str::to_owned)
    };
    match field {
        EnrichField::Hours => {
            row.hours = value;
            row.hours_updated_at = Some(now);
        }
        EnrichField::Contact => {
            row.contact = value;
            row.contact_updated_at = Some(now);
        }
        EnrichField::Description => {
            row.description = as_text(&value);
            row.description_updated_at = Some(now);
        }
        EnrichField::Features => {
            row.features = value;
            row.features_updated_at = Some(now);
        }
        EnrichField::MenuUrl => {
            row.menu_url = as_text(&value);
            row.menu_url_updated_at = Some(now);
        }
        EnrichField::MenuItems => {
            row.menu_items = value;
            row.menu_items_updated_at = Some(now);
        }
        EnrichField::PriceRange => {
            row.price_range = as_text(&value);
            row.price_range_updated_at = Some(now);
        }
        EnrichField::Amenities => {
            row.amenities = value;
            row.amenities_updated_at = Some(now);
        }
        EnrichField::Fees => {
            row.fees = value;
            row.fees_updated_at = Some(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_row() -> EnrichmentRow {
        EnrichmentRow {
            venue_id: "v1".into(),
            not_applicable: json!({}),
            sources: json!({}),
            ..Default::default()
        }
    }

    #[test]
    fn merge_sets_value_timestamp_and_sources() {
        let now = Utc::now();
        let updates = vec![FieldUpdate {
            field: EnrichField::PriceRange,
            value: Some(json!("££")),
            sources: vec!["https://v.example/".into()],
            not_applicable: false,
        }];

        let merged = merge(empty_row(), &updates, now);
        assert_eq!(merged.price_range.as_deref(), Some("££"));
        assert_eq!(merged.price_range_updated_at, Some(now));
        assert_eq!(
            merged.sources_for(EnrichField::PriceRange),
            vec!["https://v.example/".to_string()]
        );
    }

    #[test]
    fn merge_leaves_untouched_fields_intact() {
        let now = Utc::now();
        let earlier = now - chrono::Duration::days(2);
        let mut row = empty_row();
        row.hours = Some(json!({"mon": [["09:00", "17:00"]]}));
        row.hours_updated_at = Some(earlier);
        row.sources = json!({"hours": ["https://v.example/hours"]});

        let updates = vec![FieldUpdate {
            field: EnrichField::Contact,
            value: Some(json!({"phone": "+44 20 1234 5678"})),
            sources: vec!["https://v.example/contact".into()],
            not_applicable: false,
        }];

        let merged = merge(row, &updates, now);
        assert_eq!(merged.hours_updated_at, Some(earlier), "hours must not be clobbered");
        assert_eq!(
            merged.sources_for(EnrichField::Hours),
            vec!["https://v.example/hours".to_string()]
        );
        assert_eq!(merged.contact_updated_at, Some(now));
    }

    #[test]
    fn merge_unions_sources_order_preserved_and_deduped() {
        let now = Utc::now();
        let mut row = empty_row();
        row.sources = json!({"hours": ["https://v.example/hours", "https://v.example/"]});

        let updates = vec![FieldUpdate {
            field: EnrichField::Hours,
            value: Some(json!({"mon": []})),
            sources: vec![
                "https://v.example/".into(),
                "https://v.example/opening".into(),
            ],
            not_applicable: false,
        }];

        let merged = merge(row, &updates, now);
        assert_eq!(
            merged.sources_for(EnrichField::Hours),
            vec![
                "https://v.example/hours".to_string(),
                "https://v.example/".to_string(),
                "https://v.example/opening".to_string(),
            ]
        );
    }

    #[test]
    fn merge_records_not_applicable_with_sources() {
        let now = Utc::now();
        let updates = vec![FieldUpdate {
            field: EnrichField::Fees,
            value: None,
            sources: vec!["https://museum.example/visit".into()],
            not_applicable: true,
        }];

        let merged = merge(empty_row(), &updates, now);
        assert!(merged.is_not_applicable(EnrichField::Fees));
        assert_eq!(merged.fees, None);
        assert_eq!(merged.fees_updated_at, Some(now));
        assert_eq!(
            merged.sources_for(EnrichField::Fees),
            vec!["https://museum.example/visit".to_string()]
        );
    }

    #[test]
    fn merge_skips_empty_updates() {
        let now = Utc::now();
        let updates = vec![FieldUpdate {
            field: EnrichField::Description,
            value: None,
            sources: vec![],
            not_applicable: false,
        }];

        let merged = merge(empty_row(), &updates, now);
        assert_eq!(merged.description, None);
        assert_eq!(merged.description_updated_at, None);
    }
}
