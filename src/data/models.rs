//! sqlx models for the database schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Whether a crawl job was requested by a live query or by the scheduler.
#[derive(sqlx::Type, Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq)]
#[sqlx(type_name = "job_mode", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobMode {
    Realtime,
    Background,
}

/// Lifecycle state of a crawl job.
#[derive(sqlx::Type, Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq)]
#[sqlx(type_name = "job_state", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Success,
    Fail,
}

/// Classification of a fetched page, driving freshness TTLs and extraction.
#[derive(sqlx::Type, Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[sqlx(type_name = "page_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PageType {
    Homepage,
    Hours,
    Menu,
    Contact,
    About,
    Fees,
    Other,
}

impl PageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageType::Homepage => "homepage",
            PageType::Hours => "hours",
            PageType::Menu => "menu",
            PageType::Contact => "contact",
            PageType::About => "about",
            PageType::Fees => "fees",
            PageType::Other => "other",
        }
    }

    /// How long a stored page of this type remains usable without a re-fetch.
    pub fn ttl(&self) -> chrono::Duration {
        match self {
            PageType::Hours => chrono::Duration::days(3),
            PageType::Menu | PageType::Contact | PageType::Fees => chrono::Duration::days(14),
            PageType::Homepage | PageType::About | PageType::Other => chrono::Duration::days(30),
        }
    }
}

/// How a page URL was discovered.
#[derive(sqlx::Type, Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq)]
#[sqlx(type_name = "discovery", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Discovery {
    DirectUrl,
    SearchApi,
    Heuristic,
}

/// How a website recovery candidate was derived.
#[derive(sqlx::Type, Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq)]
#[sqlx(type_name = "recovery_method", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RecoveryMethod {
    EmailDomain,
    Search,
    Social,
}

/// The enrichment fields a crawl can populate.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EnrichField {
    Hours,
    Contact,
    Description,
    Features,
    MenuUrl,
    MenuItems,
    PriceRange,
    Amenities,
    Fees,
}

impl EnrichField {
    pub const ALL: [EnrichField; 9] = [
        EnrichField::Hours,
        EnrichField::Contact,
        EnrichField::Description,
        EnrichField::Features,
        EnrichField::MenuUrl,
        EnrichField::MenuItems,
        EnrichField::PriceRange,
        EnrichField::Amenities,
        EnrichField::Fees,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EnrichField::Hours => "hours",
            EnrichField::Contact => "contact",
            EnrichField::Description => "description",
            EnrichField::Features => "features",
            EnrichField::MenuUrl => "menu_url",
            EnrichField::MenuItems => "menu_items",
            EnrichField::PriceRange => "price_range",
            EnrichField::Amenities => "amenities",
            EnrichField::Fees => "fees",
        }
    }

    /// Freshness window for this field, in days.
    pub fn window_days(&self, freshness: &crate::config::FreshnessConfig) -> u32 {
        match self {
            EnrichField::Hours => freshness.fresh_hours_days,
            EnrichField::Contact
            | EnrichField::MenuUrl
            | EnrichField::MenuItems
            | EnrichField::PriceRange => freshness.fresh_menu_contact_price_days,
            EnrichField::Description
            | EnrichField::Features
            | EnrichField::Amenities
            | EnrichField::Fees => freshness.fresh_desc_features_days,
        }
    }
}

impl std::fmt::Display for EnrichField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A venue row. The geography column is surfaced as lat/lon via ST_Y/ST_X
/// in every select, so the model carries plain coordinates.
#[derive(sqlx::FromRow, Debug, Clone)]
pub struct Venue {
    pub id: String,
    pub name: String,
    pub category_name: Option<String>,
    pub category_weight: Option<f64>,
    pub lat: f64,
    pub lon: f64,
    pub website: Option<String>,
    pub popularity_confidence: Option<f64>,
    pub address_components: Option<Value>,
    pub last_enriched_at: Option<DateTime<Utc>>,
}

/// One fetched URL with its telemetry and cleaned text.
#[derive(sqlx::FromRow, Debug, Clone)]
pub struct ScrapedPage {
    pub id: i64,
    pub venue_id: String,
    pub url: String,
    pub page_type: PageType,
    pub fetched_at: DateTime<Utc>,
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

/// A queued, running or finished crawl job.
#[derive(sqlx::FromRow, Debug, Clone)]
pub struct CrawlJob {
    pub id: i64,
    pub venue_id: String,
    pub mode: JobMode,
    pub priority: i16,
    pub state: JobState,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub reap_count: i16,
    pub error: Option<String>,
}

/// The enrichment row for one venue: jsonb fields, per-field timestamps,
/// order-preserving source lists and explicit not-applicable markers.
#[derive(sqlx::FromRow, Debug, Clone, Default)]
pub struct EnrichmentRow {
    pub venue_id: String,
    pub hours: Option<Value>,
    pub hours_updated_at: Option<DateTime<Utc>>,
    pub contact: Option<Value>,
    pub contact_updated_at: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub description_updated_at: Option<DateTime<Utc>>,
    pub features: Option<Value>,
    pub features_updated_at: Option<DateTime<Utc>>,
    pub menu_url: Option<String>,
    pub menu_url_updated_at: Option<DateTime<Utc>>,
    pub menu_items: Option<Value>,
    pub menu_items_updated_at: Option<DateTime<Utc>>,
    pub price_range: Option<String>,
    pub price_range_updated_at: Option<DateTime<Utc>>,
    pub amenities: Option<Value>,
    pub amenities_updated_at: Option<DateTime<Utc>>,
    pub fees: Option<Value>,
    pub fees_updated_at: Option<DateTime<Utc>>,
    pub not_applicable: Value,
    pub sources: Value,
}

impl EnrichmentRow {
    /// The stored value for a field, text fields wrapped as JSON strings.
    pub fn value_for(&self, field: EnrichField) -> Option<Value> {
        match field {
            EnrichField::Hours => self.hours.clone(),
            EnrichField::Contact => self.contact.clone(),
            EnrichField::Description => self.description.clone().map(Value::String),
            EnrichField::Features => self.features.clone(),
            EnrichField::MenuUrl => self.menu_url.clone().map(Value::String),
            EnrichField::MenuItems => self.menu_items.clone(),
            EnrichField::PriceRange => self.price_range.clone().map(Value::String),
            EnrichField::Amenities => self.amenities.clone(),
            EnrichField::Fees => self.fees.clone(),
        }
    }

    pub fn updated_at_for(&self, field: EnrichField) -> Option<DateTime<Utc>> {
        match field {
            EnrichField::Hours => self.hours_updated_at,
            EnrichField::Contact => self.contact_updated_at,
            EnrichField::Description => self.description_updated_at,
            EnrichField::Features => self.features_updated_at,
            EnrichField::MenuUrl => self.menu_url_updated_at,
            EnrichField::MenuItems => self.menu_items_updated_at,
            EnrichField::PriceRange => self.price_range_updated_at,
            EnrichField::Amenities => self.amenities_updated_at,
            EnrichField::Fees => self.fees_updated_at,
        }
    }

    /// True when the field was explicitly determined absent for this venue.
    pub fn is_not_applicable(&self, field: EnrichField) -> bool {
        self.not_applicable
            .get(field.as_str())
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Source URLs recorded for a field.
    pub fn sources_for(&self, field: EnrichField) -> Vec<String> {
        self.sources
            .get(field.as_str())
            .and_then(Value::as_array)
            .map(|urls| {
                urls.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Audit row for an inferred website URL.
#[derive(sqlx::FromRow, Debug, Clone)]
pub struct RecoveryCandidate {
    pub id: i64,
    pub venue_id: String,
    pub candidate_url: String,
    pub confidence: f64,
    pub method: RecoveryMethod,
    pub is_chosen: bool,
}

/// Counts of crawl jobs by state, for health endpoints and depth logging.
#[derive(sqlx::FromRow, Debug, Clone, Copy, Default, Serialize)]
pub struct QueueSnapshot {
    pub pending: i64,
    pub running: i64,
    pub success: i64,
    pub fail: i64,
}

impl QueueSnapshot {
    /// Jobs not yet in a terminal state.
    pub fn depth(&self) -> i64 {
        self.pending + self.running
    }
}
