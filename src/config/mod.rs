//! Configuration module for the wayfinder application.
//!
//! Configuration is loaded from environment variables using the figment
//! crate. Durations accept both numeric values (interpreted as seconds) and
//! duration strings with units ("8s", "2m").

use fundu::{DurationParser, TimeUnit};
use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Deployment environment.
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AppEnv {
    #[default]
    Local,
    Staging,
    Prod,
}

/// Main application configuration containing all sub-configurations.
#[derive(Deserialize, Clone)]
pub struct Config {
    /// Log level for this application's target specifically.
    ///
    /// e.g. "debug" is equivalent to "warn,wayfinder=debug"
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Port for the web server (default: 8080)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Database connection URL
    pub database_url: String,
    /// Deployment environment (local, staging, prod)
    #[serde(default)]
    pub app_env: AppEnv,
    /// Graceful shutdown timeout duration
    #[serde(
        default = "default_shutdown_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub shutdown_timeout: Duration,

    /// Default search radius for /query, in meters
    #[serde(default = "default_query_radius_m")]
    pub query_default_radius_m: u32,
    /// Upper bound on /query result count
    #[serde(default = "default_query_max_results")]
    pub query_max_results: u32,

    /// Crawl subsystem tunables
    #[serde(flatten)]
    pub crawl: CrawlConfig,
    /// Per-field freshness windows
    #[serde(flatten)]
    pub freshness: FreshnessConfig,
    /// Worker pool tunables
    #[serde(flatten)]
    pub worker: WorkerConfig,
    /// Scheduler tunables
    #[serde(flatten)]
    pub scheduler: SchedulerConfig,
}

/// Crawl concurrency and budget limits.
#[derive(Deserialize, Clone, Debug)]
pub struct CrawlConfig {
    /// Maximum in-flight fetches across the whole process
    #[serde(default = "default_global_concurrency")]
    pub crawl_global_concurrency: u32,
    /// Maximum in-flight fetches per registered domain
    #[serde(default = "default_per_host_concurrency")]
    pub crawl_per_host_concurrency: u32,
    /// Hard wall-clock budget for one venue crawl, in milliseconds
    #[serde(default = "default_crawl_budget_ms")]
    pub crawl_budget_ms: u64,
    /// Response body size cap, in bytes
    #[serde(default = "default_page_size_limit")]
    pub crawl_page_size_limit_bytes: usize,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            crawl_global_concurrency: default_global_concurrency(),
            crawl_per_host_concurrency: default_per_host_concurrency(),
            crawl_budget_ms: default_crawl_budget_ms(),
            crawl_page_size_limit_bytes: default_page_size_limit(),
        }
    }
}

/// Per-field freshness windows, in days.
#[derive(Deserialize, Clone, Copy, Debug)]
pub struct FreshnessConfig {
    #[serde(default = "default_fresh_hours_days")]
    pub fresh_hours_days: u32,
    #[serde(default = "default_fresh_menu_contact_price_days")]
    pub fresh_menu_contact_price_days: u32,
    #[serde(default = "default_fresh_desc_features_days")]
    pub fresh_desc_features_days: u32,
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            fresh_hours_days: default_fresh_hours_days(),
            fresh_menu_contact_price_days: default_fresh_menu_contact_price_days(),
            fresh_desc_features_days: default_fresh_desc_features_days(),
        }
    }
}

/// Worker pool tunables.
#[derive(Deserialize, Clone, Copy, Debug)]
pub struct WorkerConfig {
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_worker_batch_size")]
    pub worker_batch_size: u32,
    #[serde(default = "default_worker_sleep_seconds")]
    pub worker_sleep_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            worker_batch_size: default_worker_batch_size(),
            worker_sleep_seconds: default_worker_sleep_seconds(),
        }
    }
}

/// Background refresh scheduler tunables.
#[derive(Deserialize, Clone, Copy, Debug)]
pub struct SchedulerConfig {
    #[serde(default = "default_scheduler_sleep_seconds")]
    pub scheduler_sleep_seconds: u64,
    #[serde(default = "default_scheduler_batch_size")]
    pub scheduler_batch_size: u32,
    #[serde(default = "default_scheduler_top_percentile")]
    pub scheduler_top_percentile: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scheduler_sleep_seconds: default_scheduler_sleep_seconds(),
            scheduler_batch_size: default_scheduler_batch_size(),
            scheduler_top_percentile: default_scheduler_top_percentile(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(8)
}

fn default_query_radius_m() -> u32 {
    1500
}

fn default_query_max_results() -> u32 {
    30
}

fn default_global_concurrency() -> u32 {
    32
}

fn default_per_host_concurrency() -> u32 {
    2
}

fn default_crawl_budget_ms() -> u64 {
    5000
}

fn default_page_size_limit() -> usize {
    2_000_000
}

fn default_fresh_hours_days() -> u32 {
    3
}

fn default_fresh_menu_contact_price_days() -> u32 {
    14
}

fn default_fresh_desc_features_days() -> u32 {
    30
}

fn default_worker_count() -> usize {
    1
}

fn default_worker_batch_size() -> u32 {
    8
}

fn default_worker_sleep_seconds() -> u64 {
    1
}

fn default_scheduler_sleep_seconds() -> u64 {
    300
}

fn default_scheduler_batch_size() -> u32 {
    50
}

fn default_scheduler_top_percentile() -> f64 {
    0.9
}

/// Duration parser handling seconds (default unit), milliseconds and minutes.
///
/// Allows whitespace between the number and the unit, and multiple units
/// summed together ("10s 2m" = 130 seconds).
const DURATION_PARSER: DurationParser<'static> = DurationParser::builder()
    .time_units(&[TimeUnit::Second, TimeUnit::MilliSecond, TimeUnit::Minute])
    .parse_multiple(None)
    .allow_time_unit_delimiter()
    .disable_infinity()
    .disable_fraction()
    .disable_exponent()
    .default_unit(TimeUnit::Second)
    .build();

/// Custom deserializer for duration fields that accepts both numeric and
/// string values ("8", "8s", "500ms", "2 m").
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Visitor;

    struct DurationVisitor;

    impl<'de> Visitor<'de> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a duration string or number")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            DURATION_PARSER
                .parse(value)
                .map_err(|e| {
                    serde::de::Error::custom(format!(
                        "Invalid duration format '{}': {}. Examples: '5' (5 seconds), '3500ms', '30s', '2m'",
                        value, e
                    ))
                })?
                .try_into()
                .map_err(|e| serde::de::Error::custom(format!("Duration conversion error: {}", e)))
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(Duration::from_secs(value))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            if value < 0 {
                return Err(serde::de::Error::custom("Duration cannot be negative"));
            }
            Ok(Duration::from_secs(value as u64))
        }
    }

    deserializer.deserialize_any(DurationVisitor)
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> crate::error::Result<Self> {
        use figment::{Figment, providers::Env};
        Ok(Figment::new().merge(Env::raw()).extract()?)
    }
}
