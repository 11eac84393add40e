//! Application state shared across components (web, enricher, embedder).

use crate::config::Config;
use crate::health::HealthState;
use sqlx::PgPool;

/// Explicit dependency context constructed once at startup and passed
/// through constructors; no process-wide singletons.
#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub config: Config,
    pub health: HealthState,
}

impl AppState {
    pub fn new(db_pool: PgPool, config: Config, health: HealthState) -> Self {
        Self {
            db_pool,
            config,
            health,
        }
    }
}
