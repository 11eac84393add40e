//! The embedding producer: periodically turns fresh enrichment text into
//! fixed-dimension vectors for cosine reranking.
//!
//! The producer is optional: every other role functions when it is
//! disabled, and the query path falls back to popularity+distance ordering
//! for venues without vectors.

pub mod vectorize;

use std::time::Duration;

use pgvector::Vector;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::data::embeddings;
use crate::health::HealthState;
use crate::services::Role;

const CYCLE_INTERVAL: Duration = Duration::from_secs(60);
const CYCLE_BATCH: i64 = 100;

pub struct EmbedderService {
    db_pool: PgPool,
    health: HealthState,
}

impl EmbedderService {
    pub fn new(db_pool: PgPool, health: HealthState) -> Self {
        Self { db_pool, health }
    }

    async fn cycle(db_pool: &PgPool) -> crate::error::Result<usize> {
        let pending = embeddings::select_pending(CYCLE_BATCH, db_pool).await?;
        let mut written = 0;

        for (venue_id, text) in pending {
            let Some(vector) = vectorize::embed(&text) else {
                continue;
            };
            embeddings::upsert(&venue_id, Vector::from(vector), db_pool).await?;
            written += 1;
        }

        Ok(written)
    }
}

#[async_trait::async_trait]
impl Role for EmbedderService {
    fn name(&self) -> &'static str {
        "embedder"
    }

    async fn run(&mut self, shutdown: CancellationToken) -> crate::error::Result<()> {
        self.health.set_embedder_ready(true);
        info!("Embedder service started");

        let mut interval = tokio::time::interval(CYCLE_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match Self::cycle(&self.db_pool).await {
                        Ok(0) => debug!("No venues pending embedding"),
                        Ok(written) => info!(written, "Embeddings updated"),
                        Err(e) => warn!(error = ?e, "Embedding cycle failed"),
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }

        self.health.set_embedder_ready(false);
        info!("Embedder exiting gracefully");
        Ok(())
    }
}
