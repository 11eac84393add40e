//! Persistence layer: sqlx models and query modules, one per table group.

pub mod crawl_jobs;
pub mod embeddings;
pub mod enrichment;
pub mod models;
pub mod pages;
pub mod recovery;
pub mod venues;
