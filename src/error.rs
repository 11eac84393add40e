//! Application-wide error alias.
//!
//! Crawl-specific failures have their own taxonomy in [`crate::crawler::error`];
//! everything else flows through `anyhow`.

pub type Result<T, E = anyhow::Error> = std::result::Result<T, E>;
