//! The crawl subsystem: admission control, downloading, link discovery and
//! the per-venue orchestrator.
//!
//! One call to [`Crawler::crawl_venue`] runs recovery (if the venue has no
//! website), the homepage fetch, target discovery and up to three parallel
//! target fetches, all under a single wall-clock [`Deadline`]. Pages are
//! committed to the store as they land; the in-memory copies feed the fact
//! extractor afterwards.

pub mod clean;
pub mod deadline;
pub mod error;
pub mod fetch;
pub mod gate;
pub mod links;
pub mod recover;
pub mod robots;

use crate::data::models::{Discovery, PageType, Venue};
use crate::data::{pages, recovery, venues};
use chrono::{DateTime, Utc};
use deadline::Deadline;
use error::FetchError;
use fetch::{Downloader, PageFetch};
use gate::RateGate;
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// Budget for the website recovery stage at the head of a crawl.
const RECOVERY_BUDGET: Duration = Duration::from_millis(500);

/// Registered domain (eTLD+1) used as the per-host key everywhere: rate
/// gate buckets, the same-host rule, recovery. IP literals map to
/// themselves; single-label hosts fall back to the host string.
pub fn registered_domain(url: &Url) -> Option<String> {
    match url.host()? {
        url::Host::Domain(host) => {
            let host = host.to_ascii_lowercase();
            Some(psl::domain_str(&host).map(str::to_string).unwrap_or(host))
        }
        url::Host::Ipv4(ip) => Some(ip.to_string()),
        url::Host::Ipv6(ip) => Some(ip.to_string()),
    }
}

/// A page fetched during the current crawl, kept in memory for extraction.
#[derive(Debug, Clone)]
pub struct CrawledPage {
    pub url: Url,
    pub page_type: PageType,
    pub fetched_at: DateTime<Utc>,
    pub html: String,
    pub text: String,
}

/// What one venue crawl produced.
#[derive(Debug, Default)]
pub struct CrawlOutcome {
    pub pages: Vec<CrawledPage>,
    pub fetched_count: usize,
    pub aborted_count: usize,
    pub duration_ms: u64,
}

/// Per-venue crawl orchestrator. Shared by every worker in the process.
pub struct Crawler {
    downloader: Arc<Downloader>,
    gate: Arc<RateGate>,
    budget: Duration,
    db_pool: PgPool,
}

impl Crawler {
    pub fn new(
        downloader: Arc<Downloader>,
        gate: Arc<RateGate>,
        budget: Duration,
        db_pool: PgPool,
    ) -> Self {
        Self {
            downloader,
            gate,
            budget,
            db_pool,
        }
    }

    /// Crawl one venue within the wall-clock budget.
    ///
    /// Returns `Ok` when at least the homepage was fetched and passed the
    /// quality gate (partial success: aborted targets are recorded, not
    /// fatal). Every failure short of that is reported as the homepage's
    /// error class.
    pub async fn crawl_venue(
        &self,
        venue: &Venue,
        cancel: &CancellationToken,
    ) -> Result<CrawlOutcome, FetchError> {
        let deadline = Deadline::new(self.budget);
        let mut outcome = CrawlOutcome::default();

        let website = match &venue.website {
            Some(website) => Url::parse(website).map_err(|_| FetchError::NoWebsite)?,
            None => self.recover_website(venue, &deadline).await?,
        };
        let domain = registered_domain(&website).ok_or(FetchError::NoWebsite)?;

        // Homepage; nothing else is reachable without it
        let homepage = tokio::select! {
            result = self
                .downloader
                .fetch_gated(&website, None, &deadline, &self.gate) => result,
            _ = cancel.cancelled() => Err(FetchError::Shutdown),
        };

        let homepage = match homepage {
            Ok(page) => page,
            Err(error) => {
                self.persist_failure(&venue.id, &website, PageType::Homepage, &error)
                    .await;
                return Err(error);
            }
        };

        self.persist_page(&venue.id, PageType::Homepage, &homepage, Discovery::DirectUrl)
            .await;
        outcome.fetched_count += 1;
        outcome.pages.push(CrawledPage {
            url: homepage.url.clone(),
            page_type: PageType::Homepage,
            fetched_at: Utc::now(),
            html: homepage.html.clone(),
            text: homepage.cleaned_text.clone(),
        });

        let targets = links::find_targets(&homepage.html, &website);
        debug!(venue_id = %venue.id, targets = targets.len(), "discovered target pages");

        let mut tasks: JoinSet<(PageType, Url, Result<PageFetch, FetchError>)> = JoinSet::new();
        for (page_type, url) in targets {
            if cancel.is_cancelled() {
                break;
            }
            if !deadline.allows_fetch() {
                self.persist_failure(&venue.id, &url, page_type, &FetchError::TimeBudgetExceeded)
                    .await;
                outcome.aborted_count += 1;
                continue;
            }

            let downloader = self.downloader.clone();
            let gate = self.gate.clone();
            let domain = domain.clone();
            tasks.spawn(async move {
                let result = downloader
                    .fetch_gated(&url, Some(&domain), &deadline, &gate)
                    .await;
                (page_type, url, result)
            });
        }

        loop {
            let joined = tokio::select! {
                joined = tasks.join_next() => joined,
                _ = cancel.cancelled() => {
                    tasks.abort_all();
                    return Err(FetchError::Shutdown);
                }
            };
            let Some(joined) = joined else {
                break;
            };
            let Ok((page_type, url, result)) = joined else {
                continue;
            };

            match result {
                Ok(page) => {
                    self.persist_page(&venue.id, page_type, &page, Discovery::Heuristic)
                        .await;
                    outcome.fetched_count += 1;
                    outcome.pages.push(CrawledPage {
                        url: page.url.clone(),
                        page_type,
                        fetched_at: Utc::now(),
                        html: page.html,
                        text: page.cleaned_text,
                    });
                }
                Err(error) => {
                    if matches!(error, FetchError::TimeBudgetExceeded) {
                        outcome.aborted_count += 1;
                    }
                    self.persist_failure(&venue.id, &url, page_type, &error).await;
                }
            }
        }

        outcome.duration_ms = deadline.elapsed().as_millis() as u64;
        info!(
            venue_id = %venue.id,
            duration_ms = outcome.duration_ms,
            fetched_count = outcome.fetched_count,
            aborted_count = outcome.aborted_count,
            "crawl finished"
        );
        Ok(outcome)
    }

    /// Stage 1: infer a website for a venue that has none, bounded to
    /// [`RECOVERY_BUDGET`]. All candidates are persisted for audit; the
    /// chosen one is written onto the venue row.
    async fn recover_website(
        &self,
        venue: &Venue,
        deadline: &Deadline,
    ) -> Result<Url, FetchError> {
        let budget = deadline.cap(RECOVERY_BUDGET);

        let recovered = tokio::time::timeout(budget, async {
            let candidates = recover::candidates_for(venue);
            let chosen = candidates
                .iter()
                .find(|candidate| candidate.is_chosen)
                .and_then(|candidate| Url::parse(&candidate.candidate_url).ok())?;

            if let Err(error) = recovery::insert_candidates(&venue.id, &candidates, &self.db_pool).await
            {
                warn!(venue_id = %venue.id, error = ?error, "failed to persist recovery candidates");
            }
            if let Err(error) = venues::set_website(&venue.id, chosen.as_str(), &self.db_pool).await
            {
                warn!(venue_id = %venue.id, error = ?error, "failed to write recovered website");
            }
            Some(chosen)
        })
        .await;

        match recovered {
            Ok(Some(url)) => {
                debug!(venue_id = %venue.id, website = %url, "recovered website");
                Ok(url)
            }
            Ok(None) | Err(_) => Err(FetchError::NoWebsite),
        }
    }

    async fn persist_page(
        &self,
        venue_id: &str,
        page_type: PageType,
        page: &PageFetch,
        discovered_via: Discovery,
    ) {
        let new_page = pages::NewPage {
            venue_id: venue_id.to_string(),
            url: page.url.to_string(),
            page_type,
            valid_until: Some(Utc::now() + page_type.ttl()),
            http_status: Some(page.status as i16),
            content_type: Some(page.content_type.clone()),
            content_hash: Some(page.content_hash.clone()),
            cleaned_text: Some(page.cleaned_text.clone()),
            discovered_via,
            redirect_chain: json!(page.redirect_chain),
            reason: None,
            size_bytes: Some(page.size_bytes as i32),
            total_ms: Some(page.total_ms as i32),
            first_byte_ms: Some(page.first_byte_ms as i32),
        };

        match pages::insert(&new_page, &self.db_pool).await {
            Ok(pages::PageWrite::Inserted(_)) => {}
            Ok(pages::PageWrite::DuplicateContent) => {
                debug!(venue_id, url = %page.url, "identical content already stored, row reused");
            }
            Err(error) => warn!(venue_id, url = %page.url, error = ?error, "failed to persist page"),
        }
    }

    async fn persist_failure(
        &self,
        venue_id: &str,
        url: &Url,
        page_type: PageType,
        error: &FetchError,
    ) {
        // Disallowed and off-domain URLs were never attempted; they leave no
        // page row behind
        if matches!(error, FetchError::RobotsDisallowed | FetchError::OffDomainLink) {
            return;
        }

        let status = match error {
            FetchError::HttpStatus(status) => Some(*status as i16),
            _ => None,
        };
        let new_page = pages::NewPage {
            venue_id: venue_id.to_string(),
            url: url.to_string(),
            page_type,
            valid_until: None,
            http_status: status,
            content_type: None,
            content_hash: None,
            cleaned_text: None,
            discovered_via: Discovery::Heuristic,
            redirect_chain: json!([]),
            reason: Some(error.code().to_string()),
            size_bytes: None,
            total_ms: None,
            first_byte_ms: None,
        };

        if let Err(db_error) = pages::insert(&new_page, &self.db_pool).await {
            warn!(venue_id, url = %url, error = ?db_error, "failed to persist page failure");
        }
    }
}
