//! HTTP downloader with strict budgets.
//!
//! Redirects are followed manually so the chain can be recorded; the body is
//! streamed under a size cap; robots rules are consulted before the first
//! byte leaves the process.

use crate::crawler::clean;
use crate::crawler::deadline::Deadline;
use crate::crawler::error::{FetchError, classify_transport};
use crate::crawler::gate::RateGate;
use crate::crawler::registered_domain;
use crate::crawler::robots::RobotsCache;
use futures::StreamExt;
use std::time::{Duration, Instant};
use url::Url;

pub const USER_AGENT: &str = concat!(
    "wayfinderbot/",
    env!("CARGO_PKG_VERSION"),
    " (+https://wayfinder.example/bot)"
);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
const FIRST_BYTE_TIMEOUT: Duration = Duration::from_secs(1);
const READ_TIMEOUT: Duration = Duration::from_secs(1);
const HARD_WALL: Duration = Duration::from_secs(3);
const MAX_REDIRECTS: usize = 5;
const MAX_ATTEMPTS: u32 = 3;

const ACCEPTED_MIME: [&str; 2] = ["text/html", "application/xhtml+xml"];

/// A successful page download.
#[derive(Debug, Clone)]
pub struct PageFetch {
    pub url: Url,
    pub status: u16,
    pub content_type: String,
    pub html: String,
    pub cleaned_text: String,
    pub content_hash: String,
    pub redirect_chain: Vec<String>,
    pub first_byte_ms: u32,
    pub total_ms: u32,
    pub size_bytes: u32,
}

pub struct Downloader {
    client: reqwest::Client,
    robots: RobotsCache,
    size_limit: usize,
}

impl Downloader {
    pub fn new(size_limit: usize) -> crate::error::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            robots: RobotsCache::new(client.clone(), USER_AGENT.to_string()),
            client,
            size_limit,
        })
    }

    /// Fetch one page through the rate gate, retrying transient failures at
    /// most twice. 429/5xx responses push the host's next admission out via
    /// the gate's backoff schedule.
    pub async fn fetch_gated(
        &self,
        url: &Url,
        allowed_domain: Option<&str>,
        deadline: &Deadline,
        gate: &RateGate,
    ) -> Result<PageFetch, FetchError> {
        let host = registered_domain(url).ok_or(FetchError::DnsFailure)?;

        let mut attempt = 0;
        loop {
            attempt += 1;

            if !deadline.allows_fetch() {
                return Err(FetchError::TimeBudgetExceeded);
            }

            let permit = tokio::time::timeout(deadline.remaining(), gate.acquire(&host))
                .await
                .map_err(|_| FetchError::TimeBudgetExceeded)?;

            let result = self.fetch(url, allowed_domain, deadline).await;
            drop(permit);

            match result {
                Ok(page) => {
                    gate.report_success(&host);
                    return Ok(page);
                }
                Err(error) => {
                    if error.backoff_host() {
                        gate.report_failure(&host);
                    }
                    if error.transient() && attempt < MAX_ATTEMPTS && deadline.allows_fetch() {
                        tracing::debug!(url = %url, attempt, code = error.code(), "retrying fetch");
                        continue;
                    }
                    return Err(error);
                }
            }
        }
    }

    /// Fetch one page: robots check, manual redirects, streamed body under
    /// the size cap, cleaned-text extraction and the quality gate.
    pub async fn fetch(
        &self,
        url: &Url,
        allowed_domain: Option<&str>,
        deadline: &Deadline,
    ) -> Result<PageFetch, FetchError> {
        if !deadline.allows_fetch() {
            return Err(FetchError::TimeBudgetExceeded);
        }

        self.robots.check(url, deadline).await?;

        let started = Instant::now();
        let mut redirect_chain: Vec<String> = Vec::new();
        let mut current = url.clone();

        let response = loop {
            let wall_left = HARD_WALL.saturating_sub(started.elapsed());
            let timeout = deadline.cap(wall_left).max(Duration::from_millis(50));

            let hop_started = Instant::now();
            let response = self
                .client
                .get(current.clone())
                .timeout(timeout)
                .send()
                .await
                .map_err(|e| classify_transport(&e))?;

            // Connect and first-byte each get one second; a hop that blew
            // both is treated as timed out even if headers eventually came
            if hop_started.elapsed() > CONNECT_TIMEOUT + FIRST_BYTE_TIMEOUT {
                return Err(FetchError::NetworkTimeout);
            }

            if response.status().is_redirection() {
                if redirect_chain.len() >= MAX_REDIRECTS {
                    return Err(FetchError::HttpStatus(response.status().as_u16()));
                }
                let location = response
                    .headers()
                    .get(http::header::LOCATION)
                    .and_then(|value| value.to_str().ok())
                    .ok_or(FetchError::HttpStatus(response.status().as_u16()))?;
                let next = current
                    .join(location)
                    .map_err(|_| FetchError::HttpStatus(response.status().as_u16()))?;

                if let Some(domain) = allowed_domain
                    && registered_domain(&next).as_deref() != Some(domain)
                {
                    return Err(FetchError::OffDomainLink);
                }

                redirect_chain.push(next.to_string());
                current = next;
                continue;
            }

            break response;
        };

        let first_byte_ms = started.elapsed().as_millis() as u32;
        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(FetchError::HttpStatus(status));
        }

        let content_type = response
            .headers()
            .get(http::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_string();
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        if !ACCEPTED_MIME.contains(&mime.as_str()) {
            return Err(FetchError::InvalidMime(mime));
        }

        let body = self.read_body(response, started, deadline).await?;
        let total_ms = started.elapsed().as_millis() as u32;
        let size_bytes = body.len() as u32;

        let html = String::from_utf8_lossy(&body).into_owned();
        let cleaned_text = clean::extract_text(&html);
        clean::quality_gate(&cleaned_text)?;
        let content_hash = clean::content_hash(&cleaned_text);

        Ok(PageFetch {
            url: url.clone(),
            status,
            content_type,
            html,
            cleaned_text,
            content_hash,
            redirect_chain,
            first_byte_ms,
            total_ms,
            size_bytes,
        })
    }

    /// Drain the body stream under the read timeout, the hard wall clock and
    /// the size cap. Oversized bodies are rejected, not truncated into the
    /// store.
    async fn read_body(
        &self,
        response: reqwest::Response,
        started: Instant,
        deadline: &Deadline,
    ) -> Result<Vec<u8>, FetchError> {
        let read_started = Instant::now();
        let mut body: Vec<u8> = Vec::new();
        let mut stream = response.bytes_stream();

        loop {
            if started.elapsed() > HARD_WALL || deadline.expired() {
                return Err(FetchError::NetworkTimeout);
            }

            let read_budget = READ_TIMEOUT
                .saturating_sub(read_started.elapsed())
                .min(deadline.remaining());
            if read_budget.is_zero() {
                return Err(FetchError::NetworkTimeout);
            }

            match tokio::time::timeout(read_budget, stream.next()).await {
                Err(_) => return Err(FetchError::NetworkTimeout),
                Ok(None) => break,
                Ok(Some(Err(error))) => return Err(classify_transport(&error)),
                Ok(Some(Ok(chunk))) => {
                    if body.len() + chunk.len() > self.size_limit {
                        return Err(FetchError::SizeExceeded);
                    }
                    body.extend_from_slice(&chunk);
                }
            }
        }

        Ok(body)
    }
}
