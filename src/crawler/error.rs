//! Crawl error taxonomy.
//!
//! Every failure a fetch can produce maps to a stable string code that is
//! persisted on `scraped_pages.reason` or `crawl_jobs.error`. Transient
//! classes are retried (at most 2 additional attempts) through the rate
//! gate's backoff; the rest are final on first sight.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network timeout")]
    NetworkTimeout,
    #[error("dns failure")]
    DnsFailure,
    #[error("tls error")]
    TlsError,
    #[error("http status {0}")]
    HttpStatus(u16),
    #[error("robots disallowed")]
    RobotsDisallowed,
    #[error("invalid mime: {0}")]
    InvalidMime(String),
    #[error("thin content")]
    ThinContent,
    #[error("size exceeded")]
    SizeExceeded,
    #[error("off domain link")]
    OffDomainLink,
    #[error("time budget exceeded")]
    TimeBudgetExceeded,
    #[error("no website")]
    NoWebsite,
    #[error("shutdown")]
    Shutdown,
}

impl FetchError {
    /// Stable code persisted to the database and surfaced on jobs.
    pub fn code(&self) -> &'static str {
        match self {
            FetchError::NetworkTimeout => "network_timeout",
            FetchError::DnsFailure => "dns_failure",
            FetchError::TlsError => "tls_error",
            FetchError::HttpStatus(429) => "http_429",
            FetchError::HttpStatus(status) if *status >= 500 => "http_5xx",
            FetchError::HttpStatus(_) => "non_200_status",
            FetchError::RobotsDisallowed => "robots_disallowed",
            FetchError::InvalidMime(_) => "invalid_mime",
            FetchError::ThinContent => "thin_content",
            FetchError::SizeExceeded => "size_exceeded",
            FetchError::OffDomainLink => "off_domain_link",
            FetchError::TimeBudgetExceeded => "time_budget_exceeded",
            FetchError::NoWebsite => "no_website",
            FetchError::Shutdown => "shutdown",
        }
    }

    /// Whether another attempt may succeed.
    pub fn transient(&self) -> bool {
        matches!(
            self,
            FetchError::NetworkTimeout
                | FetchError::DnsFailure
                | FetchError::TlsError
                | FetchError::HttpStatus(429)
        ) || matches!(self, FetchError::HttpStatus(status) if *status >= 500)
    }

    /// Whether the failed host should be backed off before the next
    /// admission (429 and 5xx only; timeouts retry without penalty).
    pub fn backoff_host(&self) -> bool {
        matches!(self, FetchError::HttpStatus(429))
            || matches!(self, FetchError::HttpStatus(status) if *status >= 500)
    }
}

/// Classify a reqwest transport error into the taxonomy.
pub fn classify_transport(error: &reqwest::Error) -> FetchError {
    if error.is_timeout() {
        return FetchError::NetworkTimeout;
    }

    // reqwest does not expose DNS/TLS failures as variants; inspect the
    // source chain the way its own tests do.
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(error);
    while let Some(current) = source {
        let text = current.to_string().to_ascii_lowercase();
        if text.contains("dns") || text.contains("resolve") {
            return FetchError::DnsFailure;
        }
        if text.contains("tls") || text.contains("certificate") || text.contains("handshake") {
            return FetchError::TlsError;
        }
        source = current.source();
    }

    FetchError::NetworkTimeout
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(FetchError::NetworkTimeout.code(), "network_timeout");
        assert_eq!(FetchError::DnsFailure.code(), "dns_failure");
        assert_eq!(FetchError::TlsError.code(), "tls_error");
        assert_eq!(FetchError::HttpStatus(429).code(), "http_429");
        assert_eq!(FetchError::HttpStatus(503).code(), "http_5xx");
        assert_eq!(FetchError::HttpStatus(404).code(), "non_200_status");
        assert_eq!(FetchError::RobotsDisallowed.code(), "robots_disallowed");
        assert_eq!(FetchError::InvalidMime("image/png".into()).code(), "invalid_mime");
        assert_eq!(FetchError::ThinContent.code(), "thin_content");
        assert_eq!(FetchError::SizeExceeded.code(), "size_exceeded");
        assert_eq!(FetchError::OffDomainLink.code(), "off_domain_link");
        assert_eq!(FetchError::TimeBudgetExceeded.code(), "time_budget_exceeded");
        assert_eq!(FetchError::NoWebsite.code(), "no_website");
        assert_eq!(FetchError::Shutdown.code(), "shutdown");
    }

    #[test]
    fn transient_classes_match_retry_table() {
        assert!(FetchError::NetworkTimeout.transient());
        assert!(FetchError::DnsFailure.transient());
        assert!(FetchError::TlsError.transient());
        assert!(FetchError::HttpStatus(429).transient());
        assert!(FetchError::HttpStatus(500).transient());

        assert!(!FetchError::HttpStatus(404).transient());
        assert!(!FetchError::RobotsDisallowed.transient());
        assert!(!FetchError::InvalidMime("text/plain".into()).transient());
        assert!(!FetchError::SizeExceeded.transient());
        assert!(!FetchError::TimeBudgetExceeded.transient());
    }

    #[test]
    fn only_server_pressure_backs_off_the_host() {
        assert!(FetchError::HttpStatus(429).backoff_host());
        assert!(FetchError::HttpStatus(502).backoff_host());
        assert!(!FetchError::NetworkTimeout.backoff_host());
        assert!(!FetchError::HttpStatus(404).backoff_host());
    }
}
