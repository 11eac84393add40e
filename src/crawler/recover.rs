//! Website recovery for venues with no known URL.
//!
//! Candidates are derived from the venue's baseline contact data: an email
//! address yields its registered domain as a site, social-profile links are
//! usable directly, and as a last resort the venue name is turned into a
//! domain guess. Every candidate is persisted for audit; the best one is
//! written onto the venue.

use crate::data::models::{RecoveryMethod, Venue};
use crate::data::recovery::NewCandidate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use url::Url;

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@([A-Za-z0-9.-]+\.[A-Za-z]{2,})").unwrap());

const CONFIDENCE_EMAIL: f64 = 0.9;
const CONFIDENCE_SOCIAL: f64 = 0.6;
const CONFIDENCE_GUESS: f64 = 0.3;

/// Derive candidate websites for a venue, best first. The first entry is
/// marked `is_chosen`.
pub fn candidates_for(venue: &Venue) -> Vec<NewCandidate> {
    let mut candidates: Vec<NewCandidate> = Vec::new();

    if let Some(components) = &venue.address_components {
        if let Some(email) = components.get("email").and_then(Value::as_str)
            && let Some(captures) = EMAIL.captures(email)
        {
            let host = captures[1].to_ascii_lowercase();
            if let Some(domain) = psl::domain_str(&host) {
                candidates.push(NewCandidate {
                    candidate_url: format!("https://{domain}/"),
                    confidence: CONFIDENCE_EMAIL,
                    method: RecoveryMethod::EmailDomain,
                    is_chosen: false,
                });
            }
        }

        if let Some(social) = components.get("social").and_then(Value::as_array) {
            for link in social.iter().filter_map(Value::as_str) {
                if Url::parse(link).is_ok() {
                    candidates.push(NewCandidate {
                        candidate_url: link.to_string(),
                        confidence: CONFIDENCE_SOCIAL,
                        method: RecoveryMethod::Social,
                        is_chosen: false,
                    });
                }
            }
        }
    }

    if let Some(guess) = name_guess(&venue.name) {
        candidates.push(NewCandidate {
            candidate_url: guess,
            confidence: CONFIDENCE_GUESS,
            method: RecoveryMethod::Search,
            is_chosen: false,
        });
    }

    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    if let Some(first) = candidates.first_mut() {
        first.is_chosen = true;
    }
    candidates
}

/// Turn a venue name into a plausible domain ("The Greyhound" ->
/// "https://thegreyhound.com/"). Very short slugs are too ambiguous to try.
fn name_guess(name: &str) -> Option<String> {
    let slug: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    if slug.len() < 4 {
        return None;
    }
    Some(format!("https://{slug}.com/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn venue(address_components: Option<Value>) -> Venue {
        Venue {
            id: "poi:1".into(),
            name: "The Greyhound".into(),
            category_name: Some("pub".into()),
            category_weight: None,
            lat: 51.5,
            lon: -0.1,
            website: None,
            popularity_confidence: Some(0.4),
            address_components,
            last_enriched_at: None,
        }
    }

    #[test]
    fn email_domain_wins_and_is_chosen() {
        let venue = venue(Some(json!({
            "email": "bookings@thegreyhound.co.uk",
            "social": ["https://facebook.example/thegreyhound"]
        })));

        let candidates = candidates_for(&venue);
        assert_eq!(candidates[0].candidate_url, "https://thegreyhound.co.uk/");
        assert_eq!(candidates[0].method, RecoveryMethod::EmailDomain);
        assert!(candidates[0].is_chosen);
        assert!(candidates[1..].iter().all(|c| !c.is_chosen));
        assert_eq!(candidates.len(), 3);
    }

    #[test]
    fn social_link_used_when_no_email() {
        let venue = venue(Some(json!({
            "social": ["https://facebook.example/thegreyhound"]
        })));

        let candidates = candidates_for(&venue);
        assert_eq!(candidates[0].method, RecoveryMethod::Social);
        assert!(candidates[0].is_chosen);
    }

    #[test]
    fn name_guess_is_last_resort() {
        let candidates = candidates_for(&venue(None));
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].candidate_url, "https://thegreyhound.com/");
        assert_eq!(candidates[0].method, RecoveryMethod::Search);
    }

    #[test]
    fn email_subdomain_collapses_to_registered_domain() {
        let venue = venue(Some(json!({"email": "info@mail.thegreyhound.co.uk"})));
        let candidates = candidates_for(&venue);
        assert_eq!(candidates[0].candidate_url, "https://thegreyhound.co.uk/");
    }
}
