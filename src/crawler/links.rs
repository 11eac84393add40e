//! Target-page discovery on a venue homepage.
//!
//! Scans anchors for links that look like hours/menu/contact/about/fees
//! pages, keeps them on the venue's registered domain, and returns at most
//! one candidate per type, three in total, in extraction-value order.

use crate::crawler::registered_domain;
use crate::data::models::PageType;
use scraper::{Html, Selector};
use std::collections::HashMap;
use url::Url;

/// Maximum number of target pages fetched per venue.
pub const MAX_TARGETS: usize = 3;

/// Types in priority order: hours beat menus beat contact pages, and so on.
const PRIORITY: [PageType; 5] = [
    PageType::Hours,
    PageType::Menu,
    PageType::Contact,
    PageType::About,
    PageType::Fees,
];

/// URL path fragments and anchor phrases per type. A URL matches at most one
/// type; the first match in priority order wins.
fn keywords(page_type: PageType) -> (&'static [&'static str], &'static [&'static str]) {
    match page_type {
        PageType::Hours => (
            &["/hours", "/opening", "/opening-hours", "/opening-times", "/times"],
            &["opening hours", "opening times", "hours", "when to visit"],
        ),
        PageType::Menu => (
            &["/menu", "/menus", "/food", "/drinks", "/carte"],
            &["menu", "menus", "food", "drinks", "wine list", "carte"],
        ),
        PageType::Contact => (
            &["/contact", "/contact-us", "/find-us", "/location", "/directions"],
            &["contact", "contact us", "find us", "get in touch", "directions"],
        ),
        PageType::About => (
            &["/about", "/about-us", "/our-story", "/history", "/story"],
            &["about", "about us", "our story", "who we are", "history"],
        ),
        PageType::Fees => (
            &["/tickets", "/admission", "/prices", "/pricing", "/fees"],
            &["tickets", "admission", "prices", "ticket prices", "entry fees"],
        ),
        _ => (&[], &[]),
    }
}

fn classify(path: &str, anchor_text: &str) -> Option<PageType> {
    for page_type in PRIORITY {
        let (paths, phrases) = keywords(page_type);
        if paths.iter().any(|keyword| path.contains(keyword))
            || phrases.iter().any(|phrase| anchor_text == *phrase)
        {
            return Some(page_type);
        }
    }
    None
}

struct Candidate {
    url: Url,
    path_len: usize,
    order: usize,
}

/// Discover up to [`MAX_TARGETS`] same-host target pages on a homepage.
pub fn find_targets(html: &str, base: &Url) -> Vec<(PageType, Url)> {
    let Some(base_domain) = registered_domain(base) else {
        return Vec::new();
    };

    let document = Html::parse_document(html);
    let selector = Selector::parse("a[href]").expect("static selector");

    let mut best: HashMap<PageType, Candidate> = HashMap::new();

    for (order, anchor) in document.select(&selector).enumerate() {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        if href.is_empty()
            || href.starts_with('#')
            || href.starts_with("mailto:")
            || href.starts_with("tel:")
            || href.starts_with("javascript:")
        {
            continue;
        }

        let Ok(mut resolved) = base.join(href) else {
            continue;
        };
        resolved.set_fragment(None);

        // Same-host rule: cross-domain links are never candidates
        if registered_domain(&resolved).as_deref() != Some(base_domain.as_str()) {
            continue;
        }
        if resolved.path() == base.path() && resolved.query() == base.query() {
            continue;
        }

        let path = resolved.path().to_ascii_lowercase();
        let anchor_text = anchor
            .text()
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_ascii_lowercase();

        let Some(page_type) = classify(&path, &anchor_text) else {
            continue;
        };

        let candidate = Candidate {
            path_len: resolved.path().len(),
            url: resolved,
            order,
        };

        // Prefer shorter paths, then earlier document order
        match best.get(&page_type) {
            Some(current)
                if (current.path_len, current.order) <= (candidate.path_len, candidate.order) => {}
            _ => {
                best.insert(page_type, candidate);
            }
        }
    }

    PRIORITY
        .into_iter()
        .filter_map(|page_type| best.remove(&page_type).map(|c| (page_type, c.url)))
        .take(MAX_TARGETS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://greyhound.example/").unwrap()
    }

    #[test]
    fn finds_targets_in_priority_order() {
        let html = r#"
            <a href="/about">About us</a>
            <a href="/menu">Menu</a>
            <a href="/contact">Contact</a>
            <a href="/opening-hours">Opening hours</a>
        "#;
        let targets = find_targets(html, &base());
        let types: Vec<PageType> = targets.iter().map(|(t, _)| *t).collect();
        assert_eq!(types, vec![PageType::Hours, PageType::Menu, PageType::Contact]);
    }

    #[test]
    fn discards_cross_domain_links() {
        let html = r#"
            <a href="https://facebook.example/greyhound/menu">Menu</a>
            <a href="/food">Food</a>
        "#;
        let targets = find_targets(html, &base());
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].1.as_str(), "https://greyhound.example/food");
    }

    #[test]
    fn subdomains_count_as_same_host() {
        let html = r#"<a href="https://www.greyhound.example/menu">Menu</a>"#;
        let targets = find_targets(html, &base());
        assert_eq!(targets.len(), 1);
    }

    #[test]
    fn one_candidate_per_type_prefers_shorter_path() {
        let html = r#"
            <a href="/menu/sunday-specials">Menu</a>
            <a href="/menu">Menu</a>
        "#;
        let targets = find_targets(html, &base());
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].1.path(), "/menu");
    }

    #[test]
    fn url_matches_at_most_one_type() {
        // "/menu" path beats the "about" anchor text: first match in priority order
        let html = r#"<a href="/menu">About our menus</a>"#;
        let targets = find_targets(html, &base());
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].0, PageType::Menu);
    }

    #[test]
    fn caps_at_three_targets() {
        let html = r#"
            <a href="/opening-hours">Opening hours</a>
            <a href="/menu">Menu</a>
            <a href="/contact">Contact</a>
            <a href="/about">About</a>
            <a href="/tickets">Tickets</a>
        "#;
        let targets = find_targets(html, &base());
        assert_eq!(targets.len(), MAX_TARGETS);
        let types: Vec<PageType> = targets.iter().map(|(t, _)| *t).collect();
        assert_eq!(types, vec![PageType::Hours, PageType::Menu, PageType::Contact]);
    }

    #[test]
    fn skips_anchors_and_mailto() {
        let html = r##"
            <a href="#menu">Menu</a>
            <a href="mailto:menu@greyhound.example">Menu</a>
            <a href="tel:+441234567890">Menu</a>
        "##;
        assert!(find_targets(html, &base()).is_empty());
    }
}
