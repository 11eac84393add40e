//! Visible-text extraction and the page quality gate.

use crate::crawler::error::FetchError;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Node};
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

/// Minimum visible characters a page must carry to be stored and used.
pub const MIN_VISIBLE_CHARS: usize = 200;

/// Placeholder pages carry almost no venue facts; when one of these phrases
/// appears in the opening text the page is rejected outright.
static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(coming soon|under construction|domain (is )?for sale|this (site|domain) is parked|default web page)",
    )
    .unwrap()
});

const SKIPPED_ELEMENTS: [&str; 8] = [
    "script", "style", "noscript", "template", "head", "svg", "iframe", "nav",
];

const BLOCK_ELEMENTS: [&str; 15] = [
    "p", "div", "li", "ul", "ol", "br", "tr", "table", "section", "article", "h1", "h2", "h3",
    "h4", "footer",
];

/// Reduce an HTML document to visible prose.
///
/// Scripts, styles and navigation are dropped; block boundaries become
/// newlines so downstream line-based heuristics see the page's structure;
/// whitespace is collapsed and the result NFC-normalized.
pub fn extract_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut raw = String::new();
    collect(*document.root_element(), &mut raw);

    let collapsed: Vec<String> = raw
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect();

    collapsed.join("\n").nfc().collect()
}

fn collect(node: ego_tree::NodeRef<'_, Node>, out: &mut String) {
    match node.value() {
        Node::Text(text) => out.push_str(&text),
        Node::Element(element) => {
            let name = element.name();
            if SKIPPED_ELEMENTS.contains(&name) {
                return;
            }
            let block = BLOCK_ELEMENTS.contains(&name);
            if block {
                out.push('\n');
            }
            for child in node.children() {
                collect(child, out);
            }
            if block {
                out.push('\n');
            }
        }
        _ => {
            for child in node.children() {
                collect(child, out);
            }
        }
    }
}

/// Reject pages that carry too little text to be useful, or that are
/// recognizable placeholders.
pub fn quality_gate(cleaned: &str) -> Result<(), FetchError> {
    if cleaned.chars().count() < MIN_VISIBLE_CHARS {
        return Err(FetchError::ThinContent);
    }

    let opening: String = cleaned.chars().take(300).collect();
    if PLACEHOLDER.is_match(&opening) {
        return Err(FetchError::ThinContent);
    }

    Ok(())
}

/// Stable hash of the cleaned text; identical bodies across venues collapse
/// onto one stored page.
pub fn content_hash(cleaned: &str) -> String {
    let digest = Sha256::digest(cleaned.as_bytes());
    format!("{digest:x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_script_and_style() {
        let html = r#"<html><head><title>x</title><style>body{}</style></head>
            <body><script>var a=1;</script><p>Open daily from 9am.</p></body></html>"#;
        let text = extract_text(html);
        assert!(text.contains("Open daily from 9am."));
        assert!(!text.contains("var a=1"));
        assert!(!text.contains("body{}"));
    }

    #[test]
    fn block_elements_become_line_breaks() {
        let html = "<body><ul><li>Fish pie £12</li><li>Soup £6</li></ul></body>";
        let text = extract_text(html);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["Fish pie £12", "Soup £6"]);
    }

    #[test]
    fn whitespace_is_collapsed() {
        let html = "<p>Open    daily   9am  -  5pm</p>";
        assert_eq!(extract_text(html), "Open daily 9am - 5pm");
    }

    #[test]
    fn gate_rejects_short_text() {
        assert!(matches!(
            quality_gate("too short"),
            Err(FetchError::ThinContent)
        ));
    }

    #[test]
    fn gate_rejects_placeholders() {
        let text = format!("Coming soon! {}", "x".repeat(300));
        assert!(matches!(quality_gate(&text), Err(FetchError::ThinContent)));
    }

    #[test]
    fn gate_accepts_real_prose() {
        let text = "The Greyhound is a family-run pub on the riverside serving seasonal \
            food and local ales. We welcome walkers and dogs alike, and our garden \
            overlooks the weir. Booking is recommended at weekends. Our kitchen uses \
            produce from farms within twenty miles."
            .to_string();
        assert!(quality_gate(&text).is_ok());
    }

    #[test]
    fn identical_text_hashes_identically() {
        assert_eq!(content_hash("same body"), content_hash("same body"));
        assert_ne!(content_hash("same body"), content_hash("other body"));
    }
}
