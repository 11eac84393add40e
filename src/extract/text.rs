//! Heuristic extraction from cleaned page text.
//!
//! Targeted regex and phrase matching: phone numbers, emails, weekday-time
//! spans, currency price ranges, admission keywords, menu items from list
//! lines, and feature/amenity keywords.

use crate::data::models::PageType;
use crate::extract::hours::{WeekHours, parse_text_hours};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Value, json};

/// Menu extraction stops after this many items.
pub const MAX_MENU_ITEMS: usize = 50;

/// Everything the heuristic path can pull out of one page.
#[derive(Debug, Default, Clone)]
pub struct TextFacts {
    pub hours: Option<WeekHours>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub price_range: Option<String>,
    pub fees_free: Option<bool>,
    pub fee_entries: Vec<String>,
    pub menu_items: Vec<Value>,
    pub features: Vec<String>,
}

static PHONE: Lazy<Regex> = Lazy::new(|| {
    // E.164 and common national formats; at least 9 digits in total
    Regex::new(r"(?x)
        (?:\+\d{1,3}[\s.-]?)?
        (?:\(0?\d{1,4}\)[\s.-]?|0?\d{2,5}[\s.-])
        \d{3,4}[\s.-]?\d{3,4}
    ")
    .unwrap()
});

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());

static PRICE_RANGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[£$€]\s?\d+(?:\.\d{2})?\s?(?:-|–|to)\s?[£$€]?\s?\d+(?:\.\d{2})?").unwrap()
});

static PRICE_SYMBOLS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)(?:^|\s)(£{1,4}|\${1,4})(?:\s|$)").unwrap());

static FREE_ENTRY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(free (entry|admission|to enter)|admission (is )?free|entry (is )?free)\b").unwrap());

static FEE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(adults?|children|child|concessions?|seniors?|students?|tickets?)\b[^\n£$€]{0,30}[£$€]\s?\d+(?:\.\d{2})?").unwrap()
});

static MENU_ITEM: Lazy<Regex> = Lazy::new(|| {
    // "Fish pie ..... £12.50" or "Soup of the day 6.00"
    Regex::new(r"^(?P<name>[A-Z][A-Za-z0-9'&,()\- ]{2,60}?)[\s.·…]*[£$€]?(?P<price>\d{1,3}(?:\.\d{2})?)$")
        .unwrap()
});

const FEATURE_KEYWORDS: [&str; 14] = [
    "free wifi",
    "wifi",
    "parking",
    "dog friendly",
    "wheelchair accessible",
    "outdoor seating",
    "beer garden",
    "garden",
    "live music",
    "takeaway",
    "delivery",
    "family friendly",
    "vegan options",
    "gluten free",
];

/// Scan a page's cleaned text. Which extractors run depends on the page
/// type: menu items only come from menu pages, fee lines from fees pages
/// and homepages, and so on.
pub fn extract(text: &str, page_type: PageType) -> TextFacts {
    let mut facts = TextFacts::default();

    if matches!(
        page_type,
        PageType::Homepage | PageType::Hours | PageType::Contact | PageType::About
    ) {
        facts.hours = parse_text_hours(text);
    }

    if matches!(
        page_type,
        PageType::Homepage | PageType::Contact | PageType::About
    ) {
        facts.phone = find_phone(text);
        facts.email = EMAIL.find(text).map(|m| m.as_str().to_string());
    }

    if matches!(page_type, PageType::Homepage | PageType::Menu | PageType::About) {
        facts.price_range = find_price_range(text);
    }

    if matches!(page_type, PageType::Homepage | PageType::Fees | PageType::About) {
        if FREE_ENTRY.is_match(text) {
            facts.fees_free = Some(true);
        } else {
            for captures in FEE_LINE.captures_iter(text).take(8) {
                let entry = normalize_spaces(&captures[0]);
                if !facts.fee_entries.contains(&entry) {
                    facts.fee_entries.push(entry);
                }
            }
            if !facts.fee_entries.is_empty() {
                facts.fees_free = Some(false);
            }
        }
    }

    if page_type == PageType::Menu {
        facts.menu_items = find_menu_items(text);
    }

    if matches!(page_type, PageType::Homepage | PageType::About) {
        let lower = text.to_ascii_lowercase();
        for keyword in FEATURE_KEYWORDS {
            if lower.contains(keyword) {
                // "free wifi" subsumes "wifi", "beer garden" subsumes "garden"
                let subsumed = facts
                    .features
                    .iter()
                    .any(|existing| existing.contains(keyword));
                if !subsumed {
                    facts.features.push(keyword.to_string());
                }
            }
        }
    }

    facts
}

fn normalize_spaces(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn find_phone(text: &str) -> Option<String> {
    PHONE
        .find_iter(text)
        .map(|m| m.as_str().trim().to_string())
        .find(|candidate| {
            let digits = candidate.chars().filter(char::is_ascii_digit).count();
            (9..=15).contains(&digits)
        })
}

fn find_price_range(text: &str) -> Option<String> {
    if let Some(m) = PRICE_RANGE.find(text) {
        return Some(normalize_spaces(m.as_str()));
    }
    PRICE_SYMBOLS
        .captures(text)
        .map(|captures| captures[1].to_string())
}

/// Menu items from bullet/list lines: a dish name with an optional price,
/// capped at [`MAX_MENU_ITEMS`].
fn find_menu_items(text: &str) -> Vec<Value> {
    let mut items = Vec::new();
    for line in text.lines() {
        let line = line.trim().trim_start_matches(['-', '•', '*']).trim();
        if let Some(captures) = MENU_ITEM.captures(line) {
            let name = captures["name"].trim_end_matches(['.', '·', ' ']).to_string();
            if name.split_whitespace().count() > 8 {
                continue;
            }
            items.push(json!({
                "name": name,
                "price": captures["price"].to_string(),
            }));
        } else if is_bare_dish_line(line) {
            items.push(json!({ "name": line, "price": null }));
        }

        if items.len() >= MAX_MENU_ITEMS {
            break;
        }
    }
    items
}

/// A short capitalized line with no terminal punctuation reads as a dish
/// name without a printed price.
fn is_bare_dish_line(line: &str) -> bool {
    let words = line.split_whitespace().count();
    (2..=6).contains(&words)
        && line.len() <= 60
        && line.chars().next().is_some_and(|c| c.is_ascii_uppercase())
        && !line.ends_with(['.', '!', '?', ':'])
        && line.chars().all(|c| !c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn finds_uk_and_e164_phones() {
        let facts = extract("Call us on +44 20 1234 5678 to book.", PageType::Contact);
        assert_eq!(facts.phone.as_deref(), Some("+44 20 1234 5678"));

        let facts = extract("Ring 01234 567890 anytime.", PageType::Contact);
        assert_eq!(facts.phone.as_deref(), Some("01234 567890"));
    }

    #[test]
    fn short_number_runs_are_not_phones() {
        let facts = extract("Established 1850, seats 120.", PageType::Contact);
        assert_eq!(facts.phone, None);
    }

    #[test]
    fn finds_email() {
        let facts = extract("Email bookings@venue.example for parties.", PageType::Contact);
        assert_eq!(facts.email.as_deref(), Some("bookings@venue.example"));
    }

    #[test]
    fn hours_from_free_text() {
        let facts = extract("We are open Mon-Fri 9am-5pm.", PageType::Hours);
        let rendered = facts.hours.unwrap().render();
        assert_eq!(rendered["tue"], json!([["09:00", "17:00"]]));
    }

    #[test]
    fn currency_price_range() {
        let facts = extract("Mains £12 - £24, desserts from £6.", PageType::Menu);
        assert_eq!(facts.price_range.as_deref(), Some("£12 - £24"));
    }

    #[test]
    fn free_entry_sets_free_flag() {
        let facts = extract("Free entry all year round.", PageType::Fees);
        assert_eq!(facts.fees_free, Some(true));
        assert!(facts.fee_entries.is_empty());
    }

    #[test]
    fn admission_lines_become_fee_entries() {
        let text = "Tickets\nAdults £12.50\nChildren £6\nConcessions £9";
        let facts = extract(text, PageType::Fees);
        assert_eq!(facts.fees_free, Some(false));
        assert_eq!(facts.fee_entries.len(), 3);
        assert_eq!(facts.fee_entries[0], "Adults £12.50");
    }

    #[test]
    fn menu_items_with_prices() {
        let text = "Starters\nSoup of the day £6.50\nPrawn cocktail £8\nBread & olives 4.50";
        let facts = extract(text, PageType::Menu);
        assert_eq!(facts.menu_items.len(), 3);
        assert_eq!(facts.menu_items[0]["name"], json!("Soup of the day"));
        assert_eq!(facts.menu_items[0]["price"], json!("6.50"));
    }

    #[test]
    fn menu_items_only_from_menu_pages() {
        let facts = extract("Soup of the day £6.50", PageType::Homepage);
        assert!(facts.menu_items.is_empty());
    }

    #[test]
    fn menu_cap_is_enforced() {
        let mut text = String::new();
        for i in 0..80 {
            text.push_str(&format!("Dish number item {} £{}\n", i, i + 1));
        }
        let facts = extract(&text, PageType::Menu);
        assert!(facts.menu_items.len() <= MAX_MENU_ITEMS);
    }

    #[test]
    fn features_from_keywords_without_duplicates() {
        let text = "Free WiFi throughout, large beer garden, dog friendly bar.";
        let facts = extract(text, PageType::Homepage);
        assert!(facts.features.contains(&"free wifi".to_string()));
        assert!(facts.features.contains(&"beer garden".to_string()));
        assert!(facts.features.contains(&"dog friendly".to_string()));
        assert!(!facts.features.contains(&"wifi".to_string()));
        assert!(!facts.features.contains(&"garden".to_string()));
    }
}
