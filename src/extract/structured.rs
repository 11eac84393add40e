//! Structured-data extraction: inline JSON-LD blocks and basic microdata.

use crate::extract::hours::{TimeRange, WeekHours, day_index, parse_clock};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;

/// Everything the structured path can pull out of one page.
#[derive(Debug, Default, Clone)]
pub struct StructuredFacts {
    pub hours: Option<WeekHours>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub price_range: Option<String>,
    pub amenities: Vec<String>,
    /// `Some(true)` when offers state admission is free.
    pub fees_free: Option<bool>,
    pub fee_entries: Vec<String>,
    pub menu_url: Option<String>,
    pub descriptions: Vec<String>,
}

impl StructuredFacts {
    pub fn is_empty(&self) -> bool {
        self.hours.is_none()
            && self.phone.is_none()
            && self.email.is_none()
            && self.website.is_none()
            && self.price_range.is_none()
            && self.amenities.is_empty()
            && self.fees_free.is_none()
            && self.fee_entries.is_empty()
            && self.menu_url.is_none()
            && self.descriptions.is_empty()
    }
}

static TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());

/// JSON-LD strings frequently embed HTML fragments; reduce them to plain
/// text.
fn plain(text: &str) -> String {
    let stripped = TAGS.replace_all(text, " ");
    let unescaped = htmlize::unescape(stripped.as_ref());
    unescaped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse structured data out of a page.
pub fn extract(html: &str) -> StructuredFacts {
    let document = Html::parse_document(html);
    let mut facts = StructuredFacts::default();

    let jsonld = Selector::parse(r#"script[type="application/ld+json"]"#).expect("static selector");
    for script in document.select(&jsonld) {
        let body: String = script.text().collect();
        let Ok(value) = serde_json::from_str::<Value>(&body) else {
            continue;
        };
        for node in unwrap_nodes(&value) {
            walk(node, &mut facts, 0);
        }
    }

    extract_microdata(&document, &mut facts);
    facts
}

/// Unwrap top-level arrays and `@graph` containers into their object nodes.
fn unwrap_nodes(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().flat_map(unwrap_nodes).collect(),
        Value::Object(map) => {
            let mut nodes = vec![value];
            if let Some(graph) = map.get("@graph") {
                nodes.extend(unwrap_nodes(graph));
            }
            nodes
        }
        _ => Vec::new(),
    }
}

fn walk(node: &Value, facts: &mut StructuredFacts, depth: usize) {
    if depth > 5 {
        return;
    }
    let Some(map) = node.as_object() else {
        return;
    };

    if let Some(spec) = map.get("openingHoursSpecification") {
        let mut hours = facts.hours.take().unwrap_or_default();
        collect_hours_spec(spec, &mut hours);
        if !hours.is_empty() {
            facts.hours = Some(hours);
        }
    }
    if let Some(spec) = map.get("openingHours") {
        let mut hours = facts.hours.take().unwrap_or_default();
        collect_opening_hours_strings(spec, &mut hours);
        if !hours.is_empty() {
            facts.hours = Some(hours);
        }
    }

    if facts.phone.is_none()
        && let Some(phone) = map.get("telephone").and_then(Value::as_str)
    {
        facts.phone = Some(phone.trim().to_string());
    }
    if facts.email.is_none()
        && let Some(email) = map.get("email").and_then(Value::as_str)
    {
        facts.email = Some(email.trim().trim_start_matches("mailto:").to_string());
    }
    if facts.website.is_none()
        && let Some(url) = map.get("url").and_then(Value::as_str)
        && url.starts_with("http")
    {
        facts.website = Some(url.trim().to_string());
    }
    if facts.price_range.is_none()
        && let Some(range) = map.get("priceRange").and_then(Value::as_str)
    {
        facts.price_range = Some(range.trim().to_string());
    }

    if let Some(features) = map.get("amenityFeature") {
        collect_amenities(features, &mut facts.amenities);
    }

    if let Some(offers) = map.get("offers") {
        collect_offers(offers, facts);
    }

    if facts.menu_url.is_none() {
        for key in ["hasMenu", "menu"] {
            if let Some(menu) = map.get(key) {
                let url = match menu {
                    Value::String(url) => Some(url.clone()),
                    Value::Object(menu) => menu
                        .get("url")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    _ => None,
                };
                if let Some(url) = url.filter(|url| url.starts_with("http")) {
                    facts.menu_url = Some(url);
                    break;
                }
            }
        }
    }

    if let Some(description) = map.get("description").and_then(Value::as_str) {
        let description = plain(description);
        if description.len() > 20 {
            facts.descriptions.push(description);
        }
    }

    for value in map.values() {
        match value {
            Value::Object(_) => walk(value, facts, depth + 1),
            Value::Array(items) => {
                for item in items {
                    walk(item, facts, depth + 1);
                }
            }
            _ => {}
        }
    }
}

fn collect_hours_spec(spec: &Value, hours: &mut WeekHours) {
    let entries = match spec {
        Value::Array(items) => items.iter().collect::<Vec<_>>(),
        Value::Object(_) => vec![spec],
        _ => return,
    };

    for entry in entries {
        let Some(map) = entry.as_object() else {
            continue;
        };
        let (Some(opens), Some(closes)) = (
            map.get("opens").and_then(Value::as_str).and_then(parse_clock),
            map.get("closes").and_then(Value::as_str).and_then(parse_clock),
        ) else {
            continue;
        };
        if opens >= closes {
            continue;
        }

        let days: Vec<usize> = match map.get("dayOfWeek") {
            Some(Value::String(day)) => day_index(day).into_iter().collect(),
            Some(Value::Array(days)) => days
                .iter()
                .filter_map(Value::as_str)
                .filter_map(day_index)
                .collect(),
            _ => Vec::new(),
        };

        for day in days {
            hours.add(
                day,
                TimeRange {
                    open: opens,
                    close: closes,
                },
            );
        }
    }
}

/// The compact `openingHours` property: "Mo-Fr 09:00-17:00" or
/// ["Mo,Tu 10:00-18:00", "Sa 10:00-14:00"].
fn collect_opening_hours_strings(spec: &Value, hours: &mut WeekHours) {
    static COMPACT: Lazy<Regex> = Lazy::new(|| {
        Regex::new(
            r"(?i)^([A-Za-z]{2})(?:-([A-Za-z]{2}))?(?:,([A-Za-z]{2}))*\s+(\d{1,2}:\d{2})-(\d{1,2}:\d{2})$",
        )
        .unwrap()
    });

    let entries = match spec {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>(),
        Value::String(entry) => vec![entry.as_str()],
        _ => return,
    };

    for entry in entries {
        let Some(captures) = COMPACT.captures(entry.trim()) else {
            continue;
        };
        let (Some(open), Some(close)) = (parse_clock(&captures[4]), parse_clock(&captures[5]))
        else {
            continue;
        };
        if open >= close {
            continue;
        }

        let Some(from) = day_index(&captures[1]) else {
            continue;
        };
        let to = captures.get(2).and_then(|m| day_index(m.as_str())).unwrap_or(from);

        let mut day = from;
        loop {
            hours.add(day, TimeRange { open, close });
            if day == to {
                break;
            }
            day = (day + 1) % 7;
        }
    }
}

fn collect_amenities(features: &Value, amenities: &mut Vec<String>) {
    let entries = match features {
        Value::Array(items) => items.iter().collect::<Vec<_>>(),
        Value::Object(_) => vec![features],
        _ => return,
    };

    for entry in entries {
        let Some(map) = entry.as_object() else {
            continue;
        };
        let disabled = map
            .get("value")
            .and_then(Value::as_bool)
            .is_some_and(|v| !v);
        if disabled {
            continue;
        }
        if let Some(name) = map.get("name").and_then(Value::as_str) {
            let name = name.trim().to_string();
            if !name.is_empty() && !amenities.contains(&name) {
                amenities.push(name);
            }
        }
    }
}

fn collect_offers(offers: &Value, facts: &mut StructuredFacts) {
    let entries = match offers {
        Value::Array(items) => items.iter().collect::<Vec<_>>(),
        Value::Object(_) => vec![offers],
        _ => return,
    };

    for entry in entries {
        let Some(map) = entry.as_object() else {
            continue;
        };

        let price = map
            .get("price")
            .or_else(|| map.get("priceSpecification").and_then(|s| s.get("price")));
        let Some(price) = price else {
            continue;
        };

        let amount = match price {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };

        match amount {
            Some(amount) if amount == 0.0 => {
                facts.fees_free = Some(true);
            }
            Some(amount) => {
                facts.fees_free = Some(false);
                let currency = map
                    .get("priceCurrency")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                let name = map.get("name").and_then(Value::as_str).unwrap_or("admission");
                let entry = format!("{name}: {amount} {currency}").trim_end().to_string();
                if !facts.fee_entries.contains(&entry) {
                    facts.fee_entries.push(entry);
                }
            }
            None => {}
        }
    }
}

/// Basic microdata: `itemprop` attributes and the meta description.
fn extract_microdata(document: &Html, facts: &mut StructuredFacts) {
    let pairs = [
        ("telephone", "phone"),
        ("email", "email"),
        ("priceRange", "price_range"),
    ];
    for (prop, slot) in pairs {
        let selector = Selector::parse(&format!(r#"[itemprop="{prop}"]"#)).expect("static selector");
        if let Some(element) = document.select(&selector).next() {
            let value = element
                .value()
                .attr("content")
                .map(str::to_string)
                .unwrap_or_else(|| element.text().collect::<String>());
            let value = value.trim().to_string();
            if value.is_empty() {
                continue;
            }
            match slot {
                "phone" if facts.phone.is_none() => facts.phone = Some(value),
                "email" if facts.email.is_none() => {
                    facts.email = Some(value.trim_start_matches("mailto:").to_string())
                }
                "price_range" if facts.price_range.is_none() => facts.price_range = Some(value),
                _ => {}
            }
        }
    }

    let meta = Selector::parse(r#"meta[name="description"]"#).expect("static selector");
    if let Some(element) = document.select(&meta).next()
        && let Some(content) = element.value().attr("content")
    {
        let content = plain(content);
        if content.len() > 20 {
            facts.descriptions.push(content);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn page(jsonld: &str) -> String {
        format!(
            r#"<html><head><script type="application/ld+json">{jsonld}</script></head>
               <body><p>hello</p></body></html>"#
        )
    }

    #[test]
    fn opening_hours_specification_maps_to_week() {
        let html = page(
            r#"{
                "@type": "Restaurant",
                "telephone": "+44 20 1234 5678",
                "openingHoursSpecification": [{
                    "@type": "OpeningHoursSpecification",
                    "dayOfWeek": ["Monday", "Tuesday", "Wednesday", "Thursday", "Friday"],
                    "opens": "09:00",
                    "closes": "17:00"
                }]
            }"#,
        );

        let facts = extract(&html);
        assert_eq!(facts.phone.as_deref(), Some("+44 20 1234 5678"));
        let rendered = facts.hours.unwrap().render();
        assert_eq!(rendered["mon"], json!([["09:00", "17:00"]]));
        assert_eq!(rendered["fri"], json!([["09:00", "17:00"]]));
        assert_eq!(rendered["sat"], json!([]));
    }

    #[test]
    fn compact_opening_hours_string() {
        let html = page(r#"{"@type": "Cafe", "openingHours": "Mo-Fr 08:00-16:00"}"#);
        let facts = extract(&html);
        let rendered = facts.hours.unwrap().render();
        assert_eq!(rendered["wed"], json!([["08:00", "16:00"]]));
        assert_eq!(rendered["sun"], json!([]));
    }

    #[test]
    fn graph_and_arrays_are_unwrapped() {
        let html = page(
            r#"{"@graph": [
                {"@type": "LocalBusiness", "priceRange": "££",
                 "email": "mailto:info@venue.example"}
            ]}"#,
        );
        let facts = extract(&html);
        assert_eq!(facts.price_range.as_deref(), Some("££"));
        assert_eq!(facts.email.as_deref(), Some("info@venue.example"));
    }

    #[test]
    fn free_offers_mark_fees_not_applicable() {
        let html = page(r#"{"@type": "Museum", "offers": {"price": "0"}}"#);
        let facts = extract(&html);
        assert_eq!(facts.fees_free, Some(true));
    }

    #[test]
    fn paid_offers_become_fee_entries() {
        let html = page(
            r#"{"@type": "Museum",
                "offers": [{"name": "Adult", "price": "12.50", "priceCurrency": "GBP"}]}"#,
        );
        let facts = extract(&html);
        assert_eq!(facts.fees_free, Some(false));
        assert_eq!(facts.fee_entries, vec!["Adult: 12.5 GBP".to_string()]);
    }

    #[test]
    fn amenity_features_with_false_value_are_dropped() {
        let html = page(
            r#"{"@type": "Hotel", "amenityFeature": [
                {"name": "Free WiFi", "value": true},
                {"name": "Pool", "value": false}
            ]}"#,
        );
        let facts = extract(&html);
        assert_eq!(facts.amenities, vec!["Free WiFi".to_string()]);
    }

    #[test]
    fn menu_url_from_has_menu() {
        let html = page(r#"{"@type": "Restaurant", "hasMenu": "https://venue.example/menu"}"#);
        let facts = extract(&html);
        assert_eq!(facts.menu_url.as_deref(), Some("https://venue.example/menu"));
    }

    #[test]
    fn meta_description_is_collected() {
        let html = r#"<html><head>
            <meta name="description" content="A riverside pub with rooms &amp; a garden.">
            </head><body></body></html>"#;
        let facts = extract(html);
        assert_eq!(
            facts.descriptions,
            vec!["A riverside pub with rooms & a garden.".to_string()]
        );
    }

    #[test]
    fn invalid_jsonld_is_ignored() {
        let html = page("{not json");
        assert!(extract(&html).is_empty());
    }
}
