//! Fact extraction over a venue's fetched pages.
//!
//! Two parallel paths produce candidates: structured data (JSON-LD and
//! microdata) and targeted text heuristics. Candidates carry a rank and are
//! combined by precedence: dedicated target page beats structured data on
//! any page beats homepage/about free text beats the venue row baseline.
//! Ties break by most recent fetch; contradicting hours intersect.

pub mod hours;
pub mod structured;
pub mod summary;
pub mod text;

use crate::data::enrichment::FieldUpdate;
use crate::data::models::{EnrichField, PageType, Venue};
use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use serde_json::{Value, json};
use std::collections::BTreeMap;

/// One page's contribution to extraction. Pages fetched in the current
/// crawl carry raw HTML (structured path + heuristics); historical pages
/// from the store carry cleaned text only.
#[derive(Debug, Clone)]
pub struct PageInput {
    pub url: String,
    pub page_type: PageType,
    pub fetched_at: DateTime<Utc>,
    pub html: Option<String>,
    pub text: String,
}

/// Candidate precedence, low to high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Rank {
    Baseline,
    FreeText,
    Structured,
    TargetPage,
}

/// A (field, value, source) triple with its precedence metadata.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub field: EnrichField,
    pub value: Option<Value>,
    pub not_applicable: bool,
    pub source_url: String,
    pub rank: Rank,
    pub fetched_at: DateTime<Utc>,
}

/// The dedicated page type for a field, if it has one. Facts found on their
/// dedicated page outrank everything else.
fn home_page_type(field: EnrichField) -> Option<PageType> {
    match field {
        EnrichField::Hours => Some(PageType::Hours),
        EnrichField::Contact => Some(PageType::Contact),
        EnrichField::MenuUrl | EnrichField::MenuItems | EnrichField::PriceRange => {
            Some(PageType::Menu)
        }
        EnrichField::Fees => Some(PageType::Fees),
        EnrichField::Description
        | EnrichField::Features
        | EnrichField::Amenities => None,
    }
}

fn rank_for(field: EnrichField, page_type: PageType, structured: bool) -> Rank {
    if home_page_type(field) == Some(page_type) {
        Rank::TargetPage
    } else if structured {
        Rank::Structured
    } else {
        Rank::FreeText
    }
}

/// Run both extraction paths over the pages and resolve the candidates into
/// per-field updates.
pub fn extract_all(venue: &Venue, pages: &[PageInput]) -> Vec<FieldUpdate> {
    let mut candidates: Vec<Candidate> = Vec::new();
    let mut description_sources: Vec<(String, String)> = Vec::new();

    for page in pages {
        if let Some(html) = &page.html {
            let facts = structured::extract(html);
            push_structured(&mut candidates, &mut description_sources, page, &facts);
        }

        let facts = text::extract(&page.text, page.page_type);
        push_text(&mut candidates, page, &facts);

        // A discovered menu page is itself the menu URL
        if page.page_type == PageType::Menu {
            candidates.push(Candidate {
                field: EnrichField::MenuUrl,
                value: Some(json!(page.url)),
                not_applicable: false,
                source_url: page.url.clone(),
                rank: Rank::TargetPage,
                fetched_at: page.fetched_at,
            });
        }
    }

    // Baseline: the venue row itself backs the contact website
    if let Some(website) = &venue.website {
        candidates.push(Candidate {
            field: EnrichField::Contact,
            value: Some(json!({ "website": website })),
            not_applicable: false,
            source_url: website.clone(),
            rank: Rank::Baseline,
            fetched_at: venue.last_enriched_at.unwrap_or_else(Utc::now),
        });
    }

    let mut updates = resolve(candidates);

    if let Some(update) = build_description(&description_sources, pages) {
        updates.push(update);
    }

    updates
}

fn push_structured(
    candidates: &mut Vec<Candidate>,
    description_sources: &mut Vec<(String, String)>,
    page: &PageInput,
    facts: &structured::StructuredFacts,
) {
    let mut push = |field: EnrichField, value: Option<Value>, not_applicable: bool| {
        candidates.push(Candidate {
            field,
            value,
            not_applicable,
            source_url: page.url.clone(),
            rank: rank_for(field, page.page_type, true),
            fetched_at: page.fetched_at,
        });
    };

    if let Some(hours) = &facts.hours {
        push(EnrichField::Hours, Some(hours.render()), false);
    }

    let contact = contact_value(
        facts.phone.as_deref(),
        facts.email.as_deref(),
        facts.website.as_deref(),
    );
    if let Some(contact) = contact {
        push(EnrichField::Contact, Some(contact), false);
    }

    if let Some(range) = &facts.price_range {
        push(EnrichField::PriceRange, Some(json!(range)), false);
    }
    if !facts.amenities.is_empty() {
        push(EnrichField::Amenities, Some(json!(facts.amenities)), false);
    }
    match facts.fees_free {
        Some(true) => push(EnrichField::Fees, None, true),
        Some(false) if !facts.fee_entries.is_empty() => {
            push(
                EnrichField::Fees,
                Some(json!({ "free": false, "entries": facts.fee_entries })),
                false,
            );
        }
        _ => {}
    }
    if let Some(menu_url) = &facts.menu_url {
        push(EnrichField::MenuUrl, Some(json!(menu_url)), false);
    }

    for description in &facts.descriptions {
        description_sources.push((page.url.clone(), description.clone()));
    }
}

fn push_text(candidates: &mut Vec<Candidate>, page: &PageInput, facts: &text::TextFacts) {
    let mut push = |field: EnrichField, value: Option<Value>, not_applicable: bool| {
        candidates.push(Candidate {
            field,
            value,
            not_applicable,
            source_url: page.url.clone(),
            rank: rank_for(field, page.page_type, false),
            fetched_at: page.fetched_at,
        });
    };

    if let Some(hours) = &facts.hours {
        push(EnrichField::Hours, Some(hours.render()), false);
    }

    let contact = contact_value(facts.phone.as_deref(), facts.email.as_deref(), None);
    if let Some(contact) = contact {
        push(EnrichField::Contact, Some(contact), false);
    }

    if let Some(range) = &facts.price_range {
        push(EnrichField::PriceRange, Some(json!(range)), false);
    }
    match facts.fees_free {
        Some(true) => push(EnrichField::Fees, None, true),
        Some(false) if !facts.fee_entries.is_empty() => {
            push(
                EnrichField::Fees,
                Some(json!({ "free": false, "entries": facts.fee_entries })),
                false,
            );
        }
        _ => {}
    }
    if !facts.menu_items.is_empty() {
        push(EnrichField::MenuItems, Some(json!(facts.menu_items)), false);
    }
    if !facts.features.is_empty() {
        push(EnrichField::Features, Some(json!(facts.features)), false);
    }
}

fn contact_value(
    phone: Option<&str>,
    email: Option<&str>,
    website: Option<&str>,
) -> Option<Value> {
    if phone.is_none() && email.is_none() && website.is_none() {
        return None;
    }
    let mut contact = serde_json::Map::new();
    if let Some(phone) = phone {
        contact.insert("phone".into(), json!(phone));
    }
    if let Some(email) = email {
        contact.insert("email".into(), json!(email));
    }
    if let Some(website) = website {
        contact.insert("website".into(), json!(website));
    }
    Some(Value::Object(contact))
}

/// Resolve candidates into one update per field.
fn resolve(candidates: Vec<Candidate>) -> Vec<FieldUpdate> {
    let mut by_field: BTreeMap<EnrichField, Vec<Candidate>> = BTreeMap::new();
    for candidate in candidates {
        by_field.entry(candidate.field).or_default().push(candidate);
    }

    let mut updates = Vec::new();
    for (field, mut group) in by_field {
        // Stable sort keeps first-encountered order within equal keys
        group.sort_by(|a, b| {
            b.rank
                .cmp(&a.rank)
                .then_with(|| b.fetched_at.cmp(&a.fetched_at))
        });

        let update = match field {
            EnrichField::Contact => resolve_contact(&group),
            EnrichField::Hours => resolve_hours(&group),
            EnrichField::Features | EnrichField::Amenities => resolve_set(field, &group),
            _ => resolve_first(field, &group),
        };
        if let Some(update) = update {
            updates.push(update);
        }
    }
    updates
}

/// Winner takes the field; equally-ranked contradictions resolve to the
/// first-encountered value.
fn resolve_first(field: EnrichField, group: &[Candidate]) -> Option<FieldUpdate> {
    let winner = group.first()?;
    Some(FieldUpdate {
        field,
        value: winner.value.clone(),
        sources: vec![winner.source_url.clone()],
        not_applicable: winner.not_applicable,
    })
}

/// Contradicting hours from equally-ranked sources combine to the more
/// restrictive value: their intersection.
fn resolve_hours(group: &[Candidate]) -> Option<FieldUpdate> {
    let winner = group.first()?;
    let winner_value = winner.value.as_ref()?;
    let mut combined = hours::WeekHours::parse(winner_value)?;
    let mut sources: IndexSet<String> = IndexSet::new();
    sources.insert(winner.source_url.clone());

    for other in group.iter().skip(1) {
        if other.rank != winner.rank {
            break;
        }
        let Some(other_value) = other.value.as_ref() else {
            continue;
        };
        if other_value == winner_value {
            sources.insert(other.source_url.clone());
            continue;
        }
        let Some(other_hours) = hours::WeekHours::parse(other_value) else {
            continue;
        };
        let overlap = combined.intersect(&other_hours);
        if !overlap.is_empty() {
            combined = overlap;
            sources.insert(other.source_url.clone());
        }
    }

    Some(FieldUpdate {
        field: EnrichField::Hours,
        value: Some(combined.render()),
        sources: sources.into_iter().collect(),
        not_applicable: false,
    })
}

/// Contact is a composite: each key is filled from the best-ranked
/// candidate that carries it.
fn resolve_contact(group: &[Candidate]) -> Option<FieldUpdate> {
    let mut contact = serde_json::Map::new();
    let mut sources: IndexSet<String> = IndexSet::new();

    for candidate in group {
        let Some(value) = candidate.value.as_ref().and_then(Value::as_object) else {
            continue;
        };
        let mut contributed = false;
        for (key, entry) in value {
            if !contact.contains_key(key) {
                contact.insert(key.clone(), entry.clone());
                contributed = true;
            }
        }
        if contributed {
            sources.insert(candidate.source_url.clone());
        }
    }

    if contact.is_empty() {
        return None;
    }
    Some(FieldUpdate {
        field: EnrichField::Contact,
        value: Some(Value::Object(contact)),
        sources: sources.into_iter().collect(),
        not_applicable: false,
    })
}

/// Set-valued fields union every candidate of the winning rank,
/// first-encountered order.
fn resolve_set(field: EnrichField, group: &[Candidate]) -> Option<FieldUpdate> {
    let winner_rank = group.first()?.rank;
    let mut set: IndexSet<String> = IndexSet::new();
    let mut sources: IndexSet<String> = IndexSet::new();

    for candidate in group.iter().filter(|c| c.rank == winner_rank) {
        let Some(items) = candidate.value.as_ref().and_then(Value::as_array) else {
            continue;
        };
        let before = set.len();
        set.extend(items.iter().filter_map(Value::as_str).map(str::to_owned));
        if set.len() > before {
            sources.insert(candidate.source_url.clone());
        }
    }

    if set.is_empty() {
        return None;
    }
    Some(FieldUpdate {
        field,
        value: Some(json!(set.into_iter().collect::<Vec<_>>())),
        sources: sources.into_iter().collect(),
        not_applicable: false,
    })
}

/// Assemble the description from structured descriptions first, then about
/// and homepage prose.
fn build_description(
    structured: &[(String, String)],
    pages: &[PageInput],
) -> Option<FieldUpdate> {
    let mut sources: Vec<summary::SourceText<'_>> = structured
        .iter()
        .map(|(url, text)| summary::SourceText { url, text })
        .collect();

    for wanted in [PageType::About, PageType::Homepage] {
        for page in pages.iter().filter(|page| page.page_type == wanted) {
            sources.push(summary::SourceText {
                url: &page.url,
                text: &page.text,
            });
        }
    }

    let (description, contributors) = summary::assemble(&sources)?;
    Some(FieldUpdate {
        field: EnrichField::Description,
        value: Some(json!(description)),
        sources: contributors,
        not_applicable: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn venue() -> Venue {
        Venue {
            id: "poi:1".into(),
            name: "The Greyhound".into(),
            category_name: Some("pub".into()),
            category_weight: None,
            lat: 51.5,
            lon: -0.1,
            website: Some("https://v.example/".into()),
            popularity_confidence: Some(0.5),
            address_components: None,
            last_enriched_at: None,
        }
    }

    fn page(url: &str, page_type: PageType, html: Option<&str>, text: &str) -> PageInput {
        PageInput {
            url: url.into(),
            page_type,
            fetched_at: Utc::now(),
            html: html.map(str::to_owned),
            text: text.into(),
        }
    }

    fn update_for(updates: &[FieldUpdate], field: EnrichField) -> Option<&FieldUpdate> {
        updates.iter().find(|update| update.field == field)
    }

    #[test]
    fn happy_path_homepage_jsonld() {
        let html = r#"<html><head><script type="application/ld+json">{
            "@type": "Restaurant",
            "telephone": "+44 20 1234 5678",
            "openingHoursSpecification": [{
                "dayOfWeek": ["Monday","Tuesday","Wednesday","Thursday","Friday"],
                "opens": "09:00", "closes": "17:00"
            }]
        }</script></head><body></body></html>"#;

        let pages = [page("https://v.example/", PageType::Homepage, Some(html), "")];
        let updates = extract_all(&venue(), &pages);

        let hours = update_for(&updates, EnrichField::Hours).unwrap();
        assert_eq!(
            hours.value.as_ref().unwrap()["mon"],
            json!([["09:00", "17:00"]])
        );
        assert_eq!(hours.sources, vec!["https://v.example/".to_string()]);

        let contact = update_for(&updates, EnrichField::Contact).unwrap();
        assert_eq!(
            contact.value.as_ref().unwrap()["phone"],
            json!("+44 20 1234 5678")
        );
        assert!(contact.sources.contains(&"https://v.example/".to_string()));
    }

    #[test]
    fn dedicated_page_beats_structured_homepage() {
        let homepage_html = r#"<html><head><script type="application/ld+json">{
            "openingHoursSpecification": [{"dayOfWeek": "Monday", "opens": "08:00", "closes": "20:00"}]
        }</script></head><body></body></html>"#;

        let pages = [
            page("https://v.example/", PageType::Homepage, Some(homepage_html), ""),
            page(
                "https://v.example/hours",
                PageType::Hours,
                None,
                "Opening times: Mon 9am-5pm",
            ),
        ];
        let updates = extract_all(&venue(), &pages);

        let hours = update_for(&updates, EnrichField::Hours).unwrap();
        assert_eq!(
            hours.value.as_ref().unwrap()["mon"],
            json!([["09:00", "17:00"]]),
            "the /hours page wins over homepage structured data"
        );
        assert_eq!(hours.sources, vec!["https://v.example/hours".to_string()]);
    }

    #[test]
    fn equally_ranked_hours_contradiction_intersects() {
        let a = r#"<html><head><script type="application/ld+json">{
            "openingHoursSpecification": [{"dayOfWeek": "Monday", "opens": "09:00", "closes": "17:00"}]
        }</script></head><body></body></html>"#;
        let b = r#"<html><head><script type="application/ld+json">{
            "openingHoursSpecification": [{"dayOfWeek": "Monday", "opens": "10:00", "closes": "18:00"}]
        }</script></head><body></body></html>"#;

        let now = Utc::now();
        let mut first = page("https://v.example/", PageType::Homepage, Some(a), "");
        let mut second = page("https://v.example/about", PageType::About, Some(b), "");
        first.fetched_at = now;
        second.fetched_at = now;

        let updates = extract_all(&venue(), &[first, second]);
        let hours = update_for(&updates, EnrichField::Hours).unwrap();
        assert_eq!(
            hours.value.as_ref().unwrap()["mon"],
            json!([["10:00", "17:00"]])
        );
        assert_eq!(hours.sources.len(), 2);
    }

    #[test]
    fn free_admission_is_not_applicable_with_source() {
        let html = r#"<html><head><script type="application/ld+json">{
            "@type": "Museum", "offers": {"price": "0"}
        }</script></head><body></body></html>"#;

        let pages = [page("https://museum.example/", PageType::Homepage, Some(html), "")];
        let updates = extract_all(&venue(), &pages);

        let fees = update_for(&updates, EnrichField::Fees).unwrap();
        assert!(fees.not_applicable);
        assert_eq!(fees.value, None);
        assert_eq!(fees.sources, vec!["https://museum.example/".to_string()]);
    }

    #[test]
    fn contact_merges_keys_across_ranks() {
        let html = r#"<html><head><script type="application/ld+json">{
            "email": "info@v.example"
        }</script></head><body></body></html>"#;

        let pages = [
            page("https://v.example/", PageType::Homepage, Some(html), ""),
            page(
                "https://v.example/contact",
                PageType::Contact,
                None,
                "Call 01234 567890",
            ),
        ];
        let updates = extract_all(&venue(), &pages);

        let contact = update_for(&updates, EnrichField::Contact).unwrap();
        let value = contact.value.as_ref().unwrap();
        assert_eq!(value["phone"], json!("01234 567890"));
        assert_eq!(value["email"], json!("info@v.example"));
        assert_eq!(value["website"], json!("https://v.example/"));
    }

    #[test]
    fn menu_page_provides_menu_url_and_items() {
        let pages = [page(
            "https://v.example/menu",
            PageType::Menu,
            None,
            "Soup of the day £6.50\nFish pie £14",
        )];
        let updates = extract_all(&venue(), &pages);

        let menu_url = update_for(&updates, EnrichField::MenuUrl).unwrap();
        assert_eq!(menu_url.value, Some(json!("https://v.example/menu")));

        let items = update_for(&updates, EnrichField::MenuItems).unwrap();
        assert_eq!(items.value.as_ref().unwrap().as_array().unwrap().len(), 2);
    }

    #[test]
    fn no_pages_yields_only_baseline_contact() {
        let updates = extract_all(&venue(), &[]);
        assert_eq!(updates.len(), 1);
        let contact = &updates[0];
        assert_eq!(contact.field, EnrichField::Contact);
        assert_eq!(
            contact.value.as_ref().unwrap()["website"],
            json!("https://v.example/")
        );
    }
}
