//! Opening-hours normalization.
//!
//! Hours are stored as a 7-day map of open/close ranges in 24 h "HH:MM"
//! form. Both the structured path (openingHoursSpecification) and the text
//! heuristics normalize into [`WeekHours`]; rendering and parsing round-trip
//! exactly.

use chrono::NaiveTime;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value, json};

pub const DAY_KEYS: [&str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];

const DAY_NAMES: [&str; 7] = [
    "monday", "tuesday", "wednesday", "thursday", "friday", "saturday", "sunday",
];

/// One open..close span within a day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub open: NaiveTime,
    pub close: NaiveTime,
}

impl TimeRange {
    fn render(&self) -> Value {
        json!([
            self.open.format("%H:%M").to_string(),
            self.close.format("%H:%M").to_string()
        ])
    }

    fn parse(value: &Value) -> Option<Self> {
        let pair = value.as_array()?;
        if pair.len() != 2 {
            return None;
        }
        Some(Self {
            open: NaiveTime::parse_from_str(pair[0].as_str()?, "%H:%M").ok()?,
            close: NaiveTime::parse_from_str(pair[1].as_str()?, "%H:%M").ok()?,
        })
    }

    fn intersect(&self, other: &Self) -> Option<Self> {
        let open = self.open.max(other.open);
        let close = self.close.min(other.close);
        (open < close).then_some(Self { open, close })
    }
}

/// Normalized weekly hours, Monday first. A day with no ranges is closed
/// (or unknown).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeekHours {
    days: [Vec<TimeRange>; 7],
}

impl WeekHours {
    pub fn is_empty(&self) -> bool {
        self.days.iter().all(Vec::is_empty)
    }

    pub fn add(&mut self, day: usize, range: TimeRange) {
        if day < 7 && !self.days[day].contains(&range) {
            self.days[day].push(range);
            self.days[day].sort_by_key(|r| r.open);
        }
    }

    /// Render to the stored JSON shape: `{"mon": [["09:00","17:00"]], ...}`
    /// with all seven keys present.
    pub fn render(&self) -> Value {
        let mut map = Map::new();
        for (key, ranges) in DAY_KEYS.iter().zip(&self.days) {
            map.insert(
                key.to_string(),
                Value::Array(ranges.iter().map(TimeRange::render).collect()),
            );
        }
        Value::Object(map)
    }

    /// Parse the stored shape back; inverse of [`WeekHours::render`].
    pub fn parse(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        let mut hours = WeekHours::default();
        for (day, key) in DAY_KEYS.iter().enumerate() {
            let Some(ranges) = map.get(*key) else {
                continue;
            };
            for range in ranges.as_array()? {
                hours.add(day, TimeRange::parse(range)?);
            }
        }
        Some(hours)
    }

    /// The more restrictive combination of two contradicting sources: per
    /// day, the pairwise overlap of their ranges.
    pub fn intersect(&self, other: &WeekHours) -> WeekHours {
        let mut result = WeekHours::default();
        for day in 0..7 {
            for a in &self.days[day] {
                for b in &other.days[day] {
                    if let Some(overlap) = a.intersect(b) {
                        result.add(day, overlap);
                    }
                }
            }
        }
        result
    }
}

/// Map a schema.org day token ("Monday", "https://schema.org/Monday", "Mo")
/// to a day index.
pub fn day_index(token: &str) -> Option<usize> {
    let token = token
        .rsplit('/')
        .next()
        .unwrap_or(token)
        .trim()
        .to_ascii_lowercase();
    DAY_NAMES
        .iter()
        .position(|name| name.starts_with(&token) && token.len() >= 2)
}

/// Parse a clock token: "09:00", "9am", "5.30pm", "17:00", "noon".
pub fn parse_clock(token: &str) -> Option<NaiveTime> {
    static CLOCK: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?i)^(\d{1,2})(?:[:.](\d{2}))?\s*(am|pm)?$").unwrap());

    let token = token.trim().to_ascii_lowercase();
    if token == "noon" || token == "midday" {
        return NaiveTime::from_hms_opt(12, 0, 0);
    }
    if token == "midnight" {
        return NaiveTime::from_hms_opt(0, 0, 0);
    }

    let captures = CLOCK.captures(&token)?;
    let mut hour: u32 = captures[1].parse().ok()?;
    let minute: u32 = captures
        .get(2)
        .map(|m| m.as_str().parse().ok())
        .unwrap_or(Some(0))?;

    match captures.get(3).map(|m| m.as_str()) {
        Some("pm") if hour < 12 => hour += 12,
        Some("am") if hour == 12 => hour = 0,
        _ => {}
    }

    NaiveTime::from_hms_opt(hour, minute, 0)
}

/// Parse weekday-time spans out of free text, line by line.
///
/// Handles the common shapes: "Mon-Fri 9am-5pm", "Monday to Friday
/// 09:00-17:00", "Sat: 10.00 - 16.00", "Open daily 8am-11pm".
pub fn parse_text_hours(text: &str) -> Option<WeekHours> {
    static SPAN: Lazy<Regex> = Lazy::new(|| {
        Regex::new(
            r"(?ix)
            (?P<from>mon|tue|tues|wed|thu|thur|thurs|fri|sat|sun|monday|tuesday|wednesday|thursday|friday|saturday|sunday|daily|every\s+day)
            (?:\s*(?:-|–|to)\s*(?P<to>mon|tue|tues|wed|thu|thur|thurs|fri|sat|sun|monday|tuesday|wednesday|thursday|friday|saturday|sunday))?
            \s*:?\s*
            (?P<open>\d{1,2}(?:[:.]\d{2})?\s*(?:am|pm)?|noon|midday)
            \s*(?:-|–|to|until)\s*
            (?P<close>\d{1,2}(?:[:.]\d{2})?\s*(?:am|pm)?|midnight|noon|midday)
            ",
        )
        .unwrap()
    });

    let mut hours = WeekHours::default();

    for captures in SPAN.captures_iter(text) {
        let from_token = captures.name("from").unwrap().as_str().to_ascii_lowercase();
        let (from, to) = if from_token == "daily" || from_token.starts_with("every") {
            (0, 6)
        } else {
            let from = day_index(&from_token)?;
            let to = captures
                .name("to")
                .and_then(|m| day_index(m.as_str()))
                .unwrap_or(from);
            (from, to)
        };

        let open = parse_clock(captures.name("open").unwrap().as_str())?;
        let close = parse_clock(captures.name("close").unwrap().as_str())?;
        if open >= close {
            continue;
        }

        let mut day = from;
        loop {
            hours.add(day, TimeRange { open, close });
            if day == to {
                break;
            }
            day = (day + 1) % 7;
        }
    }

    (!hours.is_empty()).then_some(hours)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(open: (u32, u32), close: (u32, u32)) -> TimeRange {
        TimeRange {
            open: NaiveTime::from_hms_opt(open.0, open.1, 0).unwrap(),
            close: NaiveTime::from_hms_opt(close.0, close.1, 0).unwrap(),
        }
    }

    #[test]
    fn render_parse_roundtrip() {
        let mut hours = WeekHours::default();
        for day in 0..5 {
            hours.add(day, range((9, 0), (17, 0)));
        }
        hours.add(5, range((10, 0), (14, 0)));
        hours.add(5, range((18, 0), (23, 30)));

        let rendered = hours.render();
        let parsed = WeekHours::parse(&rendered).unwrap();
        assert_eq!(parsed, hours);
        assert_eq!(parsed.render(), rendered);
    }

    #[test]
    fn render_includes_all_seven_days() {
        let rendered = WeekHours::default().render();
        let map = rendered.as_object().unwrap();
        assert_eq!(map.len(), 7);
        assert_eq!(map["sun"], json!([]));
    }

    #[test]
    fn text_day_span() {
        let hours = parse_text_hours("Opening hours: Mon-Fri 9am-5pm").unwrap();
        let rendered = hours.render();
        assert_eq!(rendered["mon"], json!([["09:00", "17:00"]]));
        assert_eq!(rendered["fri"], json!([["09:00", "17:00"]]));
        assert_eq!(rendered["sat"], json!([]));
    }

    #[test]
    fn text_single_day_with_dots() {
        let hours = parse_text_hours("Sat: 10.00 - 16.30").unwrap();
        assert_eq!(hours.render()["sat"], json!([["10:00", "16:30"]]));
    }

    #[test]
    fn text_daily() {
        let hours = parse_text_hours("Open daily 8am - 11pm").unwrap();
        for key in DAY_KEYS {
            assert_eq!(hours.render()[key], json!([["08:00", "23:00"]]));
        }
    }

    #[test]
    fn clock_variants() {
        assert_eq!(parse_clock("9am"), NaiveTime::from_hms_opt(9, 0, 0));
        assert_eq!(parse_clock("5.30pm"), NaiveTime::from_hms_opt(17, 30, 0));
        assert_eq!(parse_clock("17:00"), NaiveTime::from_hms_opt(17, 0, 0));
        assert_eq!(parse_clock("12am"), NaiveTime::from_hms_opt(0, 0, 0));
        assert_eq!(parse_clock("12pm"), NaiveTime::from_hms_opt(12, 0, 0));
        assert_eq!(parse_clock("noon"), NaiveTime::from_hms_opt(12, 0, 0));
    }

    #[test]
    fn day_tokens() {
        assert_eq!(day_index("Monday"), Some(0));
        assert_eq!(day_index("https://schema.org/Sunday"), Some(6));
        assert_eq!(day_index("Fri"), Some(4));
        assert_eq!(day_index("x"), None);
    }

    #[test]
    fn intersection_is_more_restrictive() {
        let mut a = WeekHours::default();
        a.add(0, range((9, 0), (17, 0)));
        let mut b = WeekHours::default();
        b.add(0, range((10, 0), (18, 0)));

        let overlap = a.intersect(&b);
        assert_eq!(overlap.render()["mon"], json!([["10:00", "17:00"]]));
    }

    #[test]
    fn disjoint_ranges_intersect_to_closed() {
        let mut a = WeekHours::default();
        a.add(2, range((9, 0), (12, 0)));
        let mut b = WeekHours::default();
        b.add(2, range((14, 0), (18, 0)));

        assert!(a.intersect(&b).is_empty());
    }
}
