//! robots.txt fetching, parsing and caching.
//!
//! Rules are cached per origin for the process lifetime with a 24 h TTL.
//! An unavailable or unparseable robots.txt allows everything; an explicit
//! `Disallow` for our user agent blocks the fetch before it is issued.

use crate::crawler::deadline::Deadline;
use crate::crawler::error::FetchError;
use dashmap::DashMap;
use regex::Regex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

const CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const ROBOTS_FETCH_TIMEOUT: Duration = Duration::from_secs(3);

/// One Allow/Disallow line, pattern compiled for `*`/`$` matching.
#[derive(Debug)]
struct Rule {
    allow: bool,
    pattern_len: usize,
    matcher: Regex,
}

/// The rule group applicable to our user agent.
#[derive(Debug, Default)]
pub struct RobotsRules {
    rules: Vec<Rule>,
}

impl RobotsRules {
    /// Parse a robots.txt body, keeping the most specific group for
    /// `ua_token` (exact or substring match on the group's agent name),
    /// falling back to the `*` group.
    pub fn parse(ua_token: &str, body: &str) -> Self {
        let ua_token = ua_token.to_ascii_lowercase();

        let mut ours: Vec<Rule> = Vec::new();
        let mut wildcard: Vec<Rule> = Vec::new();
        let mut current_agents: Vec<String> = Vec::new();
        let mut in_group_body = false;

        for line in body.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();

            match key.as_str() {
                "user-agent" => {
                    if in_group_body {
                        current_agents.clear();
                        in_group_body = false;
                    }
                    current_agents.push(value.to_ascii_lowercase());
                }
                "allow" | "disallow" => {
                    in_group_body = true;
                    // An empty Disallow means "allow everything": no rule
                    if value.is_empty() {
                        continue;
                    }
                    let Some(matcher) = compile_pattern(value) else {
                        continue;
                    };
                    let rule = Rule {
                        allow: key == "allow",
                        pattern_len: value.len(),
                        matcher,
                    };
                    let for_us = current_agents
                        .iter()
                        .any(|agent| agent != "*" && ua_token.contains(agent.as_str()));
                    let for_all = current_agents.iter().any(|agent| agent == "*");
                    if for_us {
                        ours.push(rule);
                    } else if for_all {
                        wildcard.push(rule);
                    }
                }
                _ => {
                    // sitemap, crawl-delay etc. terminate the agent list
                    in_group_body = true;
                }
            }
        }

        Self {
            rules: if ours.is_empty() { wildcard } else { ours },
        }
    }

    /// Longest-match rule wins; Allow wins ties; no match allows.
    pub fn is_allowed(&self, url: &Url) -> bool {
        let mut path = url.path().to_string();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }

        let mut best: Option<&Rule> = None;
        for rule in &self.rules {
            if rule.matcher.is_match(&path) {
                let better = match best {
                    None => true,
                    Some(current) => {
                        rule.pattern_len > current.pattern_len
                            || (rule.pattern_len == current.pattern_len
                                && rule.allow
                                && !current.allow)
                    }
                };
                if better {
                    best = Some(rule);
                }
            }
        }

        best.map(|rule| rule.allow).unwrap_or(true)
    }
}

/// Translate a robots path pattern (`*` wildcard, `$` end anchor) into an
/// anchored regex.
fn compile_pattern(pattern: &str) -> Option<Regex> {
    let (body, anchored) = match pattern.strip_suffix('$') {
        Some(body) => (body, true),
        None => (pattern, false),
    };

    let mut regex = String::from("^");
    regex.push_str(
        &body
            .split('*')
            .map(|part| regex::escape(part))
            .collect::<Vec<_>>()
            .join(".*"),
    );
    if anchored {
        regex.push('$');
    }
    Regex::new(&regex).ok()
}

enum Lookup {
    Found(RobotsRules),
    /// 404 or any fetch failure: nothing to enforce
    Unavailable,
}

struct CachedRobots {
    fetched_at: Instant,
    lookup: Lookup,
}

/// Per-origin robots.txt cache.
pub struct RobotsCache {
    client: reqwest::Client,
    user_agent: String,
    entries: DashMap<String, Arc<CachedRobots>>,
}

impl RobotsCache {
    pub fn new(client: reqwest::Client, user_agent: String) -> Self {
        Self {
            client,
            user_agent,
            entries: DashMap::new(),
        }
    }

    /// Check whether `url` may be fetched, downloading the origin's
    /// robots.txt first if it is not cached or expired.
    pub async fn check(&self, url: &Url, deadline: &Deadline) -> Result<(), FetchError> {
        let origin = url.origin().ascii_serialization();

        let cached = self.entries.get(&origin).map(|entry| entry.clone());
        let entry = match cached {
            Some(entry) if entry.fetched_at.elapsed() < CACHE_TTL => entry,
            _ => {
                let entry = Arc::new(self.fetch(&origin, deadline).await);
                self.entries.insert(origin.clone(), entry.clone());
                entry
            }
        };

        match &entry.lookup {
            Lookup::Found(rules) if !rules.is_allowed(url) => Err(FetchError::RobotsDisallowed),
            _ => Ok(()),
        }
    }

    async fn fetch(&self, origin: &str, deadline: &Deadline) -> CachedRobots {
        let robots_url = format!("{origin}/robots.txt");
        let timeout = deadline.cap(ROBOTS_FETCH_TIMEOUT);

        let response = self
            .client
            .get(&robots_url)
            .header(http::header::USER_AGENT, &self.user_agent)
            .timeout(timeout.max(Duration::from_millis(50)))
            .send()
            .await;

        let lookup = match response {
            Ok(response) if response.status().is_success() => match response.text().await {
                Ok(body) => Lookup::Found(RobotsRules::parse(&self.user_agent, &body)),
                Err(_) => Lookup::Unavailable,
            },
            Ok(_) => Lookup::Unavailable,
            Err(error) => {
                tracing::trace!(origin, error = %error, "robots.txt unreachable");
                Lookup::Unavailable
            }
        };

        CachedRobots {
            fetched_at: Instant::now(),
            lookup,
        }
    }
}
