//! Description assembly.
//!
//! The description field is formatting-only: short sentences are taken
//! verbatim from source pages and concatenated until the word budget is
//! met. Nothing is generated; if the pages don't carry enough prose, the
//! field stays empty.

use once_cell::sync::Lazy;
use regex::Regex;

pub const MIN_WORDS: usize = 100;
pub const MAX_WORDS: usize = 140;

const MIN_SENTENCE_CHARS: usize = 25;
const MAX_SENTENCE_CHARS: usize = 240;

/// Boilerplate no description should quote.
static NOISE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(cookie|javascript|browser|subscribe|newsletter|sign up|log in|privacy policy|terms (of|&) (use|service)|all rights reserved|copyright|click here)\b",
    )
    .unwrap()
});

/// A text block together with the page it came from, highest-value first
/// (structured descriptions, then about/homepage prose).
pub struct SourceText<'a> {
    pub url: &'a str,
    pub text: &'a str,
}

/// Assemble a 100-140 word description from verbatim sentences.
///
/// Returns the text and the URLs of the pages that contributed, or `None`
/// when the sources don't carry [`MIN_WORDS`] of usable prose.
pub fn assemble(sources: &[SourceText<'_>]) -> Option<(String, Vec<String>)> {
    let mut picked: Vec<String> = Vec::new();
    let mut contributors: Vec<String> = Vec::new();
    let mut words = 0usize;

    'outer: for source in sources {
        let mut contributed = false;
        for sentence in sentences(source.text) {
            let sentence_words = sentence.split_whitespace().count();
            if words + sentence_words > MAX_WORDS {
                if words >= MIN_WORDS {
                    break 'outer;
                }
                continue;
            }
            if picked.contains(&sentence) {
                continue;
            }
            words += sentence_words;
            picked.push(sentence);
            contributed = true;
        }
        if contributed {
            contributors.push(source.url.to_string());
        }
        if words >= MAX_WORDS {
            break;
        }
    }

    if words < MIN_WORDS {
        return None;
    }
    Some((picked.join(" "), contributors))
}

/// Split one line after `.`/`!`/`?` followed by whitespace.
fn split_line(line: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut after_terminal = false;
    for (index, character) in line.char_indices() {
        if matches!(character, '.' | '!' | '?') {
            after_terminal = true;
        } else if character.is_whitespace() {
            if after_terminal {
                parts.push(&line[start..index]);
                start = index + character.len_utf8();
            }
            after_terminal = false;
        } else {
            after_terminal = false;
        }
    }
    parts.push(&line[start..]);
    parts
}

/// Split a text block into usable prose sentences.
fn sentences(text: &str) -> Vec<String> {
    let mut result = Vec::new();
    for line in text.lines() {
        for raw in split_line(line) {
            let sentence = raw.trim();
            if sentence.len() < MIN_SENTENCE_CHARS || sentence.len() > MAX_SENTENCE_CHARS {
                continue;
            }
            if !sentence.ends_with(['.', '!', '?']) {
                continue;
            }
            if !sentence.chars().next().is_some_and(char::is_uppercase) {
                continue;
            }
            if sentence.split_whitespace().count() < 5 {
                continue;
            }
            if NOISE.is_match(sentence) {
                continue;
            }
            result.push(sentence.to_string());
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prose(n: usize) -> String {
        (0..n)
            .map(|i| format!("The riverside terrace number {i} serves seasonal plates all afternoon long."))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn assembles_within_word_bounds() {
        let text = prose(30);
        let sources = [SourceText {
            url: "https://v.example/about",
            text: &text,
        }];
        let (description, contributors) = assemble(&sources).unwrap();
        let words = description.split_whitespace().count();
        assert!((MIN_WORDS..=MAX_WORDS).contains(&words), "got {words} words");
        assert_eq!(contributors, vec!["https://v.example/about".to_string()]);
    }

    #[test]
    fn insufficient_text_yields_none() {
        let sources = [SourceText {
            url: "https://v.example/",
            text: "A nice pub by the river with ales.",
        }];
        assert!(assemble(&sources).is_none());
    }

    #[test]
    fn sentences_are_verbatim() {
        let text = prose(30);
        let sources = [SourceText {
            url: "https://v.example/",
            text: &text,
        }];
        let (description, _) = assemble(&sources).unwrap();
        assert!(description.starts_with(
            "The riverside terrace number 0 serves seasonal plates all afternoon long."
        ));
    }

    #[test]
    fn boilerplate_sentences_are_skipped() {
        let text = format!(
            "We use cookie banners to track your browser across this site always. {}",
            prose(30)
        );
        let sources = [SourceText {
            url: "https://v.example/",
            text: &text,
        }];
        let (description, _) = assemble(&sources).unwrap();
        assert!(!description.contains("cookie"));
    }

    #[test]
    fn duplicate_sentences_count_once() {
        let repeated = format!("{} {}", prose(1), prose(1));
        let sources = [SourceText {
            url: "https://v.example/",
            text: &repeated,
        }];
        assert!(assemble(&sources).is_none(), "one sentence repeated is not enough prose");
    }
}
