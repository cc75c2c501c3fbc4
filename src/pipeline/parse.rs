//! Structured-output parsing: recover JSON from model text and normalise the
//! story to an exact page count.
//!
//! ## Why is this necessary?
//!
//! Even with JSON mode requested, chat models occasionally wrap the object
//! in ```` ```json ```` fences or add a sentence before or after it. Three
//! extraction strategies are tried in strict order and the first success
//! wins:
//!
//! 1. Parse the whole (trimmed) text
//! 2. Parse the contents of the first fenced code block
//! 3. Parse the span from the first `{` to the last `}`
//!
//! Nothing in this module returns an error. A failed parse yields
//! [`Parsed::Fallback`] carrying a deterministic default so the pipeline
//! always completes.

use crate::model::{PageText, PagedStory};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{debug, warn};

/// Title used when the model supplied none.
pub const FALLBACK_TITLE: &str = "My Magical Story";

const MAX_TITLE_CHARS: usize = 120;

/// Outcome of a best-effort parse: either the parsed value or the fallback.
///
/// Both variants carry a usable value; the tag only records which path
/// produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed<T> {
    Ok(T),
    Fallback(T),
}

impl<T> Parsed<T> {
    pub fn into_inner(self) -> T {
        match self {
            Parsed::Ok(v) | Parsed::Fallback(v) => v,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Parsed::Fallback(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Parsed<U> {
        match self {
            Parsed::Ok(v) => Parsed::Ok(f(v)),
            Parsed::Fallback(v) => Parsed::Fallback(f(v)),
        }
    }
}

/// Parse `raw` as `T`, or produce the fallback value.
pub fn parse_or_else<T: DeserializeOwned>(raw: &str, fallback: impl FnOnce() -> T) -> Parsed<T> {
    match extract_json(raw) {
        Some(v) => Parsed::Ok(v),
        None => Parsed::Fallback(fallback()),
    }
}

// ── JSON extraction ──────────────────────────────────────────────────────

static RE_FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n?(.*?)```").unwrap());

/// Extract a `T` from model text using the three strategies in order.
pub fn extract_json<T: DeserializeOwned>(raw: &str) -> Option<T> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(v) = serde_json::from_str(trimmed) {
        return Some(v);
    }

    if let Some(caps) = RE_FENCED_BLOCK.captures(trimmed) {
        if let Ok(v) = serde_json::from_str(caps[1].trim()) {
            debug!("Recovered JSON from fenced block");
            return Some(v);
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    let v = serde_json::from_str(&trimmed[start..=end]).ok()?;
    debug!("Recovered JSON from brace span");
    Some(v)
}

// ── Story draft ──────────────────────────────────────────────────────────

/// The story as the model returned it, before normalisation.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StoryDraft {
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient_items")]
    pub pages: Option<Vec<Option<DraftPage>>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DraftPage {
    #[serde(default, deserialize_with = "lenient_string")]
    pub text: Option<String>,
}

/// Parse and normalise the story-text response.
///
/// The returned story always has exactly `page_count` pages, each non-empty
/// (a page the model did not write holds a single space).
pub fn parse_story(raw: &str, page_count: usize) -> Parsed<PagedStory> {
    let parsed = parse_or_else(raw, StoryDraft::default);
    if parsed.is_fallback() {
        warn!(
            "Story text was not valid JSON ({} chars); using blank pages",
            raw.len()
        );
    }
    parsed.map(|draft| normalize_story(draft, page_count))
}

/// Clamp the title and pad/truncate pages to exactly `page_count`.
pub fn normalize_story(draft: StoryDraft, page_count: usize) -> PagedStory {
    let title = draft
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| truncate_chars(t, MAX_TITLE_CHARS))
        .unwrap_or_else(|| FALLBACK_TITLE.to_string());

    let mut drafted = draft.pages.unwrap_or_default().into_iter();
    let pages = (0..page_count)
        .map(|_| {
            let text = drafted
                .next()
                .flatten()
                .and_then(|p| p.text)
                .map(|t| t.trim().to_string())
                .unwrap_or_default();
            if text.is_empty() {
                PageText::blank()
            } else {
                PageText::new(text)
            }
        })
        .collect();

    PagedStory { title, pages }
}

// ── Lenient field readers ────────────────────────────────────────────────
//
// Models sometimes emit `"shot": 3` or `"include_characters": "true"`. A
// single mistyped field should cost that field, not the whole object.

pub(crate) fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

pub(crate) fn lenient_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Bool(b)) => Some(b),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

/// A list of objects where each element is read on its own: a `null`, a
/// bare string or a mistyped element becomes `None` in its slot. A value
/// that is not an array reads as absent.
pub(crate) fn lenient_items<'de, D, T>(deserializer: D) -> Result<Option<Vec<Option<T>>>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Array(items)) => Some(
            items
                .into_iter()
                .map(|item| match item {
                    Value::Object(_) => serde_json::from_value(item).ok(),
                    _ => None,
                })
                .collect(),
        ),
        _ => None,
    })
}

// ── Text helpers shared by the stages ────────────────────────────────────

/// First `max` characters of `s` (not bytes), as an owned string.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// Collapse every whitespace run to one space and trim the ends.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLEAN: &str = r#"{"title":"The Moon Fox","pages":[{"text":"Fox sees the moon."},{"text":"Fox climbs a hill."}]}"#;

    #[test]
    fn direct_parse() {
        let v: Value = extract_json(CLEAN).unwrap();
        assert_eq!(v["title"], "The Moon Fox");
    }

    #[test]
    fn fenced_block_with_prose() {
        let raw = format!("Here is your story:\n```json\n{CLEAN}\n```\nEnjoy!");
        let v: Value = extract_json(&raw).unwrap();
        assert_eq!(v["pages"][1]["text"], "Fox climbs a hill.");
    }

    #[test]
    fn bare_fence_without_language() {
        let raw = format!("```\n{CLEAN}\n```");
        assert!(extract_json::<Value>(&raw).is_some());
    }

    #[test]
    fn brace_span_fallback() {
        let raw = format!("Sure! {CLEAN} Let me know if you want changes.");
        let v: Value = extract_json(&raw).unwrap();
        assert_eq!(v["title"], "The Moon Fox");
    }

    #[test]
    fn garbage_yields_none() {
        assert!(extract_json::<Value>("no json here").is_none());
        assert!(extract_json::<Value>("} backwards {").is_none());
        assert!(extract_json::<Value>("   ").is_none());
    }

    #[test]
    fn clean_and_wrapped_normalise_identically() {
        let wrapped = format!("Of course.\n\n```json\n{CLEAN}\n```\n\nHave fun reading!");
        assert_eq!(
            parse_story(CLEAN, 3).into_inner(),
            parse_story(&wrapped, 3).into_inner()
        );
    }

    #[test]
    fn short_story_is_padded_with_blank_pages() {
        let story = parse_story(r#"{"title":"T","pages":[{"text":"A"}]}"#, 3);
        assert!(!story.is_fallback());
        let story = story.into_inner();
        assert_eq!(story.title, "T");
        let texts: Vec<&str> = story.pages.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(texts, vec!["A", " ", " "]);
    }

    #[test]
    fn long_story_is_truncated() {
        let raw = r#"{"title":"T","pages":[{"text":"1"},{"text":"2"},{"text":"3"},{"text":"4"}]}"#;
        let story = parse_story(raw, 2).into_inner();
        assert_eq!(story.pages.len(), 2);
        assert_eq!(story.pages[1].text, "2");
    }

    #[test]
    fn unparseable_story_falls_back_to_blank_pages() {
        let story = parse_story("The model refused.", 8);
        assert!(story.is_fallback());
        let story = story.into_inner();
        assert_eq!(story.title, FALLBACK_TITLE);
        assert_eq!(story.pages.len(), 8);
        assert!(story.pages.iter().all(|p| p.text == " "));
    }

    #[test]
    fn whitespace_pages_and_missing_text_become_blank() {
        let raw = r#"{"title":"  ","pages":[{"text":"   "},{},{"text":"  B  "}]}"#;
        let story = parse_story(raw, 3).into_inner();
        assert_eq!(story.title, FALLBACK_TITLE);
        assert_eq!(story.pages[0].text, " ");
        assert_eq!(story.pages[1].text, " ");
        assert_eq!(story.pages[2].text, "B");
    }

    #[test]
    fn null_pages_are_tolerated() {
        let story = parse_story(r#"{"title":"T","pages":null}"#, 2).into_inner();
        assert_eq!(story.pages.len(), 2);
    }

    #[test]
    fn title_is_clamped() {
        let long = "x".repeat(300);
        let raw = format!(r#"{{"title":"{long}","pages":[]}}"#);
        let story = parse_story(&raw, 1).into_inner();
        assert_eq!(story.title.chars().count(), 120);
    }

    #[test]
    fn mistyped_fields_are_dropped_not_fatal() {
        let story = parse_story(r#"{"title":42,"pages":[{"text":null},{"text":"B"}]}"#, 2);
        assert!(!story.is_fallback());
        let story = story.into_inner();
        assert_eq!(story.title, "42");
        assert_eq!(story.pages[0].text, " ");
        assert_eq!(story.pages[1].text, "B");
    }

    #[test]
    fn null_page_entry_keeps_title_and_other_pages() {
        let story = parse_story(r#"{"title":"T","pages":[{"text":"A"},null]}"#, 2);
        assert!(!story.is_fallback());
        let story = story.into_inner();
        assert_eq!(story.title, "T");
        let texts: Vec<&str> = story.pages.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(texts, vec!["A", " "]);
    }

    #[test]
    fn bare_string_and_number_pages_are_blanked_in_place() {
        let raw = r#"{"title":"T","pages":["just text",{"text":"B"},7,{"text":"D"}]}"#;
        let story = parse_story(raw, 4).into_inner();
        let texts: Vec<&str> = story.pages.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(texts, vec![" ", "B", " ", "D"]);
    }

    #[test]
    fn pages_object_instead_of_array_keeps_title() {
        let story = parse_story(r#"{"title":"T","pages":{"text":"x"}}"#, 2);
        assert!(!story.is_fallback());
        let story = story.into_inner();
        assert_eq!(story.title, "T");
        assert!(story.pages.iter().all(|p| p.text == " "));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("Größe", 3), "Grö");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn collapse_whitespace_joins_runs() {
        assert_eq!(collapse_whitespace("  a \n\n b\tc  "), "a b c");
    }
}
