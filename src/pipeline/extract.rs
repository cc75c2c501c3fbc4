//! Metadata and cast extraction: two auxiliary text-generation calls that
//! condense the finished story into steering material for the image prompts.
//!
//! Neither call can fail the story. A service error or unreadable response
//! degrades to a deterministic fallback and a `warn!`:
//!
//! | Stage | Fallback |
//! |-------|----------|
//! | metadata | summary = first + last page text (≤ 320 chars), empty character sheet |
//! | cast | empty list |

use crate::model::{CastMember, CastRole, PagedStory, StoryMetadata};
use crate::pipeline::parse::{
    extract_json, lenient_items, lenient_string, parse_or_else, truncate_chars, Parsed,
};
use crate::prompts::{CAST_SYSTEM_PROMPT, METADATA_SYSTEM_PROMPT};
use crate::service::text::{GenerationOptions, TextGenerator};
use serde::Deserialize;
use tracing::{debug, warn};

const METADATA_INPUT_CHARS: usize = 4000;
const CAST_INPUT_CHARS: usize = 3500;

const MAX_SUMMARY_CHARS: usize = 320;
const MAX_SHEET_CHARS: usize = 800;
const MAX_NAME_CHARS: usize = 40;
const MAX_ATTRIBUTE_CHARS: usize = 120;
const MAX_CAST: usize = 4;

// ── Metadata ─────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct MetadataDraft {
    #[serde(default, deserialize_with = "lenient_string")]
    summary: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    character_sheet: Option<String>,
}

/// Ask the model for a short summary and a character sheet.
pub async fn extract_metadata(generator: &dyn TextGenerator, story: &PagedStory) -> StoryMetadata {
    let input = truncate_chars(&story.as_listing(), METADATA_INPUT_CHARS);
    let options = GenerationOptions::new(0.4, 400);

    match generator
        .generate(METADATA_SYSTEM_PROMPT, &input, &options)
        .await
    {
        Ok(raw) => {
            let parsed = parse_metadata(&raw, story);
            if parsed.is_fallback() {
                warn!("Metadata response was not valid JSON; deriving summary from page text");
            }
            parsed.into_inner()
        }
        Err(e) => {
            warn!("Metadata extraction failed: {}; deriving summary from page text", e);
            metadata_fallback(story)
        }
    }
}

/// Parse a metadata response, clamping both fields.
///
/// A response with an empty summary keeps its character sheet but borrows
/// the fallback summary, since the composer leans on it for blank pages.
pub fn parse_metadata(raw: &str, story: &PagedStory) -> Parsed<StoryMetadata> {
    match extract_json::<MetadataDraft>(raw) {
        Some(draft) => {
            let summary = draft
                .summary
                .map(|s| truncate_chars(s.trim(), MAX_SUMMARY_CHARS))
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| fallback_summary(story));
            let character_sheet = draft
                .character_sheet
                .map(|s| truncate_chars(s.trim(), MAX_SHEET_CHARS))
                .unwrap_or_default();
            Parsed::Ok(StoryMetadata {
                summary,
                character_sheet,
            })
        }
        None => Parsed::Fallback(metadata_fallback(story)),
    }
}

/// Summary from the first and last page, no character sheet.
pub fn metadata_fallback(story: &PagedStory) -> StoryMetadata {
    StoryMetadata {
        summary: fallback_summary(story),
        character_sheet: String::new(),
    }
}

fn fallback_summary(story: &PagedStory) -> String {
    let first = story.pages.first().map(|p| p.text.trim()).unwrap_or("");
    let last = story.pages.last().map(|p| p.text.trim()).unwrap_or("");
    let joined = if story.pages.len() > 1 {
        format!("{} {}", first, last)
    } else {
        first.to_string()
    };
    truncate_chars(joined.trim(), MAX_SUMMARY_CHARS)
}

// ── Cast ─────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct CastDraft {
    #[serde(default, deserialize_with = "lenient_items")]
    characters: Option<Vec<Option<CastDraftEntry>>>,
}

#[derive(Debug, Default, Deserialize)]
struct CastDraftEntry {
    #[serde(default, deserialize_with = "lenient_string")]
    name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    role: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    attributes: Option<String>,
}

/// Ask the model for up to four recurring characters.
pub async fn extract_cast(generator: &dyn TextGenerator, story: &PagedStory) -> Vec<CastMember> {
    let input = truncate_chars(&story.as_listing(), CAST_INPUT_CHARS);
    let options = GenerationOptions::new(0.4, 500);

    match generator.generate(CAST_SYSTEM_PROMPT, &input, &options).await {
        Ok(raw) => {
            let parsed = parse_cast(&raw);
            if parsed.is_fallback() {
                warn!("Cast response was not valid JSON; continuing without a cast");
            }
            let cast = parsed.into_inner();
            debug!("Extracted {} cast members", cast.len());
            cast
        }
        Err(e) => {
            warn!("Cast extraction failed: {}; continuing without a cast", e);
            Vec::new()
        }
    }
}

/// Parse a cast response: nameless entries dropped, at most four kept.
pub fn parse_cast(raw: &str) -> Parsed<Vec<CastMember>> {
    parse_or_else(raw, CastDraft::default).map(|draft| {
        draft
            .characters
            .unwrap_or_default()
            .into_iter()
            .flatten()
            .filter_map(|entry| {
                let name = truncate_chars(entry.name.as_deref().unwrap_or("").trim(), MAX_NAME_CHARS);
                if name.is_empty() {
                    return None;
                }
                Some(CastMember {
                    name,
                    role: CastRole::parse_lenient(entry.role.as_deref().unwrap_or("")),
                    attributes: truncate_chars(
                        entry.attributes.as_deref().unwrap_or("").trim(),
                        MAX_ATTRIBUTE_CHARS,
                    ),
                })
            })
            .take(MAX_CAST)
            .collect()
    })
}
