//! Prompts for every text-generation call and the fixed image-prompt blocks.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth**: changing what the models are asked for
//!    requires editing exactly one place.
//!
//! 2. **Testability**: unit tests can inspect prompts directly without
//!    calling a model, making prompt regressions easy to catch.
//!
//! The per-page image prompt itself is assembled in
//! [`crate::pipeline::compose`]; the blocks it reuses verbatim live here.

use crate::config::{ArtStyle, StoryType};

/// System prompt for the story-text call.
///
/// The page count is spelled out twice: models follow "exactly N" far more
/// reliably when it is repeated in the structural rules.
pub fn story_system_prompt(page_count: usize) -> String {
    format!(
        r#"You are an award-winning picture-book author and read-aloud narrator for young children (roughly ages 3–7). Return ONLY valid JSON with this exact shape and no extra text:
{{
  "title": string,
  "pages": Array<{{ "text": string }}>
}}
Rules (content):
- Write the story in the same language as the user's input.
- Page 1 opens warmly with a small hook and cozy setting (3–5 sentences), read-aloud friendly cadence, varied sentence lengths.
- Pages 2..{page_count} use 2–4 sentences each; keep rhythm natural for read-aloud (not telegraphic).
- Maintain variety across pages (places, time of day, perspectives) and a gentle arc that resolves by the last page.
- Keep tone kind and child-safe; allow light sensory details and soft metaphors; avoid baby-talk.
- Avoid repetition of the same action page after page.
Rules (structure):
- pages.length MUST equal {page_count}
- Return ONLY the JSON object above (no comments, no markdown, no extra keys)"#
    )
}

/// User message for the story-text call: the raw input plus context lines.
pub fn story_user_prompt(raw_input: &str, story_type: StoryType, art_style: ArtStyle) -> String {
    format!(
        "{}\n\nStory type: {}\nIllustration style: {}",
        raw_input.trim(),
        story_type.as_str(),
        art_style.as_str()
    )
}

/// System prompt for continuing an existing story. The reply is plain prose.
pub const CONTINUE_SYSTEM_PROMPT: &str = "You are continuing a children's story. Maintain the same style, \
characters, and tone as the existing story. Keep the story engaging and age-appropriate.";

/// User message for a continuation: the story so far, then what should happen next.
pub fn continue_user_prompt(story_so_far: &str, user_input: &str) -> String {
    format!(
        "Story so far:\n\n{}\n\nContinue the story based on: {}",
        story_so_far.trim(),
        user_input.trim()
    )
}

pub const METADATA_SYSTEM_PROMPT: &str = r#"You are a helpful assistant extracting concise metadata for children's picture book illustrations. Return ONLY valid JSON with this shape and nothing else:
{
  "summary": string,
  "character_sheet": string
}
Rules:
- summary: 1-2 simple sentences covering setting and main goal.
- character_sheet: 4-8 short bullet-like lines (separated by line breaks), describing stable visual attributes of the main recurring characters (name, age, skin/hair/eye, clothing colors, companions).
- No markdown, no extra fields."#;

pub const CAST_SYSTEM_PROMPT: &str = r#"You are listing the recurring characters for a children's picture book. Return ONLY valid JSON with this shape:
{ "characters": Array<{ "name": string, "role": "child" | "adult" | "other", "attributes": string }> }
Rules:
- attributes: <= 80 chars; include hair/eyes, clothing colors, notable item (e.g., backpack).
- 1-4 main characters only; do not include animals unless central."#;

pub const PLAN_SYSTEM_PROMPT: &str = r#"You are a storyboard artist for children's picture books. Return ONLY valid JSON with this exact shape and no extra text:
{ "pages": Array<{
  "include_characters": boolean,
  "subjects": string,
  "shot": "wide" | "medium" | "closeup" | "detail",
  "camera": "eye-level" | "low" | "high",
  "environment": string,
  "time_of_day": "day" | "sunset" | "night" | "dawn",
  "lighting": string
}> }
Rules:
- Return exactly one entry per page, in page order.
- If the page focuses on objects/nature (e.g., the moon), set include_characters=false and describe only those subjects.
- Choose varied shots across pages (not all the same).
- Keep fields short (<= 8 words each).
- Kid-safe, gentle scenes only."#;

/// Things the image must not contain, in English and German.
///
/// Sent both inside the prompt and as the service's `negative_prompt`.
pub const NEGATIVE_CONSTRAINTS: &str = "no text, no letters, no words, no numbers, no captions, \
no speech bubbles, no logos, no watermarks, no signatures, no signs, no signage, no labels, \
no extra people, no crowds, no background figures, no duplicate characters, no animals unless described, \
no scary or violent elements, no nudity; \
kein Text, keine Buchstaben, keine Wörter, keine Zahlen, keine Sprechblasen, keine Logos, \
keine Wasserzeichen, keine Schilder, keine Beschriftungen, keine zusätzlichen Personen, \
keine Menschenmengen, keine Tiere außer den beschriebenen";

/// Shorter list used by the safer fallback prompt.
pub const SAFER_NEGATIVE_CONSTRAINTS: &str = "no text, no logos, no watermarks, no signage, \
no extra people, no animals unless described, no nudity, no violence; \
kein Text, keine Logos, keine zusätzlichen Personen";

/// Demands consistent rendering of every character across pages.
pub const APPEARANCE_LOCK: &str = "Keep every character's appearance identical on every page: \
same face, same hairstyle and hair color, same skin tone, same eye color, same body proportions, \
same outfit and clothing colors, same accessories. Do not redesign, age or restyle any character.";

/// Opening line of the safer fallback prompt.
pub const SAFER_PREAMBLE: &str = "Gentle, wholesome children's picture-book illustration. \
Everyone fully clothed in everyday clothes, calm friendly poses, bright safe setting.";

/// Fixed descriptor phrase for each art style.
pub fn style_descriptor(style: ArtStyle) -> &'static str {
    match style {
        ArtStyle::PeppaPig => {
            "simple flat 2D cartoon, rounded shapes, bold clean outlines, bright pastel colors, \
minimal shading, toddler TV-show look"
        }
        ArtStyle::PixiBook => {
            "classic European picture-book illustration, soft colored pencil and gouache, \
warm muted palette, gentle textures, small-format children's book look"
        }
        ArtStyle::Watercolor => {
            "soft watercolor painting, loose wet-on-wet washes, light paper texture, \
delicate edges, airy pastel palette"
        }
        ArtStyle::Comic => {
            "friendly children's comic style, clean ink lines, flat vibrant colors, \
expressive faces, no panels, no speech bubbles"
        }
    }
}

/// Tone hint for the story type.
pub fn tone_hint(story_type: StoryType) -> &'static str {
    match story_type {
        StoryType::Fantasy => "whimsical, magical atmosphere, gentle sparkle, storybook wonder",
        StoryType::Realistic => "grounded everyday setting, believable proportions, natural colors",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn story_prompt_states_page_count() {
        let p = story_system_prompt(12);
        assert!(p.contains("pages.length MUST equal 12"));
        assert!(p.contains("Pages 2..12"));
        assert!(p.contains("\"title\": string"));
    }

    #[test]
    fn user_prompt_carries_context() {
        let p = story_user_prompt("  a fox who loves the moon ", StoryType::Fantasy, ArtStyle::Watercolor);
        assert!(p.starts_with("a fox who loves the moon\n"));
        assert!(p.contains("Story type: fantasy"));
        assert!(p.contains("Illustration style: watercolor"));
    }

    #[test]
    fn continuation_prompt_puts_story_before_direction() {
        let p = continue_user_prompt(" Fox found the moon.\n", " now it rains ");
        assert_eq!(
            p,
            "Story so far:\n\nFox found the moon.\n\nContinue the story based on: now it rains"
        );
    }

    #[test]
    fn negative_constraints_are_bilingual() {
        assert!(NEGATIVE_CONSTRAINTS.contains("no watermarks"));
        assert!(NEGATIVE_CONSTRAINTS.contains("keine Wasserzeichen"));
        assert!(NEGATIVE_CONSTRAINTS.contains("no extra people"));
    }

    #[test]
    fn every_style_has_a_descriptor() {
        for style in [
            ArtStyle::PeppaPig,
            ArtStyle::PixiBook,
            ArtStyle::Watercolor,
            ArtStyle::Comic,
        ] {
            assert!(!style_descriptor(style).is_empty());
        }
    }
}
