//! Image prompt composition: a pure function from page + story context to
//! the text sent to the image service.
//!
//! ## Prompt Layout
//!
//! ```text
//! Scene (page 3): <page text, whitespace-collapsed, ≤ 200 chars>
//! Composition: <shot> shot, <camera> camera, <time of day>, <lighting>, …
//! Characters: <head-count directive or "no people">
//! Style: <art-style descriptor>. Mood: <tone hint>.
//! Avoid: <negative constraints, EN + DE>
//! <appearance lock>
//! Character sheet: …
//! Cast: …
//! ```
//!
//! The result is cut at the configured soft cap, so the story-wide blocks at
//! the end are the first to lose detail on a long page.
//!
//! The safer variant (retries only) softens pose wording and drops to a
//! short template with a stricter preamble.

use crate::model::{CastMember, CastRole, StoryContext, VisualPlanEntry};
use crate::pipeline::parse::{collapse_whitespace, truncate_chars};
use crate::prompts::{
    style_descriptor, tone_hint, APPEARANCE_LOCK, NEGATIVE_CONSTRAINTS, SAFER_NEGATIVE_CONSTRAINTS,
    SAFER_PREAMBLE,
};
use once_cell::sync::Lazy;
use regex::Regex;

const SCENE_CHARS: usize = 200;
const SAFER_SCENE_CHARS: usize = 160;
const SAFER_PROMPT_CAP: usize = 1200;

/// Primary prompt for page `page_index` (0-based).
pub fn compose_prompt(
    ctx: &StoryContext,
    page_index: usize,
    page_text: &str,
    entry: &VisualPlanEntry,
    soft_cap: usize,
) -> String {
    let mut lines = Vec::with_capacity(8);

    lines.push(format!(
        "Scene (page {}): {}",
        page_index + 1,
        scene_line(page_text, &ctx.metadata.summary, SCENE_CHARS)
    ));
    lines.push(format!("Composition: {}", visual_hint(entry)));
    lines.push(format!("Characters: {}", character_directive(ctx, page_text, entry)));
    lines.push(format!(
        "Style: {}. Mood: {}.",
        style_descriptor(ctx.art_style),
        tone_hint(ctx.story_type)
    ));
    lines.push(format!("Avoid: {}.", NEGATIVE_CONSTRAINTS));
    lines.push(APPEARANCE_LOCK.to_string());

    let sheet = ctx.metadata.character_sheet.trim();
    if !sheet.is_empty() {
        lines.push(format!("Character sheet: {}", collapse_whitespace(sheet)));
    }
    if !ctx.cast.is_empty() {
        lines.push(format!("Cast: {}", cast_block(&ctx.cast)));
    }

    truncate_chars(&lines.join("\n"), soft_cap)
}

/// Stricter, shorter prompt used for every retry.
pub fn compose_safer_prompt(
    ctx: &StoryContext,
    page_index: usize,
    page_text: &str,
    entry: &VisualPlanEntry,
) -> String {
    let softened = soften_poses(page_text);
    let summary = soften_poses(&ctx.metadata.summary);

    let lines = [
        SAFER_PREAMBLE.to_string(),
        format!(
            "Scene (page {}): {}",
            page_index + 1,
            scene_line(&softened, &summary, SAFER_SCENE_CHARS)
        ),
        format!("Characters: {}", character_directive(ctx, page_text, entry)),
        format!("Style: {}.", style_descriptor(ctx.art_style)),
        format!("Avoid: {}.", SAFER_NEGATIVE_CONSTRAINTS),
    ];

    truncate_chars(&lines.join("\n"), SAFER_PROMPT_CAP)
}

// ── Building blocks ──────────────────────────────────────────────────────

fn scene_line(page_text: &str, summary: &str, max: usize) -> String {
    let scene = collapse_whitespace(page_text);
    if scene.is_empty() {
        truncate_chars(&collapse_whitespace(summary), max)
    } else {
        truncate_chars(&scene, max)
    }
}

fn visual_hint(entry: &VisualPlanEntry) -> String {
    let mut parts = vec![
        format!("{} shot", entry.shot),
        format!("{} camera", entry.camera),
        entry.time_of_day.to_string(),
        entry.lighting.clone(),
    ];
    if !entry.environment.is_empty() {
        parts.push(format!("setting: {}", entry.environment));
    }
    parts.push(format!("focus: {}", entry.subjects));
    parts.join(", ")
}

/// The head-count line. Names exactly the people expected on this page.
pub fn character_directive(ctx: &StoryContext, page_text: &str, entry: &VisualPlanEntry) -> String {
    if !entry.include_characters {
        return format!(
            "no people and no characters in this picture, show only {}",
            entry.subjects
        );
    }

    let expected = expected_cast(ctx, page_text);
    if expected.is_empty() {
        return "main characters only, no extra people".to_string();
    }

    let names: Vec<&str> = expected.iter().map(|c| c.name.as_str()).collect();
    format!(
        "exactly {} {}: {}. No other people",
        count_word(expected.len()),
        if expected.len() == 1 { "person" } else { "people" },
        join_names(&names)
    )
}

/// Core child, core adult, and at most one other cast member named on the page.
fn expected_cast<'a>(ctx: &'a StoryContext, page_text: &str) -> Vec<&'a CastMember> {
    let mut expected: Vec<&CastMember> = [ctx.core(CastRole::Child), ctx.core(CastRole::Adult)]
        .into_iter()
        .flatten()
        .collect();

    let page_lower = page_text.to_lowercase();
    let secondary = ctx.cast.iter().find(|c| {
        !expected.iter().any(|e| std::ptr::eq(*e, *c))
            && page_lower.contains(&c.name.to_lowercase())
    });
    expected.extend(secondary);
    expected
}

fn cast_block(cast: &[CastMember]) -> String {
    cast.iter()
        .map(|c| {
            if c.attributes.is_empty() {
                format!("{} ({})", c.name, c.role.as_str())
            } else {
                format!("{} ({}): {}", c.name, c.role.as_str(), c.attributes)
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn count_word(n: usize) -> String {
    match n {
        1 => "one".into(),
        2 => "two".into(),
        3 => "three".into(),
        _ => n.to_string(),
    }
}

fn join_names(names: &[&str]) -> String {
    match names {
        [] => String::new(),
        [one] => one.to_string(),
        [init @ .., last] => format!("{} and {}", init.join(", "), last),
    }
}

// ── Pose softening ───────────────────────────────────────────────────────

static POSE_REWRITES: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"(?i)\bkneels\b", "sits cross-legged"),
        (r"(?i)\bkneeling\b", "sitting cross-legged"),
        (r"(?i)\bknelt\b", "sat cross-legged"),
        (r"(?i)\blies down\b", "sits down"),
        (r"(?i)\blying down\b", "sitting down"),
        (r"(?i)\blay down\b", "sat down"),
        (r"(?i)\blies\b", "sits"),
        (r"(?i)\blying\b", "sitting"),
        (r"(?i)\bhugs\b", "stands beside"),
        (r"(?i)\bhugging\b", "standing beside"),
        (r"(?i)\bcuddles\b", "sits beside"),
        (r"(?i)\bclimbs\b", "walks up to"),
        (r"(?i)\bclimbing\b", "walking up to"),
        (r"(?i)\bswims\b", "plays by the water"),
        (r"(?i)\bswimming\b", "playing by the water"),
        (r"(?i)\bbathes\b", "plays"),
        (r"(?i)\bbathing\b", "playing"),
        (r"(?i)\bfalls\b", "steps"),
        (r"(?i)\bfalling\b", "stepping"),
    ]
    .into_iter()
    .map(|(pattern, replacement)| (Regex::new(pattern).unwrap(), replacement))
    .collect()
});

/// Replace pose words that image safety checkers tend to misread.
pub fn soften_poses(text: &str) -> String {
    POSE_REWRITES
        .iter()
        .fold(text.to_string(), |acc, (re, replacement)| {
            re.replace_all(&acc, *replacement).into_owned()
        })
}
