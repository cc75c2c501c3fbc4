//! Visual planning: one composition entry per page, then a deterministic
//! variety pass.
//!
//! ## Why enforce variety?
//!
//! Left alone, planning models converge on "medium shot with the characters"
//! for nearly every page. That output is valid but makes a dull book, so
//! after parsing (or after falling back to a uniform plan) two rules are
//! applied:
//!
//! 1. **Shot coverage**: every shot type missing from the plan is assigned
//!    to one page, taken from a shot type that appears more than once. With
//!    four or more pages all four shot types are then present.
//! 2. **Character-free pages**: at least `max(1, floor(N / 4))` pages have
//!    `include_characters == false`. Pages are flipped at stride 3 starting
//!    from the second page, then in order if the stride runs out.

use crate::model::{Camera, PagedStory, Shot, TimeOfDay, VisualPlanEntry};
use crate::pipeline::parse::{
    lenient_bool, lenient_items, lenient_string, parse_or_else, truncate_chars, Parsed,
};
use crate::prompts::PLAN_SYSTEM_PROMPT;
use crate::service::text::{GenerationOptions, TextGenerator};
use serde::Deserialize;
use tracing::{debug, warn};

const PLAN_INPUT_CHARS: usize = 4000;
const MAX_SUBJECT_CHARS: usize = 80;
const MAX_ENVIRONMENT_CHARS: usize = 60;
const MAX_LIGHTING_CHARS: usize = 60;

const NO_CHARACTER_STRIDE: usize = 3;
const NO_CHARACTER_START: usize = 1;

#[derive(Debug, Default, Deserialize)]
struct PlanDraft {
    #[serde(default, deserialize_with = "lenient_items")]
    pages: Option<Vec<Option<PlanDraftEntry>>>,
}

#[derive(Debug, Default, Deserialize)]
struct PlanDraftEntry {
    #[serde(default, deserialize_with = "lenient_bool")]
    include_characters: Option<bool>,
    #[serde(default, deserialize_with = "lenient_string")]
    subjects: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    shot: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    camera: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    environment: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    time_of_day: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    lighting: Option<String>,
}

/// Plan every page of `story`. Always returns `story.pages.len()` entries.
pub async fn plan_visuals(generator: &dyn TextGenerator, story: &PagedStory) -> Vec<VisualPlanEntry> {
    let page_count = story.pages.len();
    let input = truncate_chars(&story.as_listing(), PLAN_INPUT_CHARS);
    let options = GenerationOptions::new(0.5, (page_count * 90).max(900));

    let mut plan = match generator.generate(PLAN_SYSTEM_PROMPT, &input, &options).await {
        Ok(raw) => {
            let parsed = parse_plan(&raw, page_count);
            if parsed.is_fallback() {
                warn!("Visual plan was not valid JSON; using uniform plan");
            }
            parsed.into_inner()
        }
        Err(e) => {
            warn!("Visual planning failed: {}; using uniform plan", e);
            uniform_plan(page_count)
        }
    };

    enforce_variety(&mut plan);
    debug!(
        "Visual plan: shots [{}], {} character-free pages",
        plan.iter().map(|e| e.shot.as_str()).collect::<Vec<_>>().join(", "),
        plan.iter().filter(|e| !e.include_characters).count()
    );
    plan
}

/// Parse a plan response into exactly `page_count` entries.
///
/// Invalid enum values fall back to their defaults; missing entries are
/// default entries, so an unreadable response yields [`uniform_plan`].
/// Variety is **not** enforced here.
pub fn parse_plan(raw: &str, page_count: usize) -> Parsed<Vec<VisualPlanEntry>> {
    parse_or_else(raw, PlanDraft::default).map(|draft| {
        let mut drafted = draft.pages.unwrap_or_default().into_iter();
        (0..page_count)
            .map(|_| drafted.next().flatten().map(normalize_entry).unwrap_or_default())
            .collect()
    })
}

/// `page_count` default entries: medium, eye level, day, characters included.
pub fn uniform_plan(page_count: usize) -> Vec<VisualPlanEntry> {
    vec![VisualPlanEntry::default(); page_count]
}

fn normalize_entry(draft: PlanDraftEntry) -> VisualPlanEntry {
    let subjects = clamp(draft.subjects, MAX_SUBJECT_CHARS);
    let lighting = clamp(draft.lighting, MAX_LIGHTING_CHARS);

    VisualPlanEntry {
        // Absent or unreadable flag means the page shows the cast.
        include_characters: draft.include_characters.unwrap_or(true),
        subjects: if subjects.is_empty() {
            VisualPlanEntry::DEFAULT_SUBJECTS.to_string()
        } else {
            subjects
        },
        shot: draft.shot.as_deref().and_then(Shot::parse).unwrap_or_default(),
        camera: draft.camera.as_deref().and_then(Camera::parse).unwrap_or_default(),
        environment: clamp(draft.environment, MAX_ENVIRONMENT_CHARS),
        time_of_day: draft
            .time_of_day
            .as_deref()
            .and_then(TimeOfDay::parse)
            .unwrap_or_default(),
        lighting: if lighting.is_empty() {
            VisualPlanEntry::DEFAULT_LIGHTING.to_string()
        } else {
            lighting
        },
    }
}

fn clamp(field: Option<String>, max: usize) -> String {
    field
        .map(|s| truncate_chars(s.trim(), max))
        .unwrap_or_default()
}

// ── Variety enforcement ──────────────────────────────────────────────────

/// Apply shot coverage and the character-free quota in place.
pub fn enforce_variety(plan: &mut [VisualPlanEntry]) {
    if plan.is_empty() {
        return;
    }
    cover_shots(plan);
    ensure_character_free(plan);
}

fn shot_index(shot: Shot) -> usize {
    match shot {
        Shot::Wide => 0,
        Shot::Medium => 1,
        Shot::Closeup => 2,
        Shot::Detail => 3,
    }
}

fn cover_shots(plan: &mut [VisualPlanEntry]) {
    let n = plan.len();
    let mut counts = [0usize; 4];
    for entry in plan.iter() {
        counts[shot_index(entry.shot)] += 1;
    }

    let mut cursor = 0;
    for missing in Shot::ALL {
        if counts[shot_index(missing)] > 0 {
            continue;
        }
        // Only take pages whose shot would still appear elsewhere.
        let donor = (0..n)
            .map(|step| (cursor + step) % n)
            .find(|&i| counts[shot_index(plan[i].shot)] > 1);
        let Some(i) = donor else {
            break;
        };
        counts[shot_index(plan[i].shot)] -= 1;
        counts[shot_index(missing)] += 1;
        plan[i].shot = missing;
        cursor = (i + 1) % n;
    }
}

/// Minimum number of character-free pages for a plan of `page_count`.
pub fn character_free_target(page_count: usize) -> usize {
    (page_count / 4).max(1)
}

fn ensure_character_free(plan: &mut [VisualPlanEntry]) {
    let n = plan.len();
    let target = character_free_target(n);
    let mut free = plan.iter().filter(|e| !e.include_characters).count();
    if free >= target {
        return;
    }

    let strided = (NO_CHARACTER_START..n).step_by(NO_CHARACTER_STRIDE);
    let sweep = 0..n;
    for i in strided.chain(sweep) {
        if free >= target {
            break;
        }
        if plan[i].include_characters {
            plan[i].include_characters = false;
            plan[i].subjects = VisualPlanEntry::SCENE_ONLY_SUBJECTS.to_string();
            free += 1;
        }
    }
}
