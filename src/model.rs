//! Data model flowing between pipeline stages.
//!
//! Every per-page collection here ([`PagedStory::pages`], the visual plan,
//! the illustrations in [`crate::output::StoryOutput`]) is indexed by page
//! position. No stage ever filters or reorders them; page `i` of one
//! collection always describes page `i` of every other.

use crate::config::{ArtStyle, StoryType};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A validated request for one story. Immutable once accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryRequest {
    /// The user's prompt, verbatim.
    pub raw_input: String,
    /// Exact number of pages to produce.
    pub page_count: usize,
    pub art_style: ArtStyle,
    pub story_type: StoryType,
}

impl StoryRequest {
    pub fn new(
        raw_input: impl Into<String>,
        page_count: usize,
        art_style: ArtStyle,
        story_type: StoryType,
    ) -> Self {
        Self {
            raw_input: raw_input.into(),
            page_count,
            art_style,
            story_type,
        }
    }
}

/// The story text, normalised to exactly the requested page count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagedStory {
    pub title: String,
    pub pages: Vec<PageText>,
}

impl PagedStory {
    /// `Title: …` followed by one `Page i: …` line per page, as sent to the
    /// auxiliary text-generation calls.
    pub fn as_listing(&self) -> String {
        let mut lines = Vec::with_capacity(self.pages.len() + 1);
        lines.push(format!("Title: {}", self.title));
        for (i, page) in self.pages.iter().enumerate() {
            lines.push(format!("Page {}: {}", i + 1, page.text));
        }
        lines.join("\n")
    }
}

/// Text of one page. Never empty: a blank page holds a single space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageText {
    pub text: String,
}

impl PageText {
    /// The single-space sentinel for a page the model did not write.
    pub const BLANK: &'static str = " ";

    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn blank() -> Self {
        Self::new(Self::BLANK)
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Compact, derived description used only to steer image prompts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryMetadata {
    /// One or two sentences on setting and goal. At most 320 chars.
    pub summary: String,
    /// Stable visual attributes of recurring characters. At most 800 chars;
    /// empty when extraction failed.
    pub character_sheet: String,
}

/// Role of a cast member, used to build the head-count directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CastRole {
    Child,
    Adult,
    #[default]
    Other,
}

impl CastRole {
    /// Parse a model-supplied role; anything unrecognised is `Other`.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "child" => CastRole::Child,
            "adult" => CastRole::Adult,
            _ => CastRole::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CastRole::Child => "child",
            CastRole::Adult => "adult",
            CastRole::Other => "other",
        }
    }
}

/// One recurring named character with compact visual attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CastMember {
    pub name: String,
    pub role: CastRole,
    /// Hair, eyes, clothing colours, notable item. At most 120 chars.
    pub attributes: String,
}

/// Shot type for one page's composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shot {
    Wide,
    #[default]
    Medium,
    Closeup,
    Detail,
}

impl Shot {
    pub const ALL: [Shot; 4] = [Shot::Wide, Shot::Medium, Shot::Closeup, Shot::Detail];

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wide" => Some(Shot::Wide),
            "medium" => Some(Shot::Medium),
            "closeup" | "close-up" => Some(Shot::Closeup),
            "detail" => Some(Shot::Detail),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Shot::Wide => "wide",
            Shot::Medium => "medium",
            Shot::Closeup => "closeup",
            Shot::Detail => "detail",
        }
    }
}

/// Camera height relative to the subjects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Camera {
    #[default]
    EyeLevel,
    Low,
    High,
}

impl Camera {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "eye-level" | "eye level" => Some(Camera::EyeLevel),
            "low" => Some(Camera::Low),
            "high" => Some(Camera::High),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Camera::EyeLevel => "eye-level",
            Camera::Low => "low",
            Camera::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeOfDay {
    #[default]
    Day,
    Sunset,
    Night,
    Dawn,
}

impl TimeOfDay {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" => Some(TimeOfDay::Day),
            "sunset" => Some(TimeOfDay::Sunset),
            "night" => Some(TimeOfDay::Night),
            "dawn" => Some(TimeOfDay::Dawn),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeOfDay::Day => "day",
            TimeOfDay::Sunset => "sunset",
            TimeOfDay::Night => "night",
            TimeOfDay::Dawn => "dawn",
        }
    }
}

impl fmt::Display for Shot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Camera {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Composition plan for one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisualPlanEntry {
    pub include_characters: bool,
    pub subjects: String,
    pub shot: Shot,
    pub camera: Camera,
    pub environment: String,
    pub time_of_day: TimeOfDay,
    pub lighting: String,
}

impl VisualPlanEntry {
    pub const DEFAULT_SUBJECTS: &'static str = "main characters";
    pub const DEFAULT_LIGHTING: &'static str = "soft natural light";
    pub const SCENE_ONLY_SUBJECTS: &'static str = "scene objects only";
}

impl Default for VisualPlanEntry {
    /// Medium shot, eye level, daylight, characters included.
    fn default() -> Self {
        Self {
            include_characters: true,
            subjects: Self::DEFAULT_SUBJECTS.to_string(),
            shot: Shot::Medium,
            camera: Camera::EyeLevel,
            environment: String::new(),
            time_of_day: TimeOfDay::Day,
            lighting: Self::DEFAULT_LIGHTING.to_string(),
        }
    }
}

/// Read-only story-wide values shared by every page prompt.
///
/// Built once after text generation and extraction, then lent to the planner,
/// composer and image orchestrator. Nothing mutates it during the image stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryContext {
    pub title: String,
    pub seed: u32,
    pub art_style: ArtStyle,
    pub story_type: StoryType,
    pub metadata: StoryMetadata,
    pub cast: Vec<CastMember>,
}

impl StoryContext {
    /// First cast member with the given role.
    pub fn core(&self, role: CastRole) -> Option<&CastMember> {
        self.cast.iter().find(|c| c.role == role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cast_role_parse_is_lenient() {
        assert_eq!(CastRole::parse_lenient("Child"), CastRole::Child);
        assert_eq!(CastRole::parse_lenient(" adult "), CastRole::Adult);
        assert_eq!(CastRole::parse_lenient("dragon"), CastRole::Other);
        assert_eq!(CastRole::parse_lenient(""), CastRole::Other);
    }

    #[test]
    fn shot_and_camera_parse() {
        assert_eq!(Shot::parse("close-up"), Some(Shot::Closeup));
        assert_eq!(Shot::parse("panorama"), None);
        assert_eq!(Camera::parse("Eye-Level"), Some(Camera::EyeLevel));
        assert_eq!(TimeOfDay::parse("dusk"), None);
    }

    #[test]
    fn plan_entry_serialises_with_wire_names() {
        let entry = VisualPlanEntry::default();
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["shot"], "medium");
        assert_eq!(json["camera"], "eye-level");
        assert_eq!(json["time_of_day"], "day");
    }

    #[test]
    fn listing_numbers_pages_from_one() {
        let story = PagedStory {
            title: "T".into(),
            pages: vec![PageText::new("A"), PageText::new("B")],
        };
        assert_eq!(story.as_listing(), "Title: T\nPage 1: A\nPage 2: B");
    }

    #[test]
    fn blank_page_is_single_space() {
        let p = PageText::blank();
        assert_eq!(p.text, " ");
        assert!(p.is_blank());
    }
}
