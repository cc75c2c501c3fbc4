//! Output types returned by story generation.

use crate::config::{ArtStyle, StoryType};
use crate::error::PageError;
use crate::model::{CastMember, StoryMetadata, StoryRequest, VisualPlanEntry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The image chosen for one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ImageResult {
    /// The service produced an acceptable image.
    Generated { url: String },
    /// Every attempt failed; the configured placeholder stands in.
    Placeholder,
}

impl ImageResult {
    /// The image reference, resolving [`ImageResult::Placeholder`] to `placeholder_url`.
    pub fn url<'a>(&'a self, placeholder_url: &'a str) -> &'a str {
        match self {
            ImageResult::Generated { url } => url,
            ImageResult::Placeholder => placeholder_url,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, ImageResult::Placeholder)
    }
}

/// Outcome of the illustration stage for one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageIllustration {
    /// 1-indexed page number.
    pub page_num: usize,
    pub image: ImageResult,
    /// Image requests made for this page, including the primary one.
    pub attempts: u8,
    /// Whether any attempt sent the safer prompt.
    pub used_safer_prompt: bool,
    pub duration_ms: u64,
    /// Why the page fell back to the placeholder, if it did.
    pub error: Option<PageError>,
}

impl PageIllustration {
    /// A page that never produced an image.
    pub fn placeholder(page_num: usize, error: Option<PageError>) -> Self {
        Self {
            page_num,
            image: ImageResult::Placeholder,
            attempts: 0,
            used_safer_prompt: false,
            duration_ms: 0,
            error,
        }
    }
}

/// Aggregate statistics for one story.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryStats {
    pub page_count: usize,
    pub generated_images: usize,
    pub placeholder_pages: usize,
    pub total_image_attempts: usize,
    pub total_duration_ms: u64,
    /// Story text plus metadata, cast and plan calls.
    pub text_duration_ms: u64,
    pub image_duration_ms: u64,
}

/// The complete result of generating one story.
///
/// `text_content`, `image_urls`, `pages` and `plan` all have exactly
/// `page_count` entries; entry `i` of each describes page `i + 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryOutput {
    pub title: String,
    pub text_content: Vec<String>,
    pub image_urls: Vec<String>,
    pub pages: Vec<PageIllustration>,
    pub metadata: StoryMetadata,
    pub cast: Vec<CastMember>,
    pub plan: Vec<VisualPlanEntry>,
    pub seed: u32,
    pub stats: StoryStats,
}

impl StoryOutput {
    /// The row handed to the persistence collaborator.
    pub fn to_record(&self, request: &StoryRequest) -> StoryRecord {
        StoryRecord {
            id: Uuid::new_v4(),
            title: self.title.clone(),
            prompt: request.raw_input.clone(),
            story_type: request.story_type,
            art_style: request.art_style,
            page_count: request.page_count,
            text_content: self.text_content.clone(),
            image_urls: self.image_urls.clone(),
            created_at: Utc::now(),
        }
    }
}

/// One persisted story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryRecord {
    pub id: Uuid,
    pub title: String,
    pub prompt: String,
    pub story_type: StoryType,
    pub art_style: ArtStyle,
    pub page_count: usize,
    pub text_content: Vec<String>,
    pub image_urls: Vec<String>,
    pub created_at: DateTime<Utc>,
}
