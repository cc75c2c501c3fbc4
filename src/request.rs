//! Request boundary: validation, rate limiting and persistence around the
//! pipeline.
//!
//! ```text
//! StoryGenerationRequest   ─▶ rate limit ─▶ validate ─▶ generate_story ─▶ store insert (best-effort)
//! StoryContinuationRequest ─▶ rate limit ─▶ validate ─▶ continue_story ─▶ store append (best-effort)
//! ```

use crate::config::{ArtStyle, StoryConfig, StoryType};
use crate::error::StoryError;
use crate::generate::{continue_story, generate_story};
use crate::model::StoryRequest;
use crate::output::StoryOutput;
use crate::rate_limit::RateLimiter;
use crate::store::StoryStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Page counts accepted at the boundary.
pub const ALLOWED_PAGE_COUNTS: [usize; 3] = [8, 12, 16];

/// Maximum prompt length in characters.
pub const MAX_INPUT_CHARS: usize = 2000;

/// Rate-limit namespace for story generation keys.
pub const STORY_ENDPOINT: &str = "story-generation";

/// Rate-limit namespace for story continuation keys.
pub const CONTINUE_ENDPOINT: &str = "story-continuation";

/// Wire shape of an incoming story request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryGenerationRequest {
    pub user_input: String,
    #[serde(default)]
    pub story_context: StoryContextInput,
}

/// Optional story settings; absent fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryContextInput {
    #[serde(default)]
    pub story_type: StoryType,
    #[serde(default)]
    pub art_style: ArtStyle,
    #[serde(default = "default_page_count")]
    pub page_count: usize,
}

fn default_page_count() -> usize {
    8
}

impl Default for StoryContextInput {
    fn default() -> Self {
        Self {
            story_type: StoryType::default(),
            art_style: ArtStyle::default(),
            page_count: default_page_count(),
        }
    }
}

impl StoryGenerationRequest {
    pub fn new(user_input: impl Into<String>, context: StoryContextInput) -> Self {
        Self {
            user_input: user_input.into(),
            story_context: context,
        }
    }

    /// Check the request and turn it into an immutable [`StoryRequest`].
    pub fn validate(&self) -> Result<StoryRequest, StoryError> {
        let input = self.user_input.trim();
        if input.is_empty() {
            return Err(StoryError::InvalidRequest("User input is required".into()));
        }
        let chars = input.chars().count();
        if chars > MAX_INPUT_CHARS {
            return Err(StoryError::InvalidRequest(format!(
                "User input is {} characters; the limit is {}",
                chars, MAX_INPUT_CHARS
            )));
        }
        let pages = self.story_context.page_count;
        if !ALLOWED_PAGE_COUNTS.contains(&pages) {
            return Err(StoryError::InvalidRequest(format!(
                "Page count must be one of {:?}, got {}",
                ALLOWED_PAGE_COUNTS, pages
            )));
        }
        Ok(StoryRequest::new(
            input,
            pages,
            self.story_context.art_style,
            self.story_context.story_type,
        ))
    }
}

/// Wire shape of a request to continue an existing story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryContinuationRequest {
    pub story_so_far: String,
    pub user_input: String,
    /// Stored story to append the passage to.
    #[serde(default)]
    pub story_id: Option<Uuid>,
}

impl StoryContinuationRequest {
    pub fn new(story_so_far: impl Into<String>, user_input: impl Into<String>) -> Self {
        Self {
            story_so_far: story_so_far.into(),
            user_input: user_input.into(),
            story_id: None,
        }
    }

    pub fn for_story(mut self, id: Uuid) -> Self {
        self.story_id = Some(id);
        self
    }

    /// Both texts must be non-blank; the direction is capped like a story prompt.
    pub fn validate(&self) -> Result<(), StoryError> {
        if self.story_so_far.trim().is_empty() {
            return Err(StoryError::InvalidRequest("Story content is required".into()));
        }
        let input = self.user_input.trim();
        if input.is_empty() {
            return Err(StoryError::InvalidRequest("User input is required".into()));
        }
        let chars = input.chars().count();
        if chars > MAX_INPUT_CHARS {
            return Err(StoryError::InvalidRequest(format!(
                "User input is {} characters; the limit is {}",
                chars, MAX_INPUT_CHARS
            )));
        }
        Ok(())
    }
}

/// Handles story requests for many clients.
///
/// Owns the rate limiter explicitly; share one service (e.g. behind an
/// `Arc`) between request handlers so every client sees the same window.
pub struct StoryService {
    config: StoryConfig,
    limiter: Arc<RateLimiter>,
    store: Option<Arc<dyn StoryStore>>,
}

impl StoryService {
    pub fn new(config: StoryConfig, limiter: Arc<RateLimiter>) -> Self {
        Self {
            config,
            limiter,
            store: None,
        }
    }

    /// Persist every finished story to `store`.
    pub fn with_store(mut self, store: Arc<dyn StoryStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &StoryConfig {
        &self.config
    }

    /// Rate-limit, validate, generate and persist one story for `client_id`.
    ///
    /// # Errors
    /// [`StoryError::RateLimited`] before any work is done, then whatever
    /// [`StoryGenerationRequest::validate`] or [`generate_story`] return.
    /// A failed store write is logged, never returned.
    pub async fn handle(
        &self,
        client_id: &str,
        req: &StoryGenerationRequest,
    ) -> Result<StoryOutput, StoryError> {
        self.admit(STORY_ENDPOINT, client_id)?;

        let request = req.validate()?;
        let output = generate_story(&request, &self.config).await?;

        if let Some(store) = &self.store {
            let record = output.to_record(&request);
            match store.insert(&record).await {
                Ok(()) => info!("Stored story {} ({})", record.id, record.title),
                Err(e) => warn!("Story generated but not stored: {}", e),
            }
        }

        Ok(output)
    }

    /// Rate-limit, validate and continue a story for `client_id`.
    ///
    /// When the request names a stored story and a store is attached, the
    /// passage is appended to that story's `text_content`. A failed append
    /// is logged, never returned.
    pub async fn continue_story(
        &self,
        client_id: &str,
        req: &StoryContinuationRequest,
    ) -> Result<String, StoryError> {
        self.admit(CONTINUE_ENDPOINT, client_id)?;
        req.validate()?;

        let passage = continue_story(&req.story_so_far, &req.user_input, &self.config).await?;

        if let (Some(store), Some(id)) = (&self.store, req.story_id) {
            match store.append_text(id, &passage).await {
                Ok(()) => info!("Appended continuation to story {}", id),
                Err(e) => warn!("Story continued but not stored: {}", e),
            }
        }

        Ok(passage)
    }

    fn admit(&self, endpoint: &str, client_id: &str) -> Result<(), StoryError> {
        let key = format!("{}:{}", endpoint, client_id);
        let decision = self.limiter.check(&key);
        if !decision.allowed {
            return Err(StoryError::RateLimited {
                retry_after_ms: decision.retry_after.as_millis() as u64,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(input: &str, pages: usize) -> StoryGenerationRequest {
        StoryGenerationRequest::new(
            input,
            StoryContextInput {
                page_count: pages,
                ..Default::default()
            },
        )
    }

    #[test]
    fn accepts_allowed_page_counts() {
        for n in ALLOWED_PAGE_COUNTS {
            let r = req("  a dragon who bakes bread ", n).validate().unwrap();
            assert_eq!(r.page_count, n);
            assert_eq!(r.raw_input, "a dragon who bakes bread");
        }
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(
            req("   ", 8).validate(),
            Err(StoryError::InvalidRequest(_))
        ));
        assert!(matches!(
            req("x", 10).validate(),
            Err(StoryError::InvalidRequest(_))
        ));
        let long = "ä".repeat(MAX_INPUT_CHARS + 1);
        assert!(req(&long, 8).validate().is_err());
        assert!(req(&"ä".repeat(MAX_INPUT_CHARS), 8).validate().is_ok());
    }

    #[test]
    fn continuation_needs_story_and_direction() {
        let ok = StoryContinuationRequest::new("Fox found the moon.", "now it rains");
        assert!(ok.validate().is_ok());
        for (so_far, input) in [("   ", "rain"), ("Fox.", ""), ("Fox.", " \t ")] {
            assert!(matches!(
                StoryContinuationRequest::new(so_far, input).validate(),
                Err(StoryError::InvalidRequest(_))
            ));
        }
        let long = "x".repeat(MAX_INPUT_CHARS + 1);
        assert!(StoryContinuationRequest::new("Fox.", long).validate().is_err());
    }

    #[test]
    fn continuation_deserialises_camel_case() {
        let id = Uuid::new_v4();
        let raw = format!(r#"{{"storySoFar":"Fox.","userInput":"rain","storyId":"{id}"}}"#);
        let r: StoryContinuationRequest = serde_json::from_str(&raw).unwrap();
        assert_eq!(r, StoryContinuationRequest::new("Fox.", "rain").for_story(id));

        let bare: StoryContinuationRequest =
            serde_json::from_str(r#"{"storySoFar":"Fox.","userInput":"rain"}"#).unwrap();
        assert_eq!(bare.story_id, None);
    }

    #[test]
    fn deserialises_camel_case_with_defaults() {
        let r: StoryGenerationRequest =
            serde_json::from_str(r#"{"userInput":"owl","storyContext":{"artStyle":"comic"}}"#)
                .unwrap();
        assert_eq!(r.story_context.art_style, ArtStyle::Comic);
        assert_eq!(r.story_context.story_type, StoryType::Fantasy);
        assert_eq!(r.story_context.page_count, 8);

        let bare: StoryGenerationRequest = serde_json::from_str(r#"{"userInput":"owl"}"#).unwrap();
        assert_eq!(bare.story_context, StoryContextInput::default());
    }
}
