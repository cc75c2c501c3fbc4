//! # edgequake-storybook
//!
//! Turn a short prompt into an illustrated children's picture book: a title,
//! exactly N pages of text and one image per page.
//!
//! ## Why this crate?
//!
//! Text and image models are stateless. Asked for eight pictures one at a
//! time, they draw eight different heroes in eight identical medium shots.
//! This crate wraps both services in a pipeline that extracts a compact cast
//! and character sheet from the story, plans varied shots per page, locks
//! every page to one seed and one appearance description, and keeps the text
//! and image arrays aligned page for page even when individual images fail.
//!
//! ## Pipeline Overview
//!
//! ```text
//! prompt
//!  │
//!  ├─ 1. Story     one LLM call → JSON → exactly N pages
//!  ├─ 2. Extract   summary + character sheet, cast (concurrent)
//!  ├─ 3. Plan      shot / camera / light per page, variety enforced
//!  ├─ 4. Compose   consistency-locked prompt (and a safer variant)
//!  ├─ 5. Images    bounded concurrency, 3 attempts, placeholder on exhaustion
//!  └─ 6. Output    text_content[i] ↔ image_urls[i] + per-page stats
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_storybook::{generate_story, ArtStyle, StoryConfig, StoryRequest, StoryType};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Text provider from OPENROUTER_API_KEY / OPENAI_API_KEY / …, images from FAL_KEY
//!     let config = StoryConfig::default();
//!     let request = StoryRequest::new(
//!         "a shy hedgehog who wants to see the sea",
//!         8,
//!         ArtStyle::Watercolor,
//!         StoryType::Fantasy,
//!     );
//!     let story = generate_story(&request, &config).await?;
//!     println!("{}", story.title);
//!     for (text, url) in story.text_content.iter().zip(&story.image_urls) {
//!         println!("{text}\n  {url}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `storybook` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-storybook = { version = "0.1", default-features = false }
//! ```
//!
//! ## Failure Model
//!
//! Only the story-text call can fail a request. Metadata, cast and plan
//! failures fall back to deterministic defaults; an image page that fails
//! every attempt gets the placeholder URL and a [`PageError`] in
//! [`PageIllustration::error`].

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod generate;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod rate_limit;
pub mod request;
pub mod service;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ArtStyle, ImageSchedule, ImageSize, StoryConfig, StoryConfigBuilder, StoryType};
pub use error::{PageError, ServiceError, StoryError};
pub use generate::{
    continue_story, continue_story_with, generate_story, generate_story_with, generate_sync,
    generate_to_file,
};
pub use model::{CastMember, CastRole, PagedStory, StoryMetadata, StoryRequest, VisualPlanEntry};
pub use output::{ImageResult, PageIllustration, StoryOutput, StoryRecord, StoryStats};
pub use progress::{NoopProgressCallback, ProgressCallback, Stage, StoryProgressCallback};
pub use rate_limit::{RateLimitConfig, RateLimitDecision, RateLimiter};
pub use request::{
    StoryContextInput, StoryContinuationRequest, StoryGenerationRequest, StoryService,
};
pub use service::image::{FalImageGenerator, ImageGenerator, ImageRequest, ImageResponse};
pub use service::text::{GenerationOptions, LlmTextGenerator, TextGenerator};
pub use store::{InMemoryStore, JsonFileStore, StoryStore};
