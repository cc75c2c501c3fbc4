//! Progress-callback trait for stage and per-page generation events.
//!
//! Inject an [`Arc<dyn StoryProgressCallback>`] via
//! [`crate::config::StoryConfigBuilder::progress_callback`] to receive
//! real-time events as the pipeline moves through its stages and
//! illustrates each page.
//!
//! # Example
//!
//! ```rust
//! use edgequake_storybook::{StoryConfig, StoryProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     illustrated: AtomicUsize,
//! }
//!
//! impl StoryProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, page_num: usize, total_pages: usize, placeholder: bool) {
//!         self.illustrated.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Page {}/{} done (placeholder: {})", page_num, total_pages, placeholder);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { illustrated: AtomicUsize::new(0) });
//!
//! let config = StoryConfig::builder()
//!     .progress_callback(counter as Arc<dyn StoryProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::fmt;
use std::sync::Arc;

/// Pipeline stage, reported once when the stage begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    StoryText,
    Metadata,
    Cast,
    VisualPlan,
    Illustration,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::StoryText => "writing story",
            Stage::Metadata => "summarising",
            Stage::Cast => "casting characters",
            Stage::VisualPlan => "planning pages",
            Stage::Illustration => "illustrating",
        };
        f.write_str(s)
    }
}

/// Called by the pipeline as it generates a story.
///
/// Implementations must be `Send + Sync`: several pages are illustrated
/// concurrently, so the page methods may be called from different tasks at
/// the same time. All methods default to no-ops.
pub trait StoryProgressCallback: Send + Sync {
    /// Called when a stage begins.
    fn on_stage(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called once before the first image request.
    ///
    /// # Arguments
    /// * `total_pages`: number of pages that will be illustrated
    fn on_illustration_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called just before the first attempt for a page.
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called before each retry, after the delay has elapsed.
    ///
    /// # Arguments
    /// * `attempt`: 1-indexed attempt number about to run (2 = first retry)
    /// * `reason`: why the previous attempt was rejected
    fn on_page_retry(&self, page_num: usize, attempt: u32, reason: &str) {
        let _ = (page_num, attempt, reason);
    }

    /// Called when a page reaches a terminal state.
    ///
    /// # Arguments
    /// * `placeholder`: true when every attempt failed and the page got the
    ///   placeholder image
    fn on_page_complete(&self, page_num: usize, total_pages: usize, placeholder: bool) {
        let _ = (page_num, total_pages, placeholder);
    }

    /// Called once after every page has settled.
    ///
    /// # Arguments
    /// * `generated`: pages that received a real image
    fn on_story_complete(&self, total_pages: usize, generated: usize) {
        let _ = (total_pages, generated);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl StoryProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::StoryConfig`].
pub type ProgressCallback = Arc<dyn StoryProgressCallback>;
