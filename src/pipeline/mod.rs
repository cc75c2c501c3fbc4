//! Pipeline stages for story generation.
//!
//! Each submodule implements exactly one step. The text stages are plain
//! functions over a [`crate::service::text::TextGenerator`]; the image stage
//! drives a [`crate::service::image::ImageGenerator`].
//!
//! ## Data Flow
//!
//! ```text
//!            ┌─▶ extract (metadata) ─┐
//! text ─▶ parse                      ├─▶ plan ─▶ compose ─▶ illustrate
//!            └─▶ extract (cast) ─────┘            (per page, bounded pool)
//! ```
//!
//! 1. [`parse`]: recover the story JSON and normalise to exactly N pages
//! 2. [`extract`]: summary, character sheet and cast; degrade on failure
//! 3. [`plan`]: per-page shot, camera, light; then variety enforcement
//! 4. [`compose`]: primary and safer image prompts (pure)
//! 5. [`seed`]: the story-wide image seed
//! 6. [`illustrate`]: retries, placeholder, index-aligned results

pub mod compose;
pub mod extract;
pub mod illustrate;
pub mod parse;
pub mod plan;
pub mod seed;
