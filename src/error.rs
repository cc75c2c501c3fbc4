//! Error types for the edgequake-storybook library.
//!
//! Three error types reflect three distinct failure modes:
//!
//! * [`StoryError`] is **fatal**. The story cannot be produced at all
//!   (invalid request, provider not configured, the story-text call failed).
//!   Returned as `Err(StoryError)` from the top-level `generate*` functions.
//!
//! * [`PageError`] is **non-fatal**. One page's illustration could not be
//!   generated after every attempt. Stored inside
//!   [`crate::output::PageIllustration`]; the page receives the placeholder
//!   image and the story is still delivered.
//!
//! * [`ServiceError`]: a single call to an external text or image service
//!   failed. The pipeline decides per stage whether this is fatal (story
//!   text), degraded (metadata, cast, plan) or retried (images).

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-storybook library.
///
/// Page-level failures use [`PageError`] and are stored in
/// [`crate::output::PageIllustration`] rather than propagated here.
#[derive(Debug, Error)]
pub enum StoryError {
    // ── Request errors ────────────────────────────────────────────────────
    /// The incoming request failed validation.
    #[error("Invalid story request: {0}")]
    InvalidRequest(String),

    /// The caller exceeded the configured request rate.
    #[error("Rate limit exceeded, retry in {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    // ── Provider errors ───────────────────────────────────────────────────
    /// The text or image provider is not initialised (missing API key etc.).
    #[error("Provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The story-text call failed; no images were requested.
    #[error("Story text generation failed: {source}")]
    TextGenerationFailed {
        #[source]
        source: ServiceError,
    },

    /// The optional overall pipeline deadline elapsed.
    #[error("Story generation exceeded the {secs}s pipeline deadline")]
    PipelineTimeout { secs: u64 },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output JSON file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The persistence collaborator rejected the record.
    #[error("Failed to persist story: {0}")]
    PersistFailed(String),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single page's illustration.
///
/// The page still appears in the output, with the placeholder image.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// The image service call failed on the final attempt.
    #[error("Page {page}: image generation failed after {attempts} attempts: {detail}")]
    GenerationFailed {
        page: usize,
        attempts: u8,
        detail: String,
    },

    /// The safety checker flagged the final attempt.
    #[error("Page {page}: image flagged by the safety checker on all {attempts} attempts")]
    ContentFlagged { page: usize, attempts: u8 },

    /// The service answered but returned no image on the final attempt.
    #[error("Page {page}: image service returned no images after {attempts} attempts")]
    NoImages { page: usize, attempts: u8 },

    /// The final attempt exceeded the per-call timeout.
    #[error("Page {page}: image generation timed out after {secs}s")]
    Timeout { page: usize, secs: u64 },
}

/// Failure of one call to an external generation service.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// Credentials or endpoint missing.
    #[error("{service} is not configured: {hint}")]
    NotConfigured { service: String, hint: String },

    /// Non-2xx response.
    #[error("{service} returned HTTP {status}: {detail}")]
    Http {
        service: String,
        status: u16,
        detail: String,
    },

    /// The call did not finish within its timeout.
    #[error("{service} call timed out after {secs}s")]
    Timeout { service: String, secs: u64 },

    /// Connection-level failure.
    #[error("{service} request failed: {detail}")]
    Transport { service: String, detail: String },

    /// The response body could not be decoded.
    #[error("{service} returned an unreadable response: {detail}")]
    InvalidResponse { service: String, detail: String },

    /// Error surfaced by the LLM provider library.
    #[error("LLM provider error: {0}")]
    Provider(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_generation_failed_display_includes_source() {
        let e = StoryError::TextGenerationFailed {
            source: ServiceError::Http {
                service: "openrouter".into(),
                status: 502,
                detail: "bad gateway".into(),
            },
        };
        let msg = e.to_string();
        assert!(msg.contains("502"), "got: {msg}");
        assert!(msg.contains("openrouter"), "got: {msg}");
    }

    #[test]
    fn rate_limited_display() {
        let e = StoryError::RateLimited {
            retry_after_ms: 1500,
        };
        assert!(e.to_string().contains("1500ms"));
    }

    #[test]
    fn page_error_display_mentions_page() {
        let e = PageError::ContentFlagged {
            page: 2,
            attempts: 3,
        };
        assert!(e.to_string().contains("Page 2"));
        assert!(e.to_string().contains("3 attempts"));
    }

    #[test]
    fn page_error_serialises() {
        let e = PageError::Timeout { page: 4, secs: 60 };
        let json = serde_json::to_string(&e).unwrap();
        let back: PageError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
    }
}
