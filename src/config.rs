//! Configuration types for story generation.
//!
//! All pipeline behaviour is controlled through [`StoryConfig`], built via
//! its [`StoryConfigBuilder`]. Every knob lives in one struct so configs can
//! be shared across tasks, logged, and compared between runs.

use crate::error::StoryError;
use crate::progress::ProgressCallback;
use crate::service::image::ImageGenerator;
use crate::service::text::TextGenerator;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Default image reference for a page whose generation attempts were exhausted.
pub const DEFAULT_PLACEHOLDER_URL: &str = "/images/story-placeholder.png";

/// Configuration for one story-generation run.
///
/// Built via [`StoryConfig::builder()`] or using [`StoryConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_storybook::StoryConfig;
///
/// let config = StoryConfig::builder()
///     .image_concurrency(3)
///     .image_max_retries(2)
///     .model("anthropic/claude-sonnet-4")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct StoryConfig {
    /// Maximum image requests in flight at once. Default: 3.
    ///
    /// Image services rate-limit aggressively; three parallel requests keep
    /// a 16-page story well under a minute without tripping 429s.
    pub image_concurrency: usize,

    /// How page tasks are scheduled under the concurrency bound. Default: [`ImageSchedule::Pool`].
    pub image_schedule: ImageSchedule,

    /// Extra attempts after the primary one, each with the safer prompt. Default: 2.
    pub image_max_retries: u32,

    /// Base delay between attempts in milliseconds. Default: 400.
    ///
    /// Linear: attempt `k` waits `k * image_retry_delay_ms` (400 ms, 800 ms).
    pub image_retry_delay_ms: u64,

    /// Inference steps sent to the image model. Default: 4 (FLUX schnell).
    pub image_steps: u32,

    /// Guidance scale sent to the image model. Default: 3.5.
    pub image_guidance: f32,

    /// Output image size. Default: [`ImageSize::Landscape4x3`].
    pub image_size: ImageSize,

    /// Image reference substituted for pages that could not be illustrated.
    pub placeholder_url: String,

    /// Soft cap on the composed image prompt, in characters. Default: 2400.
    pub prompt_soft_cap: usize,

    /// Sampling temperature for the story-text call. Default: 0.65.
    pub story_temperature: f32,

    /// Per-call timeout for every external request, in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Overall deadline for one story. Default: None (no deadline).
    pub pipeline_timeout_secs: Option<u64>,

    /// LLM model identifier, e.g. "anthropic/claude-sonnet-4".
    /// If None, uses the provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openrouter", "openai", "anthropic").
    pub provider_name: Option<String>,

    /// Pre-constructed text generator. Takes precedence over `provider_name`.
    pub text_generator: Option<Arc<dyn TextGenerator>>,

    /// Pre-constructed image generator. Takes precedence over `FAL_KEY`.
    pub image_generator: Option<Arc<dyn ImageGenerator>>,

    /// Receives stage and per-page events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for StoryConfig {
    fn default() -> Self {
        Self {
            image_concurrency: 3,
            image_schedule: ImageSchedule::default(),
            image_max_retries: 2,
            image_retry_delay_ms: 400,
            image_steps: 4,
            image_guidance: 3.5,
            image_size: ImageSize::default(),
            placeholder_url: DEFAULT_PLACEHOLDER_URL.to_string(),
            prompt_soft_cap: 2400,
            story_temperature: 0.65,
            api_timeout_secs: 60,
            pipeline_timeout_secs: None,
            model: None,
            provider_name: None,
            text_generator: None,
            image_generator: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for StoryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoryConfig")
            .field("image_concurrency", &self.image_concurrency)
            .field("image_schedule", &self.image_schedule)
            .field("image_max_retries", &self.image_max_retries)
            .field("image_retry_delay_ms", &self.image_retry_delay_ms)
            .field("image_steps", &self.image_steps)
            .field("image_guidance", &self.image_guidance)
            .field("image_size", &self.image_size)
            .field("placeholder_url", &self.placeholder_url)
            .field("prompt_soft_cap", &self.prompt_soft_cap)
            .field("story_temperature", &self.story_temperature)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("pipeline_timeout_secs", &self.pipeline_timeout_secs)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field(
                "text_generator",
                &self.text_generator.as_ref().map(|_| "<dyn TextGenerator>"),
            )
            .field(
                "image_generator",
                &self.image_generator.as_ref().map(|_| "<dyn ImageGenerator>"),
            )
            .finish()
    }
}

impl StoryConfig {
    /// Create a new builder for `StoryConfig`.
    pub fn builder() -> StoryConfigBuilder {
        StoryConfigBuilder {
            config: Self::default(),
        }
    }

    /// Total attempts per page: the primary plus every retry.
    pub fn image_attempts(&self) -> u32 {
        self.image_max_retries + 1
    }
}

/// Builder for [`StoryConfig`].
#[derive(Debug)]
pub struct StoryConfigBuilder {
    config: StoryConfig,
}

impl StoryConfigBuilder {
    pub fn image_concurrency(mut self, n: usize) -> Self {
        self.config.image_concurrency = n;
        self
    }

    pub fn image_schedule(mut self, schedule: ImageSchedule) -> Self {
        self.config.image_schedule = schedule;
        self
    }

    pub fn image_max_retries(mut self, n: u32) -> Self {
        self.config.image_max_retries = n;
        self
    }

    pub fn image_retry_delay_ms(mut self, ms: u64) -> Self {
        self.config.image_retry_delay_ms = ms;
        self
    }

    pub fn image_steps(mut self, steps: u32) -> Self {
        self.config.image_steps = steps.max(1);
        self
    }

    pub fn image_guidance(mut self, guidance: f32) -> Self {
        self.config.image_guidance = guidance.clamp(0.0, 20.0);
        self
    }

    pub fn image_size(mut self, size: ImageSize) -> Self {
        self.config.image_size = size;
        self
    }

    pub fn placeholder_url(mut self, url: impl Into<String>) -> Self {
        self.config.placeholder_url = url.into();
        self
    }

    pub fn prompt_soft_cap(mut self, chars: usize) -> Self {
        self.config.prompt_soft_cap = chars;
        self
    }

    pub fn story_temperature(mut self, t: f32) -> Self {
        self.config.story_temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn pipeline_timeout_secs(mut self, secs: u64) -> Self {
        self.config.pipeline_timeout_secs = Some(secs);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn text_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.config.text_generator = Some(generator);
        self
    }

    pub fn image_generator(mut self, generator: Arc<dyn ImageGenerator>) -> Self {
        self.config.image_generator = Some(generator);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<StoryConfig, StoryError> {
        let c = &self.config;
        if c.image_concurrency == 0 {
            return Err(StoryError::InvalidConfig(
                "Image concurrency must be ≥ 1".into(),
            ));
        }
        if c.image_max_retries > 10 {
            return Err(StoryError::InvalidConfig(format!(
                "Image retries must be 0–10, got {}",
                c.image_max_retries
            )));
        }
        if c.prompt_soft_cap < 200 {
            return Err(StoryError::InvalidConfig(format!(
                "Prompt soft cap must be ≥ 200 chars, got {}",
                c.prompt_soft_cap
            )));
        }
        if c.placeholder_url.trim().is_empty() {
            return Err(StoryError::InvalidConfig(
                "Placeholder URL must not be empty".into(),
            ));
        }
        if c.api_timeout_secs == 0 {
            return Err(StoryError::InvalidConfig(
                "API timeout must be ≥ 1s".into(),
            ));
        }
        if c.pipeline_timeout_secs == Some(0) {
            return Err(StoryError::InvalidConfig(
                "Pipeline timeout must be ≥ 1s".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Illustration style. Each maps to a fixed descriptor phrase in
/// [`crate::prompts::style_descriptor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtStyle {
    /// Flat, rounded cartoon shapes with bold outlines.
    PeppaPig,
    /// Classic small-format German picture-book look. (default)
    #[default]
    PixiBook,
    Watercolor,
    Comic,
}

impl ArtStyle {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "peppa-pig" | "peppa" => Some(ArtStyle::PeppaPig),
            "pixi-book" | "pixi" => Some(ArtStyle::PixiBook),
            "watercolor" | "watercolour" => Some(ArtStyle::Watercolor),
            "comic" => Some(ArtStyle::Comic),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtStyle::PeppaPig => "peppa-pig",
            ArtStyle::PixiBook => "pixi-book",
            ArtStyle::Watercolor => "watercolor",
            ArtStyle::Comic => "comic",
        }
    }
}

/// Story tone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoryType {
    #[default]
    Fantasy,
    Realistic,
}

impl StoryType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fantasy" => Some(StoryType::Fantasy),
            "realistic" => Some(StoryType::Realistic),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StoryType::Fantasy => "fantasy",
            StoryType::Realistic => "realistic",
        }
    }
}

/// Scheduling of page tasks under the concurrency bound.
///
/// | Mode | Behaviour |
/// |------|-----------|
/// | `Pool` | a new page starts as soon as any in-flight page settles (default) |
/// | `Batched` | start `image_concurrency` pages, wait for all of them, then the next group |
///
/// Both modes cap in-flight image requests at `image_concurrency`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageSchedule {
    #[default]
    Pool,
    Batched,
}

/// Image size preset understood by the image service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ImageSize {
    #[serde(rename = "square_hd")]
    SquareHd,
    #[serde(rename = "square")]
    Square,
    #[serde(rename = "portrait_4_3")]
    Portrait4x3,
    #[serde(rename = "portrait_16_9")]
    Portrait16x9,
    #[default]
    #[serde(rename = "landscape_4_3")]
    Landscape4x3,
    #[serde(rename = "landscape_16_9")]
    Landscape16x9,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documentation() {
        let c = StoryConfig::default();
        assert_eq!(c.image_concurrency, 3);
        assert_eq!(c.image_max_retries, 2);
        assert_eq!(c.image_attempts(), 3);
        assert_eq!(c.image_retry_delay_ms, 400);
        assert_eq!(c.prompt_soft_cap, 2400);
        assert_eq!(c.placeholder_url, DEFAULT_PLACEHOLDER_URL);
        assert!(c.pipeline_timeout_secs.is_none());
    }

    #[test]
    fn builder_rejects_zero_concurrency() {
        let err = StoryConfig::builder().image_concurrency(0).build().unwrap_err();
        assert!(matches!(err, StoryError::InvalidConfig(_)));
        let c = StoryConfig::builder().image_concurrency(1).build().unwrap();
        assert_eq!(c.image_concurrency, 1);
    }

    #[test]
    fn builder_rejects_tiny_prompt_cap() {
        let err = StoryConfig::builder().prompt_soft_cap(50).build().unwrap_err();
        assert!(err.to_string().contains("soft cap"));
    }

    #[test]
    fn builder_rejects_zero_pipeline_timeout() {
        assert!(StoryConfig::builder()
            .pipeline_timeout_secs(0)
            .build()
            .is_err());
    }

    #[test]
    fn art_style_wire_names() {
        assert_eq!(
            serde_json::to_string(&ArtStyle::PeppaPig).unwrap(),
            "\"peppa-pig\""
        );
        assert_eq!(ArtStyle::parse("Watercolour"), Some(ArtStyle::Watercolor));
        assert_eq!(ArtStyle::parse("oil"), None);
    }

    #[test]
    fn image_size_wire_names() {
        assert_eq!(
            serde_json::to_string(&ImageSize::Landscape4x3).unwrap(),
            "\"landscape_4_3\""
        );
    }

    #[test]
    fn debug_hides_generators() {
        let s = format!("{:?}", StoryConfig::default());
        assert!(s.contains("image_concurrency"));
        assert!(s.contains("text_generator: None"));
    }
}
