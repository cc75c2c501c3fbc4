//! Story generation entry points.
//!
//! ## Stages
//!
//! ```text
//! StoryRequest
//!  ├─ 1. Story text   one chat call → parse → exactly N pages   (fatal on service error)
//!  ├─ 2. Metadata ┐   two chat calls, concurrent                 (degrade on failure)
//!  │     Cast     ┘
//!  ├─ 3. Plan         one chat call → variety enforcement        (degrade on failure)
//!  ├─ 4. Context      seed + metadata + cast, frozen
//!  ├─ 5. Illustrate   N image pages under the concurrency bound  (per-page placeholder)
//!  └─ 6. Assemble     text_content[i] / image_urls[i], stats
//! ```
//!
//! Only stage 1 can fail the request. Once the story text exists the caller
//! always receives a complete, index-aligned story.

use crate::config::StoryConfig;
use crate::error::{ServiceError, StoryError};
use crate::model::{PagedStory, StoryContext, StoryRequest};
use crate::output::{StoryOutput, StoryStats};
use crate::pipeline::extract::{extract_cast, extract_metadata};
use crate::pipeline::illustrate::illustrate_pages;
use crate::pipeline::parse::parse_story;
use crate::pipeline::plan::plan_visuals;
use crate::pipeline::seed::story_seed;
use crate::progress::Stage;
use crate::prompts::{
    continue_user_prompt, story_system_prompt, story_user_prompt, CONTINUE_SYSTEM_PROMPT,
};
use crate::service::image::{FalImageGenerator, ImageGenerator};
use crate::service::text::{GenerationOptions, LlmTextGenerator, TextGenerator};
use edgequake_llm::{LLMProvider, ProviderFactory};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

/// Model used when OpenRouter is selected without an explicit model.
pub const DEFAULT_OPENROUTER_MODEL: &str = "anthropic/claude-sonnet-4";

const STORY_PRESENCE_PENALTY: f32 = 0.3;
const STORY_FREQUENCY_PENALTY: f32 = 0.25;

const CONTINUE_TEMPERATURE: f32 = 0.7;
const CONTINUE_MAX_TOKENS: usize = 600;

/// Generate a complete illustrated story.
///
/// Text and image generators are resolved from `config` (see
/// [`resolve_text_generator`] and [`resolve_image_generator`]).
///
/// # Errors
/// Returns `Err(StoryError)` only when no story can be produced:
/// - the request is empty or asks for zero pages
/// - no provider could be configured
/// - the story-text call failed
/// - the optional pipeline deadline elapsed
///
/// Failed illustrations are **not** errors; check `output.stats.placeholder_pages`.
pub async fn generate_story(
    request: &StoryRequest,
    config: &StoryConfig,
) -> Result<StoryOutput, StoryError> {
    check_request(request)?;
    let text = resolve_text_generator(config)?;
    let image = resolve_image_generator(config)?;
    generate_story_with(request, config, text.as_ref(), image.as_ref()).await
}

/// Generate a story with explicit generators, ignoring those in `config`.
pub async fn generate_story_with(
    request: &StoryRequest,
    config: &StoryConfig,
    text: &dyn TextGenerator,
    image: &dyn ImageGenerator,
) -> Result<StoryOutput, StoryError> {
    check_request(request)?;
    match config.pipeline_timeout_secs {
        Some(secs) => timeout(
            Duration::from_secs(secs),
            run_pipeline(request, config, text, image),
        )
        .await
        .map_err(|_| StoryError::PipelineTimeout { secs })?,
        None => run_pipeline(request, config, text, image).await,
    }
}

/// Generate a story and write it as pretty JSON to `output_path`.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn generate_to_file(
    request: &StoryRequest,
    output_path: impl AsRef<Path>,
    config: &StoryConfig,
) -> Result<StoryOutput, StoryError> {
    let output = generate_story(request, config).await?;
    let path = output_path.as_ref();
    let json = serde_json::to_vec_pretty(&output)
        .map_err(|e| StoryError::Internal(format!("Failed to serialise story: {}", e)))?;
    write_atomic(path, &json).await?;
    info!("Story written to {}", path.display());
    Ok(output)
}

/// Continue an existing story with one more passage.
///
/// One text call, no parsing: the reply is returned as plain prose with
/// surrounding whitespace trimmed.
///
/// # Errors
/// - [`StoryError::InvalidRequest`] when either input is blank
/// - [`StoryError::ProviderNotConfigured`] when no text provider resolves
/// - [`StoryError::TextGenerationFailed`] when the call fails or the reply is empty
pub async fn continue_story(
    story_so_far: &str,
    user_input: &str,
    config: &StoryConfig,
) -> Result<String, StoryError> {
    check_continuation(story_so_far, user_input)?;
    let text = resolve_text_generator(config)?;
    continue_story_with(story_so_far, user_input, text.as_ref()).await
}

/// [`continue_story`] with an explicit text generator.
pub async fn continue_story_with(
    story_so_far: &str,
    user_input: &str,
    text: &dyn TextGenerator,
) -> Result<String, StoryError> {
    check_continuation(story_so_far, user_input)?;
    let options = GenerationOptions::new(CONTINUE_TEMPERATURE, CONTINUE_MAX_TOKENS);
    let prompt = continue_user_prompt(story_so_far, user_input);
    let raw = text
        .generate(CONTINUE_SYSTEM_PROMPT, &prompt, &options)
        .await
        .map_err(|source| StoryError::TextGenerationFailed { source })?;

    let passage = raw.trim();
    if passage.is_empty() {
        return Err(StoryError::TextGenerationFailed {
            source: ServiceError::InvalidResponse {
                service: "text generation".to_string(),
                detail: "empty continuation".to_string(),
            },
        });
    }
    info!("Continued story with {} chars", passage.chars().count());
    Ok(passage.to_string())
}

/// Synchronous wrapper around [`generate_story`].
///
/// Creates a temporary tokio runtime internally.
pub fn generate_sync(
    request: &StoryRequest,
    config: &StoryConfig,
) -> Result<StoryOutput, StoryError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| StoryError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(generate_story(request, config))
}

// ── Pipeline ─────────────────────────────────────────────────────────────

async fn run_pipeline(
    request: &StoryRequest,
    config: &StoryConfig,
    text: &dyn TextGenerator,
    image: &dyn ImageGenerator,
) -> Result<StoryOutput, StoryError> {
    let total_start = Instant::now();
    let page_count = request.page_count;
    info!(
        "Generating {}-page {} story ({})",
        page_count,
        request.story_type.as_str(),
        request.art_style.as_str()
    );

    // ── Step 1: Story text ───────────────────────────────────────────────
    report_stage(config, Stage::StoryText);
    let system_prompt = story_system_prompt(page_count);
    let user_prompt = story_user_prompt(&request.raw_input, request.story_type, request.art_style);
    let options = story_options(config, page_count);
    let raw = text
        .generate(&system_prompt, &user_prompt, &options)
        .await
        .map_err(|source| StoryError::TextGenerationFailed { source })?;

    let parsed = parse_story(&raw, page_count);
    let story_fell_back = parsed.is_fallback();
    let story = parsed.into_inner();
    info!(
        "Story \"{}\": {} pages ({} blank)",
        story.title,
        story.pages.len(),
        story.pages.iter().filter(|p| p.is_blank()).count()
    );
    if story_fell_back {
        warn!("Continuing with placeholder text for every page");
    }

    // ── Step 2: Metadata and cast ────────────────────────────────────────
    report_stage(config, Stage::Metadata);
    report_stage(config, Stage::Cast);
    let (metadata, cast) = tokio::join!(extract_metadata(text, &story), extract_cast(text, &story));

    // ── Step 3: Visual plan ──────────────────────────────────────────────
    report_stage(config, Stage::VisualPlan);
    let plan = plan_visuals(text, &story).await;
    let text_duration_ms = total_start.elapsed().as_millis() as u64;

    // ── Step 4: Frozen story context ─────────────────────────────────────
    let ctx = StoryContext {
        title: story.title.clone(),
        seed: story_seed(&request.raw_input),
        art_style: request.art_style,
        story_type: request.story_type,
        metadata,
        cast,
    };
    debug!("Story seed {}, {} cast members", ctx.seed, ctx.cast.len());

    // ── Step 5: Illustrate ───────────────────────────────────────────────
    report_stage(config, Stage::Illustration);
    let image_start = Instant::now();
    let pages = illustrate_pages(image, &ctx, &story.pages, &plan, config).await;
    let image_duration_ms = image_start.elapsed().as_millis() as u64;

    // ── Step 6: Assemble ─────────────────────────────────────────────────
    let text_content = final_page_texts(&story, &ctx.metadata.summary);
    let image_urls: Vec<String> = pages
        .iter()
        .map(|p| p.image.url(&config.placeholder_url).to_string())
        .collect();
    debug_assert_eq!(text_content.len(), page_count);
    debug_assert_eq!(image_urls.len(), page_count);

    let generated_images = pages.iter().filter(|p| !p.image.is_placeholder()).count();
    let stats = StoryStats {
        page_count,
        generated_images,
        placeholder_pages: page_count - generated_images,
        total_image_attempts: pages.iter().map(|p| p.attempts as usize).sum(),
        total_duration_ms: total_start.elapsed().as_millis() as u64,
        text_duration_ms,
        image_duration_ms,
    };

    info!(
        "Story complete: {}/{} illustrated, {}ms total",
        generated_images, page_count, stats.total_duration_ms
    );

    Ok(StoryOutput {
        title: ctx.title,
        text_content,
        image_urls,
        pages,
        metadata: ctx.metadata,
        cast: ctx.cast,
        plan,
        seed: ctx.seed,
        stats,
    })
}

/// Options for the story-text call: JSON mode with mild repetition penalties.
pub fn story_options(config: &StoryConfig, page_count: usize) -> GenerationOptions {
    GenerationOptions::new(config.story_temperature, story_max_tokens(page_count))
        .json_mode()
        .with_penalties(STORY_PRESENCE_PENALTY, STORY_FREQUENCY_PENALTY)
}

/// Token budget for the story-text call: 200 per page plus headroom, 2000–6000.
pub fn story_max_tokens(page_count: usize) -> usize {
    (page_count * 200 + 1200).clamp(2000, 6000)
}

/// Final per-page text. A blank page shows the summary, or `Page N` if there is none.
pub fn final_page_texts(story: &PagedStory, summary: &str) -> Vec<String> {
    let summary = summary.trim();
    story
        .pages
        .iter()
        .enumerate()
        .map(|(i, page)| {
            if !page.is_blank() {
                page.text.clone()
            } else if !summary.is_empty() {
                summary.to_string()
            } else {
                format!("Page {}", i + 1)
            }
        })
        .collect()
}

fn check_request(request: &StoryRequest) -> Result<(), StoryError> {
    if request.raw_input.trim().is_empty() {
        return Err(StoryError::InvalidRequest("story prompt is empty".into()));
    }
    if request.page_count == 0 {
        return Err(StoryError::InvalidRequest("page count must be ≥ 1".into()));
    }
    Ok(())
}

fn check_continuation(story_so_far: &str, user_input: &str) -> Result<(), StoryError> {
    if story_so_far.trim().is_empty() {
        return Err(StoryError::InvalidRequest("Story content is required".into()));
    }
    if user_input.trim().is_empty() {
        return Err(StoryError::InvalidRequest("User input is required".into()));
    }
    Ok(())
}

fn report_stage(config: &StoryConfig, stage: Stage) {
    debug!("Stage: {}", stage);
    if let Some(ref cb) = config.progress_callback {
        cb.on_stage(stage);
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoryError> {
    let write_err = |e| StoryError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, bytes).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
    Ok(())
}

// ── Generator resolution ─────────────────────────────────────────────────

/// Resolve the text generator, from most-specific to least-specific.
///
/// 1. **Pre-built generator** (`config.text_generator`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`) via
///    [`ProviderFactory::create_llm_provider`], which reads that provider's
///    API key from the environment.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **OpenRouter** when `OPENROUTER_API_KEY` is set, with
///    `config.model` or [`DEFAULT_OPENROUTER_MODEL`].
/// 5. **Full auto-detection** (`ProviderFactory::from_env`).
///
/// Every provider is wrapped in an [`LlmTextGenerator`] carrying
/// `config.api_timeout_secs`.
pub fn resolve_text_generator(config: &StoryConfig) -> Result<Arc<dyn TextGenerator>, StoryError> {
    if let Some(ref generator) = config.text_generator {
        return Ok(Arc::clone(generator));
    }

    let provider = resolve_provider(config)?;
    Ok(Arc::new(LlmTextGenerator::new(provider, config.api_timeout_secs)))
}

/// Resolve the image generator: `config.image_generator`, else fal.ai from `FAL_KEY`.
pub fn resolve_image_generator(config: &StoryConfig) -> Result<Arc<dyn ImageGenerator>, StoryError> {
    if let Some(ref generator) = config.image_generator {
        return Ok(Arc::clone(generator));
    }

    let fal = FalImageGenerator::from_env(config.api_timeout_secs).map_err(|e| {
        StoryError::ProviderNotConfigured {
            provider: "fal.ai".to_string(),
            hint: format!("{e}"),
        }
    })?;
    Ok(Arc::new(fal))
}

fn resolve_provider(config: &StoryConfig) -> Result<Arc<dyn LLMProvider>, StoryError> {
    if let Some(ref name) = config.provider_name {
        let model = config
            .model
            .as_deref()
            .unwrap_or_else(|| default_model_for(name));
        info!("Text generation via {} / {}", name, model);
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if let Ok(key) = std::env::var("OPENROUTER_API_KEY") {
        if !key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_OPENROUTER_MODEL);
            return create_provider("openrouter", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| StoryError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENROUTER_API_KEY, OPENAI_API_KEY or ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, StoryError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        StoryError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

fn default_model_for(provider_name: &str) -> &'static str {
    match provider_name {
        "openai" => "gpt-4.1-mini",
        "anthropic" => "claude-sonnet-4-20250514",
        "gemini" => "gemini-2.0-flash",
        _ => DEFAULT_OPENROUTER_MODEL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PageText;

    #[test]
    fn story_token_budget_is_clamped() {
        assert_eq!(story_max_tokens(3), 2000);
        assert_eq!(story_max_tokens(8), 2800);
        assert_eq!(story_max_tokens(16), 4400);
        assert_eq!(story_max_tokens(40), 6000);
    }

    #[test]
    fn story_call_requests_json_mode_and_penalties() {
        let config = StoryConfig::default();
        let options = story_options(&config, 8);
        assert!(options.json);
        assert_eq!(options.presence_penalty, Some(0.3));
        assert_eq!(options.frequency_penalty, Some(0.25));
        assert_eq!(options.max_tokens, 2800);
        assert_eq!(options.temperature, config.story_temperature);
    }

    #[test]
    fn blank_pages_get_summary_or_page_marker() {
        let story = PagedStory {
            title: "T".into(),
            pages: vec![PageText::new("A"), PageText::blank()],
        };
        assert_eq!(final_page_texts(&story, "  A fox story. "), vec!["A", "A fox story."]);
        assert_eq!(final_page_texts(&story, "   "), vec!["A", "Page 2"]);
    }

    #[test]
    fn empty_request_is_rejected() {
        let req = StoryRequest::new("   ", 8, Default::default(), Default::default());
        assert!(matches!(check_request(&req), Err(StoryError::InvalidRequest(_))));
        let req = StoryRequest::new("a fox", 0, Default::default(), Default::default());
        assert!(matches!(check_request(&req), Err(StoryError::InvalidRequest(_))));
    }

    struct Recording {
        reply: Result<String, ServiceError>,
        seen: std::sync::Mutex<Vec<(String, String, GenerationOptions)>>,
    }

    impl Recording {
        fn replying(reply: &str) -> Self {
            Self {
                reply: Ok(reply.to_string()),
                seen: Default::default(),
            }
        }
    }

    #[async_trait::async_trait]
    impl TextGenerator for Recording {
        async fn generate(
            &self,
            system_prompt: &str,
            user_prompt: &str,
            options: &GenerationOptions,
        ) -> Result<String, ServiceError> {
            self.seen.lock().unwrap().push((
                system_prompt.to_string(),
                user_prompt.to_string(),
                *options,
            ));
            self.reply.clone()
        }
    }

    #[tokio::test]
    async fn continuation_makes_one_plain_call() {
        let text = Recording::replying("  Then the rain stopped.\n");
        let passage = continue_story_with("Fox found the moon.", "it starts to rain", &text)
            .await
            .unwrap();
        assert_eq!(passage, "Then the rain stopped.");

        let seen = text.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let (system, user, options) = &seen[0];
        assert_eq!(system, CONTINUE_SYSTEM_PROMPT);
        assert!(user.starts_with("Story so far:\n\nFox found the moon."));
        assert!(user.ends_with("Continue the story based on: it starts to rain"));
        assert_eq!(options.temperature, 0.7);
        assert_eq!(options.max_tokens, 600);
        assert!(!options.json);
    }

    #[tokio::test]
    async fn continuation_rejects_blank_inputs_before_calling() {
        let text = Recording::replying("more");
        for (so_far, input) in [("  ", "rain"), ("Fox found the moon.", "\n")] {
            let err = continue_story_with(so_far, input, &text).await.unwrap_err();
            assert!(matches!(err, StoryError::InvalidRequest(_)));
        }
        assert!(text.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn continuation_failures_are_text_generation_errors() {
        let empty = Recording::replying("   ");
        let err = continue_story_with("Fox.", "rain", &empty).await.unwrap_err();
        assert!(matches!(err, StoryError::TextGenerationFailed { .. }));

        let failing = Recording {
            reply: Err(ServiceError::Provider("down".into())),
            seen: Default::default(),
        };
        let err = continue_story_with("Fox.", "rain", &failing).await.unwrap_err();
        assert!(matches!(err, StoryError::TextGenerationFailed { .. }));
    }

    #[test]
    fn injected_generators_win() {
        use crate::service::image::{ImageRequest, ImageResponse};
        use async_trait::async_trait;

        struct Nothing;

        #[async_trait]
        impl ImageGenerator for Nothing {
            async fn generate(&self, _r: &ImageRequest) -> Result<ImageResponse, ServiceError> {
                Ok(ImageResponse::default())
            }
        }

        let image: Arc<dyn ImageGenerator> = Arc::new(Nothing);
        let config = StoryConfig::builder()
            .image_generator(Arc::clone(&image))
            .build()
            .unwrap();
        let resolved = resolve_image_generator(&config).unwrap();
        assert!(Arc::ptr_eq(&resolved, &image));
    }

    #[test]
    fn default_models() {
        assert_eq!(default_model_for("openrouter"), DEFAULT_OPENROUTER_MODEL);
        assert_eq!(default_model_for("openai"), "gpt-4.1-mini");
    }
}
