//! Image generation orchestration: one image per page under a concurrency
//! bound, with retry, safer-prompt fallback and placeholder assignment.
//!
//! ## Per-page state machine
//!
//! ```text
//! attempt 1 (primary prompt)
//!   ├─ image, not flagged ─────────────────────────▶ Generated
//!   └─ error / no image / flagged / timeout
//!        ▼ wait delay × 1, switch to safer prompt
//! attempt 2 ──── same outcomes ───────────────────▶ Generated
//!        ▼ wait delay × 2
//! attempt 3 ──── same outcomes ───────────────────▶ Generated
//!        ▼
//!   Placeholder (+ PageError describing the last failure)
//! ```
//!
//! ## Alignment
//!
//! Results land in a pre-sized `Vec<Option<PageIllustration>>` at the index
//! the page was scheduled with. Completion order never matters and nothing
//! is ever appended, so `output[i]` always belongs to page `i + 1`.

use crate::config::{ImageSchedule, StoryConfig};
use crate::error::{PageError, ServiceError};
use crate::model::{PageText, StoryContext, VisualPlanEntry};
use crate::output::{ImageResult, PageIllustration};
use crate::pipeline::compose::{compose_prompt, compose_safer_prompt};
use crate::prompts::{NEGATIVE_CONSTRAINTS, SAFER_NEGATIVE_CONSTRAINTS};
use crate::service::image::{ImageGenerator, ImageRequest, ImageResponse};
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use std::fmt;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

/// Why one attempt was rejected. Every variant is retryable.
#[derive(Debug)]
enum AttemptFailure {
    Service(ServiceError),
    NoImages,
    Flagged,
    TimedOut(u64),
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptFailure::Service(e) => write!(f, "{}", e),
            AttemptFailure::NoImages => f.write_str("no images returned"),
            AttemptFailure::Flagged => f.write_str("flagged by safety checker"),
            AttemptFailure::TimedOut(secs) => write!(f, "timed out after {}s", secs),
        }
    }
}

impl AttemptFailure {
    fn into_page_error(self, page: usize, attempts: u8) -> PageError {
        match self {
            AttemptFailure::Service(e) => PageError::GenerationFailed {
                page,
                attempts,
                detail: e.to_string(),
            },
            AttemptFailure::NoImages => PageError::NoImages { page, attempts },
            AttemptFailure::Flagged => PageError::ContentFlagged { page, attempts },
            AttemptFailure::TimedOut(secs) => PageError::Timeout { page, secs },
        }
    }
}

/// Illustrate every page. Returns exactly `pages.len()` entries, in page order.
///
/// `plan` is expected to be index-aligned with `pages`; a missing entry is
/// treated as the default entry.
pub async fn illustrate_pages(
    generator: &dyn ImageGenerator,
    ctx: &StoryContext,
    pages: &[PageText],
    plan: &[VisualPlanEntry],
    config: &StoryConfig,
) -> Vec<PageIllustration> {
    let total = pages.len();
    let limit = config.image_concurrency.max(1);
    let default_entry = VisualPlanEntry::default();

    info!(
        "Illustrating {} pages ({:?}, {} in flight, {} attempts each)",
        total,
        config.image_schedule,
        limit,
        config.image_attempts()
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_illustration_start(total);
    }

    let run = |index: usize| {
        let text = pages[index].text.as_str();
        let entry = plan.get(index).unwrap_or(&default_entry);
        async move {
            let result = illustrate_page(generator, ctx, index, text, entry, config, total).await;
            (index, result)
        }
    };

    let mut slots: Vec<Option<PageIllustration>> = vec![None; total];

    match config.image_schedule {
        ImageSchedule::Pool => {
            let mut settled = stream::iter((0..total).map(&run)).buffer_unordered(limit);
            while let Some((index, result)) = settled.next().await {
                slots[index] = Some(result);
            }
        }
        ImageSchedule::Batched => {
            let indices: Vec<usize> = (0..total).collect();
            for batch in indices.chunks(limit) {
                debug!("Starting batch of pages {:?}", batch.iter().map(|i| i + 1).collect::<Vec<_>>());
                for (index, result) in join_all(batch.iter().copied().map(&run)).await {
                    slots[index] = Some(result);
                }
            }
        }
    }

    let illustrations: Vec<PageIllustration> = slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| slot.unwrap_or_else(|| PageIllustration::placeholder(index + 1, None)))
        .collect();

    let generated = illustrations
        .iter()
        .filter(|p| !p.image.is_placeholder())
        .count();
    info!("Illustrated {}/{} pages", generated, total);
    if let Some(ref cb) = config.progress_callback {
        cb.on_story_complete(total, generated);
    }

    illustrations
}

/// Drive one page through its attempts. Never fails; exhaustion yields the placeholder.
async fn illustrate_page(
    generator: &dyn ImageGenerator,
    ctx: &StoryContext,
    index: usize,
    text: &str,
    entry: &VisualPlanEntry,
    config: &StoryConfig,
    total: usize,
) -> PageIllustration {
    let start = Instant::now();
    let page_num = index + 1;
    let max_attempts = config.image_attempts();

    if let Some(ref cb) = config.progress_callback {
        cb.on_page_start(page_num, total);
    }

    let mut last_failure: Option<AttemptFailure> = None;

    for attempt in 1..=max_attempts {
        let safer = attempt > 1;
        if safer {
            let delay = config.image_retry_delay_ms * u64::from(attempt - 1);
            warn!(
                "Page {}: retry {}/{} with safer prompt after {}ms",
                page_num,
                attempt - 1,
                max_attempts - 1,
                delay
            );
            sleep(Duration::from_millis(delay)).await;
            if let Some(ref cb) = config.progress_callback {
                let reason = last_failure
                    .as_ref()
                    .map(|f| f.to_string())
                    .unwrap_or_default();
                cb.on_page_retry(page_num, attempt, &reason);
            }
        }

        let request = build_request(ctx, index, text, entry, config, safer);
        let outcome = timeout(
            Duration::from_secs(config.api_timeout_secs),
            generator.generate(&request),
        )
        .await;

        match classify(outcome, config.api_timeout_secs) {
            Ok(url) => {
                let duration_ms = start.elapsed().as_millis() as u64;
                debug!("Page {}: image on attempt {} ({}ms)", page_num, attempt, duration_ms);
                if let Some(ref cb) = config.progress_callback {
                    cb.on_page_complete(page_num, total, false);
                }
                return PageIllustration {
                    page_num,
                    image: ImageResult::Generated { url },
                    attempts: attempt as u8,
                    used_safer_prompt: safer,
                    duration_ms,
                    error: None,
                };
            }
            Err(failure) => {
                warn!("Page {}: attempt {} failed: {}", page_num, attempt, failure);
                last_failure = Some(failure);
            }
        }
    }

    let attempts = max_attempts as u8;
    let error = last_failure
        .unwrap_or(AttemptFailure::NoImages)
        .into_page_error(page_num, attempts);
    warn!("{}; using placeholder", error);

    if let Some(ref cb) = config.progress_callback {
        cb.on_page_complete(page_num, total, true);
    }

    PageIllustration {
        page_num,
        image: ImageResult::Placeholder,
        attempts,
        used_safer_prompt: max_attempts > 1,
        duration_ms: start.elapsed().as_millis() as u64,
        error: Some(error),
    }
}

fn build_request(
    ctx: &StoryContext,
    index: usize,
    text: &str,
    entry: &VisualPlanEntry,
    config: &StoryConfig,
    safer: bool,
) -> ImageRequest {
    let (prompt, negative_prompt) = if safer {
        (
            compose_safer_prompt(ctx, index, text, entry),
            SAFER_NEGATIVE_CONSTRAINTS,
        )
    } else {
        (
            compose_prompt(ctx, index, text, entry, config.prompt_soft_cap),
            NEGATIVE_CONSTRAINTS,
        )
    };

    ImageRequest {
        prompt,
        negative_prompt: negative_prompt.to_string(),
        seed: ctx.seed,
        size: config.image_size,
        steps: config.image_steps,
        guidance: config.image_guidance,
        safety_check: true,
    }
}

fn classify(
    outcome: Result<Result<ImageResponse, ServiceError>, tokio::time::error::Elapsed>,
    timeout_secs: u64,
) -> Result<String, AttemptFailure> {
    let response = match outcome {
        Err(_) => return Err(AttemptFailure::TimedOut(timeout_secs)),
        Ok(Err(e)) => return Err(AttemptFailure::Service(e)),
        Ok(Ok(response)) => response,
    };
    if response.images.is_empty() {
        return Err(AttemptFailure::NoImages);
    }
    response
        .first_safe()
        .map(str::to_string)
        .ok_or(AttemptFailure::Flagged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ArtStyle, StoryType};
    use crate::model::StoryMetadata;
    use crate::prompts::SAFER_PREAMBLE;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn ctx() -> StoryContext {
        StoryContext {
            title: "T".into(),
            seed: 99,
            art_style: ArtStyle::PixiBook,
            story_type: StoryType::Fantasy,
            metadata: StoryMetadata::default(),
            cast: vec![],
        }
    }

    fn pages(n: usize) -> Vec<PageText> {
        (1..=n).map(|i| PageText::new(format!("page {i} text"))).collect()
    }

    fn config(schedule: ImageSchedule) -> StoryConfig {
        StoryConfig::builder()
            .image_schedule(schedule)
            .image_retry_delay_ms(1)
            .build()
            .unwrap()
    }

    /// Succeeds unless the prompt mentions a page listed in `fail_pages`.
    struct Scripted {
        fail_pages: Vec<usize>,
        prompts: Mutex<Vec<String>>,
        seeds: Mutex<Vec<u32>>,
    }

    impl Scripted {
        fn new(fail_pages: Vec<usize>) -> Self {
            Self {
                fail_pages,
                prompts: Mutex::new(Vec::new()),
                seeds: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ImageGenerator for Scripted {
        async fn generate(&self, request: &ImageRequest) -> Result<ImageResponse, ServiceError> {
            self.prompts.lock().unwrap().push(request.prompt.clone());
            self.seeds.lock().unwrap().push(request.seed);
            let page = (1..=16)
                .rev()
                .find(|p| request.prompt.contains(&format!("page {p} text")))
                .unwrap_or(0);
            if self.fail_pages.contains(&page) {
                return Err(ServiceError::Http {
                    service: "fake".into(),
                    status: 500,
                    detail: "boom".into(),
                });
            }
            Ok(ImageResponse {
                images: vec![format!("https://img/{page}.jpg")],
                nsfw_flags: vec![false],
            })
        }
    }

    struct AlwaysFlagged {
        calls: AtomicUsize,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ImageGenerator for AlwaysFlagged {
        async fn generate(&self, request: &ImageRequest) -> Result<ImageResponse, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(request.prompt.clone());
            Ok(ImageResponse {
                images: vec!["https://img/nsfw.jpg".into()],
                nsfw_flags: vec![true],
            })
        }
    }

    #[tokio::test]
    async fn failed_page_keeps_its_slot() {
        let gen = Scripted::new(vec![2]);
        let out = illustrate_pages(
            &gen,
            &ctx(),
            &pages(3),
            &[],
            &config(ImageSchedule::Pool),
        )
        .await;

        assert_eq!(out.len(), 3);
        assert_eq!(out[0].image, ImageResult::Generated { url: "https://img/1.jpg".into() });
        assert_eq!(out[1].image, ImageResult::Placeholder);
        assert_eq!(out[2].image, ImageResult::Generated { url: "https://img/3.jpg".into() });
        assert_eq!(out[1].attempts, 3);
        assert!(matches!(
            out[1].error,
            Some(PageError::GenerationFailed { page: 2, attempts: 3, .. })
        ));
        assert_eq!(
            out.iter().map(|p| p.page_num).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[tokio::test]
    async fn flagged_page_makes_three_attempts_then_placeholder() {
        let gen = AlwaysFlagged {
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        };
        let out = illustrate_pages(&gen, &ctx(), &pages(1), &[], &config(ImageSchedule::Pool)).await;

        assert_eq!(gen.calls.load(Ordering::SeqCst), 3);
        assert_eq!(out[0].image, ImageResult::Placeholder);
        assert_eq!(out[0].error, Some(PageError::ContentFlagged { page: 1, attempts: 3 }));
        assert!(out[0].used_safer_prompt);

        let prompts = gen.prompts.lock().unwrap();
        assert!(!prompts[0].starts_with(SAFER_PREAMBLE));
        assert!(prompts[1].starts_with(SAFER_PREAMBLE));
        assert!(prompts[2].starts_with(SAFER_PREAMBLE));
    }

    #[tokio::test]
    async fn every_request_carries_the_story_seed() {
        let gen = Scripted::new(vec![]);
        illustrate_pages(&gen, &ctx(), &pages(4), &[], &config(ImageSchedule::Batched)).await;
        let seeds = gen.seeds.lock().unwrap();
        assert_eq!(seeds.len(), 4);
        assert!(seeds.iter().all(|s| *s == 99));
    }

    #[tokio::test]
    async fn batched_schedule_preserves_alignment() {
        let gen = Scripted::new(vec![4, 5]);
        let out = illustrate_pages(&gen, &ctx(), &pages(7), &[], &config(ImageSchedule::Batched)).await;
        let urls: Vec<&str> = out.iter().map(|p| p.image.url("PH")).collect();
        assert_eq!(
            urls,
            vec![
                "https://img/1.jpg",
                "https://img/2.jpg",
                "https://img/3.jpg",
                "PH",
                "PH",
                "https://img/6.jpg",
                "https://img/7.jpg",
            ]
        );
    }

    #[tokio::test]
    async fn empty_image_list_is_retryable() {
        struct EmptyThenOk(AtomicUsize);

        #[async_trait]
        impl ImageGenerator for EmptyThenOk {
            async fn generate(&self, _request: &ImageRequest) -> Result<ImageResponse, ServiceError> {
                if self.0.fetch_add(1, Ordering::SeqCst) == 0 {
                    Ok(ImageResponse::default())
                } else {
                    Ok(ImageResponse {
                        images: vec!["https://img/ok.jpg".into()],
                        nsfw_flags: vec![],
                    })
                }
            }
        }

        let gen = EmptyThenOk(AtomicUsize::new(0));
        let out = illustrate_pages(&gen, &ctx(), &pages(1), &[], &config(ImageSchedule::Pool)).await;
        assert_eq!(out[0].attempts, 2);
        assert!(out[0].used_safer_prompt);
        assert!(out[0].error.is_none());
    }

    #[test]
    fn classify_maps_outcomes() {
        assert!(matches!(
            classify(Ok(Ok(ImageResponse::default())), 60),
            Err(AttemptFailure::NoImages)
        ));
        assert!(matches!(
            classify(
                Ok(Err(ServiceError::Provider("x".into()))),
                60
            ),
            Err(AttemptFailure::Service(_))
        ));
        let ok = ImageResponse {
            images: vec!["u".into()],
            nsfw_flags: vec![false],
        };
        assert_eq!(classify(Ok(Ok(ok)), 60).unwrap(), "u");
    }
}
