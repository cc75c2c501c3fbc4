//! Image generation service: the text-to-image leaf of the pipeline.
//!
//! The pipeline only depends on [`ImageGenerator`]. The production
//! implementation, [`FalImageGenerator`], calls fal.ai's synchronous REST
//! endpoint (`https://fal.run/<model>`) with the FLUX payload.
//!
//! Content-safety rejections are **not** errors: the service reports them
//! in-band through [`ImageResponse::nsfw_flags`] and the orchestrator treats
//! them like any other retryable outcome.

use crate::config::ImageSize;
use crate::error::ServiceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const SERVICE: &str = "fal.ai";
const DEFAULT_BASE_URL: &str = "https://fal.run";
const DEFAULT_MODEL: &str = "fal-ai/flux/schnell";

/// One text-to-image request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageRequest {
    pub prompt: String,
    pub negative_prompt: String,
    /// Shared by every page of a story.
    pub seed: u32,
    pub size: ImageSize,
    pub steps: u32,
    pub guidance: f32,
    pub safety_check: bool,
}

/// What the service produced for one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageResponse {
    /// Image URLs (or data URIs) in service order.
    pub images: Vec<String>,
    /// One flag per image; `true` means the safety checker flagged it.
    pub nsfw_flags: Vec<bool>,
}

impl ImageResponse {
    /// The first image, unless it is missing or flagged.
    pub fn first_safe(&self) -> Option<&str> {
        let url = self.images.first()?;
        if self.nsfw_flags.first().copied().unwrap_or(false) {
            return None;
        }
        Some(url.as_str())
    }
}

/// Text-to-image service.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, request: &ImageRequest) -> Result<ImageResponse, ServiceError>;
}

/// [`ImageGenerator`] backed by fal.ai.
pub struct FalImageGenerator {
    client: reqwest::Client,
    api_key: String,
    model_id: String,
    base_url: String,
    timeout_secs: u64,
}

impl FalImageGenerator {
    pub fn new(
        api_key: impl Into<String>,
        model_id: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ServiceError::Transport {
                service: SERVICE.to_string(),
                detail: e.to_string(),
            })?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            model_id: model_id.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs,
        })
    }

    /// Build from `FAL_KEY` and `FAL_IMAGE_MODEL` / `FAL_MODEL_ID`.
    pub fn from_env(timeout_secs: u64) -> Result<Self, ServiceError> {
        let api_key = std::env::var("FAL_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ServiceError::NotConfigured {
                service: SERVICE.to_string(),
                hint: "Set FAL_KEY to your fal.ai API key.".to_string(),
            })?;
        let model = std::env::var("FAL_IMAGE_MODEL")
            .or_else(|_| std::env::var("FAL_MODEL_ID"))
            .ok()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        Self::new(api_key, model, timeout_secs)
    }

    /// Point the client at a different host (proxies, test servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/{}", self.base_url, self.model_id)
    }
}

#[async_trait]
impl ImageGenerator for FalImageGenerator {
    async fn generate(&self, request: &ImageRequest) -> Result<ImageResponse, ServiceError> {
        let payload = FalPayload::from(request);
        debug!("fal.ai request to {} (seed {})", self.model_id, request.seed);

        let response = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Key {}", self.api_key))
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ServiceError::Timeout {
                        service: SERVICE.to_string(),
                        secs: self.timeout_secs,
                    }
                } else {
                    ServiceError::Transport {
                        service: SERVICE.to_string(),
                        detail: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ServiceError::Http {
                service: SERVICE.to_string(),
                status: status.as_u16(),
                detail,
            });
        }

        let body: FalResponse =
            response
                .json()
                .await
                .map_err(|e| ServiceError::InvalidResponse {
                    service: SERVICE.to_string(),
                    detail: e.to_string(),
                })?;

        Ok(body.into())
    }
}

// ── Wire format ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct FalPayload<'a> {
    prompt: &'a str,
    negative_prompt: &'a str,
    image_size: ImageSize,
    num_inference_steps: u32,
    guidance_scale: f32,
    seed: u32,
    num_images: u32,
    enable_safety_checker: bool,
    output_format: &'static str,
}

impl<'a> From<&'a ImageRequest> for FalPayload<'a> {
    fn from(r: &'a ImageRequest) -> Self {
        Self {
            prompt: &r.prompt,
            negative_prompt: &r.negative_prompt,
            image_size: r.size,
            num_inference_steps: r.steps,
            guidance_scale: r.guidance,
            seed: r.seed,
            num_images: 1,
            enable_safety_checker: r.safety_check,
            output_format: "jpeg",
        }
    }
}

#[derive(Debug, Deserialize)]
struct FalResponse {
    #[serde(default)]
    images: Vec<FalImage>,
    #[serde(default)]
    has_nsfw_concepts: Vec<bool>,
}

/// fal.ai returns either `{ "url": … }` objects or bare strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FalImage {
    Object {
        url: Option<String>,
        content: Option<String>,
    },
    Url(String),
}

impl FalImage {
    fn into_url(self) -> Option<String> {
        match self {
            FalImage::Object { url, content } => url.or(content),
            FalImage::Url(u) => Some(u),
        }
    }
}

impl From<FalResponse> for ImageResponse {
    /// Flags are paired with their image before unusable images are dropped;
    /// a missing flag reads as not flagged.
    fn from(r: FalResponse) -> Self {
        let mut flags = r.has_nsfw_concepts.into_iter();
        let (images, nsfw_flags) = r
            .images
            .into_iter()
            .map(|image| (image.into_url(), flags.next().unwrap_or(false)))
            .filter_map(|(url, flagged)| url.map(|u| (u, flagged)))
            .unzip();
        Self { images, nsfw_flags }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ImageRequest {
        ImageRequest {
            prompt: "a fox in a meadow".into(),
            negative_prompt: "text, watermark".into(),
            seed: 42,
            size: ImageSize::Landscape4x3,
            steps: 4,
            guidance: 3.5,
            safety_check: true,
        }
    }

    #[test]
    fn payload_uses_fal_field_names() {
        let req = request();
        let json = serde_json::to_value(FalPayload::from(&req)).unwrap();
        assert_eq!(json["image_size"], "landscape_4_3");
        assert_eq!(json["num_inference_steps"], 4);
        assert_eq!(json["enable_safety_checker"], true);
        assert_eq!(json["seed"], 42);
        assert_eq!(json["num_images"], 1);
    }

    #[test]
    fn response_accepts_objects_and_strings() {
        let body = r#"{
            "images": [{"url": "https://cdn/a.jpg", "width": 1024}, "https://cdn/b.jpg"],
            "has_nsfw_concepts": [false, true],
            "seed": 42
        }"#;
        let parsed: FalResponse = serde_json::from_str(body).unwrap();
        let resp: ImageResponse = parsed.into();
        assert_eq!(resp.images, vec!["https://cdn/a.jpg", "https://cdn/b.jpg"]);
        assert_eq!(resp.nsfw_flags, vec![false, true]);
    }

    #[test]
    fn flags_stay_with_their_image_when_one_is_dropped() {
        let body = r#"{
            "images": [{"width": 1024}, {"url": "https://cdn/b.jpg"}],
            "has_nsfw_concepts": [true, false]
        }"#;
        let resp: ImageResponse = serde_json::from_str::<FalResponse>(body).unwrap().into();
        assert_eq!(resp.images, vec!["https://cdn/b.jpg"]);
        assert_eq!(resp.nsfw_flags, vec![false]);
        assert_eq!(resp.first_safe(), Some("https://cdn/b.jpg"));

        let body = r#"{
            "images": [{"content": null}, {"url": "https://cdn/c.jpg"}],
            "has_nsfw_concepts": [false, true]
        }"#;
        let resp: ImageResponse = serde_json::from_str::<FalResponse>(body).unwrap().into();
        assert_eq!(resp.nsfw_flags, vec![true]);
        assert_eq!(resp.first_safe(), None);
    }

    #[test]
    fn missing_flags_read_as_unflagged() {
        let body = r#"{"images": ["https://cdn/a.jpg", "https://cdn/b.jpg"]}"#;
        let resp: ImageResponse = serde_json::from_str::<FalResponse>(body).unwrap().into();
        assert_eq!(resp.nsfw_flags, vec![false, false]);
    }

    #[test]
    fn first_safe_rejects_flagged_and_empty() {
        let ok = ImageResponse {
            images: vec!["u".into()],
            nsfw_flags: vec![false],
        };
        let flagged = ImageResponse {
            images: vec!["u".into()],
            nsfw_flags: vec![true],
        };
        let unflagged = ImageResponse {
            images: vec!["u".into()],
            nsfw_flags: vec![],
        };
        assert_eq!(ok.first_safe(), Some("u"));
        assert_eq!(flagged.first_safe(), None);
        assert_eq!(unflagged.first_safe(), Some("u"));
        assert_eq!(ImageResponse::default().first_safe(), None);
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let gen = FalImageGenerator::new("k", "fal-ai/flux/dev", 30)
            .unwrap()
            .with_base_url("http://localhost:9000/");
        assert_eq!(gen.endpoint(), "http://localhost:9000/fal-ai/flux/dev");
    }
}
