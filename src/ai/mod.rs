// Vision assistant - forwards a screenshot question to a chat-completions API

mod types;

pub use types::{AskAnswer, AskRequest, VisionConfig};

use crate::error::{KeeperError, Result};
use base64::Engine;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, error, info};
use types::{ChatContent, ChatMessage, ChatRequest, ChatResponse, ContentPart, ImageUrl};

pub const DEFAULT_BASE_URL: &str = "https://api.moonshot.cn/v1";
pub const DEFAULT_MODEL: &str = "moonshot-v1-8k-vision-preview";

const IMAGE_PREFIX: &str = "data:image/jpeg;base64,";
const SYSTEM_PROMPT: &str =
    "You are Kimi, an AI assistant developed by Moonshot AI. Answer the user's question about the image.";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Stateless client for the vision model
#[derive(Debug, Clone)]
pub struct VisionClient {
    client: Client,
}

impl VisionClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("labkeeper/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| KeeperError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Ask a question about an image
    ///
    /// # Returns
    /// * `Ok(AskAnswer)` - The model's answer
    /// * `Err(KeeperError::MissingField)` - image, question or api_key absent
    /// * `Err(KeeperError::ExternalService)` - The upstream call failed
    pub async fn ask(&self, request: AskRequest) -> Result<AskAnswer> {
        let image = required(request.image, "image")?;
        let question = required(request.question, "question")?;
        let api_key = required(request.config.api_key, "api_key")?;

        let base_url = request
            .config
            .base_url
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let model = request
            .config
            .model
            .filter(|model| !model.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let image = normalize_image(&image)?;

        let body = ChatRequest {
            model: &model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: ChatContent::Text(SYSTEM_PROMPT),
                },
                ChatMessage {
                    role: "user",
                    content: ChatContent::Parts(vec![
                        ContentPart::ImageUrl {
                            image_url: ImageUrl { url: &image },
                        },
                        ContentPart::Text { text: &question },
                    ]),
                },
            ],
        };

        let endpoint = format!("{}/chat/completions", base_url.trim_end_matches('/'));
        info!(model = %model, "Forwarding vision question to {}", endpoint);

        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(&api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!("Vision request failed: {}", e);
                KeeperError::ExternalService(format!("AI request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), "Vision API returned an error");
            return Err(KeeperError::ExternalService(format!(
                "AI request failed with status {}: {}",
                status,
                text.chars().take(500).collect::<String>()
            )));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            KeeperError::ExternalService(format!("Unexpected AI response: {}", e))
        })?;

        let answer = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| KeeperError::ExternalService("AI response had no answer".into()))?;

        debug!(chars = answer.len(), "Vision answer received");

        Ok(AskAnswer {
            answer,
            usage: parsed.usage,
        })
    }
}

fn required(value: Option<String>, field: &str) -> Result<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| KeeperError::MissingField(field.to_string()))
}

/// Give raw base64 a data URL prefix; data URLs pass through untouched
pub fn normalize_image(image: &str) -> Result<String> {
    if image.starts_with("data:") {
        return Ok(image.to_string());
    }

    let raw = image.trim();
    base64::engine::general_purpose::STANDARD
        .decode(raw)
        .map_err(|e| KeeperError::InvalidRequest(format!("image is not valid base64: {}", e)))?;

    Ok(format!("{}{}", IMAGE_PREFIX, raw))
}
