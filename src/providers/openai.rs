//! OpenAI adapter
//!
//! Speaks the chat-completions wire format. Also serves any
//! OpenAI-compatible endpoint (OpenRouter, Ollama, LM Studio) via a
//! base_url override, which is how the generic local fallback provider is
//! wired.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{
    error_from_reqwest, error_from_status, retry_after_from, taxonomy, CallContext,
    CanonicalResult, ProviderAdapter, ProviderError,
};
use crate::media_preparer::MediaPayload;
use crate::settings::ProviderConfig;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const MAX_OUTPUT_TOKENS: u32 = 512;

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: Vec<ChatContent>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ChatContent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
    detail: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    total_tokens: Option<u32>,
}

/// OpenAI / OpenAI-compatible provider adapter
pub struct OpenAiAdapter {
    config: ProviderConfig,
    client: Client,
}

impl OpenAiAdapter {
    pub fn new(config: ProviderConfig) -> Self {
        let client = Client::builder()
            .build()
            .expect("Failed to create HTTP client");
        Self { config, client }
    }

    fn api_url(&self) -> String {
        let base = self
            .config
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/');
        format!("{}/chat/completions", base)
    }

    fn build_request(&self, jpegs: &[Vec<u8>], prompt: &str) -> ChatRequest {
        let mut content = vec![ChatContent::Text {
            text: prompt.to_string(),
        }];
        for jpeg in jpegs {
            content.push(ChatContent::ImageUrl {
                image_url: ImageUrl {
                    url: format!("data:image/jpeg;base64,{}", BASE64.encode(jpeg)),
                    detail: "low".to_string(),
                },
            });
        }

        ChatRequest {
            model: self.config.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content,
            }],
            max_tokens: MAX_OUTPUT_TOKENS,
            temperature: 0.2,
        }
    }
}

/// Parse a chat-completions response body into a canonical result
fn parse_response(body: &str) -> Result<CanonicalResult, ProviderError> {
    let response: ChatResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Malformed(e.to_string()))?;

    let description = response
        .choices
        .first()
        .and_then(|c| c.message.content.clone())
        .map(|s| s.trim().to_string())
        .unwrap_or_default();

    if description.is_empty() {
        return Err(ProviderError::Malformed(
            "response carried no description".to_string(),
        ));
    }

    Ok(CanonicalResult {
        confidence: taxonomy::estimate_confidence(&description),
        objects_detected: taxonomy::extract_objects(&description),
        tokens_used: response.usage.and_then(|u| u.total_tokens),
        description,
    })
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn call(
        &self,
        payload: &MediaPayload,
        context: &CallContext,
        timeout: Duration,
    ) -> Result<CanonicalResult, ProviderError> {
        let jpegs = match payload {
            MediaPayload::Frames { jpegs } => jpegs,
            MediaPayload::VideoClip { .. } => {
                // capability flags route video elsewhere
                return Err(ProviderError::Malformed(
                    "video payload sent to an image-only provider".to_string(),
                ));
            }
        };

        let request = self.build_request(jpegs, &context.prompt);

        let response = self
            .client
            .post(self.api_url())
            .timeout(timeout)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&request)
            .send()
            .await
            .map_err(error_from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_from(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(error_from_status(status, body, retry_after));
        }

        let body = response.text().await.map_err(error_from_reqwest)?;
        parse_response(&body)
    }
}
