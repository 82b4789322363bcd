//! Claude adapter
//!
//! Messages API with base64 image blocks. Image modes only.

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

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_OUTPUT_TOKENS: u32 = 512;

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image { source: ImageSource },
}

#[derive(Debug, Serialize)]
struct ImageSource {
    #[serde(rename = "type")]
    source_type: String,
    media_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseContent>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
}

/// Claude provider adapter
pub struct ClaudeAdapter {
    config: ProviderConfig,
    client: Client,
}

impl ClaudeAdapter {
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
        format!("{}/v1/messages", base)
    }

    fn build_request(&self, jpegs: &[Vec<u8>], prompt: &str) -> MessagesRequest {
        let mut content = Vec::with_capacity(jpegs.len() + 1);
        for jpeg in jpegs {
            content.push(ContentBlock::Image {
                source: ImageSource {
                    source_type: "base64".to_string(),
                    media_type: "image/jpeg".to_string(),
                    data: BASE64.encode(jpeg),
                },
            });
        }
        content.push(ContentBlock::Text {
            text: prompt.to_string(),
        });

        MessagesRequest {
            model: self.config.model.clone(),
            max_tokens: MAX_OUTPUT_TOKENS,
            messages: vec![Message {
                role: "user".to_string(),
                content,
            }],
        }
    }
}

/// Parse a messages response body into a canonical result
fn parse_response(body: &str) -> Result<CanonicalResult, ProviderError> {
    let response: MessagesResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Malformed(e.to_string()))?;

    let description = response
        .content
        .iter()
        .filter_map(|c| c.text.as_deref())
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string();

    if description.is_empty() {
        return Err(ProviderError::Malformed(
            "response carried no description".to_string(),
        ));
    }

    let tokens_used = response.usage.map(|u| {
        u.input_tokens.unwrap_or(0) + u.output_tokens.unwrap_or(0)
    });

    Ok(CanonicalResult {
        confidence: taxonomy::estimate_confidence(&description),
        objects_detected: taxonomy::extract_objects(&description),
        tokens_used,
        description,
    })
}

#[async_trait]
impl ProviderAdapter for ClaudeAdapter {
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
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
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
