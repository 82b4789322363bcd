//! Gemini adapter
//!
//! The only native-video vendor in the set. Frames and small clips travel
//! inline as base64 parts; larger clips use the resumable file upload
//! endpoint and are referenced by URI once the file reaches ACTIVE state.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::{
    error_from_reqwest, error_from_status, retry_after_from, taxonomy, CallContext,
    CanonicalResult, ProviderAdapter, ProviderError,
};
use crate::media_preparer::MediaPayload;
use crate::settings::{ProviderConfig, VideoTransfer};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const MAX_OUTPUT_TOKENS: u32 = 512;

/// Inline transfer ceiling; larger clips need file upload
const INLINE_VIDEO_LIMIT: usize = 20 * 1024 * 1024;

/// Poll interval while an uploaded file is PROCESSING
const FILE_POLL_INTERVAL: Duration = Duration::from_millis(500);
const FILE_POLL_LIMIT: u32 = 40;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text { text: String },
    InlineData { inline_data: InlineData },
    FileData { file_data: FileData },
}

#[derive(Debug, Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct FileData {
    mime_type: String,
    file_uri: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    avg_logprobs: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    total_token_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct FileEnvelope {
    file: FileInfo,
}

#[derive(Debug, Deserialize)]
struct FileInfo {
    name: String,
    uri: Option<String>,
    #[serde(default)]
    state: Option<String>,
}

/// Gemini provider adapter
pub struct GeminiAdapter {
    config: ProviderConfig,
    client: Client,
}

impl GeminiAdapter {
    pub fn new(config: ProviderConfig) -> Self {
        let client = Client::builder()
            .build()
            .expect("Failed to create HTTP client");
        Self { config, client }
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
    }

    fn generate_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url(),
            self.config.model
        )
    }

    async fn send_generate(
        &self,
        parts: Vec<Part>,
        timeout: Duration,
    ) -> Result<CanonicalResult, ProviderError> {
        let request = GenerateRequest {
            contents: vec![Content { parts }],
            generation_config: GenerationConfig {
                max_output_tokens: MAX_OUTPUT_TOKENS,
                temperature: 0.2,
            },
        };

        let response = self
            .client
            .post(self.generate_url())
            .timeout(timeout)
            .header("x-goog-api-key", &self.config.api_key)
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

    /// Upload a clip through the resumable endpoint and wait for ACTIVE
    async fn upload_clip(
        &self,
        path: &Path,
        mime_type: &str,
        timeout: Duration,
    ) -> Result<String, ProviderError> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| ProviderError::Malformed(format!("clip read failed: {}", e)))?;

        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "clip.mp4".to_string());

        // Start the resumable session
        let start = self
            .client
            .post(format!("{}/upload/v1beta/files", self.base_url()))
            .timeout(timeout)
            .header("x-goog-api-key", &self.config.api_key)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", data.len().to_string())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&serde_json::json!({ "file": { "display_name": display_name } }))
            .send()
            .await
            .map_err(error_from_reqwest)?;

        let status = start.status();
        if !status.is_success() {
            let retry_after = retry_after_from(start.headers());
            let body = start.text().await.unwrap_or_default();
            return Err(error_from_status(status, body, retry_after));
        }

        let upload_url = start
            .headers()
            .get("x-goog-upload-url")
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .ok_or_else(|| {
                ProviderError::Malformed("upload session carried no upload URL".to_string())
            })?;

        // Upload the bytes and finalize
        let uploaded = self
            .client
            .post(&upload_url)
            .timeout(timeout)
            .header("X-Goog-Upload-Command", "upload, finalize")
            .header("X-Goog-Upload-Offset", "0")
            .body(data)
            .send()
            .await
            .map_err(error_from_reqwest)?;

        let status = uploaded.status();
        if !status.is_success() {
            let body = uploaded.text().await.unwrap_or_default();
            return Err(error_from_status(status, body, None));
        }

        let envelope: FileEnvelope = uploaded.json().await.map_err(error_from_reqwest)?;
        let mut info = envelope.file;

        // Wait until the file is usable
        let mut polls = 0;
        while info.state.as_deref() == Some("PROCESSING") {
            polls += 1;
            if polls > FILE_POLL_LIMIT {
                return Err(ProviderError::Timeout);
            }
            tokio::time::sleep(FILE_POLL_INTERVAL).await;

            let response = self
                .client
                .get(format!("{}/v1beta/{}", self.base_url(), info.name))
                .timeout(timeout)
                .header("x-goog-api-key", &self.config.api_key)
                .send()
                .await
                .map_err(error_from_reqwest)?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(error_from_status(status, body, None));
            }
            info = response.json().await.map_err(error_from_reqwest)?;
        }

        if info.state.as_deref() == Some("FAILED") {
            return Err(ProviderError::Malformed(
                "uploaded clip failed server-side processing".to_string(),
            ));
        }

        info.uri.ok_or_else(|| {
            ProviderError::Malformed("uploaded file carried no URI".to_string())
        })
    }

    async fn video_parts(
        &self,
        path: &Path,
        mime_type: &str,
        prompt: &str,
        timeout: Duration,
    ) -> Result<Vec<Part>, ProviderError> {
        let media_part = match self.config.capabilities.video_transfer {
            VideoTransfer::Inline => {
                let data = tokio::fs::read(path)
                    .await
                    .map_err(|e| ProviderError::Malformed(format!("clip read failed: {}", e)))?;
                if data.len() > INLINE_VIDEO_LIMIT {
                    return Err(ProviderError::Malformed(format!(
                        "clip is {} bytes, over the inline transfer limit",
                        data.len()
                    )));
                }
                Part::InlineData {
                    inline_data: InlineData {
                        mime_type: mime_type.to_string(),
                        data: BASE64.encode(&data),
                    },
                }
            }
            VideoTransfer::FileUpload => {
                let file_uri = self.upload_clip(path, mime_type, timeout).await?;
                Part::FileData {
                    file_data: FileData {
                        mime_type: mime_type.to_string(),
                        file_uri,
                    },
                }
            }
        };

        Ok(vec![
            Part::Text {
                text: prompt.to_string(),
            },
            media_part,
        ])
    }
}

/// Parse a generateContent response body into a canonical result
fn parse_response(body: &str) -> Result<CanonicalResult, ProviderError> {
    let response: GenerateResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Malformed(e.to_string()))?;

    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Malformed("response carried no candidates".to_string()))?;

    let description = candidate
        .content
        .as_ref()
        .map(|c| {
            c.parts
                .iter()
                .filter_map(|p| p.text.as_deref())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default()
        .trim()
        .to_string();

    if description.is_empty() {
        return Err(ProviderError::Malformed(
            "response carried no description".to_string(),
        ));
    }

    let confidence = match candidate.avg_logprobs {
        Some(avg) => (avg.exp() * 100.0).round().clamp(1.0, 99.0) as u8,
        None => taxonomy::estimate_confidence(&description),
    };

    Ok(CanonicalResult {
        confidence,
        objects_detected: taxonomy::extract_objects(&description),
        tokens_used: response
            .usage_metadata
            .and_then(|u| u.total_token_count),
        description,
    })
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn call(
        &self,
        payload: &MediaPayload,
        context: &CallContext,
        timeout: Duration,
    ) -> Result<CanonicalResult, ProviderError> {
        let parts = match payload {
            MediaPayload::Frames { jpegs } => {
                let mut parts = vec![Part::Text {
                    text: context.prompt.clone(),
                }];
                for jpeg in jpegs {
                    parts.push(Part::InlineData {
                        inline_data: InlineData {
                            mime_type: "image/jpeg".to_string(),
                            data: BASE64.encode(jpeg),
                        },
                    });
                }
                parts
            }
            MediaPayload::VideoClip { path, mime_type } => {
                self.video_parts(path, mime_type, &context.prompt, timeout)
                    .await?
            }
        };

        self.send_generate(parts, timeout).await
    }
}
