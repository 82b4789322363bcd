//! Settings types
//!
//! Provider configuration, the orchestration policy, and the immutable
//! per-request snapshot.

use crate::error::{Error, Result};
use crate::models::AnalysisMode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Vendor kind, decides which adapter and wire format a provider uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    OpenAi,
    /// Any endpoint speaking the OpenAI chat wire format (OpenRouter,
    /// Ollama, LM Studio, ...). Requires an explicit base_url.
    OpenAiCompatible,
    Gemini,
    Claude,
}

/// How a video clip is handed to a native-video provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VideoTransfer {
    /// Clip bytes embedded in the request body (size-bounded)
    #[default]
    Inline,
    /// Clip uploaded first, then referenced by file URI
    FileUpload,
}

/// Per-provider capability flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeCapabilities {
    #[serde(default = "default_true")]
    pub single_frame: bool,
    #[serde(default = "default_true")]
    pub multi_frame: bool,
    #[serde(default)]
    pub video_native: bool,
    #[serde(default)]
    pub video_transfer: VideoTransfer,
}

impl Default for ModeCapabilities {
    fn default() -> Self {
        Self {
            single_frame: true,
            multi_frame: true,
            video_native: false,
            video_transfer: VideoTransfer::default(),
        }
    }
}

impl ModeCapabilities {
    /// Whether the provider may be attempted for a mode
    pub fn supports(&self, mode: AnalysisMode) -> bool {
        match mode {
            AnalysisMode::VideoNative => self.video_native,
            AnalysisMode::MultiFrame => self.multi_frame,
            AnalysisMode::SingleFrame => self.single_frame,
        }
    }
}

/// One configured provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Unique display name, also used in fallback chains and usage rows
    pub name: String,
    #[serde(default)]
    pub kind: ProviderKind,
    /// Lower rank is tried first
    #[serde(default)]
    pub priority: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub api_key: String,
    pub model: String,
    /// Endpoint override; required for OpenAiCompatible
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub capabilities: ModeCapabilities,
    /// Attempts per provider call before escalating (retries included)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

impl ProviderConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Validation("provider name must not be empty".into()));
        }

        if self.model.is_empty() {
            return Err(Error::Validation(format!(
                "provider {} has no model configured",
                self.name
            )));
        }

        if let Some(ref url) = self.base_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(Error::Validation(format!(
                    "provider {} base_url must start with http:// or https://",
                    self.name
                )));
            }
        }

        if self.kind == ProviderKind::OpenAiCompatible && self.base_url.is_none() {
            return Err(Error::Validation(format!(
                "provider {} is openai_compatible but has no base_url",
                self.name
            )));
        }

        if self.max_attempts == 0 {
            return Err(Error::Validation(format!(
                "provider {} max_attempts must be at least 1",
                self.name
            )));
        }

        Ok(())
    }

    /// Built-in generic image fallback: a local OpenAI-compatible endpoint.
    ///
    /// Appended to snapshots whose image modes would otherwise have no
    /// capable provider, so multi_frame and single_frame always terminate
    /// at a provider rather than an empty list.
    pub fn builtin_fallback() -> Self {
        Self {
            name: "local-fallback".to_string(),
            kind: ProviderKind::OpenAiCompatible,
            priority: u32::MAX,
            enabled: true,
            api_key: String::new(),
            model: "llava".to_string(),
            base_url: Some("http://127.0.0.1:11434/v1".to_string()),
            capabilities: ModeCapabilities {
                single_frame: true,
                multi_frame: true,
                video_native: false,
                video_transfer: VideoTransfer::Inline,
            },
            max_attempts: 2,
        }
    }
}

/// Orchestration policy knobs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DescriptionPolicy {
    /// Hard wall-clock budget for one analyze() call
    #[serde(default = "default_sla_ms")]
    pub sla_ms: u64,
    /// Remaining budget below which no new attempt is started
    #[serde(default = "default_min_attempt_ms")]
    pub min_attempt_ms: u64,
    /// Per-call ceiling; clamped to the remaining budget at call time
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    /// Frames sent in multi_frame mode
    #[serde(default = "default_multi_frame_count")]
    pub multi_frame_count: u32,
    /// System-wide cap on concurrent analyses
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
    #[serde(default = "default_backoff_jitter_ms")]
    pub backoff_jitter_ms: u64,
}

fn default_sla_ms() -> u64 {
    5000
}

fn default_min_attempt_ms() -> u64 {
    1500
}

fn default_call_timeout_ms() -> u64 {
    30_000
}

fn default_multi_frame_count() -> u32 {
    5
}

fn default_max_concurrent() -> usize {
    4
}

fn default_backoff_base_ms() -> u64 {
    2000
}

fn default_backoff_cap_ms() -> u64 {
    8000
}

fn default_backoff_jitter_ms() -> u64 {
    250
}

impl Default for DescriptionPolicy {
    fn default() -> Self {
        Self {
            sla_ms: default_sla_ms(),
            min_attempt_ms: default_min_attempt_ms(),
            call_timeout_ms: default_call_timeout_ms(),
            multi_frame_count: default_multi_frame_count(),
            max_concurrent: default_max_concurrent(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            backoff_jitter_ms: default_backoff_jitter_ms(),
        }
    }
}

impl DescriptionPolicy {
    /// Frame count requested from the preparer for a mode
    pub fn frame_count_for(&self, mode: AnalysisMode) -> u32 {
        match mode {
            AnalysisMode::VideoNative => 0,
            AnalysisMode::MultiFrame => self.multi_frame_count,
            AnalysisMode::SingleFrame => 1,
        }
    }
}

/// Persisted settings document (settings table, key `ai_description`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DescriberSettings {
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub policy: DescriptionPolicy,
}

/// Immutable per-request view of the settings
///
/// Providers are sorted by priority, disabled entries removed, and the
/// builtin image fallback appended when multi_frame or single_frame would
/// otherwise have no capable provider. A request holds an `Arc` to one
/// snapshot for its whole chain, so a concurrent settings reload cannot
/// reorder providers mid-chain.
#[derive(Debug, Clone)]
pub struct ProviderSnapshot {
    pub providers: Vec<ProviderConfig>,
    pub policy: DescriptionPolicy,
}

impl ProviderSnapshot {
    /// Build a snapshot from raw settings
    pub fn build(settings: &DescriberSettings) -> Arc<Self> {
        let mut providers: Vec<ProviderConfig> = settings
            .providers
            .iter()
            .filter(|p| p.enabled)
            .cloned()
            .collect();
        providers.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.name.cmp(&b.name)));

        let multi_covered = providers.iter().any(|p| p.capabilities.multi_frame);
        let single_covered = providers.iter().any(|p| p.capabilities.single_frame);
        if !multi_covered || !single_covered {
            providers.push(ProviderConfig::builtin_fallback());
        }

        Arc::new(Self {
            providers,
            policy: settings.policy,
        })
    }

    /// Providers capable of a mode, in priority order
    pub fn providers_for(&self, mode: AnalysisMode) -> Vec<&ProviderConfig> {
        self.providers
            .iter()
            .filter(|p| p.capabilities.supports(mode))
            .collect()
    }
}
