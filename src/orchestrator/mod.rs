//! DescriptionOrchestrator - mode/provider fallback state machine
//!
//! ## Responsibilities
//!
//! - Drive one request through modes (video_native -> multi_frame ->
//!   single_frame) and providers in priority order
//! - Invoke the retry policy per provider call
//! - Enforce the global SLA budget before every attempt
//! - Record every attempt through the usage recorder
//! - Always return an AnalysisResult; the event pipeline is never blocked
//!
//! One request is strictly sequential; concurrency across requests is
//! bounded by a global semaphore.

use crate::alerts::AdminAlertService;
use crate::media_preparer::{MediaPayload, MediaPreparer};
use crate::models::{AnalysisMode, AnalysisRequest, AnalysisResult};
use crate::providers::{
    build_adapter, prompt, taxonomy, CallContext, CanonicalResult, ProviderAdapter, ProviderError,
};
use crate::retry::RetryPolicy;
use crate::settings::{DescriptionPolicy, ProviderConfig, SettingsService};
use crate::usage_recorder::{AttemptRecord, UsageRecorder};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use uuid::Uuid;

/// Placeholder stored when every provider and mode failed
const PLACEHOLDER_DESCRIPTION: &str = "Activity detected; automatic description unavailable.";

/// Adapter construction hook, overridable for stubbing
pub type AdapterFactory =
    Arc<dyn Fn(&ProviderConfig) -> Arc<dyn ProviderAdapter> + Send + Sync>;

/// DescriptionOrchestrator instance
pub struct DescriptionOrchestrator {
    settings: Arc<SettingsService>,
    media_preparer: MediaPreparer,
    usage: Arc<UsageRecorder>,
    alerts: Arc<AdminAlertService>,
    semaphore: Arc<Semaphore>,
    adapter_factory: AdapterFactory,
}

impl DescriptionOrchestrator {
    /// Create new orchestrator
    pub fn new(
        settings: Arc<SettingsService>,
        media_preparer: MediaPreparer,
        usage: Arc<UsageRecorder>,
        alerts: Arc<AdminAlertService>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            settings,
            media_preparer,
            usage,
            alerts,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            adapter_factory: Arc::new(|config: &ProviderConfig| build_adapter(config)),
        }
    }

    /// Replace adapter construction (deterministic stubs, embedding)
    pub fn with_adapter_factory(mut self, factory: AdapterFactory) -> Self {
        self.adapter_factory = factory;
        self
    }

    /// Analyze one detection event
    ///
    /// Always returns a result: a successful description, or a
    /// failure-flagged placeholder carrying the full fallback chain.
    pub async fn analyze(&self, request: AnalysisRequest) -> AnalysisResult {
        let _permit = self.semaphore.acquire().await.ok();

        let request_id = Uuid::new_v4();
        let started = Instant::now();
        let snapshot = self.settings.snapshot().await;
        let policy = snapshot.policy;
        let deadline = started + Duration::from_millis(policy.sla_ms);

        tracing::info!(
            request_id = %request_id,
            camera = %request.camera_name,
            requested_mode = %request.requested_mode,
            providers = snapshot.providers.len(),
            "Starting description analysis"
        );

        let mut chain: Vec<String> = Vec::new();
        let mut current = Some(request.requested_mode);

        while let Some(mode) = current {
            // A source without clip capability skips video without
            // touching any provider or its retry budget
            if mode == AnalysisMode::VideoNative && !request.media.supports_clips {
                chain.push(format!("{}:no_clip_source", mode));
                current = mode.downgrade();
                continue;
            }

            if !budget_allows(deadline, policy.min_attempt_ms) {
                return self.timeout_result(&request, chain, started, request_id);
            }

            let payload = match self.media_preparer.prepare(
                &request.media,
                mode,
                policy.frame_count_for(mode),
            ) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::debug!(
                        request_id = %request_id,
                        mode = %mode,
                        reason = e.reason(),
                        "Media preparation failed, downgrading"
                    );
                    chain.push(format!("{}:{}", mode, e.reason()));
                    current = mode.downgrade();
                    continue;
                }
            };

            let context = CallContext {
                camera_name: request.camera_name.clone(),
                event_timestamp: request.event_timestamp,
                prompt: prompt::build_prompt(
                    &request.camera_name,
                    request.event_timestamp,
                    &request.detection_hints,
                    mode,
                ),
            };

            for config in snapshot.providers_for(mode) {
                if !budget_allows(deadline, policy.min_attempt_ms) {
                    return self.timeout_result(&request, chain, started, request_id);
                }

                match self
                    .try_provider(config, &policy, &payload, &context, mode, deadline)
                    .await
                {
                    Ok(result) => {
                        let total_elapsed_ms = started.elapsed().as_millis() as u64;
                        tracing::info!(
                            request_id = %request_id,
                            provider = %config.name,
                            mode = %mode,
                            confidence = result.confidence,
                            total_elapsed_ms,
                            fallback_steps = chain.len(),
                            "Description generated"
                        );
                        return success_result(result, config, mode, &payload, chain, total_elapsed_ms);
                    }
                    Err(error) => {
                        if let ProviderError::Auth(ref detail) = error {
                            self.alerts.notify_auth_failure(&config.name, detail);
                        }
                        tracing::warn!(
                            request_id = %request_id,
                            provider = %config.name,
                            mode = %mode,
                            error_kind = error.kind(),
                            error = %error,
                            "Provider failed, escalating"
                        );
                        chain.push(format!("{}:{}:{}", mode, config.name, error.kind()));
                    }
                }
            }

            chain.push(format!("{}:all_providers_failed", mode));
            current = mode.downgrade();
        }

        tracing::error!(
            request_id = %request_id,
            camera = %request.camera_name,
            fallback_chain = ?chain,
            "Every provider and mode exhausted"
        );
        terminal_failure(&request, chain, started)
    }

    /// One provider, driven through the retry policy
    async fn try_provider(
        &self,
        config: &ProviderConfig,
        policy: &DescriptionPolicy,
        payload: &MediaPayload,
        context: &CallContext,
        mode: AnalysisMode,
        deadline: Instant,
    ) -> Result<CanonicalResult, ProviderError> {
        let adapter = (self.adapter_factory)(config);
        let retry = RetryPolicy::new(
            config.max_attempts,
            Duration::from_millis(policy.backoff_base_ms),
            Duration::from_millis(policy.backoff_cap_ms),
            Duration::from_millis(policy.backoff_jitter_ms),
            Duration::from_millis(policy.min_attempt_ms),
        );

        let mut attempt = 0u32;
        loop {
            attempt += 1;

            let remaining = deadline.saturating_duration_since(Instant::now());
            let call_timeout = remaining.min(Duration::from_millis(policy.call_timeout_ms));

            let started_at = Utc::now();
            let call_started = Instant::now();

            // An in-flight call past its budget is abandoned and counts
            // as a timeout
            let outcome = match tokio::time::timeout(
                call_timeout,
                adapter.call(payload, context, call_timeout),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout),
            };

            self.usage.record(AttemptRecord {
                provider: config.name.clone(),
                mode,
                started_at,
                response_time_ms: call_started.elapsed().as_millis() as u64,
                success: outcome.is_ok(),
                tokens_used: outcome.as_ref().ok().and_then(|r| r.tokens_used),
                error: outcome.as_ref().err().map(|e| e.kind().to_string()),
            });

            match outcome {
                Ok(result) => return Ok(result),
                Err(error) => {
                    if !retry.should_retry(&error, attempt) {
                        return Err(error);
                    }
                    let delay = retry.backoff_delay(&error, attempt);
                    if !retry.can_wait(delay, deadline) {
                        // aborting beats sleeping past the deadline
                        return Err(error);
                    }
                    tracing::debug!(
                        provider = %config.name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// SLA budget exhausted mid-chain
    fn timeout_result(
        &self,
        request: &AnalysisRequest,
        mut chain: Vec<String>,
        started: Instant,
        request_id: Uuid,
    ) -> AnalysisResult {
        chain.push("timeout".to_string());
        tracing::warn!(
            request_id = %request_id,
            camera = %request.camera_name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Analysis budget exhausted, aborting chain"
        );
        terminal_failure(request, chain, started)
    }
}

fn budget_allows(deadline: Instant, min_attempt_ms: u64) -> bool {
    deadline.saturating_duration_since(Instant::now()) >= Duration::from_millis(min_attempt_ms)
}

fn success_result(
    result: CanonicalResult,
    config: &ProviderConfig,
    mode: AnalysisMode,
    payload: &MediaPayload,
    chain: Vec<String>,
    total_elapsed_ms: u64,
) -> AnalysisResult {
    AnalysisResult {
        description: result.description,
        confidence: result.confidence,
        objects_detected: result.objects_detected,
        provider_used: Some(config.name.clone()),
        mode_used: Some(mode),
        frame_count_used: payload.frame_count(),
        fallback_reason: chain,
        total_elapsed_ms,
        description_retry_needed: false,
    }
}

fn terminal_failure(
    request: &AnalysisRequest,
    chain: Vec<String>,
    started: Instant,
) -> AnalysisResult {
    AnalysisResult {
        description: PLACEHOLDER_DESCRIPTION.to_string(),
        confidence: 0,
        // hints keep taxonomy data on the stored event even when every
        // provider failed
        objects_detected: taxonomy::objects_from_hints(&request.detection_hints),
        provider_used: None,
        mode_used: None,
        frame_count_used: None,
        fallback_reason: chain,
        total_elapsed_ms: started.elapsed().as_millis() as u64,
        description_retry_needed: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DetectedObject, EventMedia, Frame};
    use crate::settings::{
        DescriberSettings, ModeCapabilities, ProviderKind, VideoTransfer,
    };
    use crate::usage_recorder::{CostTable, MemoryUsageStore, StatsRange, UsageStore};
    use async_trait::async_trait;
    use image::codecs::jpeg::JpegEncoder;
    use std::io::Cursor;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};

    // ========================================
    // Stub plumbing
    // ========================================

    #[derive(Clone)]
    enum StubOutcome {
        Success(&'static str),
        RateLimited,
        Auth,
        Server,
        Timeout,
        Malformed,
    }

    struct StubAdapter {
        name: String,
        outcome: StubOutcome,
        delay: Duration,
        calls: AtomicU32,
    }

    impl StubAdapter {
        fn new(name: &str, outcome: StubOutcome) -> Arc<Self> {
            Self::with_delay(name, outcome, Duration::ZERO)
        }

        fn with_delay(name: &str, outcome: StubOutcome, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                outcome,
                delay,
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProviderAdapter for StubAdapter {
        fn name(&self) -> &str {
            &self.name
        }

        async fn call(
            &self,
            _payload: &MediaPayload,
            _context: &CallContext,
            _timeout: Duration,
        ) -> Result<CanonicalResult, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match self.outcome {
                StubOutcome::Success(text) => Ok(CanonicalResult {
                    description: text.to_string(),
                    confidence: 80,
                    objects_detected: taxonomy::extract_objects(text),
                    tokens_used: Some(42),
                }),
                StubOutcome::RateLimited => Err(ProviderError::RateLimited { retry_after: None }),
                StubOutcome::Auth => Err(ProviderError::Auth("HTTP 401: bad key".to_string())),
                StubOutcome::Server => Err(ProviderError::Server("HTTP 500".to_string())),
                StubOutcome::Timeout => Err(ProviderError::Timeout),
                StubOutcome::Malformed => {
                    Err(ProviderError::Malformed("unparseable".to_string()))
                }
            }
        }
    }

    fn stub_factory(stubs: Vec<Arc<StubAdapter>>) -> AdapterFactory {
        Arc::new(move |config: &ProviderConfig| {
            stubs
                .iter()
                .find(|s| s.name == config.name)
                .cloned()
                .map(|s| s as Arc<dyn ProviderAdapter>)
                .unwrap_or_else(|| panic!("no stub for provider {}", config.name))
        })
    }

    fn image_provider(name: &str, priority: u32) -> ProviderConfig {
        ProviderConfig {
            name: name.to_string(),
            kind: ProviderKind::OpenAi,
            priority,
            enabled: true,
            api_key: "key".to_string(),
            model: "test-model".to_string(),
            base_url: None,
            capabilities: ModeCapabilities::default(),
            max_attempts: 1,
        }
    }

    fn video_provider(name: &str, priority: u32) -> ProviderConfig {
        let mut config = image_provider(name, priority);
        config.capabilities = ModeCapabilities {
            single_frame: true,
            multi_frame: true,
            video_native: true,
            video_transfer: VideoTransfer::Inline,
        };
        config
    }

    fn fast_policy() -> DescriptionPolicy {
        DescriptionPolicy {
            sla_ms: 10_000,
            min_attempt_ms: 10,
            call_timeout_ms: 1000,
            multi_frame_count: 3,
            max_concurrent: 4,
            backoff_base_ms: 5,
            backoff_cap_ms: 20,
            backoff_jitter_ms: 0,
        }
    }

    struct Harness {
        orchestrator: DescriptionOrchestrator,
        store: Arc<MemoryUsageStore>,
        alerts: Arc<AdminAlertService>,
    }

    fn harness(settings: DescriberSettings, stubs: Vec<Arc<StubAdapter>>) -> Harness {
        let store = Arc::new(MemoryUsageStore::default());
        let usage = Arc::new(UsageRecorder::new(
            store.clone(),
            CostTable::default(),
            64,
        ));
        let alerts = Arc::new(AdminAlertService::default());
        let orchestrator = DescriptionOrchestrator::new(
            Arc::new(SettingsService::with_settings(settings)),
            MediaPreparer::default(),
            usage,
            alerts.clone(),
            4,
        )
        .with_adapter_factory(stub_factory(stubs));
        Harness {
            orchestrator,
            store,
            alerts,
        }
    }

    fn test_jpeg() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(64, 48, image::Rgb([90, 120, 150]));
        let mut out = Vec::new();
        let mut cursor = Cursor::new(&mut out);
        let encoder = JpegEncoder::new_with_quality(&mut cursor, 85);
        image::DynamicImage::ImageRgb8(img)
            .write_with_encoder(encoder)
            .unwrap();
        drop(cursor);
        out
    }

    fn frames(n: usize) -> Vec<Frame> {
        (0..n).map(|_| Frame::new(test_jpeg(), Utc::now())).collect()
    }

    fn request(mode: AnalysisMode, media: EventMedia) -> AnalysisRequest {
        AnalysisRequest {
            camera_name: "Front Door".to_string(),
            event_timestamp: Utc::now(),
            detection_hints: vec!["person".to_string()],
            media,
            requested_mode: mode,
        }
    }

    // ========================================
    // Fallback behavior
    // ========================================

    #[tokio::test]
    async fn test_auth_failure_escalates_to_next_provider() {
        let settings = DescriberSettings {
            providers: vec![image_provider("a", 0), image_provider("b", 1)],
            policy: fast_policy(),
        };
        let h = harness(
            settings,
            vec![
                StubAdapter::new("a", StubOutcome::Auth),
                StubAdapter::new("b", StubOutcome::Success("A person at the door.")),
            ],
        );

        let result = h
            .orchestrator
            .analyze(request(AnalysisMode::MultiFrame, EventMedia::frames_only(frames(4))))
            .await;

        assert_eq!(result.provider_used.as_deref(), Some("b"));
        assert_eq!(result.mode_used, Some(AnalysisMode::MultiFrame));
        assert_eq!(result.fallback_reason, vec!["multi_frame:a:auth_error"]);
        assert!(!result.description_retry_needed);
        // credential failures also raise an operator alert
        assert_eq!(h.alerts.raised_count(), 1);
    }

    #[tokio::test]
    async fn test_success_skips_lower_ranked_providers() {
        let settings = DescriberSettings {
            providers: vec![image_provider("a", 0), image_provider("b", 1)],
            policy: fast_policy(),
        };
        let second = StubAdapter::new("b", StubOutcome::Success("unused"));
        let h = harness(
            settings,
            vec![
                StubAdapter::new("a", StubOutcome::Success("A cat on the porch.")),
                second.clone(),
            ],
        );

        let result = h
            .orchestrator
            .analyze(request(AnalysisMode::MultiFrame, EventMedia::frames_only(frames(4))))
            .await;

        assert_eq!(result.provider_used.as_deref(), Some("a"));
        assert!(result.fallback_reason.is_empty());
        assert_eq!(second.calls(), 0);
        assert_eq!(result.objects_detected, vec![DetectedObject::Animal]);
    }

    #[tokio::test]
    async fn test_non_capable_source_skips_video_mode() {
        let settings = DescriberSettings {
            providers: vec![video_provider("g", 0)],
            policy: fast_policy(),
        };
        let h = harness(
            settings,
            vec![StubAdapter::new(
                "g",
                StubOutcome::Success("A truck in the driveway."),
            )],
        );

        let result = h
            .orchestrator
            .analyze(request(AnalysisMode::VideoNative, EventMedia::frames_only(frames(4))))
            .await;

        assert_ne!(result.mode_used, Some(AnalysisMode::VideoNative));
        assert_eq!(result.fallback_reason[0], "video_native:no_clip_source");
        assert_eq!(result.mode_used, Some(AnalysisMode::MultiFrame));
        assert_eq!(result.frame_count_used, Some(3));
    }

    #[tokio::test]
    async fn test_video_success_has_no_frame_count() {
        let dir = tempfile::tempdir().unwrap();
        let clip = dir.path().join("event.mp4");
        std::fs::write(&clip, b"fake clip").unwrap();

        let settings = DescriberSettings {
            providers: vec![video_provider("g", 0)],
            policy: fast_policy(),
        };
        let h = harness(
            settings,
            vec![StubAdapter::new(
                "g",
                StubOutcome::Success("A person crosses the yard."),
            )],
        );

        let result = h
            .orchestrator
            .analyze(request(
                AnalysisMode::VideoNative,
                EventMedia::with_clip(frames(4), PathBuf::from(&clip)),
            ))
            .await;

        assert_eq!(result.mode_used, Some(AnalysisMode::VideoNative));
        assert_eq!(result.frame_count_used, None);
        assert!(result.fallback_reason.is_empty());
    }

    #[tokio::test]
    async fn test_rate_limited_providers_escalate_then_downgrade() {
        let settings = DescriberSettings {
            providers: vec![
                image_provider("a", 0),
                image_provider("b", 1),
                image_provider("c", 2),
            ],
            policy: fast_policy(),
        };
        let h = harness(
            settings,
            vec![
                StubAdapter::new("a", StubOutcome::RateLimited),
                StubAdapter::new("b", StubOutcome::RateLimited),
                StubAdapter::new("c", StubOutcome::RateLimited),
            ],
        );

        let result = h
            .orchestrator
            .analyze(request(AnalysisMode::MultiFrame, EventMedia::frames_only(frames(4))))
            .await;

        assert_eq!(
            &result.fallback_reason[..4],
            &[
                "multi_frame:a:rate_limited".to_string(),
                "multi_frame:b:rate_limited".to_string(),
                "multi_frame:c:rate_limited".to_string(),
                "multi_frame:all_providers_failed".to_string(),
            ]
        );
        // the chain then ran the single_frame ladder to exhaustion
        assert!(result.description_retry_needed);
        assert!(result
            .fallback_reason
            .contains(&"single_frame:all_providers_failed".to_string()));
        assert_eq!(result.provider_used, None);
        assert_eq!(result.objects_detected, vec![DetectedObject::Person]);
    }

    #[tokio::test]
    async fn test_terminal_failure_is_flagged_for_retry() {
        let settings = DescriberSettings {
            providers: vec![image_provider("a", 0)],
            policy: fast_policy(),
        };
        let h = harness(settings, vec![StubAdapter::new("a", StubOutcome::Malformed)]);

        let result = h
            .orchestrator
            .analyze(request(AnalysisMode::SingleFrame, EventMedia::frames_only(frames(1))))
            .await;

        assert!(result.description_retry_needed);
        assert!(result.is_failure());
        assert_eq!(result.provider_used, None);
        assert_eq!(result.mode_used, None);
        assert!(!result.description.is_empty());
    }

    #[tokio::test]
    async fn test_empty_media_walks_down_without_provider_attempts() {
        let settings = DescriberSettings {
            providers: vec![image_provider("a", 0)],
            policy: fast_policy(),
        };
        let stub = StubAdapter::new("a", StubOutcome::Success("unused"));
        let h = harness(settings, vec![stub.clone()]);

        let result = h
            .orchestrator
            .analyze(request(AnalysisMode::MultiFrame, EventMedia::frames_only(vec![])))
            .await;

        assert_eq!(stub.calls(), 0);
        assert_eq!(
            result.fallback_reason,
            vec!["multi_frame:no_frames", "single_frame:no_frames"]
        );
        assert!(result.description_retry_needed);
    }

    #[tokio::test]
    async fn test_builtin_fallback_covers_image_modes() {
        // only a video-capable provider configured; the snapshot appends
        // the local fallback so multi_frame still terminates at a provider
        let mut video_only = video_provider("g", 0);
        video_only.capabilities.single_frame = false;
        video_only.capabilities.multi_frame = false;

        let settings = DescriberSettings {
            providers: vec![video_only],
            policy: fast_policy(),
        };
        let h = harness(
            settings,
            vec![
                StubAdapter::new("g", StubOutcome::Server),
                StubAdapter::new(
                    "local-fallback",
                    StubOutcome::Success("A dog near the fence."),
                ),
            ],
        );

        let result = h
            .orchestrator
            .analyze(request(AnalysisMode::MultiFrame, EventMedia::frames_only(frames(2))))
            .await;

        assert_eq!(result.provider_used.as_deref(), Some("local-fallback"));
        assert!(!result.description_retry_needed);
    }

    // ========================================
    // Retry behavior
    // ========================================

    #[tokio::test]
    async fn test_transient_errors_are_retried_then_escalated() {
        let mut provider = image_provider("a", 0);
        provider.max_attempts = 3;
        let settings = DescriberSettings {
            providers: vec![provider, image_provider("b", 1)],
            policy: fast_policy(),
        };
        let flaky = StubAdapter::new("a", StubOutcome::Server);
        let h = harness(
            settings,
            vec![
                flaky.clone(),
                StubAdapter::new("b", StubOutcome::Success("A van parks outside.")),
            ],
        );

        let result = h
            .orchestrator
            .analyze(request(AnalysisMode::SingleFrame, EventMedia::frames_only(frames(1))))
            .await;

        assert_eq!(flaky.calls(), 3);
        assert_eq!(result.provider_used.as_deref(), Some("b"));
        assert_eq!(result.fallback_reason, vec!["single_frame:a:server_error"]);
    }

    #[tokio::test]
    async fn test_auth_errors_are_never_retried() {
        let mut provider = image_provider("a", 0);
        provider.max_attempts = 3;
        let settings = DescriberSettings {
            providers: vec![provider, image_provider("b", 1)],
            policy: fast_policy(),
        };
        let denied = StubAdapter::new("a", StubOutcome::Auth);
        let h = harness(
            settings,
            vec![
                denied.clone(),
                StubAdapter::new("b", StubOutcome::Success("ok")),
            ],
        );

        h.orchestrator
            .analyze(request(AnalysisMode::SingleFrame, EventMedia::frames_only(frames(1))))
            .await;

        assert_eq!(denied.calls(), 1);
    }

    // ========================================
    // SLA budget
    // ========================================

    #[tokio::test]
    async fn test_sla_aborts_chain_before_third_provider() {
        let mut policy = fast_policy();
        policy.sla_ms = 500;
        policy.min_attempt_ms = 150;

        let settings = DescriberSettings {
            providers: vec![
                image_provider("a", 0),
                image_provider("b", 1),
                image_provider("c", 2),
            ],
            policy,
        };
        let slow = Duration::from_millis(200);
        let third = StubAdapter::with_delay("c", StubOutcome::Server, slow);
        let h = harness(
            settings,
            vec![
                StubAdapter::with_delay("a", StubOutcome::Server, slow),
                StubAdapter::with_delay("b", StubOutcome::Server, slow),
                third.clone(),
            ],
        );

        let result = h
            .orchestrator
            .analyze(request(AnalysisMode::SingleFrame, EventMedia::frames_only(frames(1))))
            .await;

        // two attempts burned ~400ms of a 500ms budget; the third never starts
        assert_eq!(third.calls(), 0);
        assert_eq!(
            result.fallback_reason,
            vec![
                "single_frame:a:server_error",
                "single_frame:b:server_error",
                "timeout"
            ]
        );
        assert!(result.description_retry_needed);
        assert!(result.total_elapsed_ms >= 400);
    }

    #[tokio::test]
    async fn test_slow_call_is_cut_off_as_timeout() {
        let mut policy = fast_policy();
        policy.call_timeout_ms = 50;

        let settings = DescriberSettings {
            providers: vec![image_provider("slow", 0), image_provider("b", 1)],
            policy,
        };
        let h = harness(
            settings,
            vec![
                StubAdapter::with_delay(
                    "slow",
                    StubOutcome::Success("never returned in time"),
                    Duration::from_millis(300),
                ),
                StubAdapter::new("b", StubOutcome::Success("A person waves.")),
            ],
        );

        let result = h
            .orchestrator
            .analyze(request(AnalysisMode::SingleFrame, EventMedia::frames_only(frames(1))))
            .await;

        assert_eq!(result.fallback_reason, vec!["single_frame:slow:timeout"]);
        assert_eq!(result.provider_used.as_deref(), Some("b"));
    }

    // ========================================
    // Telemetry and determinism
    // ========================================

    #[tokio::test]
    async fn test_every_attempt_is_recorded() {
        let mut provider = image_provider("a", 0);
        provider.max_attempts = 2;
        let settings = DescriberSettings {
            providers: vec![provider, image_provider("b", 1)],
            policy: fast_policy(),
        };
        let h = harness(
            settings,
            vec![
                StubAdapter::new("a", StubOutcome::Server),
                StubAdapter::new("b", StubOutcome::Success("A person arrives.")),
            ],
        );

        h.orchestrator
            .analyze(request(AnalysisMode::SingleFrame, EventMedia::frames_only(frames(1))))
            .await;

        // 2 failed attempts on a, 1 success on b, drained asynchronously
        for _ in 0..100 {
            if h.store.len().await == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(h.store.len().await, 3);

        let usage = h.store.aggregate(None).await.unwrap();
        let a = usage.iter().find(|u| u.provider == "a").unwrap();
        assert_eq!(a.attempts, 2);
        assert_eq!(a.successes, 0);
        let b = usage.iter().find(|u| u.provider == "b").unwrap();
        assert_eq!(b.successes, 1);
    }

    #[tokio::test]
    async fn test_deterministic_under_fixed_stubs() {
        let settings = DescriberSettings {
            providers: vec![image_provider("a", 0), image_provider("b", 1)],
            policy: fast_policy(),
        };

        let mut outcomes = Vec::new();
        for _ in 0..2 {
            let h = harness(
                settings.clone(),
                vec![
                    StubAdapter::new("a", StubOutcome::Timeout),
                    StubAdapter::new("b", StubOutcome::Success("A person leaves a box.")),
                ],
            );
            let result = h
                .orchestrator
                .analyze(request(AnalysisMode::MultiFrame, EventMedia::frames_only(frames(4))))
                .await;
            outcomes.push((
                result.provider_used,
                result.mode_used,
                result.fallback_reason,
            ));
        }

        assert_eq!(outcomes[0], outcomes[1]);
    }

    #[tokio::test]
    async fn test_usage_stats_read_back() {
        let settings = DescriberSettings {
            providers: vec![image_provider("a", 0)],
            policy: fast_policy(),
        };
        let store = Arc::new(MemoryUsageStore::default());
        let usage = Arc::new(UsageRecorder::new(store, CostTable::default(), 64));
        let orchestrator = DescriptionOrchestrator::new(
            Arc::new(SettingsService::with_settings(settings)),
            MediaPreparer::default(),
            usage.clone(),
            Arc::new(AdminAlertService::default()),
            4,
        )
        .with_adapter_factory(stub_factory(vec![StubAdapter::new(
            "a",
            StubOutcome::Success("A person enters."),
        )]));

        orchestrator
            .analyze(request(AnalysisMode::SingleFrame, EventMedia::frames_only(frames(1))))
            .await;

        let mut report = usage.stats(StatsRange::Today).await.unwrap();
        for _ in 0..100 {
            if report.totals.attempts == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
            report = usage.stats(StatsRange::Today).await.unwrap();
        }
        assert_eq!(report.totals.attempts, 1);
        assert_eq!(report.totals.successes, 1);
        assert_eq!(report.range, "today");
    }
}
