//! Event Describer
//!
//! AI description orchestration for camera detection events.
//!
//! ## Architecture (7 Components)
//!
//! 1. SettingsService - provider list + policy, immutable snapshots
//! 2. MediaPreparer - mode-appropriate payload construction
//! 3. ProviderAdapters - OpenAI / Gemini / Claude behind one trait
//! 4. RetryPolicy - per-call retry and deadline-gated backoff
//! 5. DescriptionOrchestrator - mode/provider fallback state machine
//! 6. UsageRecorder - per-attempt telemetry off the critical path
//! 7. AdminAlertService - operator alerts for credential failures
//!
//! ## Design Principles
//!
//! - One AnalysisResult per request, success or placeholder; `analyze()`
//!   never raises into the event pipeline
//! - Strictly sequential per request, semaphore-bounded across requests
//! - Immutable settings snapshot per request

pub mod alerts;
pub mod error;
pub mod media_preparer;
pub mod models;
pub mod orchestrator;
pub mod providers;
pub mod retry;
pub mod settings;
pub mod usage_recorder;

pub use error::{Error, Result};
pub use models::{AnalysisMode, AnalysisRequest, AnalysisResult, DetectedObject, EventMedia, Frame};
pub use orchestrator::DescriptionOrchestrator;
