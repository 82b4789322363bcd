//! Shared data model for description analysis
//!
//! Request/result types exchanged with the event pipeline, the analysis
//! mode ladder, and the fixed object taxonomy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Analysis fidelity mode, highest first
///
/// A chain downgrades one step at a time when a mode is exhausted:
/// video_native -> multi_frame -> single_frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    VideoNative,
    MultiFrame,
    SingleFrame,
}

impl AnalysisMode {
    /// String form used in fallback chains and usage rows
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisMode::VideoNative => "video_native",
            AnalysisMode::MultiFrame => "multi_frame",
            AnalysisMode::SingleFrame => "single_frame",
        }
    }

    /// Next lower mode, or None when already at the bottom
    pub fn downgrade(&self) -> Option<AnalysisMode> {
        match self {
            AnalysisMode::VideoNative => Some(AnalysisMode::MultiFrame),
            AnalysisMode::MultiFrame => Some(AnalysisMode::SingleFrame),
            AnalysisMode::SingleFrame => None,
        }
    }
}

impl fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed object taxonomy for detection results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectedObject {
    Person,
    Vehicle,
    Animal,
    Package,
    Unknown,
}

impl DetectedObject {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectedObject::Person => "person",
            DetectedObject::Vehicle => "vehicle",
            DetectedObject::Animal => "animal",
            DetectedObject::Package => "package",
            DetectedObject::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DetectedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single captured frame (JPEG bytes)
#[derive(Debug, Clone)]
pub struct Frame {
    pub jpeg: Vec<u8>,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(jpeg: Vec<u8>, captured_at: DateTime<Utc>) -> Self {
        Self { jpeg, captured_at }
    }
}

/// Visual evidence attached to one detection event
///
/// The clip, when present, has already been retrieved by the ingestion
/// side; this subsystem never downloads media itself.
#[derive(Debug, Clone, Default)]
pub struct EventMedia {
    /// Captured frames in chronological order
    pub frames: Vec<Frame>,
    /// Path to an already-downloaded clip, if one exists
    pub clip_path: Option<PathBuf>,
    /// Whether the originating source can supply video clips at all
    pub supports_clips: bool,
}

impl EventMedia {
    /// Media from a source without clip capability
    pub fn frames_only(frames: Vec<Frame>) -> Self {
        Self {
            frames,
            clip_path: None,
            supports_clips: false,
        }
    }

    /// Media from a clip-capable source
    pub fn with_clip(frames: Vec<Frame>, clip_path: PathBuf) -> Self {
        Self {
            frames,
            clip_path: Some(clip_path),
            supports_clips: true,
        }
    }
}

/// One description request, created per detection event
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    /// Display name of the originating camera
    pub camera_name: String,
    /// When the event was captured
    pub event_timestamp: DateTime<Utc>,
    /// Pre-existing detection hints from the motion pipeline (e.g. "person")
    pub detection_hints: Vec<String>,
    /// Captured visual evidence
    pub media: EventMedia,
    /// Requested starting mode
    pub requested_mode: AnalysisMode,
}

/// Outcome of one description request
///
/// Always produced, success or terminal failure; `analyze()` never raises
/// into the event pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Generated description, or a placeholder on terminal failure
    pub description: String,
    /// Confidence 0-100
    pub confidence: u8,
    /// Objects recognized in the description, from the fixed taxonomy
    pub objects_detected: Vec<DetectedObject>,
    /// Provider that produced the description, None on terminal failure
    pub provider_used: Option<String>,
    /// Mode the successful call ran at, None on terminal failure
    pub mode_used: Option<AnalysisMode>,
    /// Frames sent with the successful call; None for video mode
    pub frame_count_used: Option<u32>,
    /// Ordered, append-only audit chain of every fallback step
    pub fallback_reason: Vec<String>,
    /// Wall-clock from request start to the final attempt
    pub total_elapsed_ms: u64,
    /// Set on terminal failure so the event can be reprocessed later
    pub description_retry_needed: bool,
}

impl AnalysisResult {
    /// Whether this result is a terminal-failure placeholder
    pub fn is_failure(&self) -> bool {
        self.description_retry_needed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_downgrade_ladder() {
        assert_eq!(
            AnalysisMode::VideoNative.downgrade(),
            Some(AnalysisMode::MultiFrame)
        );
        assert_eq!(
            AnalysisMode::MultiFrame.downgrade(),
            Some(AnalysisMode::SingleFrame)
        );
        assert_eq!(AnalysisMode::SingleFrame.downgrade(), None);
    }

    #[test]
    fn test_mode_as_str() {
        assert_eq!(AnalysisMode::VideoNative.as_str(), "video_native");
        assert_eq!(AnalysisMode::MultiFrame.as_str(), "multi_frame");
        assert_eq!(AnalysisMode::SingleFrame.as_str(), "single_frame");
    }

    #[test]
    fn test_mode_serde_snake_case() {
        let json = serde_json::to_string(&AnalysisMode::VideoNative).unwrap();
        assert_eq!(json, "\"video_native\"");

        let mode: AnalysisMode = serde_json::from_str("\"single_frame\"").unwrap();
        assert_eq!(mode, AnalysisMode::SingleFrame);
    }

    #[test]
    fn test_event_media_constructors() {
        let media = EventMedia::frames_only(vec![]);
        assert!(!media.supports_clips);
        assert!(media.clip_path.is_none());

        let media = EventMedia::with_clip(vec![], PathBuf::from("/tmp/clip.mp4"));
        assert!(media.supports_clips);
        assert!(media.clip_path.is_some());
    }

    #[test]
    fn test_result_serialization_round_trip() {
        let result = AnalysisResult {
            description: "A person walks up the driveway".to_string(),
            confidence: 80,
            objects_detected: vec![DetectedObject::Person],
            provider_used: Some("openai".to_string()),
            mode_used: Some(AnalysisMode::MultiFrame),
            frame_count_used: Some(5),
            fallback_reason: vec!["video_native:no_clip_source".to_string()],
            total_elapsed_ms: 1234,
            description_retry_needed: false,
        };

        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("multi_frame"));
        assert!(json.contains("\"person\""));

        let back: AnalysisResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back.provider_used.as_deref(), Some("openai"));
        assert!(!back.is_failure());
    }
}
