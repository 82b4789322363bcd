//! MediaPreparer - mode-appropriate payload construction
//!
//! ## Responsibilities
//!
//! - Frame selection per analysis mode (middle frame / evenly spaced set)
//! - Downscale to the size ceiling and re-encode JPEG
//! - Quality stepping when the encoded size exceeds the byte threshold
//! - Clip reuse for video mode; this subsystem never downloads media

use crate::models::{AnalysisMode, EventMedia};
use image::codecs::jpeg::JpegEncoder;
use std::io::Cursor;
use std::path::PathBuf;

/// Payload handed to a provider adapter for one mode
#[derive(Debug, Clone)]
pub enum MediaPayload {
    /// Re-encoded JPEG frames, chronological order
    Frames { jpegs: Vec<Vec<u8>> },
    /// Reference to an already-downloaded clip
    VideoClip { path: PathBuf, mime_type: String },
}

impl MediaPayload {
    /// Frames carried by the payload; None for video
    pub fn frame_count(&self) -> Option<u32> {
        match self {
            MediaPayload::Frames { jpegs } => Some(jpegs.len() as u32),
            MediaPayload::VideoClip { .. } => None,
        }
    }
}

/// Mode-level preparation failure
///
/// These downgrade the mode directly and never consume provider retry
/// budget.
#[derive(Debug, thiserror::Error)]
pub enum PrepareError {
    /// The originating source cannot supply a clip
    #[error("source cannot supply a clip")]
    NoClipSource,

    /// No frames available for an image mode
    #[error("no frames available")]
    NoFrames,

    /// Every frame failed to decode or re-encode
    #[error("frame encoding failed: {0}")]
    Encode(String),
}

impl PrepareError {
    /// Short reason string recorded in the fallback chain
    pub fn reason(&self) -> &'static str {
        match self {
            PrepareError::NoClipSource => "no_clip_source",
            PrepareError::NoFrames => "no_frames",
            PrepareError::Encode(_) => "encode_failed",
        }
    }
}

/// Preparation limits
#[derive(Debug, Clone)]
pub struct MediaPrepConfig {
    /// Longest edge after downscaling
    pub max_edge_px: u32,
    /// Encoded size threshold that triggers quality stepping
    pub max_encoded_bytes: usize,
    /// Starting JPEG quality
    pub jpeg_quality: u8,
    /// Quality floor
    pub min_quality: u8,
}

impl Default for MediaPrepConfig {
    fn default() -> Self {
        Self {
            max_edge_px: 1280,
            max_encoded_bytes: 600 * 1024,
            jpeg_quality: 85,
            min_quality: 40,
        }
    }
}

/// MediaPreparer service
#[derive(Debug, Clone, Default)]
pub struct MediaPreparer {
    config: MediaPrepConfig,
}

impl MediaPreparer {
    /// Create with explicit limits
    pub fn new(config: MediaPrepConfig) -> Self {
        Self { config }
    }

    /// Build the payload for one mode
    ///
    /// `frame_count` is the requested frame budget for multi_frame mode
    /// and ignored for the other modes.
    pub fn prepare(
        &self,
        media: &EventMedia,
        mode: AnalysisMode,
        frame_count: u32,
    ) -> Result<MediaPayload, PrepareError> {
        match mode {
            AnalysisMode::VideoNative => {
                if !media.supports_clips {
                    return Err(PrepareError::NoClipSource);
                }
                match media.clip_path {
                    Some(ref path) => Ok(MediaPayload::VideoClip {
                        path: path.clone(),
                        mime_type: "video/mp4".to_string(),
                    }),
                    None => Err(PrepareError::NoClipSource),
                }
            }
            AnalysisMode::MultiFrame => self.prepare_frames(media, frame_count.max(1) as usize),
            AnalysisMode::SingleFrame => self.prepare_frames(media, 1),
        }
    }

    fn prepare_frames(&self, media: &EventMedia, count: usize) -> Result<MediaPayload, PrepareError> {
        if media.frames.is_empty() {
            return Err(PrepareError::NoFrames);
        }

        let indices = select_indices(media.frames.len(), count);
        let mut jpegs = Vec::with_capacity(indices.len());
        let mut last_error = String::new();

        for idx in indices {
            match self.encode_frame(&media.frames[idx].jpeg) {
                Ok(data) => jpegs.push(data),
                Err(e) => {
                    tracing::warn!(frame_index = idx, error = %e, "Skipping undecodable frame");
                    last_error = e;
                }
            }
        }

        if jpegs.is_empty() {
            return Err(PrepareError::Encode(last_error));
        }

        Ok(MediaPayload::Frames { jpegs })
    }

    /// Downscale and re-encode a single frame, stepping quality down until
    /// the encoded size fits the threshold or the floor is reached
    fn encode_frame(&self, jpeg: &[u8]) -> Result<Vec<u8>, String> {
        let img = image::load_from_memory(jpeg).map_err(|e| e.to_string())?;

        let img = if img.width().max(img.height()) > self.config.max_edge_px {
            img.thumbnail(self.config.max_edge_px, self.config.max_edge_px)
        } else {
            img
        };

        let mut quality = self.config.jpeg_quality;
        loop {
            let mut out = Vec::new();
            let mut cursor = Cursor::new(&mut out);
            let encoder = JpegEncoder::new_with_quality(&mut cursor, quality);
            img.write_with_encoder(encoder).map_err(|e| e.to_string())?;
            drop(cursor);

            if out.len() <= self.config.max_encoded_bytes || quality <= self.config.min_quality {
                return Ok(out);
            }
            quality = quality.saturating_sub(15).max(self.config.min_quality);
        }
    }
}

/// Indices of up to `count` evenly spaced frames; the middle frame when
/// `count == 1`
fn select_indices(len: usize, count: usize) -> Vec<usize> {
    if count == 1 {
        return vec![len / 2];
    }
    if len <= count {
        return (0..len).collect();
    }
    (0..count)
        .map(|i| i * (len - 1) / (count - 1))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Frame;
    use chrono::Utc;
    use image::RgbImage;

    fn test_jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        let mut out = Vec::new();
        let mut cursor = Cursor::new(&mut out);
        let encoder = JpegEncoder::new_with_quality(&mut cursor, 90);
        image::DynamicImage::ImageRgb8(img)
            .write_with_encoder(encoder)
            .unwrap();
        drop(cursor);
        out
    }

    fn frames(n: usize) -> Vec<Frame> {
        (0..n).map(|_| Frame::new(test_jpeg(320, 240), Utc::now())).collect()
    }

    #[test]
    fn test_select_indices_middle_for_single() {
        assert_eq!(select_indices(7, 1), vec![3]);
        assert_eq!(select_indices(1, 1), vec![0]);
    }

    #[test]
    fn test_select_indices_evenly_spaced() {
        assert_eq!(select_indices(10, 5), vec![0, 2, 4, 6, 9]);
        assert_eq!(select_indices(3, 5), vec![0, 1, 2]);
    }

    #[test]
    fn test_video_without_capability_is_no_clip_source() {
        let preparer = MediaPreparer::default();
        let media = EventMedia::frames_only(frames(3));
        let err = preparer
            .prepare(&media, AnalysisMode::VideoNative, 0)
            .unwrap_err();
        assert!(matches!(err, PrepareError::NoClipSource));
        assert_eq!(err.reason(), "no_clip_source");
    }

    #[test]
    fn test_video_capable_but_missing_clip_is_no_clip_source() {
        let preparer = MediaPreparer::default();
        let mut media = EventMedia::frames_only(frames(3));
        media.supports_clips = true;
        let err = preparer
            .prepare(&media, AnalysisMode::VideoNative, 0)
            .unwrap_err();
        assert!(matches!(err, PrepareError::NoClipSource));
    }

    #[test]
    fn test_video_reuses_clip_path() {
        let preparer = MediaPreparer::default();
        let media = EventMedia::with_clip(frames(3), PathBuf::from("/var/lib/events/e1.mp4"));
        let payload = preparer.prepare(&media, AnalysisMode::VideoNative, 0).unwrap();
        match payload {
            MediaPayload::VideoClip { path, mime_type } => {
                assert_eq!(path, PathBuf::from("/var/lib/events/e1.mp4"));
                assert_eq!(mime_type, "video/mp4");
            }
            other => panic!("expected VideoClip, got {:?}", other),
        }
        assert_eq!(
            preparer
                .prepare(&media, AnalysisMode::VideoNative, 0)
                .unwrap()
                .frame_count(),
            None
        );
    }

    #[test]
    fn test_multi_frame_respects_budget() {
        let preparer = MediaPreparer::default();
        let media = EventMedia::frames_only(frames(10));
        let payload = preparer.prepare(&media, AnalysisMode::MultiFrame, 5).unwrap();
        assert_eq!(payload.frame_count(), Some(5));
    }

    #[test]
    fn test_single_frame_picks_one() {
        let preparer = MediaPreparer::default();
        let media = EventMedia::frames_only(frames(9));
        let payload = preparer.prepare(&media, AnalysisMode::SingleFrame, 5).unwrap();
        assert_eq!(payload.frame_count(), Some(1));
    }

    #[test]
    fn test_empty_frames_is_no_frames() {
        let preparer = MediaPreparer::default();
        let media = EventMedia::frames_only(vec![]);
        let err = preparer
            .prepare(&media, AnalysisMode::SingleFrame, 1)
            .unwrap_err();
        assert!(matches!(err, PrepareError::NoFrames));
        assert_eq!(err.reason(), "no_frames");
    }

    #[test]
    fn test_oversized_frame_is_downscaled() {
        let preparer = MediaPreparer::default();
        let media = EventMedia::frames_only(vec![Frame::new(test_jpeg(1920, 1080), Utc::now())]);
        let payload = preparer.prepare(&media, AnalysisMode::SingleFrame, 1).unwrap();

        let MediaPayload::Frames { jpegs } = payload else {
            panic!("expected frames");
        };
        let img = image::load_from_memory(&jpegs[0]).unwrap();
        assert!(img.width().max(img.height()) <= 1280);
    }

    #[test]
    fn test_undecodable_frames_are_skipped() {
        let preparer = MediaPreparer::default();
        let mut all = frames(2);
        all.insert(1, Frame::new(vec![0xde, 0xad, 0xbe, 0xef], Utc::now()));
        let media = EventMedia::frames_only(all);
        let payload = preparer.prepare(&media, AnalysisMode::MultiFrame, 3).unwrap();
        assert_eq!(payload.frame_count(), Some(2));
    }

    #[test]
    fn test_all_undecodable_is_encode_error() {
        let preparer = MediaPreparer::default();
        let media = EventMedia::frames_only(vec![Frame::new(vec![1, 2, 3], Utc::now())]);
        let err = preparer
            .prepare(&media, AnalysisMode::SingleFrame, 1)
            .unwrap_err();
        assert!(matches!(err, PrepareError::Encode(_)));
    }
}
