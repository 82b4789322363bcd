//! Analysis prompt assembly
//!
//! One template per payload shape, parameterized with camera context and
//! the ingestion pipeline's detection hints.

use crate::models::AnalysisMode;
use chrono::{DateTime, Utc};

/// Build the description prompt for one request
pub fn build_prompt(
    camera_name: &str,
    event_timestamp: DateTime<Utc>,
    detection_hints: &[String],
    mode: AnalysisMode,
) -> String {
    let mut prompt = format!(
        "You are reviewing security camera footage from the camera \"{}\". \
         The activity was recorded at {}.",
        camera_name,
        event_timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
    );

    if !detection_hints.is_empty() {
        prompt.push_str(&format!(
            " Motion detection flagged: {}.",
            detection_hints.join(", ")
        ));
    }

    match mode {
        AnalysisMode::VideoNative => {
            prompt.push_str(" The attached clip shows the full event.");
        }
        AnalysisMode::MultiFrame => {
            prompt.push_str(
                " The attached images are consecutive frames from the same event, in order.",
            );
        }
        AnalysisMode::SingleFrame => {
            prompt.push_str(" The attached image is a single frame from the event.");
        }
    }

    prompt.push_str(
        " Describe in one or two sentences what is happening. \
         Name any people, vehicles, animals, or packages you can see. \
         If nothing notable is visible, say so.",
    );

    prompt
}
