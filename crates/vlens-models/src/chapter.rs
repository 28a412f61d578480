//! Chapter records.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::timestamp::{deserialize_seconds, format_seconds};

/// A titled, timestamped segment of the video.
///
/// Timestamps are absolute to the whole video. `index` is 1-based and only
/// meaningful after aggregation; model output leaves it at 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Chapter {
    #[serde(default)]
    pub index: u32,

    pub title: String,

    #[serde(alias = "start", deserialize_with = "deserialize_seconds")]
    #[schemars(with = "f64")]
    pub start_seconds: f64,

    #[serde(alias = "end", deserialize_with = "deserialize_seconds")]
    #[schemars(with = "f64")]
    pub end_seconds: f64,

    #[serde(default)]
    pub summary: String,

    #[serde(default)]
    pub key_points: Vec<String>,
}

impl Chapter {
    pub fn new(title: impl Into<String>, start_seconds: f64, end_seconds: f64) -> Self {
        Self {
            index: 0,
            title: title.into(),
            start_seconds,
            end_seconds,
            summary: String::new(),
            key_points: Vec::new(),
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn duration_seconds(&self) -> f64 {
        (self.end_seconds - self.start_seconds).max(0.0)
    }

    /// Shift both boundaries by `offset` seconds.
    pub fn shift(&mut self, offset: f64) {
        self.start_seconds += offset;
        self.end_seconds += offset;
    }

    /// One-line label used in carry-forward context and synthesis prompts.
    pub fn label(&self) -> String {
        format!(
            "{} ({} - {})",
            self.title,
            format_seconds(self.start_seconds),
            format_seconds(self.end_seconds)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chapter_from_model_json() {
        let chapter: Chapter = serde_json::from_str(
            r#"{"title": "Setup", "start": "00:10:00", "end": 720, "summary": "Rig assembly"}"#,
        )
        .unwrap();

        assert_eq!(chapter.index, 0);
        assert_eq!(chapter.start_seconds, 600.0);
        assert_eq!(chapter.end_seconds, 720.0);
        assert!(chapter.key_points.is_empty());
        assert_eq!(chapter.duration_seconds(), 120.0);
    }

    #[test]
    fn test_chapter_label() {
        let chapter = Chapter::new("Intro", 0.0, 95.0);
        assert_eq!(chapter.label(), "Intro (00:00:00 - 00:01:35)");
    }
}
