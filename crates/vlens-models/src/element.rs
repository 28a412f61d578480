//! Element detections: equipment, topics and people.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::timestamp::deserialize_seconds;

/// A `[start, end]` pair in absolute seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TimeRange(
    #[serde(deserialize_with = "deserialize_seconds")]
    #[schemars(with = "f64")]
    pub f64,
    #[serde(deserialize_with = "deserialize_seconds")]
    #[schemars(with = "f64")]
    pub f64,
);

impl TimeRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self(start, end)
    }

    pub fn start(&self) -> f64 {
        self.0
    }

    pub fn end(&self) -> f64 {
        self.1
    }

    pub fn is_valid(&self) -> bool {
        self.0.is_finite() && self.1.is_finite() && self.1 >= self.0
    }

    pub fn shifted(&self, offset: f64) -> Self {
        Self(self.0 + offset, self.1 + offset)
    }

    pub fn clamped(&self, lo: f64, hi: f64) -> Self {
        Self(self.0.clamp(lo, hi), self.1.clamp(lo, hi))
    }
}

/// How central a topic is to the video.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
    JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    #[default]
    Low,
    Medium,
    High,
}

/// A piece of equipment seen or mentioned in the video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EquipmentDetection {
    pub name: String,
    #[serde(default)]
    pub time_ranges: Vec<TimeRange>,
    /// Whether the item is talked about, not only visible
    #[serde(default)]
    pub discussed: bool,
    #[serde(default = "default_mentions")]
    pub mention_count: u32,
}

/// A discussion topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TopicDetection {
    pub topic: String,
    #[serde(default)]
    pub time_ranges: Vec<TimeRange>,
    #[serde(default)]
    pub importance: Importance,
    #[serde(default = "default_mentions")]
    pub mention_count: u32,
}

fn default_mentions() -> u32 {
    1
}

/// A stretch of time attributed to one speaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SpeakerSegment {
    pub speaker_id: String,
    #[serde(alias = "start", deserialize_with = "deserialize_seconds")]
    #[schemars(with = "f64")]
    pub start_seconds: f64,
    #[serde(alias = "end", deserialize_with = "deserialize_seconds")]
    #[schemars(with = "f64")]
    pub end_seconds: f64,
}

/// People on screen and who speaks when.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PeopleSummary {
    /// Most people visible at once
    #[serde(default)]
    pub max_count: u32,
    #[serde(default)]
    pub speakers: Vec<SpeakerSegment>,
    /// False when speaker labels were stitched across chunks without voice
    /// matching, so the same label may not be the same person everywhere.
    #[serde(default = "default_verified")]
    pub speaker_identity_verified: bool,
}

fn default_verified() -> bool {
    true
}

impl Default for PeopleSummary {
    fn default() -> Self {
        Self {
            max_count: 0,
            speakers: Vec::new(),
            speaker_identity_verified: true,
        }
    }
}

/// All element detections of one chunk or one job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ElementsPayload {
    #[serde(default)]
    pub equipment: Vec<EquipmentDetection>,
    #[serde(default)]
    pub topics: Vec<TopicDetection>,
    #[serde(default)]
    pub people: PeopleSummary,
}

impl ElementsPayload {
    pub fn is_empty(&self) -> bool {
        self.equipment.is_empty()
            && self.topics.is_empty()
            && self.people.speakers.is_empty()
            && self.people.max_count == 0
    }

    /// Every time value in the payload, for offset sanity checks.
    pub fn timestamps(&self) -> impl Iterator<Item = f64> + '_ {
        let equipment = self.equipment.iter().flat_map(|e| &e.time_ranges);
        let topics = self.topics.iter().flat_map(|t| &t.time_ranges);
        let ranges = equipment.chain(topics).flat_map(|r| [r.start(), r.end()]);
        let speakers = self
            .people
            .speakers
            .iter()
            .flat_map(|s| [s.start_seconds, s.end_seconds]);
        ranges.chain(speakers)
    }

    /// Shift every time value by `offset` seconds.
    pub fn shift(&mut self, offset: f64) {
        for range in self
            .equipment
            .iter_mut()
            .flat_map(|e| e.time_ranges.iter_mut())
            .chain(self.topics.iter_mut().flat_map(|t| t.time_ranges.iter_mut()))
        {
            *range = range.shifted(offset);
        }
        for segment in &mut self.people.speakers {
            segment.start_seconds += offset;
            segment.end_seconds += offset;
        }
    }
}

/// Grouping key for detections of the same entity across chunks.
///
/// Case-insensitive, whitespace-collapsed, surrounding punctuation removed.
pub fn normalize_key(name: &str) -> String {
    name.split_whitespace()
        .map(|word| word.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
