//! Instructions sent to the model.

use std::collections::BTreeSet;

use vlens_models::timestamp::format_seconds;
use vlens_models::{AnalysisKind, Chapter, ChunkDescriptor, ChunkPayload};

/// Condensed context handed from one chunk to the next in sequential mode.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CarryForward {
    pub summary: Option<String>,
    pub last_chapter: Option<Chapter>,
}

impl CarryForward {
    /// Condense a chunk payload, keeping the summary within `max_chars`.
    pub fn from_payload(payload: &ChunkPayload, max_chars: usize) -> Self {
        Self {
            summary: payload
                .summary
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| truncate_chars(s, max_chars)),
            last_chapter: payload
                .chapters
                .iter()
                .max_by(|a, b| a.start_seconds.total_cmp(&b.start_seconds))
                .cloned(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.summary.is_none() && self.last_chapter.is_none()
    }

    fn render(&self) -> String {
        let mut out = String::new();
        if let Some(summary) = &self.summary {
            out.push_str("Summary of the previous part:\n");
            out.push_str(summary);
            out.push('\n');
        }
        if let Some(chapter) = &self.last_chapter {
            out.push_str(&format!("Last chapter of the previous part: {}", chapter.label()));
            if !chapter.summary.is_empty() {
                out.push_str(&format!(" - {}", chapter.summary));
            }
            out.push('\n');
        }
        out
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", text[..cut].trim_end()),
        None => text.to_string(),
    }
}

fn output_schema(kinds: &BTreeSet<AnalysisKind>) -> String {
    let mut fields = Vec::new();
    if kinds.contains(&AnalysisKind::Summary) {
        fields.push(r#"  "summary": "Narrative summary of this part""#.to_string());
    }
    if kinds.contains(&AnalysisKind::Chapters) {
        fields.push(
            r#"  "chapters": [
    {
      "title": "Chapter title",
      "start_seconds": 0,
      "end_seconds": 0,
      "summary": "What happens in this chapter",
      "key_points": ["point"]
    }
  ]"#
            .to_string(),
        );
    }
    if kinds.contains(&AnalysisKind::Elements) {
        fields.push(
            r#"  "elements": {
    "equipment": [{"name": "Item", "time_ranges": [[0, 0]], "discussed": false, "mention_count": 1}],
    "topics": [{"topic": "Topic", "time_ranges": [[0, 0]], "importance": "low|medium|high", "mention_count": 1}],
    "people": {"max_count": 0, "speakers": [{"speaker_id": "Speaker 1", "start_seconds": 0, "end_seconds": 0}]}
  }"#
            .to_string(),
        );
    }
    format!("{{\n{}\n}}", fields.join(",\n"))
}

/// Instructions for analyzing one chunk.
pub fn build_chunk_instructions(
    chunk: &ChunkDescriptor,
    chunk_count: usize,
    total_duration_seconds: u32,
    kinds: &BTreeSet<AnalysisKind>,
    context: Option<&CarryForward>,
) -> String {
    let offset = chunk.extract_start_seconds;
    let mut prompt = String::new();

    if chunk_count > 1 {
        prompt.push_str(&format!(
            "You are analyzing part {} of {} of a video that is {} long.\n\
             This clip starts at {} ({} seconds) into the full video and ends at {}.\n\n\
             TIMESTAMPS: every timestamp you return MUST be absolute to the FULL video. \
             Add {} seconds to any position you measure inside this clip.\n",
            chunk.index + 1,
            chunk_count,
            format_seconds(total_duration_seconds as f64),
            format_seconds(offset as f64),
            offset,
            format_seconds(chunk.extract_end_seconds as f64),
            offset,
        ));
    } else {
        prompt.push_str(&format!(
            "You are analyzing a video that is {} long.\n",
            format_seconds(total_duration_seconds as f64)
        ));
    }

    if let Some(context) = context.filter(|c| !c.is_empty()) {
        prompt.push_str("\nCONTEXT FROM THE PREVIOUS PART (continue the narrative, do not repeat it):\n");
        prompt.push_str(&context.render());
    }

    prompt.push_str(&format!(
        r#"
Return ONLY a single JSON object with this schema:
{}

Additional instructions:
- Return ONLY the JSON object and nothing else.
- Timestamps are seconds (numbers) or "HH:MM:SS" strings.
- A time range is a [start, end] pair with end >= start.
- Label speakers "Speaker 1", "Speaker 2", ... in order of first appearance.
"#,
        output_schema(kinds)
    ));

    prompt
}

/// Prompt for merging per-chunk summaries into one narrative.
pub fn build_synthesis_prompt(parts: &[(&ChunkDescriptor, &str)]) -> String {
    let mut prompt = String::from(
        "The following are summaries of consecutive parts of one video, each tagged with its time range.\n\
         Write ONE coherent narrative summary of the whole video that integrates all parts.\n\
         Do not list the parts one by one and do not mention that the video was split.\n\
         Return plain text only.\n\n",
    );
    for (chunk, summary) in parts {
        prompt.push_str(&format!(
            "[{} - {}]\n{}\n\n",
            format_seconds(chunk.core_start_seconds as f64),
            format_seconds(chunk.core_end_seconds as f64),
            summary.trim()
        ));
    }
    prompt
}
