//! Data contracts transported between stages
//!
//! Internal names are snake_case; the wire shape (cache entries, chunk JSON,
//! `pipeline_results.json`) is lowerCamelCase via serde aliases. Every record
//! that an LLM-backed stage produces carries optional [`StageMetrics`].

use camino::Utf8PathBuf;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Which branch of the pipeline DAG a video takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Educational,
    Leadership,
}

impl ContentType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Educational => "educational",
            Self::Leadership => "leadership",
        }
    }
}

/// Which archive directory convention applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    Regular,
    Offsite,
}

/// Token counts for a single stage's LLM usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokensUsed {
    pub input: u64,
    pub output: u64,
}

impl TokensUsed {
    pub fn add(&mut self, input: u64, output: u64) {
        self.input += input;
        self.output += output;
    }
}

/// Optional execution metrics attached to stage outputs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageMetrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<TokensUsed>,
    /// USD; local providers report 0
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time_sec: Option<f64>,
}

/// Everything Parse derives from the filename plus the media probe.
///
/// Immutable once produced; `video_id` is unique within the archive and
/// `archive_path` is a pure function of the other fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadata {
    pub date: NaiveDate,
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<String>,
    pub title: String,
    pub speaker: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
    pub content_type: ContentType,
    pub event_category: EventCategory,
    pub original_filename: String,
    pub video_id: String,
    pub source_path: Utf8PathBuf,
    pub archive_path: Utf8PathBuf,
    pub duration_seconds: f64,
}

/// One time-aligned piece of the raw transcript. `end >= start >= 0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Output of the transcription service, segments in time order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTranscript {
    pub segments: Vec<TranscriptSegment>,
    pub full_text: String,
    pub duration_seconds: f64,
    pub language: String,
    pub model_name: String,
    /// `[MM:SS → MM:SS] text` view, present when timestamps are requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamped_text: Option<String>,
}

/// Result of glossary application plus LLM cleanup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanedTranscript {
    pub text: String,
    pub original_length: usize,
    pub cleaned_length: usize,
    /// `"from→to"` per replacement occurrence
    pub corrections: Vec<String>,
    pub change_percent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<StageMetrics>,
}

/// Caller-supplied slide file: an image or a PDF, base64-encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlideInput {
    pub filename: String,
    /// `image/*` or `application/pdf`
    pub content_type: String,
    pub data: String,
}

/// Markdown extracted from presentation slides by the vision model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlidesExtractionResult {
    pub extracted_text: String,
    pub slides_count: usize,
    pub chars_count: usize,
    pub words_count: usize,
    pub tables_count: usize,
    pub model_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<StageMetrics>,
}

/// Who may read the derived artifact downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Consultant,
    Leader,
    Personal,
}

/// Topic routing emitted by the generation stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub topic_area: Vec<String>,
    pub tags: Vec<String>,
    pub access_level: AccessLevel,
}

/// One generated longread section, in document order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LongreadSection {
    pub title: String,
    pub content: String,
}

/// Long-form article derived from an educational transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Longread {
    /// Frontmatter plus body, ready for the archive
    pub markdown: String,
    pub sections: Vec<LongreadSection>,
    pub introduction: String,
    pub conclusion: String,
    pub classification: Classification,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<StageMetrics>,
}

/// Compact summary derived directly from the cleaned transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub markdown: String,
    pub essence: String,
    pub key_concepts: Vec<String>,
    pub practical_tools: Vec<String>,
    pub quotes: Vec<String>,
    pub insight: String,
    pub actions: Vec<String>,
    pub classification: Classification,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<StageMetrics>,
}

/// One of the eight story blocks, numbered 1..=8.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryBlock {
    pub number: u8,
    pub title: String,
    pub content: String,
}

/// Analytic fields extracted alongside the story blocks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryFacts {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_in_business: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_to_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_family: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub had_stagnation: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stagnation_years: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub had_restart: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mentor: Option<String>,
}

/// Eight-block leadership story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    pub markdown: String,
    /// Exactly 8 blocks, numbered 1..=8 in order
    pub blocks: Vec<StoryBlock>,
    pub names: String,
    pub current_status: String,
    pub main_insight: String,
    #[serde(flatten)]
    pub facts: StoryFacts,
    pub classification: Classification,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<StageMetrics>,
}

/// One retrieval chunk; `id` is `{video_id}_{NNN}` in discovery order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptChunk {
    pub id: String,
    pub index: usize,
    /// H2 heading text, with `(i/k)` suffix for split sections
    pub title: String,
    pub content: String,
    pub word_count: usize,
}

/// Deterministic H2 chunking of the chosen markdown document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptChunks {
    pub chunks: Vec<TranscriptChunk>,
    pub total_tokens: u64,
}

/// Consolidated results manifest written by the Save stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResults {
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub metadata: VideoMetadata,
    pub transcript: RawTranscript,
    pub cleaned_transcript: CleanedTranscript,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slides: Option<SlidesExtractionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longread: Option<Longread>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<Summary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub story: Option<Story>,
    pub chunks: TranscriptChunks,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metadata() -> VideoMetadata {
        VideoMetadata {
            date: NaiveDate::from_ymd_opt(2025, 4, 7).unwrap(),
            event_type: "ПШ".to_string(),
            stream: Some("SV".to_string()),
            title: "Группа поддержки".to_string(),
            speaker: "Светлана Дмитрук".to_string(),
            event_name: None,
            content_type: ContentType::Educational,
            event_category: EventCategory::Regular,
            original_filename: "2025.04.07 ПШ.SV Группа поддержки (Светлана Дмитрук).mp4"
                .to_string(),
            video_id: "2025-04-07_ПШ-SV_группа-поддержки".to_string(),
            source_path: Utf8PathBuf::from("inbox/video.mp4"),
            archive_path: Utf8PathBuf::from(
                "archive/2025/04.07 ПШ/Группа поддержки (Светлана Дмитрук)",
            ),
            duration_seconds: 3600.0,
        }
    }

    #[test]
    fn test_metadata_wire_shape_is_camel_case() {
        let value = serde_json::to_value(sample_metadata()).unwrap();
        let obj = value.as_object().unwrap();
        assert!(obj.contains_key("eventType"));
        assert!(obj.contains_key("contentType"));
        assert!(obj.contains_key("originalFilename"));
        assert!(obj.contains_key("videoId"));
        assert!(obj.contains_key("archivePath"));
        assert!(!obj.contains_key("event_type"));
    }

    #[test]
    fn test_metadata_round_trip() {
        let meta = sample_metadata();
        let json = serde_json::to_string(&meta).unwrap();
        let back: VideoMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn test_story_facts_flatten_onto_story() {
        let story = Story {
            markdown: String::new(),
            blocks: vec![],
            names: "Антоновы".to_string(),
            current_status: "Директор".to_string(),
            main_insight: "—".to_string(),
            facts: StoryFacts {
                time_in_business: Some("12 лет".to_string()),
                is_family: Some(true),
                ..StoryFacts::default()
            },
            classification: Classification {
                topic_area: vec!["лидерство".to_string()],
                tags: vec![],
                access_level: AccessLevel::Leader,
            },
            metrics: None,
        };
        let value = serde_json::to_value(&story).unwrap();
        let obj = value.as_object().unwrap();
        assert!(obj.contains_key("timeInBusiness"));
        assert!(obj.contains_key("isFamily"));
        assert!(!obj.contains_key("facts"));
    }

    #[test]
    fn test_metrics_omitted_when_absent() {
        let cleaned = CleanedTranscript {
            text: String::new(),
            original_length: 0,
            cleaned_length: 0,
            corrections: vec![],
            change_percent: 0.0,
            metrics: None,
        };
        let value = serde_json::to_value(&cleaned).unwrap();
        assert!(value.get("metrics").is_none());
        assert!(value.get("changePercent").is_some());
    }
}
