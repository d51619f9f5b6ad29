//! Transcribe stage: audio extraction plus the transcription service
//!
//! The audio track is extracted into the temp directory first (smaller
//! upload, and Save later moves it into the archive), then uploaded to the
//! transcription service. The timestamped text view is attached when
//! requested by settings.

use crate::error::StageError;
use crate::progress::{StageStatus, linear_estimate};
use crate::stage::{Stage, StageContext, StageOutput};
use crate::whisper::timestamped_view;
use async_trait::async_trait;
use camino::Utf8PathBuf;
use tracing::{debug, warn};

/// Deterministic hand-off location for the extracted audio; Save picks it
/// up from here by video id.
#[must_use]
pub fn audio_temp_path(temp_dir: &camino::Utf8Path, video_id: &str) -> Utf8PathBuf {
    temp_dir.join(format!("{video_id}.mp3"))
}

pub struct TranscribeStage;

#[async_trait]
impl Stage for TranscribeStage {
    fn name(&self) -> &'static str {
        "transcribe"
    }

    fn depends_on(&self) -> &'static [&'static str] {
        &["parse"]
    }

    fn status(&self) -> StageStatus {
        StageStatus::Transcribing
    }

    /// Seconds of audio.
    fn input_size(&self, ctx: &StageContext) -> u64 {
        ctx.metadata()
            .map(|m| m.duration_seconds.max(0.0) as u64)
            .unwrap_or(0)
    }

    fn estimate_seconds(&self, input_size: u64) -> f64 {
        linear_estimate(20.0, 0.4, input_size)
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        let meta = ctx
            .metadata()
            .ok_or_else(|| StageError::configuration("transcribe requires parse results"))?;

        // extract audio for upload and for the archive; fall back to the
        // original media when extraction is not possible (audio-only inputs
        // still go through ffmpeg to get a uniform mp3)
        let audio_path = audio_temp_path(&ctx.settings.temp_dir, &meta.video_id);
        let upload_path = match ctx
            .services
            .media
            .extract_audio(&ctx.video_path, &audio_path)
            .await
        {
            Ok(()) => audio_path.clone(),
            Err(e) => {
                warn!(error = %e, "audio extraction failed, uploading original media");
                ctx.video_path.clone()
            }
        };

        let model = ctx
            .effective_model("transcribe")
            .ok_or_else(|| StageError::configuration("no transcription model configured"))?;

        let mut transcript = ctx
            .services
            .transcriber
            .transcribe(&upload_path, &model, ctx.settings.transcription_timeout)
            .await
            .map_err(StageError::from)?;

        for segment in &transcript.segments {
            if segment.start < 0.0 || segment.end < segment.start {
                return Err(StageError::schema(format!(
                    "transcription returned an invalid segment: {:.2}..{:.2}",
                    segment.start, segment.end
                )));
            }
        }

        if ctx.settings.include_timestamps && !transcript.segments.is_empty() {
            transcript.timestamped_text = Some(timestamped_view(&transcript.segments));
        }

        debug!(
            segments = transcript.segments.len(),
            chars = transcript.full_text.chars().count(),
            language = %transcript.language,
            "transcription complete"
        );

        Ok(StageOutput::Transcript(transcript))
    }
}
