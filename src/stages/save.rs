//! Save stage: persist every artifact into the archive directory
//!
//! All writes are atomic (temp + rename); on failure no partial files
//! remain. The original media moves out of the inbox last, after every
//! derived artifact is safely in place, so an interrupted save leaves the
//! inbox entry intact for a re-run.

use crate::atomic_write::{write_file_atomic, write_json_canonical};
use crate::error::StageError;
use crate::progress::StageStatus;
use crate::stage::{Stage, StageContext, StageOutput};
use crate::stages::transcribe::audio_temp_path;
use crate::types::{ContentType, PipelineResults};
use async_trait::async_trait;
use camino::Utf8Path;
use chrono::Utc;
use tracing::{debug, info};

async fn move_file(src: &Utf8Path, dest: &Utf8Path) -> std::io::Result<()> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    match tokio::fs::rename(src, dest).await {
        Ok(()) => Ok(()),
        // EXDEV: inbox and archive on different filesystems
        Err(_) => {
            tokio::fs::copy(src, dest).await?;
            tokio::fs::remove_file(src).await
        }
    }
}

pub struct SaveStage;

#[async_trait]
impl Stage for SaveStage {
    fn name(&self) -> &'static str {
        "save"
    }

    fn depends_on(&self) -> &'static [&'static str] {
        &["chunk"]
    }

    fn status(&self) -> StageStatus {
        StageStatus::Saving
    }

    fn input_size(&self, _ctx: &StageContext) -> u64 {
        1
    }

    fn estimate_seconds(&self, _input_size: u64) -> f64 {
        5.0
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        let meta = ctx
            .metadata()
            .ok_or_else(|| StageError::configuration("save requires parse results"))?;
        let transcript = ctx
            .transcript()
            .ok_or_else(|| StageError::configuration("save requires transcribe results"))?;
        let cleaned = ctx
            .cleaned()
            .ok_or_else(|| StageError::configuration("save requires clean results"))?;
        let chunks = ctx
            .chunks()
            .ok_or_else(|| StageError::configuration("save requires chunk results"))?;

        let archive = &meta.archive_path;
        tokio::fs::create_dir_all(archive)
            .await
            .map_err(|e| StageError::cache(format!("failed to create archive {archive}: {e}")))?;

        let write_text = |name: &str, content: &str| -> Result<(), StageError> {
            write_file_atomic(&archive.join(name), content)
                .map_err(|e| StageError::cache(format!("failed to write {name}: {e}")))
        };

        write_text("transcript_raw.txt", &transcript.full_text)?;
        if let Some(timestamped) = &transcript.timestamped_text {
            write_text("transcript_timestamped.txt", timestamped)?;
        }
        write_text("transcript_cleaned.txt", &cleaned.text)?;

        write_json_canonical(&archive.join("transcript_chunks.json"), chunks)
            .map_err(|e| StageError::cache(format!("failed to write transcript_chunks.json: {e}")))?;

        match meta.content_type {
            ContentType::Educational => {
                let longread = ctx.longread().ok_or_else(|| {
                    StageError::configuration("save requires longread results for educational content")
                })?;
                let summary = ctx.summary().ok_or_else(|| {
                    StageError::configuration("save requires summary results for educational content")
                })?;
                write_text("longread.md", &longread.markdown)?;
                write_text("summary.md", &summary.markdown)?;
            }
            ContentType::Leadership => {
                let story = ctx.story().ok_or_else(|| {
                    StageError::configuration("save requires story results for leadership content")
                })?;
                write_text("story.md", &story.markdown)?;
            }
        }

        // extracted audio, if transcribe left one in the temp directory
        let audio_src = audio_temp_path(&ctx.settings.temp_dir, &meta.video_id);
        if audio_src.exists() {
            move_file(&audio_src, &archive.join("audio.mp3"))
                .await
                .map_err(|e| StageError::cache(format!("failed to move audio: {e}")))?;
        }

        let results = PipelineResults {
            version: env!("CARGO_PKG_VERSION").to_string(),
            created_at: Utc::now(),
            metadata: meta.clone(),
            transcript: transcript.clone(),
            cleaned_transcript: cleaned.clone(),
            slides: ctx.slides().cloned(),
            longread: ctx.longread().cloned(),
            summary: ctx.summary().cloned(),
            story: ctx.story().cloned(),
            chunks: chunks.clone(),
        };
        write_json_canonical(&archive.join("pipeline_results.json"), &results)
            .map_err(|e| StageError::cache(format!("failed to write pipeline_results.json: {e}")))?;

        // the original media leaves the inbox only after everything else
        // is in place
        let media_dest = archive.join(&meta.original_filename);
        if ctx.video_path != media_dest && ctx.video_path.exists() {
            move_file(&ctx.video_path, &media_dest)
                .await
                .map_err(|e| StageError::cache(format!("failed to move media: {e}")))?;
            debug!(%media_dest, "moved original media into archive");
        }

        info!(%archive, "archive complete");
        Ok(StageOutput::Saved(results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;

    #[tokio::test]
    async fn test_move_file_within_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let src = root.join("src.txt");
        let dest = root.join("nested/dest.txt");
        std::fs::write(&src, "данные").unwrap();

        move_file(&src, &dest).await.unwrap();
        assert!(!src.exists());
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "данные");
    }
}
