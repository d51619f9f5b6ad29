//! Chunk stage: deterministic H2 chunking of the chosen markdown
//!
//! No LLM. Educational jobs chunk the longread, leadership jobs the story.
//! The metadata preamble is attached to every chunk's content.

use crate::chunker::{chunk_markdown, chunk_preamble};
use crate::error::StageError;
use crate::progress::{StageStatus, linear_estimate};
use crate::stage::{Stage, StageContext, StageOutput};
use crate::types::ContentType;
use async_trait::async_trait;
use tracing::debug;

pub struct ChunkStage;

impl ChunkStage {
    /// The markdown document this job chunks.
    fn source_markdown<'a>(ctx: &'a StageContext) -> Result<&'a str, StageError> {
        match ctx.content_type() {
            Some(ContentType::Educational) => ctx
                .longread()
                .map(|l| l.markdown.as_str())
                .ok_or_else(|| StageError::configuration("chunk requires longread results")),
            Some(ContentType::Leadership) => ctx
                .story()
                .map(|s| s.markdown.as_str())
                .ok_or_else(|| StageError::configuration("chunk requires story results")),
            None => Err(StageError::configuration("chunk requires parse results")),
        }
    }
}

#[async_trait]
impl Stage for ChunkStage {
    fn name(&self) -> &'static str {
        "chunk"
    }

    fn depends_on(&self) -> &'static [&'static str] {
        &["longread", "summarize", "story"]
    }

    fn status(&self) -> StageStatus {
        StageStatus::Chunking
    }

    /// Characters of the chosen markdown.
    fn input_size(&self, ctx: &StageContext) -> u64 {
        Self::source_markdown(ctx)
            .map(|md| md.chars().count() as u64)
            .unwrap_or(0)
    }

    fn estimate_seconds(&self, input_size: u64) -> f64 {
        linear_estimate(1.0, 0.000_01, input_size)
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        let meta = ctx
            .metadata()
            .ok_or_else(|| StageError::configuration("chunk requires parse results"))?;
        let markdown = Self::source_markdown(ctx)?;
        let language = ctx
            .transcript()
            .map(|t| t.language.as_str())
            .unwrap_or("ru");

        let preamble = chunk_preamble(&meta.title, &meta.speaker, &meta.date.to_string());
        let chunks = chunk_markdown(markdown, &meta.video_id, &preamble, language);

        debug!(
            chunks = chunks.chunks.len(),
            total_tokens = chunks.total_tokens,
            "chunking complete"
        );

        Ok(StageOutput::Chunks(chunks))
    }
}
