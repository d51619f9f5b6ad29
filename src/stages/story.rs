//! Story stage: eight-block leadership story
//!
//! Leadership branch only. A single LLM call with the three-component
//! prompt (system + instructions + template); the template constrains the
//! output to JSON with exactly 8 numbered blocks plus analytic fields.
//! Missing or extra blocks are a schema error.

use crate::error::StageError;
use crate::llm::{GenerateOptions, Message};
use crate::progress::{StageStatus, linear_estimate};
use crate::prompts::render_template;
use crate::stage::{Stage, StageContext, StageOutput};
use crate::types::{Classification, ContentType, StageMetrics, Story, StoryBlock, StoryFacts};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Instant;
use tracing::debug;

/// A story always carries exactly this many blocks, numbered 1..=8.
pub const STORY_BLOCK_COUNT: usize = 8;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoryPayload {
    blocks: Vec<StoryBlock>,
    names: String,
    current_status: String,
    main_insight: String,
    #[serde(flatten)]
    facts: StoryFacts,
    classification: Classification,
}

/// Exactly 8 blocks, numbered 1..=8 in order.
fn validate_blocks(blocks: &[StoryBlock]) -> Result<(), StageError> {
    if blocks.len() != STORY_BLOCK_COUNT {
        return Err(StageError::schema(format!(
            "story must carry exactly {STORY_BLOCK_COUNT} blocks, got {}",
            blocks.len()
        )));
    }
    for (i, block) in blocks.iter().enumerate() {
        let expected = (i + 1) as u8;
        if block.number != expected {
            return Err(StageError::schema(format!(
                "story block {} is numbered {}, expected {expected}",
                i + 1,
                block.number
            )));
        }
    }
    Ok(())
}

pub struct StoryStage;

#[async_trait]
impl Stage for StoryStage {
    fn name(&self) -> &'static str {
        "story"
    }

    fn depends_on(&self) -> &'static [&'static str] {
        &["clean"]
    }

    fn status(&self) -> StageStatus {
        StageStatus::GeneratingStory
    }

    fn should_skip(&self, ctx: &StageContext) -> bool {
        ctx.content_type() == Some(ContentType::Educational)
    }

    /// Characters of cleaned text.
    fn input_size(&self, ctx: &StageContext) -> u64 {
        ctx.cleaned()
            .map(|c| c.text.chars().count() as u64)
            .unwrap_or(0)
    }

    fn estimate_seconds(&self, input_size: u64) -> f64 {
        linear_estimate(20.0, 0.003, input_size)
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        let started = Instant::now();
        let meta = ctx
            .metadata()
            .ok_or_else(|| StageError::configuration("story requires parse results"))?;
        let cleaned = ctx
            .cleaned()
            .ok_or_else(|| StageError::configuration("story requires clean results"))?;

        let mut text = cleaned.text.clone();
        if let Some(slides) = ctx.slides() {
            text.push_str(super::longread::SLIDES_SEPARATOR);
            text.push_str(&slides.extracted_text);
        }

        let model = ctx
            .effective_model("story")
            .ok_or_else(|| StageError::configuration("no story model configured"))?;
        let handle = ctx.services.llm.acquire(&model).map_err(StageError::from)?;

        let prompts = ctx
            .prompts
            .prompt_set("story", &ctx.overrides.prompts_for("story"))?;
        let instructions = prompts
            .instructions
            .as_deref()
            .ok_or_else(|| StageError::configuration("story prompt set has no instructions"))?;
        let template = prompts
            .template
            .as_deref()
            .ok_or_else(|| StageError::configuration("story prompt set has no template"))?;

        let user = format!(
            "{instructions}\n\n{}",
            render_template(template, &[("text", text.as_str())])
        );
        let messages = vec![Message::system(prompts.system.clone()), Message::user(user)];

        let opts = GenerateOptions::with_timeout(ctx.settings.llm_timeout);
        let completion = handle.chat(&messages, &opts).await.map_err(StageError::from)?;

        let payload: StoryPayload = crate::extraction::extract_json(&completion.text)?;
        validate_blocks(&payload.blocks)?;

        debug!(names = %payload.names, "story extracted");

        let mut story = Story {
            markdown: String::new(),
            blocks: payload.blocks,
            names: payload.names,
            current_status: payload.current_status,
            main_insight: payload.main_insight,
            facts: payload.facts,
            classification: payload.classification,
            metrics: Some(StageMetrics {
                tokens_used: Some(crate::types::TokensUsed {
                    input: completion.usage.input_tokens,
                    output: completion.usage.output_tokens,
                }),
                cost: Some(handle.cost(completion.usage)),
                processing_time_sec: Some(started.elapsed().as_secs_f64()),
            }),
        };
        story.markdown = crate::markdown::render_story(meta, &story);

        Ok(StageOutput::Story(story))
    }
}
