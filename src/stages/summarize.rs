//! Summarize stage: compact summary of the cleaned transcript
//!
//! Educational branch only. One LLM call with the three-component prompt;
//! the summary is derived directly from the cleaned transcript, not from
//! the longread. The longread dependency only orders the stages.

use crate::error::StageError;
use crate::llm::{GenerateOptions, Message};
use crate::progress::{StageStatus, linear_estimate};
use crate::prompts::render_template;
use crate::stage::{Stage, StageContext, StageOutput};
use crate::types::{Classification, ContentType, StageMetrics, Summary, TokensUsed};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Instant;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryPayload {
    essence: String,
    key_concepts: Vec<String>,
    practical_tools: Vec<String>,
    quotes: Vec<String>,
    insight: String,
    actions: Vec<String>,
    classification: Classification,
}

pub struct SummarizeStage;

#[async_trait]
impl Stage for SummarizeStage {
    fn name(&self) -> &'static str {
        "summarize"
    }

    fn depends_on(&self) -> &'static [&'static str] {
        &["clean", "longread"]
    }

    fn status(&self) -> StageStatus {
        StageStatus::Summarizing
    }

    fn should_skip(&self, ctx: &StageContext) -> bool {
        ctx.content_type() == Some(ContentType::Leadership)
    }

    /// Characters of cleaned text.
    fn input_size(&self, ctx: &StageContext) -> u64 {
        ctx.cleaned()
            .map(|c| c.text.chars().count() as u64)
            .unwrap_or(0)
    }

    fn estimate_seconds(&self, input_size: u64) -> f64 {
        linear_estimate(15.0, 0.002, input_size)
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        let started = Instant::now();
        let meta = ctx
            .metadata()
            .ok_or_else(|| StageError::configuration("summarize requires parse results"))?;
        let cleaned = ctx
            .cleaned()
            .ok_or_else(|| StageError::configuration("summarize requires clean results"))?;

        let model = ctx
            .effective_model("summarize")
            .ok_or_else(|| StageError::configuration("no summary model configured"))?;
        let handle = ctx.services.llm.acquire(&model).map_err(StageError::from)?;

        let prompts = ctx
            .prompts
            .prompt_set("summarize", &ctx.overrides.prompts_for("summarize"))?;
        let instructions = prompts
            .instructions
            .as_deref()
            .ok_or_else(|| StageError::configuration("summarize prompt set has no instructions"))?;
        let template = prompts
            .template
            .as_deref()
            .ok_or_else(|| StageError::configuration("summarize prompt set has no template"))?;

        let user = format!(
            "{instructions}\n\n{}",
            render_template(template, &[("text", cleaned.text.as_str())])
        );
        let messages = vec![Message::system(prompts.system.clone()), Message::user(user)];

        let opts = GenerateOptions::with_timeout(ctx.settings.llm_timeout);
        let completion = handle.chat(&messages, &opts).await.map_err(StageError::from)?;

        let payload: SummaryPayload = crate::extraction::extract_json(&completion.text)?;

        let mut summary = Summary {
            markdown: String::new(),
            essence: payload.essence,
            key_concepts: payload.key_concepts,
            practical_tools: payload.practical_tools,
            quotes: payload.quotes,
            insight: payload.insight,
            actions: payload.actions,
            classification: payload.classification,
            metrics: Some(StageMetrics {
                tokens_used: Some(TokensUsed {
                    input: completion.usage.input_tokens,
                    output: completion.usage.output_tokens,
                }),
                cost: Some(handle.cost(completion.usage)),
                processing_time_sec: Some(started.elapsed().as_secs_f64()),
            }),
        };
        summary.markdown = crate::markdown::render_summary(meta, &summary);

        Ok(StageOutput::Summary(summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_requires_all_top_level_keys() {
        let missing = r#"{"essence": "x", "keyConcepts": [], "practicalTools": [], "quotes": [], "insight": "y", "actions": []}"#;
        let err = crate::extraction::extract_json::<SummaryPayload>(missing).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Schema);
    }

    #[test]
    fn test_payload_parses_template_shape() {
        let raw = r#"{
            "essence": "Суть видео",
            "keyConcepts": ["Понятие — смысл"],
            "practicalTools": ["Скрипт"],
            "quotes": ["Цитата"],
            "insight": "Инсайт",
            "actions": ["Действие"],
            "classification": {"topicArea": ["продажи"], "tags": ["скрипты"], "accessLevel": "consultant"}
        }"#;
        let payload: SummaryPayload = crate::extraction::extract_json(raw).unwrap();
        assert_eq!(payload.key_concepts.len(), 1);
        assert_eq!(payload.essence, "Суть видео");
    }
}
