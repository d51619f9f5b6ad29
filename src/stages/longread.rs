//! Longread stage: MAP over sections, REDUCE for the article frame
//!
//! Educational branch only. The cleaned text (plus slides text, when
//! supplied) splits into parts sized by the model's context profile, two
//! parts per section. Large texts get an outline pass first; the outline is
//! attached to every MAP call. Section generations run concurrently under a
//! semaphore; the REDUCE call produces introduction, conclusion, and
//! classification as JSON.

use crate::error::StageError;
use crate::llm::{GenerateOptions, LlmHandle};
use crate::progress::{StageStatus, linear_estimate};
use crate::prompts::render_template;
use crate::stage::{Stage, StageContext, StageOutput};
use crate::textsplit::{group_parts, split_at_boundaries};
use crate::types::{
    Classification, ContentType, Longread, LongreadSection, StageMetrics, TokensUsed,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, info};

/// Parts grouped into one section.
const PARTS_PER_SECTION: usize = 2;

/// Marked separator ahead of appended slides text.
pub const SLIDES_SEPARATOR: &str = "\n\n---\n\nМатериалы презентации:\n\n";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReducePayload {
    introduction: String,
    conclusion: String,
    classification: Classification,
}

/// Split a MAP response into section title and body. The prompt asks for a
/// leading H2; responses without one get a positional title.
fn parse_section(raw: &str, position: usize) -> LongreadSection {
    let trimmed = raw.trim();
    if let Some(rest) = trimmed.strip_prefix("## ") {
        if let Some((title, body)) = rest.split_once('\n') {
            return LongreadSection {
                title: title.trim().to_string(),
                content: body.trim().to_string(),
            };
        }
        return LongreadSection {
            title: rest.trim().to_string(),
            content: String::new(),
        };
    }
    LongreadSection {
        title: format!("Раздел {position}"),
        content: trimmed.to_string(),
    }
}

pub struct LongreadStage;

impl LongreadStage {
    async fn extract_outline(
        handle: &LlmHandle,
        system: &str,
        instructions_template: &str,
        parts: &[String],
        opts: &GenerateOptions,
        usage: &mut TokensUsed,
        cost: &mut f64,
    ) -> Result<String, StageError> {
        let mut lines: Vec<String> = Vec::new();
        for part in parts {
            let prompt = render_template(instructions_template, &[("text", part.as_str())]);
            let completion = handle
                .generate(Some(system), &prompt, opts)
                .await
                .map_err(StageError::from)?;
            usage.add(completion.usage.input_tokens, completion.usage.output_tokens);
            *cost += handle.cost(completion.usage);
            lines.extend(
                completion
                    .text
                    .lines()
                    .map(str::trim)
                    .filter(|l| l.starts_with('-'))
                    .map(ToString::to_string),
            );
        }
        Ok(lines.join("\n"))
    }
}

#[async_trait]
impl Stage for LongreadStage {
    fn name(&self) -> &'static str {
        "longread"
    }

    fn depends_on(&self) -> &'static [&'static str] {
        &["clean"]
    }

    fn status(&self) -> StageStatus {
        StageStatus::GeneratingLongread
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
        linear_estimate(30.0, 0.004, input_size)
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        let started = Instant::now();
        let meta = ctx
            .metadata()
            .ok_or_else(|| StageError::configuration("longread requires parse results"))?;
        let cleaned = ctx
            .cleaned()
            .ok_or_else(|| StageError::configuration("longread requires clean results"))?;

        // slides text joins the transcript behind a marked separator
        let mut text = cleaned.text.clone();
        if let Some(slides) = ctx.slides() {
            text.push_str(SLIDES_SEPARATOR);
            text.push_str(&slides.extracted_text);
        }

        let model = ctx
            .effective_model("longread")
            .ok_or_else(|| StageError::configuration("no longread model configured"))?;
        let handle = ctx.services.llm.acquire(&model).map_err(StageError::from)?;
        let profile = handle.profile();

        let prompts = ctx
            .prompts
            .prompt_set("longread", &ctx.overrides.prompts_for("longread"))?;
        let user_template = prompts
            .user
            .clone()
            .ok_or_else(|| StageError::configuration("longread prompt set has no user template"))?;
        let instructions_template = prompts.instructions.clone().ok_or_else(|| {
            StageError::configuration("longread prompt set has no instructions template")
        })?;
        let reduce_template = prompts.template.clone().ok_or_else(|| {
            StageError::configuration("longread prompt set has no reduce template")
        })?;

        let opts = GenerateOptions::with_timeout(ctx.settings.llm_timeout);
        let mut usage = TokensUsed::default();
        let mut cost = 0.0;

        let parts = split_at_boundaries(&text, profile.chunk_chars());
        let section_inputs = group_parts(parts.clone(), PARTS_PER_SECTION);
        let total = section_inputs.len();

        let outline = if text.chars().count() > profile.large_text_threshold_chars() {
            info!(parts = parts.len(), "extracting outline for large text");
            let outline = Self::extract_outline(
                &handle,
                &prompts.system,
                &instructions_template,
                &parts,
                &opts,
                &mut usage,
                &mut cost,
            )
            .await?;
            format!("План статьи:\n{outline}\n")
        } else {
            String::new()
        };

        // MAP: bounded-concurrency section generation, results kept in order
        let semaphore = Arc::new(Semaphore::new(ctx.settings.max_parallel_sections));
        let mut tasks = Vec::with_capacity(total);
        for (i, section_input) in section_inputs.into_iter().enumerate() {
            let handle = handle.clone();
            let semaphore = semaphore.clone();
            let system = prompts.system.clone();
            let opts = opts.clone();
            let prompt = render_template(
                &user_template,
                &[
                    ("position", (i + 1).to_string().as_str()),
                    ("total", total.to_string().as_str()),
                    ("outline", outline.as_str()),
                    ("text", section_input.as_str()),
                ],
            );
            tasks.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .expect("semaphore is never closed");
                let completion = handle.generate(Some(&system), &prompt, &opts).await?;
                let cost = handle.cost(completion.usage);
                Ok::<_, crate::llm::LlmError>((completion, cost))
            }));
        }

        let mut sections = Vec::with_capacity(total);
        for (i, task) in tasks.into_iter().enumerate() {
            let (completion, call_cost) = task
                .await
                .map_err(|e| {
                    StageError::new(
                        crate::error::ErrorKind::Cancelled,
                        format!("section generation task died: {e}"),
                    )
                })?
                .map_err(StageError::from)?;
            usage.add(completion.usage.input_tokens, completion.usage.output_tokens);
            cost += call_cost;
            sections.push(parse_section(&completion.text, i + 1));
        }
        debug!(sections = sections.len(), "MAP complete");

        // REDUCE: article frame from the concatenated sections
        let sections_text: String = sections
            .iter()
            .map(|s| format!("## {}\n\n{}\n\n", s.title, s.content))
            .collect();
        let reduce_prompt = render_template(&reduce_template, &[("sections", sections_text.as_str())]);
        let completion = handle
            .generate(Some(&prompts.system), &reduce_prompt, &opts)
            .await
            .map_err(StageError::from)?;
        usage.add(completion.usage.input_tokens, completion.usage.output_tokens);
        cost += handle.cost(completion.usage);

        let payload: ReducePayload = crate::extraction::extract_json(&completion.text)?;

        let markdown = crate::markdown::render_longread(
            meta,
            &sections,
            &payload.introduction,
            &payload.conclusion,
            &payload.classification,
        );

        Ok(StageOutput::Longread(Longread {
            markdown,
            sections,
            introduction: payload.introduction,
            conclusion: payload.conclusion,
            classification: payload.classification,
            metrics: Some(StageMetrics {
                tokens_used: Some(usage),
                cost: Some(cost),
                processing_time_sec: Some(started.elapsed().as_secs_f64()),
            }),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_section_with_heading() {
        let section = parse_section("## Название раздела\nТекст раздела.\nЕщё текст.", 1);
        assert_eq!(section.title, "Название раздела");
        assert_eq!(section.content, "Текст раздела.\nЕщё текст.");
    }

    #[test]
    fn test_parse_section_without_heading_gets_positional_title() {
        let section = parse_section("Просто текст без заголовка.", 3);
        assert_eq!(section.title, "Раздел 3");
        assert_eq!(section.content, "Просто текст без заголовка.");
    }

    #[test]
    fn test_parse_section_heading_only() {
        let section = parse_section("## Только заголовок", 1);
        assert_eq!(section.title, "Только заголовок");
        assert!(section.content.is_empty());
    }

    #[test]
    fn test_reduce_payload_requires_all_keys() {
        let missing = r#"{"introduction": "x", "conclusion": "y"}"#;
        let err = crate::extraction::extract_json::<ReducePayload>(missing).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Schema);

        let complete = r#"{
            "introduction": "x",
            "conclusion": "y",
            "classification": {"topicArea": ["а"], "tags": [], "accessLevel": "consultant"}
        }"#;
        assert!(crate::extraction::extract_json::<ReducePayload>(complete).is_ok());
    }
}
