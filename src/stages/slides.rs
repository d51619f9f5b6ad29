//! Slides stage: vision extraction of presentation content
//!
//! Invoked out-of-band (not part of the auto pipeline); the result is
//! injected into the context before longread/story. PDFs expand into one
//! logical slide per page before batching; batches go to the cloud vision
//! endpoint sequentially and their markdown outputs concatenate.

use crate::error::StageError;
use crate::llm::{GenerateOptions, ImageInput};
use crate::progress::{StageStatus, linear_estimate};
use crate::prompts::render_template;
use crate::stage::{Stage, StageContext, StageOutput};
use crate::types::{SlideInput, SlidesExtractionResult, StageMetrics, TokensUsed};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Instant;
use tracing::{debug, info};

const MAX_FILES: usize = 50;
const MAX_FILE_BYTES: usize = 10 * 1024 * 1024;
const MAX_TOTAL_BYTES: usize = 100 * 1024 * 1024;

/// `|---|`-style table separator rows in extracted markdown.
static TABLE_SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*\|?(?:\s*:?-{3,}:?\s*\|)+\s*:?-{0,}:?\s*$").unwrap());

/// Count tables by counting separator rows.
#[must_use]
pub fn count_tables(markdown: &str) -> usize {
    TABLE_SEPARATOR.find_iter(markdown).count()
}

/// Enforce the batch limits before any decoding work.
fn validate_inputs(slides: &[SlideInput]) -> Result<Vec<Vec<u8>>, StageError> {
    if slides.len() > MAX_FILES {
        return Err(StageError::configuration(format!(
            "{} slide files supplied, limit is {MAX_FILES}",
            slides.len()
        )));
    }

    let mut decoded = Vec::with_capacity(slides.len());
    let mut total = 0usize;
    for slide in slides {
        let bytes = BASE64.decode(&slide.data).map_err(|e| {
            StageError::configuration(format!("slide '{}' is not valid base64: {e}", slide.filename))
        })?;
        if bytes.len() > MAX_FILE_BYTES {
            return Err(StageError::configuration(format!(
                "slide '{}' is {} bytes, per-file limit is {MAX_FILE_BYTES}",
                slide.filename,
                bytes.len()
            )));
        }
        total += bytes.len();
        if total > MAX_TOTAL_BYTES {
            return Err(StageError::configuration(format!(
                "slide batch exceeds the {MAX_TOTAL_BYTES}-byte total limit"
            )));
        }
        decoded.push(bytes);
    }
    Ok(decoded)
}

pub struct SlidesStage;

#[async_trait]
impl Stage for SlidesStage {
    fn name(&self) -> &'static str {
        "slides"
    }

    fn depends_on(&self) -> &'static [&'static str] {
        &[]
    }

    fn optional(&self) -> bool {
        true
    }

    fn status(&self) -> StageStatus {
        StageStatus::ExtractingSlides
    }

    /// Count of supplied slide files.
    fn input_size(&self, ctx: &StageContext) -> u64 {
        ctx.slides_input.len() as u64
    }

    fn estimate_seconds(&self, input_size: u64) -> f64 {
        linear_estimate(10.0, 8.0, input_size)
    }

    fn should_skip(&self, ctx: &StageContext) -> bool {
        ctx.slides_input.is_empty()
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        let started = Instant::now();
        let decoded = validate_inputs(&ctx.slides_input)?;

        // expand PDFs into one logical slide per page
        let mut images: Vec<ImageInput> = Vec::new();
        for (slide, bytes) in ctx.slides_input.iter().zip(decoded) {
            if slide.content_type == "application/pdf" {
                let pages = ctx.services.pdf.render_pages(&bytes).await.map_err(|e| {
                    StageError::configuration(format!(
                        "failed to render PDF '{}': {e}",
                        slide.filename
                    ))
                })?;
                debug!(file = %slide.filename, pages = pages.len(), "expanded PDF");
                for page in pages {
                    images.push(ImageInput {
                        media_type: "image/png".to_string(),
                        data_base64: BASE64.encode(page),
                    });
                }
            } else if slide.content_type.starts_with("image/") {
                images.push(ImageInput {
                    media_type: slide.content_type.clone(),
                    data_base64: slide.data.clone(),
                });
            } else {
                return Err(StageError::configuration(format!(
                    "slide '{}' has unsupported content type '{}'",
                    slide.filename, slide.content_type
                )));
            }
        }

        let slides_count = images.len();
        let model = ctx
            .effective_model("slides")
            .ok_or_else(|| StageError::configuration("no slides model configured"))?;
        let handle = ctx.services.llm.acquire(&model).map_err(StageError::from)?;

        let prompts = ctx
            .prompts
            .prompt_set("slides", &ctx.overrides.prompts_for("slides"))?;
        let user_template = prompts
            .user
            .as_deref()
            .ok_or_else(|| StageError::configuration("slides prompt set has no user template"))?;

        let opts = GenerateOptions::with_timeout(ctx.settings.llm_timeout);
        let mut usage = TokensUsed::default();
        let mut cost = 0.0;
        let mut parts: Vec<String> = Vec::new();

        // batches run sequentially
        for (batch_index, batch) in images.chunks(ctx.settings.slide_batch_size).enumerate() {
            let first = batch_index * ctx.settings.slide_batch_size + 1;
            let prompt = render_template(
                user_template,
                &[
                    ("count", batch.len().to_string().as_str()),
                    ("first", first.to_string().as_str()),
                ],
            );
            info!(batch = batch_index + 1, size = batch.len(), "extracting slide batch");
            let completion = handle
                .vision_generate(Some(&prompts.system), &prompt, batch, &opts)
                .await
                .map_err(StageError::from)?;
            usage.add(completion.usage.input_tokens, completion.usage.output_tokens);
            cost += handle.cost(completion.usage);
            parts.push(completion.text.trim().to_string());
        }

        let extracted_text = parts.join("\n\n");
        let chars_count = extracted_text.chars().count();
        let words_count = crate::markdown::word_count(&extracted_text);
        let tables_count = count_tables(&extracted_text);

        Ok(StageOutput::Slides(SlidesExtractionResult {
            extracted_text,
            slides_count,
            chars_count,
            words_count,
            tables_count,
            model_name: handle.model_name().to_string(),
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

    fn slide(filename: &str, content_type: &str, bytes: &[u8]) -> SlideInput {
        SlideInput {
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            data: BASE64.encode(bytes),
        }
    }

    #[test]
    fn test_fifty_files_accepted_fifty_one_rejected() {
        let ok: Vec<SlideInput> = (0..50)
            .map(|i| slide(&format!("s{i}.png"), "image/png", b"png"))
            .collect();
        assert!(validate_inputs(&ok).is_ok());

        let too_many: Vec<SlideInput> = (0..51)
            .map(|i| slide(&format!("s{i}.png"), "image/png", b"png"))
            .collect();
        let err = validate_inputs(&too_many).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Configuration);
    }

    #[test]
    fn test_oversized_file_rejected() {
        let big = vec![0u8; MAX_FILE_BYTES + 1];
        let err = validate_inputs(&[slide("big.png", "image/png", &big)]).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Configuration);
        assert!(err.message.contains("per-file limit"));
    }

    #[test]
    fn test_invalid_base64_rejected() {
        let bad = SlideInput {
            filename: "bad.png".to_string(),
            content_type: "image/png".to_string(),
            data: "не base64 вовсе!!!".to_string(),
        };
        let err = validate_inputs(&[bad]).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Configuration);
    }

    #[test]
    fn test_count_tables() {
        let markdown = "\
### Слайд 1: План\n\n\
| Этап | Срок |\n\
|------|------|\n\
| Старт | Март |\n\n\
Текст между таблицами.\n\n\
| А | Б | В |\n\
| :--- | :---: | ---: |\n\
| 1 | 2 | 3 |\n";
        assert_eq!(count_tables(markdown), 2);
    }

    #[test]
    fn test_count_tables_ignores_plain_rules() {
        assert_eq!(count_tables("текст\n\n---\n\nещё текст"), 0);
    }
}
