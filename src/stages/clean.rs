//! Clean stage: glossary pass plus LLM cleanup
//!
//! Phase A applies the glossary deterministically and records every
//! replacement. Phase B sends the text to the cleaner model, chunked when it
//! exceeds the model's context profile; chunk outputs are merged with
//! overlap deduplication. Validation rejects summarization-like shrinkage
//! and non-cyrillic output — there is no fallback to the raw text.

use crate::error::StageError;
use crate::llm::GenerateOptions;
use crate::progress::{StageStatus, linear_estimate};
use crate::prompts::render_template;
use crate::stage::{Stage, StageContext, StageOutput};
use crate::textsplit::{merge_overlapping, split_with_overlap};
use crate::types::{CleanedTranscript, StageMetrics, TokensUsed};
use async_trait::async_trait;
use std::time::Instant;
use tracing::{debug, info};

/// Output shorter than this fraction of the input is a regression.
const MIN_LENGTH_RATIO: f64 = 0.5;
/// Expansion beyond this slack is a regression too.
const MAX_LENGTH_RATIO: f64 = 1.1;
/// Minimum share of cyrillic among alphabetic output characters.
const MIN_CYRILLIC_RATIO: f64 = 0.5;

/// Share of cyrillic letters among alphabetic characters, 1.0 for text with
/// no letters at all (nothing to judge).
#[must_use]
pub fn cyrillic_ratio(text: &str) -> f64 {
    let mut letters = 0usize;
    let mut cyrillic = 0usize;
    for ch in text.chars() {
        if ch.is_alphabetic() {
            letters += 1;
            if ('\u{0400}'..='\u{04FF}').contains(&ch) {
                cyrillic += 1;
            }
        }
    }
    if letters == 0 {
        1.0
    } else {
        cyrillic as f64 / letters as f64
    }
}

fn validate(original_len: usize, cleaned: &str) -> Result<(), StageError> {
    let cleaned_len = cleaned.chars().count();
    let ratio = cleaned_len as f64 / original_len.max(1) as f64;

    if ratio < MIN_LENGTH_RATIO {
        return Err(StageError::clean_regression(format!(
            "cleaned text is {:.0}% of the original; the model summarized instead of cleaning",
            ratio * 100.0
        )));
    }
    if ratio > MAX_LENGTH_RATIO {
        return Err(StageError::clean_regression(format!(
            "cleaned text expanded to {:.0}% of the original",
            ratio * 100.0
        )));
    }
    let cyr = cyrillic_ratio(cleaned);
    if cyr < MIN_CYRILLIC_RATIO {
        return Err(StageError::clean_regression(format!(
            "cleaned text is only {:.0}% cyrillic; the model likely switched language",
            cyr * 100.0
        )));
    }
    Ok(())
}

pub struct CleanStage;

#[async_trait]
impl Stage for CleanStage {
    fn name(&self) -> &'static str {
        "clean"
    }

    fn depends_on(&self) -> &'static [&'static str] {
        &["transcribe"]
    }

    fn status(&self) -> StageStatus {
        StageStatus::Cleaning
    }

    /// Characters of raw transcript text.
    fn input_size(&self, ctx: &StageContext) -> u64 {
        ctx.transcript()
            .map(|t| t.full_text.chars().count() as u64)
            .unwrap_or(0)
    }

    fn estimate_seconds(&self, input_size: u64) -> f64 {
        linear_estimate(10.0, 0.002, input_size)
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        let transcript = ctx
            .transcript()
            .ok_or_else(|| StageError::configuration("clean requires transcribe results"))?;
        let original = transcript.full_text.as_str();
        let original_length = original.chars().count();

        if original.is_empty() {
            return Ok(StageOutput::Cleaned(CleanedTranscript {
                text: String::new(),
                original_length: 0,
                cleaned_length: 0,
                corrections: Vec::new(),
                change_percent: 0.0,
                metrics: None,
            }));
        }

        let started = Instant::now();

        // phase A: deterministic glossary replacement
        let (glossed, corrections) = ctx.glossary.apply(original);
        debug!(corrections = corrections.len(), "glossary applied");

        // phase B: LLM cleanup, chunked past the profile threshold
        let model = ctx
            .effective_model("clean")
            .ok_or_else(|| StageError::configuration("no cleaner model configured"))?;
        let handle = ctx.services.llm.acquire(&model).map_err(StageError::from)?;
        let profile = handle.profile();

        let prompts = ctx
            .prompts
            .prompt_set("clean", &ctx.overrides.prompts_for("clean"))?;
        let user_template = prompts
            .user
            .as_deref()
            .ok_or_else(|| StageError::configuration("clean prompt set has no user template"))?;

        let opts = GenerateOptions::with_timeout(ctx.settings.llm_timeout);
        let mut usage = TokensUsed::default();
        let mut cost = 0.0;

        let cleaned = if glossed.chars().count() <= profile.single_pass_threshold_chars() {
            let prompt = render_template(user_template, &[("text", glossed.as_str())]);
            let completion = handle
                .generate(Some(&prompts.system), &prompt, &opts)
                .await
                .map_err(StageError::from)?;
            usage.add(completion.usage.input_tokens, completion.usage.output_tokens);
            cost += handle.cost(completion.usage);
            completion.text
        } else {
            let chunks =
                split_with_overlap(&glossed, profile.chunk_chars(), profile.overlap_chars());
            info!(chunks = chunks.len(), model = %model, "cleaning in chunks");
            let mut outputs = Vec::with_capacity(chunks.len());
            for chunk in &chunks {
                let prompt = render_template(user_template, &[("text", chunk.as_str())]);
                let completion = handle
                    .generate(Some(&prompts.system), &prompt, &opts)
                    .await
                    .map_err(StageError::from)?;
                usage.add(completion.usage.input_tokens, completion.usage.output_tokens);
                cost += handle.cost(completion.usage);
                outputs.push(completion.text);
            }
            merge_overlapping(&outputs, profile.overlap_chars() * 2)
        };

        let cleaned = cleaned.trim().to_string();
        validate(original_length, &cleaned)?;

        let cleaned_length = cleaned.chars().count();
        let change_percent = (original_length.abs_diff(cleaned_length) as f64)
            / (original_length.max(1) as f64)
            * 100.0;

        Ok(StageOutput::Cleaned(CleanedTranscript {
            text: cleaned,
            original_length,
            cleaned_length,
            corrections,
            change_percent,
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
    fn test_cyrillic_ratio() {
        assert!(cyrillic_ratio("полностью русский текст") > 0.99);
        assert!(cyrillic_ratio("fully english text") < 0.01);
        assert_eq!(cyrillic_ratio("1234 !!!"), 1.0);
        let mixed = cyrillic_ratio("половина half");
        assert!(mixed > 0.4 && mixed < 0.7);
    }

    #[test]
    fn test_validate_rejects_short_output() {
        let err = validate(1000, &"а".repeat(300)).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::CleanRegression);
        assert!(err.message.contains("summarized"));
    }

    #[test]
    fn test_validate_rejects_expansion() {
        let err = validate(100, &"а".repeat(200)).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::CleanRegression);
    }

    #[test]
    fn test_validate_rejects_non_cyrillic() {
        let err = validate(100, &"a".repeat(90)).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::CleanRegression);
        assert!(err.message.contains("cyrillic"));
    }

    #[test]
    fn test_validate_accepts_reasonable_output() {
        assert!(validate(100, &"а".repeat(90)).is_ok());
        assert!(validate(100, &"а".repeat(55)).is_ok());
        assert!(validate(100, &"а".repeat(109)).is_ok());
    }

    #[tokio::test]
    async fn test_empty_transcript_short_circuits_without_llm() {
        use crate::config::EventsCatalog;
        use crate::glossary::Glossary;
        use crate::prompts::PromptCatalog;
        use crate::stage::{RunOverrides, Services, StageContext};
        use crate::types::RawTranscript;
        use std::sync::Arc;

        let services = Services {
            // the router errors on any acquire, proving no LLM call happens
            llm: Arc::new(crate::testutil::RejectAllRouter),
            transcriber: Arc::new(crate::testutil::PanicTranscriber),
            media: Arc::new(crate::testutil::FixedDurationMedia { duration: 1.0 }),
            pdf: Arc::new(crate::testutil::NoPdf),
        };
        let ctx = StageContext::new(
            "inbox/a.mp4".into(),
            Vec::new(),
            Arc::new(crate::testutil::settings()),
            services,
            Arc::new(PromptCatalog::default()),
            Arc::new(Glossary::default()),
            Arc::new(EventsCatalog::default()),
            Arc::new(RunOverrides::default()),
        );
        let ctx = ctx.with_result(
            "transcribe",
            StageOutput::Transcript(RawTranscript {
                segments: Vec::new(),
                full_text: String::new(),
                duration_seconds: 0.0,
                language: "ru".to_string(),
                model_name: "whisper-large-v3".to_string(),
                timestamped_text: None,
            }),
        );

        let output = CleanStage.execute(&ctx).await.unwrap();
        match output {
            StageOutput::Cleaned(cleaned) => {
                assert!(cleaned.text.is_empty());
                assert_eq!(cleaned.change_percent, 0.0);
                assert!(cleaned.corrections.is_empty());
            }
            other => panic!("unexpected output: {other:?}"),
        }
    }
}
