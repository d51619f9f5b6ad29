//! In-process service mocks for unit tests

use crate::llm::{
    Completion, ContextProfile, GenerateOptions, ImageInput, LlmBackend, LlmError, LlmHandle,
    LlmRouter, Message, Usage,
};
use crate::media::MediaTools;
use crate::pdf::PdfRenderer;
use crate::types::{RawTranscript, TranscriptSegment};
use crate::whisper::Transcriber;
use async_trait::async_trait;
use camino::Utf8Path;
use std::sync::Arc;
use std::time::Duration;

/// Settings fixture with defaults pinned; no environment access, so tests
/// cannot race with env-mutating tests.
#[must_use]
pub fn settings() -> crate::config::Settings {
    use camino::Utf8PathBuf;
    crate::config::Settings {
        anthropic_api_key: None,
        ollama_base_url: "http://localhost:11434".to_string(),
        whisper_base_url: "http://localhost:9000".to_string(),
        https_proxy: None,
        data_root: Utf8PathBuf::from("data"),
        inbox_dir: Utf8PathBuf::from("data/inbox"),
        archive_dir: Utf8PathBuf::from("data/archive"),
        temp_dir: Utf8PathBuf::from("data/temp"),
        config_dir: Utf8PathBuf::from("config"),
        prompts_dir: None,
        cleaner_model: "qwen2.5:32b".to_string(),
        longread_model: "claude-sonnet-4-5".to_string(),
        summary_model: "claude-sonnet-4-5".to_string(),
        story_model: "claude-sonnet-4-5".to_string(),
        slides_model: "claude-sonnet-4-5".to_string(),
        transcription_model: "whisper-large-v3".to_string(),
        llm_timeout: Duration::from_secs(300),
        transcription_timeout: Duration::from_secs(600),
        include_timestamps: false,
        max_parallel_sections: 2,
        slide_batch_size: 5,
    }
}

/// Router that rejects every model, for paths that must not reach an LLM.
pub struct RejectAllRouter;

impl LlmRouter for RejectAllRouter {
    fn acquire(&self, model: &str) -> Result<LlmHandle, LlmError> {
        Err(LlmError::Misconfiguration(format!(
            "test router rejects model '{model}'"
        )))
    }
}

/// Backend returning a fixed response for every call.
pub struct FixedBackend {
    pub response: String,
}

#[async_trait]
impl LlmBackend for FixedBackend {
    async fn generate(
        &self,
        _model: &str,
        _system: Option<&str>,
        _prompt: &str,
        _opts: &GenerateOptions,
    ) -> Result<Completion, LlmError> {
        Ok(Completion {
            text: self.response.clone(),
            usage: Usage {
                input_tokens: 100,
                output_tokens: 50,
            },
        })
    }

    async fn chat(
        &self,
        _model: &str,
        _messages: &[Message],
        _opts: &GenerateOptions,
    ) -> Result<Completion, LlmError> {
        Ok(Completion {
            text: self.response.clone(),
            usage: Usage {
                input_tokens: 100,
                output_tokens: 50,
            },
        })
    }

    async fn vision(
        &self,
        _model: &str,
        _system: Option<&str>,
        _prompt: &str,
        _images: &[ImageInput],
        _opts: &GenerateOptions,
    ) -> Result<Completion, LlmError> {
        Ok(Completion {
            text: self.response.clone(),
            usage: Usage {
                input_tokens: 100,
                output_tokens: 50,
            },
        })
    }
}

/// Router mapping every model to a fixed backend with a Medium profile.
pub struct FixedRouter {
    pub backend: Arc<FixedBackend>,
}

impl LlmRouter for FixedRouter {
    fn acquire(&self, model: &str) -> Result<LlmHandle, LlmError> {
        Ok(LlmHandle::new(
            self.backend.clone(),
            model,
            ContextProfile::Medium,
            None,
        ))
    }
}

/// Transcriber for paths that must not transcribe.
pub struct PanicTranscriber;

#[async_trait]
impl Transcriber for PanicTranscriber {
    async fn transcribe(
        &self,
        _media_path: &Utf8Path,
        _model: &str,
        _timeout: Duration,
    ) -> Result<RawTranscript, LlmError> {
        panic!("transcriber must not be called in this test")
    }
}

/// Transcriber returning a fixed segment list.
pub struct FixedTranscriber {
    pub text: String,
}

#[async_trait]
impl Transcriber for FixedTranscriber {
    async fn transcribe(
        &self,
        _media_path: &Utf8Path,
        _model: &str,
        _timeout: Duration,
    ) -> Result<RawTranscript, LlmError> {
        Ok(RawTranscript {
            segments: vec![TranscriptSegment {
                start: 0.0,
                end: 10.0,
                text: self.text.clone(),
            }],
            full_text: self.text.clone(),
            duration_seconds: 10.0,
            language: "ru".to_string(),
            model_name: "whisper-test".to_string(),
            timestamped_text: None,
        })
    }
}

/// Media tools with a fixed probe result and no-op extraction.
pub struct FixedDurationMedia {
    pub duration: f64,
}

#[async_trait]
impl MediaTools for FixedDurationMedia {
    async fn duration_seconds(&self, _path: &Utf8Path) -> anyhow::Result<f64> {
        Ok(self.duration)
    }

    async fn extract_audio(&self, _src: &Utf8Path, _dest: &Utf8Path) -> anyhow::Result<()> {
        anyhow::bail!("no audio extraction in tests")
    }
}

/// PDF renderer for tests without PDF inputs.
pub struct NoPdf;

#[async_trait]
impl PdfRenderer for NoPdf {
    async fn render_pages(&self, _pdf: &[u8]) -> anyhow::Result<Vec<Vec<u8>>> {
        anyhow::bail!("no PDF rendering in tests")
    }
}
