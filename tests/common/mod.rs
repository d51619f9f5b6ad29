//! Shared fixtures for integration tests: scripted service mocks and a
//! settings factory rooted in a temp directory.
#![allow(dead_code)] // each test binary uses a different subset

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use std::sync::Arc;
use std::time::Duration;
use videokb::config::{EventsCatalog, Settings};
use videokb::glossary::Glossary;
use videokb::llm::{
    Completion, ContextProfile, GenerateOptions, ImageInput, LlmBackend, LlmError, LlmHandle,
    LlmRouter, Message, Role, Usage,
};
use videokb::media::MediaTools;
use videokb::orchestrator::Orchestrator;
use videokb::pdf::PdfRenderer;
use videokb::prompts::PromptCatalog;
use videokb::stage::Services;
use videokb::stages::default_registry;
use videokb::types::{RawTranscript, TranscriptSegment};
use videokb::whisper::Transcriber;

pub const TRANSCRIPT_TEXT: &str = "Добрый день, коллеги. Сегодня мы говорим про группу поддержки. \
Группа поддержки это команда, которая помогает новичку сделать первые шаги. \
Важно собрать её в первые дни и договориться о регулярных встречах. \
Дальше мы разберём типичные ошибки и посмотрим на примеры из практики.";

const REDUCE_JSON: &str = r#"{
  "introduction": "Эта статья разбирает, зачем нужна группа поддержки и как её собрать.",
  "conclusion": "Группа поддержки ускоряет старт новичка и снижает отток.",
  "classification": {"topicArea": ["работа с командой"], "tags": ["поддержка", "новички"], "accessLevel": "consultant"}
}"#;

const SUMMARY_JSON: &str = r#"{
  "essence": "Видео о том, как группа поддержки помогает новичку стартовать.",
  "keyConcepts": ["Группа поддержки — команда первых недель"],
  "practicalTools": ["Чек-лист первой встречи"],
  "quotes": ["Первые дни решают всё"],
  "insight": "Поддержка в первые дни важнее обучения.",
  "actions": ["Собрать группу поддержки для нового консультанта"],
  "classification": {"topicArea": ["работа с командой"], "tags": ["поддержка"], "accessLevel": "consultant"}
}"#;

const STORY_JSON: &str = r#"{
  "blocks": [
    {"number": 1, "title": "Точка входа", "content": "Пришли в бизнес вслед за друзьями."},
    {"number": 2, "title": "Первые шаги", "content": "Первые продажи дались тяжело."},
    {"number": 3, "title": "Рост", "content": "Рост пошёл после первой команды."},
    {"number": 4, "title": "Кризис", "content": "Был период застоя на два года."},
    {"number": 5, "title": "Перезапуск", "content": "Перезапустились после форума."},
    {"number": 6, "title": "Система", "content": "Сейчас работает система наставничества."},
    {"number": 7, "title": "Статус", "content": "Достигли статуса директора."},
    {"number": 8, "title": "Уроки", "content": "Главный урок: регулярность важнее таланта."}
  ],
  "names": "Антоновы",
  "currentStatus": "Директор",
  "mainInsight": "Регулярность важнее таланта",
  "timeInBusiness": "12 лет",
  "isFamily": true,
  "hadStagnation": true,
  "stagnationYears": 2,
  "hadRestart": true,
  "classification": {"topicArea": ["лидерство"], "tags": ["история роста"], "accessLevel": "leader"}
}"#;

/// Backend that answers by recognizing which stage prompt it received.
pub struct ScriptedBackend;

impl ScriptedBackend {
    fn respond(system: Option<&str>, prompt: &str) -> String {
        let system = system.unwrap_or_default();
        if system.contains("редактор") {
            // clean: echo the embedded text back (identity cleanup)
            return prompt
                .split_once("\n\n")
                .map(|(_, text)| text.trim().to_string())
                .unwrap_or_else(|| prompt.to_string());
        }
        if system.contains("методист") {
            if prompt.contains("строго JSON") {
                return REDUCE_JSON.to_string();
            }
            if prompt.contains("названия смысловых разделов") {
                return "- Зачем нужна группа поддержки\n- Как её собрать".to_string();
            }
            // MAP: one section per call
            let position = prompt
                .split_whitespace()
                .find_map(|w| w.parse::<usize>().ok())
                .unwrap_or(1);
            return format!(
                "## Раздел {position}\n\nСодержимое раздела {position} про группу поддержки."
            );
        }
        if system.contains("выжимки") {
            return SUMMARY_JSON.to_string();
        }
        if system.contains("аналитик историй") {
            return STORY_JSON.to_string();
        }
        format!("непредвиденный промпт: {system}")
    }
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    async fn generate(
        &self,
        _model: &str,
        system: Option<&str>,
        prompt: &str,
        _opts: &GenerateOptions,
    ) -> Result<Completion, LlmError> {
        Ok(Completion {
            text: Self::respond(system, prompt),
            usage: Usage {
                input_tokens: 200,
                output_tokens: 100,
            },
        })
    }

    async fn chat(
        &self,
        _model: &str,
        messages: &[Message],
        _opts: &GenerateOptions,
    ) -> Result<Completion, LlmError> {
        let system = messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.as_str());
        let user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        Ok(Completion {
            text: Self::respond(system, user),
            usage: Usage {
                input_tokens: 200,
                output_tokens: 100,
            },
        })
    }

    async fn vision(
        &self,
        _model: &str,
        _system: Option<&str>,
        _prompt: &str,
        images: &[ImageInput],
        _opts: &GenerateOptions,
    ) -> Result<Completion, LlmError> {
        let slides: String = (1..=images.len())
            .map(|i| format!("### Слайд {i}: Заголовок\n\n- пункт\n"))
            .collect();
        Ok(Completion {
            text: slides,
            usage: Usage {
                input_tokens: 500,
                output_tokens: 200,
            },
        })
    }
}

pub struct ScriptedRouter;

impl LlmRouter for ScriptedRouter {
    fn acquire(&self, model: &str) -> Result<LlmHandle, LlmError> {
        Ok(LlmHandle::new(
            Arc::new(ScriptedBackend),
            model,
            ContextProfile::Medium,
            None,
        ))
    }
}

/// Backend whose generate shrinks the text to ~30% (summarization bug).
pub struct ShrinkingBackend;

#[async_trait]
impl LlmBackend for ShrinkingBackend {
    async fn generate(
        &self,
        _model: &str,
        _system: Option<&str>,
        prompt: &str,
        _opts: &GenerateOptions,
    ) -> Result<Completion, LlmError> {
        let text: String = prompt.chars().take(prompt.chars().count() / 10).collect();
        Ok(Completion {
            text,
            usage: Usage::default(),
        })
    }

    async fn chat(
        &self,
        _model: &str,
        _messages: &[Message],
        _opts: &GenerateOptions,
    ) -> Result<Completion, LlmError> {
        Err(LlmError::Provider("not used".to_string()))
    }
}

pub struct ShrinkingRouter;

impl LlmRouter for ShrinkingRouter {
    fn acquire(&self, model: &str) -> Result<LlmHandle, LlmError> {
        Ok(LlmHandle::new(
            Arc::new(ShrinkingBackend),
            model,
            ContextProfile::Medium,
            None,
        ))
    }
}

pub struct FixedTranscriber;

#[async_trait]
impl Transcriber for FixedTranscriber {
    async fn transcribe(
        &self,
        _media_path: &Utf8Path,
        model: &str,
        _timeout: Duration,
    ) -> Result<RawTranscript, LlmError> {
        let sentences: Vec<&str> = TRANSCRIPT_TEXT.split_inclusive(". ").collect();
        let segments: Vec<TranscriptSegment> = sentences
            .iter()
            .enumerate()
            .map(|(i, text)| TranscriptSegment {
                start: i as f64 * 10.0,
                end: (i + 1) as f64 * 10.0,
                text: text.trim().to_string(),
            })
            .collect();
        Ok(RawTranscript {
            full_text: segments
                .iter()
                .map(|s| s.text.as_str())
                .collect::<Vec<_>>()
                .join(" "),
            duration_seconds: segments.len() as f64 * 10.0,
            segments,
            language: "ru".to_string(),
            model_name: model.to_string(),
            timestamped_text: None,
        })
    }
}

/// Transcriber that times out, for the timeout scenario.
pub struct TimeoutTranscriber;

#[async_trait]
impl Transcriber for TimeoutTranscriber {
    async fn transcribe(
        &self,
        _media_path: &Utf8Path,
        _model: &str,
        timeout: Duration,
    ) -> Result<RawTranscript, LlmError> {
        Err(LlmError::Timeout { duration: timeout })
    }
}

pub struct StubMedia;

#[async_trait]
impl MediaTools for StubMedia {
    async fn duration_seconds(&self, _path: &Utf8Path) -> anyhow::Result<f64> {
        Ok(3600.0)
    }

    async fn extract_audio(&self, _src: &Utf8Path, _dest: &Utf8Path) -> anyhow::Result<()> {
        anyhow::bail!("no audio extraction in tests")
    }
}

pub struct StubPdf;

#[async_trait]
impl PdfRenderer for StubPdf {
    async fn render_pages(&self, _pdf: &[u8]) -> anyhow::Result<Vec<Vec<u8>>> {
        Ok(vec![vec![0u8; 16], vec![1u8; 16]])
    }
}

/// Settings rooted in a temp directory; no environment access.
pub fn test_settings(root: &Utf8Path) -> Settings {
    Settings {
        anthropic_api_key: None,
        ollama_base_url: "http://localhost:11434".to_string(),
        whisper_base_url: "http://localhost:9000".to_string(),
        https_proxy: None,
        data_root: root.to_owned(),
        inbox_dir: root.join("inbox"),
        archive_dir: root.join("archive"),
        temp_dir: root.join("temp"),
        config_dir: root.join("config"),
        prompts_dir: None,
        cleaner_model: "qwen2.5:32b".to_string(),
        longread_model: "claude-sonnet-4-5".to_string(),
        summary_model: "claude-sonnet-4-5".to_string(),
        story_model: "claude-sonnet-4-5".to_string(),
        slides_model: "claude-sonnet-4-5".to_string(),
        transcription_model: "whisper-large-v3".to_string(),
        llm_timeout: Duration::from_secs(300),
        transcription_timeout: Duration::from_secs(600),
        include_timestamps: true,
        max_parallel_sections: 2,
        slide_batch_size: 5,
    }
}

/// Orchestrator wired with the scripted services.
pub fn scripted_orchestrator(
    root: &Utf8Path,
    transcriber: Arc<dyn Transcriber>,
    llm: Arc<dyn LlmRouter>,
) -> Orchestrator {
    let settings = Arc::new(test_settings(root));
    let services = Services {
        llm,
        transcriber,
        media: Arc::new(StubMedia),
        pdf: Arc::new(StubPdf),
    };
    Orchestrator::new(
        default_registry(),
        settings,
        services,
        Arc::new(PromptCatalog::default()),
        Arc::new(Glossary::default()),
        Arc::new(EventsCatalog::default()),
    )
}

pub fn temp_root(dir: &tempfile::TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap()
}
