//! Stage contract and the immutable job context
//!
//! A stage declares its name, dependencies, optionality, skip predicate,
//! time estimate, and an execute routine over the context of prior results.
//! The context is immutable from a stage's point of view: attaching a result
//! produces a new context value.

use crate::config::{EventsCatalog, Settings};
use crate::error::StageError;
use crate::glossary::Glossary;
use crate::llm::LlmRouter;
use crate::media::MediaTools;
use crate::pdf::PdfRenderer;
use crate::progress::StageStatus;
use crate::prompts::PromptCatalog;
use crate::types::{
    CleanedTranscript, ContentType, Longread, PipelineResults, RawTranscript, SlideInput,
    SlidesExtractionResult, Story, Summary, TranscriptChunks, VideoMetadata,
};
use crate::whisper::Transcriber;
use async_trait::async_trait;
use camino::Utf8PathBuf;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;

/// Typed output of one stage.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutput {
    Metadata(VideoMetadata),
    Transcript(RawTranscript),
    Cleaned(CleanedTranscript),
    Slides(SlidesExtractionResult),
    Longread(Longread),
    Story(Story),
    Summary(Summary),
    Chunks(TranscriptChunks),
    Saved(PipelineResults),
}

impl StageOutput {
    /// Wire value for a cache entry: the inner result with camelCase keys.
    ///
    /// # Errors
    ///
    /// `cache` if serialization fails (non-string map keys cannot occur in
    /// these types, so this is effectively infallible).
    pub fn to_cache_value(&self) -> Result<Value, StageError> {
        let result = match self {
            Self::Metadata(v) => serde_json::to_value(v),
            Self::Transcript(v) => serde_json::to_value(v),
            Self::Cleaned(v) => serde_json::to_value(v),
            Self::Slides(v) => serde_json::to_value(v),
            Self::Longread(v) => serde_json::to_value(v),
            Self::Story(v) => serde_json::to_value(v),
            Self::Summary(v) => serde_json::to_value(v),
            Self::Chunks(v) => serde_json::to_value(v),
            Self::Saved(v) => serde_json::to_value(v),
        };
        result.map_err(|e| StageError::cache(format!("failed to serialize stage result: {e}")))
    }

    /// Rehydrate a cached value for the named stage.
    ///
    /// # Errors
    ///
    /// `cache` when the value does not deserialize as that stage's type.
    pub fn from_cache_value(stage: &str, value: Value) -> Result<Self, StageError> {
        fn de<T: serde::de::DeserializeOwned>(
            stage: &str,
            value: Value,
        ) -> Result<T, StageError> {
            serde_json::from_value(value).map_err(|e| {
                StageError::cache(format!("cached result for '{stage}' is invalid: {e}"))
            })
        }
        match stage {
            "parse" => Ok(Self::Metadata(de(stage, value)?)),
            "transcribe" => Ok(Self::Transcript(de(stage, value)?)),
            "clean" => Ok(Self::Cleaned(de(stage, value)?)),
            "slides" => Ok(Self::Slides(de(stage, value)?)),
            "longread" => Ok(Self::Longread(de(stage, value)?)),
            "story" => Ok(Self::Story(de(stage, value)?)),
            "summarize" => Ok(Self::Summary(de(stage, value)?)),
            "chunk" => Ok(Self::Chunks(de(stage, value)?)),
            "save" => Ok(Self::Saved(de(stage, value)?)),
            other => Err(StageError::configuration(format!("unknown stage '{other}'"))),
        }
    }
}

/// External collaborators the stages call; all mockable in tests.
#[derive(Clone)]
pub struct Services {
    pub llm: Arc<dyn LlmRouter>,
    pub transcriber: Arc<dyn Transcriber>,
    pub media: Arc<dyn MediaTools>,
    pub pdf: Arc<dyn PdfRenderer>,
}

/// Per-run overrides: step-level models and prompt variants, keyed by stage.
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub models: BTreeMap<String, String>,
    /// stage -> component -> variant name
    pub prompt_variants: BTreeMap<String, BTreeMap<String, String>>,
}

impl RunOverrides {
    /// Variant overrides for one stage (empty map when none).
    #[must_use]
    pub fn prompts_for(&self, stage: &str) -> BTreeMap<String, String> {
        self.prompt_variants.get(stage).cloned().unwrap_or_default()
    }
}

/// Cancellation signal observed between and during stages.
#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
    /// Keeps the sender alive for tokens created without a handle.
    _keepalive: Option<Arc<watch::Sender<bool>>>,
}

/// Sender half held by the caller.
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Create a token/handle pair for one job.
#[must_use]
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (
        CancelHandle { tx },
        CancelToken {
            rx,
            _keepalive: None,
        },
    )
}

impl CancelToken {
    /// A token that never fires, for non-interactive callers.
    #[must_use]
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            rx,
            _keepalive: Some(Arc::new(tx)),
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve when cancellation is requested.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        loop {
            if rx.changed().await.is_err() {
                // sender dropped without cancelling: never resolves
                std::future::pending::<()>().await;
            }
            if *rx.borrow() {
                return;
            }
        }
    }
}

/// Immutable per-job context flowing through the stages.
#[derive(Clone)]
pub struct StageContext {
    pub video_path: Utf8PathBuf,
    pub slides_input: Vec<SlideInput>,
    pub settings: Arc<Settings>,
    pub services: Services,
    pub prompts: Arc<PromptCatalog>,
    pub glossary: Arc<Glossary>,
    pub events: Arc<EventsCatalog>,
    pub overrides: Arc<RunOverrides>,
    results: BTreeMap<String, Arc<StageOutput>>,
}

impl StageContext {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        video_path: Utf8PathBuf,
        slides_input: Vec<SlideInput>,
        settings: Arc<Settings>,
        services: Services,
        prompts: Arc<PromptCatalog>,
        glossary: Arc<Glossary>,
        events: Arc<EventsCatalog>,
        overrides: Arc<RunOverrides>,
    ) -> Self {
        Self {
            video_path,
            slides_input,
            settings,
            services,
            prompts,
            glossary,
            events,
            overrides,
            results: BTreeMap::new(),
        }
    }

    /// New context with `output` attached under `stage`.
    #[must_use]
    pub fn with_result(&self, stage: &str, output: StageOutput) -> Self {
        let mut next = self.clone();
        next.results.insert(stage.to_string(), Arc::new(output));
        next
    }

    #[must_use]
    pub fn result(&self, stage: &str) -> Option<&StageOutput> {
        self.results.get(stage).map(Arc::as_ref)
    }

    #[must_use]
    pub fn has_result(&self, stage: &str) -> bool {
        self.results.contains_key(stage)
    }

    /// Effective model for a stage: explicit override wins over the
    /// per-stage default from settings.
    #[must_use]
    pub fn effective_model(&self, stage: &str) -> Option<String> {
        self.overrides
            .models
            .get(stage)
            .cloned()
            .or_else(|| self.settings.default_model_for(stage).map(str::to_string))
    }

    // Typed accessors over prior results

    #[must_use]
    pub fn metadata(&self) -> Option<&VideoMetadata> {
        match self.result("parse") {
            Some(StageOutput::Metadata(v)) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn transcript(&self) -> Option<&RawTranscript> {
        match self.result("transcribe") {
            Some(StageOutput::Transcript(v)) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn cleaned(&self) -> Option<&CleanedTranscript> {
        match self.result("clean") {
            Some(StageOutput::Cleaned(v)) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn slides(&self) -> Option<&SlidesExtractionResult> {
        match self.result("slides") {
            Some(StageOutput::Slides(v)) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn longread(&self) -> Option<&Longread> {
        match self.result("longread") {
            Some(StageOutput::Longread(v)) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn story(&self) -> Option<&Story> {
        match self.result("story") {
            Some(StageOutput::Story(v)) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn summary(&self) -> Option<&Summary> {
        match self.result("summarize") {
            Some(StageOutput::Summary(v)) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn chunks(&self) -> Option<&TranscriptChunks> {
        match self.result("chunk") {
            Some(StageOutput::Chunks(v)) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn content_type(&self) -> Option<ContentType> {
        self.metadata().map(|m| m.content_type)
    }
}

/// A node in the pipeline DAG.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Unique identifier; also the cache directory name.
    fn name(&self) -> &'static str;

    /// Stages whose results must be present before this one runs.
    fn depends_on(&self) -> &'static [&'static str];

    /// Whether the stage may be omitted from a pipeline without error.
    fn optional(&self) -> bool {
        false
    }

    /// Coarse status code reported while the stage runs.
    fn status(&self) -> StageStatus;

    /// Evaluated after dependencies are satisfied; `true` no-ops the stage.
    fn should_skip(&self, _ctx: &StageContext) -> bool {
        false
    }

    /// Stage-specific input size (seconds of audio, characters of text,
    /// file counts) feeding the time estimate.
    fn input_size(&self, ctx: &StageContext) -> u64;

    /// Upper-biased execution time estimate in seconds.
    fn estimate_seconds(&self, input_size: u64) -> f64;

    /// Produce the stage's typed output from the context.
    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageError>;
}

impl std::fmt::Debug for dyn Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage").field("name", &self.name()).finish()
    }
}
