//! LLM provider routing
//!
//! A model identifier maps to one of two provider kinds: identifiers starting
//! with `claude` go to the Anthropic HTTP backend, everything else goes to an
//! Ollama-compatible local server. Acquiring a handle validates the model
//! against the catalog; the handle carries the model's context profile and
//! price table so callers can size chunks and account for cost.

mod anthropic;
mod http;
mod ollama;

pub use anthropic::AnthropicBackend;
pub use http::HttpClient;
pub use ollama::OllamaBackend;

use crate::config::Settings;
use crate::error::{ErrorKind, StageError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors from the provider layer; stages map these onto the pipeline
/// taxonomy via the `From` impl below.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("configuration error: {0}")]
    Misconfiguration(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider rejected the request: {0}")]
    Provider(String),

    #[error("request timed out after {}s", duration.as_secs())]
    Timeout { duration: Duration },

    #[error("response failed extraction: {0}")]
    Schema(String),
}

impl From<LlmError> for StageError {
    fn from(err: LlmError) -> Self {
        let kind = match &err {
            LlmError::Misconfiguration(_) => ErrorKind::Configuration,
            LlmError::Transport(_) => ErrorKind::Transport,
            LlmError::Provider(_) => ErrorKind::Provider,
            LlmError::Timeout { .. } => ErrorKind::Timeout,
            LlmError::Schema(_) => ErrorKind::Schema,
        };
        StageError::new(kind, err.to_string()).with_source(err)
    }
}

/// Role of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single conversation message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }
}

/// Base64-encoded image for vision calls.
#[derive(Debug, Clone)]
pub struct ImageInput {
    /// e.g. `image/png`
    pub media_type: String,
    pub data_base64: String,
}

/// Per-call knobs; timeout comes from settings unless a stage tightens it.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub timeout: Duration,
}

impl GenerateOptions {
    #[must_use]
    pub const fn with_timeout(timeout: Duration) -> Self {
        Self {
            temperature: None,
            max_tokens: None,
            timeout,
        }
    }
}

/// Token counts reported by a backend for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Text plus usage for one completed call.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: Usage,
}

/// Sizing bucket bounding chunk sizes and predicted output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextProfile {
    Small,
    Medium,
    Large,
}

impl ContextProfile {
    /// Target size of one chunk handed to the model.
    #[must_use]
    pub const fn chunk_chars(self) -> usize {
        match self {
            Self::Small => 6_000,
            Self::Medium => 12_000,
            Self::Large => 20_000,
        }
    }

    /// Texts up to this size go through in a single call.
    #[must_use]
    pub const fn single_pass_threshold_chars(self) -> usize {
        match self {
            Self::Small => 8_000,
            Self::Medium => 16_000,
            Self::Large => 28_000,
        }
    }

    /// Above this size the longread stage extracts an outline first.
    #[must_use]
    pub const fn large_text_threshold_chars(self) -> usize {
        match self {
            Self::Small => 24_000,
            Self::Medium => 48_000,
            Self::Large => 80_000,
        }
    }

    /// Overlap carried between adjacent chunks.
    #[must_use]
    pub const fn overlap_chars(self) -> usize {
        match self {
            Self::Small => 300,
            Self::Medium => 500,
            Self::Large => 800,
        }
    }

    /// Expected output budget for one call.
    #[must_use]
    pub const fn predicted_output_tokens(self) -> u32 {
        match self {
            Self::Small => 1_024,
            Self::Medium => 2_048,
            Self::Large => 4_096,
        }
    }
}

/// Which backend serves a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Local,
    Cloud,
}

/// USD per 1M tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pricing {
    pub input: f64,
    pub output: f64,
}

/// Catalog entry for a known model.
#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub name: &'static str,
    pub provider: ProviderKind,
    pub profile: ContextProfile,
    pub pricing: Option<Pricing>,
}

/// Models the router knows about. Identifiers matching `claude*` are cloud;
/// everything else is local and free.
const MODEL_CATALOG: &[ModelSpec] = &[
    ModelSpec {
        name: "claude-opus-4-1",
        provider: ProviderKind::Cloud,
        profile: ContextProfile::Large,
        pricing: Some(Pricing {
            input: 15.0,
            output: 75.0,
        }),
    },
    ModelSpec {
        name: "claude-sonnet-4-5",
        provider: ProviderKind::Cloud,
        profile: ContextProfile::Large,
        pricing: Some(Pricing {
            input: 3.0,
            output: 15.0,
        }),
    },
    ModelSpec {
        name: "claude-haiku-4-5",
        provider: ProviderKind::Cloud,
        profile: ContextProfile::Medium,
        pricing: Some(Pricing {
            input: 1.0,
            output: 5.0,
        }),
    },
    ModelSpec {
        name: "qwen2.5:32b",
        provider: ProviderKind::Local,
        profile: ContextProfile::Medium,
        pricing: None,
    },
    ModelSpec {
        name: "qwen2.5:14b",
        provider: ProviderKind::Local,
        profile: ContextProfile::Medium,
        pricing: None,
    },
    ModelSpec {
        name: "qwen2.5:7b",
        provider: ProviderKind::Local,
        profile: ContextProfile::Small,
        pricing: None,
    },
    ModelSpec {
        name: "llama3.1:8b",
        provider: ProviderKind::Local,
        profile: ContextProfile::Small,
        pricing: None,
    },
    ModelSpec {
        name: "gemma2:27b",
        provider: ProviderKind::Local,
        profile: ContextProfile::Medium,
        pricing: None,
    },
];

/// Look up a model in the catalog.
#[must_use]
pub fn model_spec(name: &str) -> Option<&'static ModelSpec> {
    MODEL_CATALOG.iter().find(|spec| spec.name == name)
}

/// Backend contract implemented by both providers.
///
/// Handles are plain values; releasing the underlying connection pool happens
/// on drop, on every exit path.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn generate(
        &self,
        model: &str,
        system: Option<&str>,
        prompt: &str,
        opts: &GenerateOptions,
    ) -> Result<Completion, LlmError>;

    async fn chat(
        &self,
        model: &str,
        messages: &[Message],
        opts: &GenerateOptions,
    ) -> Result<Completion, LlmError>;

    /// Vision is a cloud-only capability.
    async fn vision(
        &self,
        _model: &str,
        _system: Option<&str>,
        _prompt: &str,
        _images: &[ImageInput],
        _opts: &GenerateOptions,
    ) -> Result<Completion, LlmError> {
        Err(LlmError::Misconfiguration(
            "vision calls require a cloud model".to_string(),
        ))
    }
}

/// Scoped, capability-typed handle for one model.
#[derive(Clone)]
pub struct LlmHandle {
    backend: Arc<dyn LlmBackend>,
    model: String,
    profile: ContextProfile,
    pricing: Option<Pricing>,
}

impl LlmHandle {
    #[must_use]
    pub fn new(
        backend: Arc<dyn LlmBackend>,
        model: impl Into<String>,
        profile: ContextProfile,
        pricing: Option<Pricing>,
    ) -> Self {
        Self {
            backend,
            model: model.into(),
            profile,
            pricing,
        }
    }

    #[must_use]
    pub fn model_name(&self) -> &str {
        &self.model
    }

    #[must_use]
    pub const fn profile(&self) -> ContextProfile {
        self.profile
    }

    /// USD cost of a call's usage; 0 for local models.
    #[must_use]
    pub fn cost(&self, usage: Usage) -> f64 {
        self.pricing.map_or(0.0, |p| {
            (usage.input_tokens as f64) * p.input / 1_000_000.0
                + (usage.output_tokens as f64) * p.output / 1_000_000.0
        })
    }

    pub async fn generate(
        &self,
        system: Option<&str>,
        prompt: &str,
        opts: &GenerateOptions,
    ) -> Result<Completion, LlmError> {
        self.backend.generate(&self.model, system, prompt, opts).await
    }

    pub async fn chat(
        &self,
        messages: &[Message],
        opts: &GenerateOptions,
    ) -> Result<Completion, LlmError> {
        self.backend.chat(&self.model, messages, opts).await
    }

    pub async fn vision_generate(
        &self,
        system: Option<&str>,
        prompt: &str,
        images: &[ImageInput],
        opts: &GenerateOptions,
    ) -> Result<Completion, LlmError> {
        self.backend
            .vision(&self.model, system, prompt, images, opts)
            .await
    }
}

/// Maps model identifiers to provider handles.
pub trait LlmRouter: Send + Sync {
    /// Acquire a handle for `model`.
    ///
    /// # Errors
    ///
    /// `Misconfiguration` for models missing from the catalog, and for cloud
    /// models when no API key is configured.
    fn acquire(&self, model: &str) -> Result<LlmHandle, LlmError>;
}

/// Production router over one local and one optional cloud backend.
pub struct DefaultLlmRouter {
    local: Arc<OllamaBackend>,
    cloud: Option<Arc<AnthropicBackend>>,
}

impl DefaultLlmRouter {
    /// Build from settings. The cloud backend exists only when an API key is
    /// configured; local is always available.
    ///
    /// # Errors
    ///
    /// `Misconfiguration` if an HTTP client cannot be constructed.
    pub fn from_settings(settings: &Settings) -> Result<Self, LlmError> {
        let local = Arc::new(OllamaBackend::new(settings.ollama_base_url.clone())?);
        let cloud = settings
            .anthropic_api_key
            .as_ref()
            .map(|key| {
                AnthropicBackend::new(key.clone(), settings.https_proxy.clone()).map(Arc::new)
            })
            .transpose()?;
        Ok(Self { local, cloud })
    }
}

impl LlmRouter for DefaultLlmRouter {
    fn acquire(&self, model: &str) -> Result<LlmHandle, LlmError> {
        let spec = model_spec(model).ok_or_else(|| {
            LlmError::Misconfiguration(format!("model '{model}' is unknown to the provider router"))
        })?;
        match spec.provider {
            ProviderKind::Local => Ok(LlmHandle::new(
                self.local.clone(),
                model,
                spec.profile,
                spec.pricing,
            )),
            ProviderKind::Cloud => {
                let cloud = self.cloud.clone().ok_or_else(|| {
                    LlmError::Misconfiguration(format!(
                        "model '{model}' requires ANTHROPIC_API_KEY"
                    ))
                })?;
                Ok(LlmHandle::new(cloud, model, spec.profile, spec.pricing))
            }
        }
    }
}
