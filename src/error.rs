//! Error taxonomy for the pipeline runtime
//!
//! Every failure a stage can produce is classified into one of the kinds
//! below. Transport retries happen inside the HTTP layer; everything that
//! reaches the orchestrator is final for the stage that raised it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a stage failure.
///
/// The kind decides how the failure is reported and whether a re-run with
/// different inputs (model, prompt variant) is likely to help.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Unknown stage or model, cyclic graph, missing required settings
    Configuration,
    /// No filename grammar matched, or the media file could not be probed
    ParseFailure,
    /// Network or HTTP failure that survived the transport retry policy
    Transport,
    /// A request exceeded its stage timeout; never retried
    Timeout,
    /// 4xx from a provider (invalid API key, bad request)
    Provider,
    /// LLM response failed JSON extraction or is missing required fields
    Schema,
    /// Cleaned text too short or not majority-cyrillic
    CleanRegression,
    /// Cache or archive persistence inconsistency
    Cache,
    /// Caller-initiated cancellation
    Cancelled,
}

impl ErrorKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::ParseFailure => "parse_failure",
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::Provider => "provider",
            Self::Schema => "schema",
            Self::CleanRegression => "clean_regression",
            Self::Cache => "cache",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure raised by a single stage.
///
/// The message is user-facing; the source chain is for the log only.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct StageError {
    pub kind: ErrorKind,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl StageError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    #[must_use]
    pub fn with_source(
        mut self,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        self.source = Some(source.into());
        self
    }

    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    #[must_use]
    pub fn parse_failure(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ParseFailure, message)
    }

    #[must_use]
    pub fn schema(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Schema, message)
    }

    #[must_use]
    pub fn clean_regression(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CleanRegression, message)
    }

    #[must_use]
    pub fn cache(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cache, message)
    }

    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "job cancelled by caller")
    }
}

/// Terminal error for a job: the failing stage plus its cause.
///
/// The orchestrator wraps any stage failure (including panic-free non-stage
/// errors surfaced as `StageError`) into this type; previously cached results
/// remain valid.
#[derive(Debug, Error)]
#[error("stage '{stage}' failed: {error}")]
pub struct PipelineError {
    pub stage: String,
    #[source]
    pub error: StageError,
}

impl PipelineError {
    #[must_use]
    pub fn new(stage: impl Into<String>, error: StageError) -> Self {
        Self {
            stage: stage.into(),
            error,
        }
    }

    /// Kind of the underlying stage failure.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.error.kind
    }

    /// Exit code for CLI consumers.
    ///
    /// Configuration problems get their own code so wrappers can distinguish
    /// "fix your environment" from "the job failed".
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self.error.kind {
            ErrorKind::Configuration => 2,
            ErrorKind::Cancelled => 130,
            _ => 1,
        }
    }
}
