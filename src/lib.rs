//! videokb — pipeline that turns recorded training videos into
//! knowledge-base artifacts
//!
//! An inbox file flows through a declarative stage DAG: parse → transcribe →
//! clean → (longread + summarize | story) → chunk → save. Stage results are
//! cached as versioned, immutable JSON so any single stage can replay with a
//! different model or prompt variant; LLM calls route to a local or cloud
//! backend by model name.

pub mod atomic_write;
pub mod cache;
pub mod chunker;
pub mod cli;
pub mod config;
pub mod error;
pub mod extraction;
pub mod glossary;
pub mod llm;
pub mod logging;
pub mod markdown;
pub mod media;
pub mod orchestrator;
pub mod paths;
pub mod pdf;
pub mod progress;
pub mod prompts;
pub mod registry;
pub mod stage;
pub mod stages;
pub mod textsplit;
pub mod types;
pub mod whisper;

#[cfg(any(test, feature = "test-utils"))]
pub mod testutil;

pub use error::{ErrorKind, PipelineError, StageError};
pub use orchestrator::{JobRequest, Orchestrator};
pub use types::*;
