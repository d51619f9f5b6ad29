//! Progress estimation and the live ticker
//!
//! Estimates are linear in input size (`base + coeff × size`) and biased
//! high; while a stage runs, a cooperative ticker emits an update every
//! second, capping the stage's internal percentage at 99 until completion.
//! Stage-internal percentages scale into the stage's weight slice, so the
//! overall percentage a caller sees is monotone non-decreasing and reaches
//! exactly 100 only on success.

use crate::types::PipelineResults;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::info;

/// Cadence of ticker updates.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);
/// A running stage never reports more than this internally.
pub const TICKER_CAP_PERCENT: f64 = 99.0;

/// Coarse per-stage status carried on progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Parsing,
    Transcribing,
    Cleaning,
    ExtractingSlides,
    GeneratingLongread,
    GeneratingStory,
    Summarizing,
    Chunking,
    Saving,
    Skipped,
    Completed,
}

/// Event surface forwarded by the caller to any transport.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PipelineEvent {
    Progress {
        stage: String,
        status: StageStatus,
        /// Overall weighted percentage in `[0, 100]`
        progress: f64,
        message: String,
        estimated_seconds: f64,
        elapsed_seconds: f64,
    },
    Result {
        data: Box<PipelineResults>,
    },
    Error {
        error: String,
    },
}

/// Consumer of pipeline events. Callbacks for one job are serialized.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn emit(&self, event: PipelineEvent);
}

/// Sink that forwards events to the log.
pub struct TracingSink;

#[async_trait]
impl ProgressSink for TracingSink {
    async fn emit(&self, event: PipelineEvent) {
        match &event {
            PipelineEvent::Progress {
                stage,
                progress,
                message,
                ..
            } => info!(stage = %stage, progress = format!("{progress:.0}").as_str(), "{message}"),
            PipelineEvent::Result { .. } => info!("pipeline completed"),
            PipelineEvent::Error { error } => info!(error = %error, "pipeline failed"),
        }
    }
}

/// Relative progress weight of each stage. Skipped stages complete their
/// slice instantly; weights are normalized over the planned stage list.
#[must_use]
pub fn stage_weight(stage: &str) -> f64 {
    match stage {
        "parse" => 2.0,
        "transcribe" => 45.0,
        "clean" => 10.0,
        "longread" => 18.0,
        "summarize" => 10.0,
        "story" => 28.0,
        "chunk" => 13.0,
        "save" => 2.0,
        _ => 1.0,
    }
}

struct JobProgressInner {
    /// `(stage, normalized weight)` in execution order
    plan: Vec<(String, f64)>,
    /// Weight consumed by finished (or skipped) stages
    completed: f64,
    /// Monotonic guard over the emitted overall percentage
    last_emitted: f64,
}

/// Per-job progress tracker shared between the orchestrator and tickers.
pub struct JobProgress {
    sink: Arc<dyn ProgressSink>,
    inner: Mutex<JobProgressInner>,
}

impl JobProgress {
    /// Build for a planned stage list; weights normalize to 100.
    #[must_use]
    pub fn new(sink: Arc<dyn ProgressSink>, planned_stages: &[&str]) -> Self {
        let total: f64 = planned_stages.iter().map(|s| stage_weight(s)).sum();
        let plan = planned_stages
            .iter()
            .map(|s| ((*s).to_string(), stage_weight(s) * 100.0 / total.max(1.0)))
            .collect();
        Self {
            sink,
            inner: Mutex::new(JobProgressInner {
                plan,
                completed: 0.0,
                last_emitted: 0.0,
            }),
        }
    }

    fn slice_of(inner: &JobProgressInner, stage: &str) -> f64 {
        inner
            .plan
            .iter()
            .find(|(name, _)| name == stage)
            .map_or(0.0, |(_, weight)| *weight)
    }

    /// Emit a stage-internal update scaled into the overall percentage.
    pub async fn stage_update(
        &self,
        stage: &str,
        status: StageStatus,
        stage_percent: f64,
        message: impl Into<String>,
        estimated_seconds: f64,
        elapsed_seconds: f64,
    ) {
        let overall = {
            let mut inner = self.inner.lock().await;
            let slice = Self::slice_of(&inner, stage);
            let overall = (inner.completed + slice * stage_percent / 100.0).min(100.0);
            inner.last_emitted = inner.last_emitted.max(overall);
            inner.last_emitted
        };
        self.sink
            .emit(PipelineEvent::Progress {
                stage: stage.to_string(),
                status,
                progress: overall,
                message: message.into(),
                estimated_seconds,
                elapsed_seconds,
            })
            .await;
    }

    /// Mark a stage finished and emit its terminal progress event.
    pub async fn stage_done(
        &self,
        stage: &str,
        status: StageStatus,
        message: impl Into<String>,
        estimated_seconds: f64,
        elapsed_seconds: f64,
    ) {
        let overall = {
            let mut inner = self.inner.lock().await;
            let slice = Self::slice_of(&inner, stage);
            inner.completed = (inner.completed + slice).min(100.0);
            inner.last_emitted = inner.last_emitted.max(inner.completed);
            inner.last_emitted
        };
        self.sink
            .emit(PipelineEvent::Progress {
                stage: stage.to_string(),
                status,
                progress: overall,
                message: message.into(),
                estimated_seconds,
                elapsed_seconds,
            })
            .await;
    }

    /// Complete a skipped stage's slice without running it.
    pub async fn stage_skipped(&self, stage: &str) {
        self.stage_done(stage, StageStatus::Skipped, format!("{stage} skipped"), 0.0, 0.0)
            .await;
    }

    /// Emit the terminal result event.
    pub async fn finish(&self, results: PipelineResults) {
        self.sink
            .emit(PipelineEvent::Result {
                data: Box::new(results),
            })
            .await;
    }

    /// Emit the terminal error event. The message is user-facing text; the
    /// cause chain goes to the log only.
    pub async fn fail(&self, error: String) {
        self.sink.emit(PipelineEvent::Error { error }).await;
    }
}

/// Cooperative ticker for one running stage.
///
/// Emits `min(99, elapsed / estimate × 100)` every second through the job
/// tracker; keeps emitting at 99 when a stage overruns its estimate. Stopped
/// (aborted at the next suspension point) when the stage completes.
pub struct Ticker {
    handle: JoinHandle<()>,
}

impl Ticker {
    #[must_use]
    pub fn start(
        progress: Arc<JobProgress>,
        stage: &'static str,
        status: StageStatus,
        estimated_seconds: f64,
        message: String,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let started = tokio::time::Instant::now();
            let mut interval = tokio::time::interval(TICK_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // first tick completes immediately; skip it so updates start at 1s
            interval.tick().await;
            loop {
                interval.tick().await;
                let elapsed = started.elapsed().as_secs_f64();
                let percent = if estimated_seconds > 0.0 {
                    (elapsed / estimated_seconds * 100.0).min(TICKER_CAP_PERCENT)
                } else {
                    TICKER_CAP_PERCENT
                };
                progress
                    .stage_update(stage, status, percent, message.clone(), estimated_seconds, elapsed)
                    .await;
            }
        });
        Self { handle }
    }

    /// Stop the ticker; no further updates are emitted after this returns.
    pub fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Linear time estimate, biased high.
#[must_use]
pub fn linear_estimate(base_seconds: f64, coeff: f64, input_size: u64) -> f64 {
    base_seconds + coeff * input_size as f64
}
