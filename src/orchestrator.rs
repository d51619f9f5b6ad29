//! Pipeline orchestrator
//!
//! Runs a built pipeline over one input file: maintains the immutable
//! context, drives the per-stage ticker, writes cache entries on success,
//! and emits exactly one terminal event per job. A failing stage halts the
//! pipeline; previously cached results stay valid and Save never runs on
//! failure.

use crate::cache::{CacheEntry, StageCache};
use crate::config::{EventsCatalog, Settings};
use crate::error::{PipelineError, StageError};
use crate::glossary::Glossary;
use crate::progress::{JobProgress, ProgressSink, StageStatus, Ticker};
use crate::prompts::PromptCatalog;
use crate::registry::StageRegistry;
use crate::stage::{
    CancelToken, RunOverrides, Services, Stage, StageContext, StageOutput,
};
use crate::types::{PipelineResults, SlideInput};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// One unit of work: a single input file plus optional slides.
pub struct JobRequest {
    pub video_path: Utf8PathBuf,
    pub slides: Vec<SlideInput>,
    pub overrides: RunOverrides,
    pub cancel: CancelToken,
}

impl JobRequest {
    #[must_use]
    pub fn new(video_path: Utf8PathBuf) -> Self {
        Self {
            video_path,
            slides: Vec::new(),
            overrides: RunOverrides::default(),
            cancel: CancelToken::never(),
        }
    }
}

pub struct Orchestrator {
    registry: StageRegistry,
    settings: Arc<Settings>,
    services: Services,
    prompts: Arc<PromptCatalog>,
    glossary: Arc<Glossary>,
    events: Arc<EventsCatalog>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        registry: StageRegistry,
        settings: Arc<Settings>,
        services: Services,
        prompts: Arc<PromptCatalog>,
        glossary: Arc<Glossary>,
        events: Arc<EventsCatalog>,
    ) -> Self {
        Self {
            registry,
            settings,
            services,
            prompts,
            glossary,
            events,
        }
    }

    fn base_context(&self, job: &JobRequest) -> StageContext {
        StageContext::new(
            job.video_path.clone(),
            job.slides.clone(),
            self.settings.clone(),
            self.services.clone(),
            self.prompts.clone(),
            self.glossary.clone(),
            self.events.clone(),
            Arc::new(job.overrides.clone()),
        )
    }

    /// Run the default pipeline for one job, emitting progress through
    /// `sink` and finishing with exactly one terminal event.
    ///
    /// # Errors
    ///
    /// The failing stage plus cause. Already-written cache entries remain.
    pub async fn run(
        &self,
        job: JobRequest,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<PipelineResults, PipelineError> {
        let plan = self
            .registry
            .build_pipeline(&["save"])
            .map_err(|e| PipelineError::new("save", e))?;

        let planned_names: Vec<&str> = plan.iter().map(|s| s.name()).collect();
        let progress = Arc::new(JobProgress::new(sink, &planned_names));

        let result = self.run_plan(&job, &plan, &progress).await;
        match result {
            Ok(results) => {
                progress.finish(results.clone()).await;
                Ok(results)
            }
            Err(err) => {
                warn!(stage = %err.stage, kind = %err.kind(), "pipeline halted");
                progress.fail(err.to_string()).await;
                Err(err)
            }
        }
    }

    async fn run_plan(
        &self,
        job: &JobRequest,
        plan: &[Arc<dyn Stage>],
        progress: &Arc<JobProgress>,
    ) -> Result<PipelineResults, PipelineError> {
        let mut ctx = self.base_context(job);
        let mut final_results: Option<PipelineResults> = None;

        for stage in plan {
            let name = stage.name();

            if job.cancel.is_cancelled() {
                return Err(PipelineError::new(name, StageError::cancelled()));
            }

            if stage.should_skip(&ctx) {
                info!(stage = name, "stage skipped");
                progress.stage_skipped(name).await;
                continue;
            }

            let output = self
                .execute_stage(job, stage.as_ref(), &ctx, progress)
                .await
                .map_err(|e| PipelineError::new(name, e))?;

            // cache entry per successful stage, once the archive is known
            self.write_cache_entry(&ctx, name, &output)
                .map_err(|e| PipelineError::new(name, e))?;

            if let StageOutput::Saved(results) = &output {
                final_results = Some(results.clone());
            }
            ctx = ctx.with_result(name, output);
        }

        final_results.ok_or_else(|| {
            PipelineError::new(
                "save",
                StageError::configuration("pipeline finished without save results"),
            )
        })
    }

    async fn execute_stage(
        &self,
        job: &JobRequest,
        stage: &dyn Stage,
        ctx: &StageContext,
        progress: &Arc<JobProgress>,
    ) -> Result<StageOutput, StageError> {
        let name = stage.name();
        let input_size = stage.input_size(ctx);
        let estimate = stage.estimate_seconds(input_size);
        let started = Instant::now();

        info!(stage = name, estimate_secs = estimate, "stage started");

        let ticker = Ticker::start(
            progress.clone(),
            name,
            stage.status(),
            estimate,
            format!("{name} running"),
        );

        let result = tokio::select! {
            biased;
            () = job.cancel.cancelled() => Err(StageError::cancelled()),
            result = stage.execute(ctx) => result,
        };
        ticker.stop();

        let elapsed = started.elapsed().as_secs_f64();
        match result {
            Ok(output) => {
                progress
                    .stage_done(
                        name,
                        StageStatus::Completed,
                        format!("{name} completed"),
                        estimate,
                        elapsed,
                    )
                    .await;
                Ok(output)
            }
            Err(err) => Err(err),
        }
    }

    /// Write a cache entry for a completed stage. Parse's own entry lands
    /// right after parse computes the archive path; nothing is cached while
    /// the archive is still unknown.
    fn write_cache_entry(
        &self,
        ctx: &StageContext,
        stage_name: &str,
        output: &StageOutput,
    ) -> Result<(), StageError> {
        let archive = match (ctx.metadata(), output) {
            (Some(meta), _) => meta.archive_path.clone(),
            (None, StageOutput::Metadata(meta)) => meta.archive_path.clone(),
            (None, _) => return Ok(()),
        };

        let cache = StageCache::new(&archive);
        let value = output.to_cache_value()?;
        let model = ctx.effective_model(stage_name).unwrap_or_default();
        let overrides = ctx.overrides.prompts_for(stage_name);
        cache
            .save(stage_name, &value, &model, &overrides)
            .map_err(StageError::from)?;
        Ok(())
    }

    /// Replay a single stage from cache with a different model or prompt
    /// variant. Dependencies load from their current cached versions; the
    /// new result is appended as the next version. `pipeline_results.json`
    /// is not touched until a subsequent Save.
    ///
    /// # Errors
    ///
    /// `configuration` for unknown stages, `cache` when a dependency has no
    /// cached result, plus whatever the stage itself raises.
    pub async fn rerun_stage(
        &self,
        archive: &Utf8Path,
        stage_name: &str,
        model_override: Option<String>,
        prompt_overrides: BTreeMap<String, String>,
    ) -> Result<CacheEntry, PipelineError> {
        let wrap = |e: StageError| PipelineError::new(stage_name, e);

        let stage = self
            .registry
            .get(stage_name)
            .ok_or_else(|| wrap(StageError::configuration(format!("unknown stage '{stage_name}'"))))?
            .clone();

        let cache = StageCache::new(archive);

        // seed overrides for this one stage
        let mut overrides = RunOverrides::default();
        if let Some(model) = model_override {
            overrides.models.insert(stage_name.to_string(), model);
        }
        if !prompt_overrides.is_empty() {
            overrides
                .prompt_variants
                .insert(stage_name.to_string(), prompt_overrides.clone());
        }

        let job = JobRequest {
            video_path: Utf8PathBuf::new(),
            slides: Vec::new(),
            overrides,
            cancel: CancelToken::never(),
        };
        let mut ctx = self.base_context(&job);

        // hydrate the transitive dependency closure from cache, in order
        let plan = self
            .registry
            .build_pipeline(&[stage_name])
            .map_err(wrap)?;
        for dep in plan.iter().filter(|s| s.name() != stage_name) {
            let Some(value) = cache.load(dep.name(), None).map_err(|e| wrap(e.into()))? else {
                // skipped branch stages legitimately have no cache entry
                continue;
            };
            let output = StageOutput::from_cache_value(dep.name(), value).map_err(wrap)?;
            ctx = ctx.with_result(dep.name(), output);
        }

        let source_path = ctx.metadata().map(|m| m.source_path.clone());
        if let Some(source_path) = source_path {
            ctx.video_path = source_path;
        }

        info!(stage = stage_name, %archive, "replaying stage from cache");
        let output = stage.execute(&ctx).await.map_err(wrap)?;

        let value = output.to_cache_value().map_err(wrap)?;
        let model = ctx.effective_model(stage_name).unwrap_or_default();
        let entry = cache
            .save(stage_name, &value, &model, &prompt_overrides)
            .map_err(|e| wrap(e.into()))?;
        Ok(entry)
    }
}

impl Orchestrator {
    /// Run the slides stage out-of-band for a completed job and cache its
    /// result. Longread/story re-runs pick it up from the cache.
    ///
    /// # Errors
    ///
    /// `configuration` for empty input or vision-incapable models, plus
    /// whatever the stage raises.
    pub async fn rerun_slides(
        &self,
        archive: &Utf8Path,
        slides: Vec<SlideInput>,
    ) -> Result<CacheEntry, PipelineError> {
        let wrap = |e: StageError| PipelineError::new("slides", e);

        let stage = self
            .registry
            .get("slides")
            .ok_or_else(|| wrap(StageError::configuration("slides stage is not registered")))?
            .clone();

        let cache = StageCache::new(archive);
        let mut job = JobRequest::new(Utf8PathBuf::new());
        job.slides = slides;
        let mut ctx = self.base_context(&job);

        // metadata gives the vision prompts event context when available
        if let Some(value) = cache.load("parse", None).map_err(|e| wrap(e.into()))? {
            let output = StageOutput::from_cache_value("parse", value).map_err(wrap)?;
            ctx = ctx.with_result("parse", output);
        }

        let output = stage.execute(&ctx).await.map_err(wrap)?;
        let value = output.to_cache_value().map_err(wrap)?;
        let model = ctx.effective_model("slides").unwrap_or_default();
        cache
            .save("slides", &value, &model, &BTreeMap::new())
            .map_err(|e| wrap(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::test_support::CollectingSink;
    use crate::progress::PipelineEvent;
    use crate::registry::StageRegistry;
    use async_trait::async_trait;

    struct StubStage {
        name: &'static str,
        deps: &'static [&'static str],
        fail: bool,
    }

    #[async_trait]
    impl Stage for StubStage {
        fn name(&self) -> &'static str {
            self.name
        }
        fn depends_on(&self) -> &'static [&'static str] {
            self.deps
        }
        fn status(&self) -> StageStatus {
            StageStatus::Parsing
        }
        fn input_size(&self, _ctx: &StageContext) -> u64 {
            1
        }
        fn estimate_seconds(&self, _input_size: u64) -> f64 {
            1.0
        }
        async fn execute(&self, _ctx: &StageContext) -> Result<StageOutput, StageError> {
            if self.fail {
                Err(StageError::schema("stub failure"))
            } else {
                // metadata output keeps the cache-entry path simple
                Err(StageError::configuration("stub stages produce no output"))
            }
        }
    }

    #[test]
    fn test_job_request_defaults() {
        let job = JobRequest::new(Utf8PathBuf::from("inbox/a.mp4"));
        assert!(job.slides.is_empty());
        assert!(!job.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_job_emits_error_event() {
        let mut registry = StageRegistry::new();
        registry.register(Arc::new(StubStage {
            name: "save",
            deps: &[],
            fail: false,
        }));

        let settings = Arc::new(crate::testutil::settings());
        let services = crate::stage::Services {
            llm: Arc::new(crate::testutil::RejectAllRouter),
            transcriber: Arc::new(crate::testutil::PanicTranscriber),
            media: Arc::new(crate::testutil::FixedDurationMedia { duration: 1.0 }),
            pdf: Arc::new(crate::testutil::NoPdf),
        };
        let orchestrator = Orchestrator::new(
            registry,
            settings,
            services,
            Arc::new(PromptCatalog::default()),
            Arc::new(Glossary::default()),
            Arc::new(EventsCatalog::default()),
        );

        let (handle, cancel) = crate::stage::cancel_pair();
        handle.cancel();
        let job = JobRequest {
            video_path: Utf8PathBuf::from("inbox/a.mp4"),
            slides: Vec::new(),
            overrides: RunOverrides::default(),
            cancel,
        };
        let sink = Arc::new(CollectingSink::default());
        let err = orchestrator.run(job, sink.clone()).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Cancelled);

        let events = sink.events.lock().unwrap();
        let terminal: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, PipelineEvent::Error { .. } | PipelineEvent::Result { .. }))
            .collect();
        assert_eq!(terminal.len(), 1, "exactly one terminal event");
    }
}
