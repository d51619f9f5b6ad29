//! Command-line surface
//!
//! `run` processes one file, `inbox` scans for candidates, `rerun` replays a
//! cached stage with a different model or prompt variant, `cache` inspects
//! and repoints the version store, `prompts` lists every variant the
//! resolver sees, `slides` extracts presentation content out-of-band.

use crate::cache::StageCache;
use crate::config::{EventsCatalog, Settings};
use crate::error::{PipelineError, StageError};
use crate::glossary::Glossary;
use crate::llm::DefaultLlmRouter;
use crate::media::FfmpegTools;
use crate::orchestrator::{JobRequest, Orchestrator};
use crate::paths::is_recognized_media;
use crate::pdf::PdftoppmRenderer;
use crate::progress::{ProgressSink, TracingSink};
use crate::prompts::PromptCatalog;
use crate::stage::Services;
use crate::stages::default_registry;
use crate::types::SlideInput;
use crate::whisper::WhisperClient;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "videokb", version, about = "Training video → knowledge base pipeline")]
pub struct Cli {
    /// Verbose logging (overridden by VIDEOKB_LOG)
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Process a single media file through the full pipeline
    Run {
        file: Utf8PathBuf,
        /// Slide files (images or PDFs) to extract alongside
        #[arg(long = "slide")]
        slides: Vec<Utf8PathBuf>,
    },
    /// Scan the inbox and list recognized candidate inputs
    Inbox,
    /// Replay one cached stage with a different model or prompt variant
    Rerun {
        /// Archive directory of a completed job
        archive: Utf8PathBuf,
        #[arg(long)]
        stage: String,
        #[arg(long)]
        model: Option<String>,
        /// Prompt variant override, `component=variant` (repeatable)
        #[arg(long = "prompt")]
        prompts: Vec<String>,
    },
    /// Inspect or repoint the per-stage result cache
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },
    /// List prompt components and variants with their origin
    Prompts,
    /// Extract slides out-of-band; the result is cached for longread/story
    Slides {
        /// Archive directory of a completed job
        archive: Utf8PathBuf,
        /// Slide files (images or PDFs)
        files: Vec<Utf8PathBuf>,
    },
}

#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// Print the manifest: versions and metadata per stage
    List { archive: Utf8PathBuf },
    /// Flip the current pointer of a stage to an existing version
    SetCurrent {
        archive: Utf8PathBuf,
        #[arg(long)]
        stage: String,
        #[arg(long)]
        version: u32,
    },
}

fn parse_prompt_overrides(raw: &[String]) -> Result<BTreeMap<String, String>, StageError> {
    let mut overrides = BTreeMap::new();
    for item in raw {
        let (component, variant) = item.split_once('=').ok_or_else(|| {
            StageError::configuration(format!(
                "prompt override '{item}' is not in component=variant form"
            ))
        })?;
        overrides.insert(component.trim().to_string(), variant.trim().to_string());
    }
    Ok(overrides)
}

fn load_slides(paths: &[Utf8PathBuf]) -> Result<Vec<SlideInput>, StageError> {
    let mut slides = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes = std::fs::read(path).map_err(|e| {
            StageError::configuration(format!("failed to read slide file {path}: {e}"))
        })?;
        let content_type = match path.extension().map(str::to_lowercase).as_deref() {
            Some("pdf") => "application/pdf".to_string(),
            Some("png") => "image/png".to_string(),
            Some("jpg" | "jpeg") => "image/jpeg".to_string(),
            Some("webp") => "image/webp".to_string(),
            other => {
                return Err(StageError::configuration(format!(
                    "unsupported slide file type '{}' for {path}",
                    other.unwrap_or("none")
                )));
            }
        };
        slides.push(SlideInput {
            filename: path.file_name().unwrap_or("slide").to_string(),
            content_type,
            data: BASE64.encode(bytes),
        });
    }
    Ok(slides)
}

fn build_services(settings: &Settings) -> Result<Services, StageError> {
    let router = DefaultLlmRouter::from_settings(settings).map_err(StageError::from)?;
    let transcriber =
        WhisperClient::new(settings.whisper_base_url.clone()).map_err(StageError::from)?;
    let media = FfmpegTools::discover()
        .map_err(|e| StageError::configuration(format!("media tools unavailable: {e}")))?;
    let pdf = PdftoppmRenderer::discover()
        .map_err(|e| StageError::configuration(format!("PDF renderer unavailable: {e}")))?;
    Ok(Services {
        llm: Arc::new(router),
        transcriber: Arc::new(transcriber),
        media: Arc::new(media),
        pdf: Arc::new(pdf),
    })
}

fn build_orchestrator(settings: Arc<Settings>) -> Result<Orchestrator, StageError> {
    let services = build_services(&settings)?;
    let prompts = Arc::new(PromptCatalog::new(settings.prompts_dir.clone()));
    let glossary = Arc::new(
        Glossary::load(&settings.config_dir)
            .map_err(|e| StageError::configuration(format!("glossary failed to load: {e}")))?,
    );
    let events = Arc::new(
        EventsCatalog::load(&settings.config_dir)
            .map_err(|e| StageError::configuration(format!("events catalog failed to load: {e}")))?,
    );
    Ok(Orchestrator::new(
        default_registry(),
        settings,
        services,
        prompts,
        glossary,
        events,
    ))
}

/// Run the parsed command to completion.
///
/// # Errors
///
/// `PipelineError` carrying the failing stage; the caller maps it to an
/// exit code.
pub async fn execute(cli: Cli) -> Result<(), PipelineError> {
    let wrap_config = |e: StageError| PipelineError::new("configuration", e);

    let settings = Arc::new(Settings::from_env().map_err(wrap_config)?);

    match cli.command {
        Command::Run { file, slides } => {
            let orchestrator = build_orchestrator(settings).map_err(wrap_config)?;
            let mut job = JobRequest::new(file);
            job.slides = load_slides(&slides).map_err(wrap_config)?;
            let sink: Arc<dyn ProgressSink> = Arc::new(TracingSink);
            let results = orchestrator.run(job, sink).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&results).unwrap_or_default()
            );
            Ok(())
        }
        Command::Inbox => {
            let entries = std::fs::read_dir(&settings.inbox_dir).map_err(|e| {
                wrap_config(StageError::configuration(format!(
                    "failed to read inbox {}: {e}",
                    settings.inbox_dir
                )))
            })?;
            let mut names: Vec<String> = entries
                .filter_map(Result::ok)
                .filter_map(|e| e.file_name().into_string().ok())
                .filter(|name| is_recognized_media(camino::Utf8Path::new(name)))
                .collect();
            names.sort();
            for name in names {
                println!("{name}");
            }
            Ok(())
        }
        Command::Rerun {
            archive,
            stage,
            model,
            prompts,
        } => {
            let orchestrator = build_orchestrator(settings).map_err(wrap_config)?;
            let overrides = parse_prompt_overrides(&prompts).map_err(wrap_config)?;
            let entry = orchestrator
                .rerun_stage(&archive, &stage, model, overrides)
                .await?;
            info!(stage = %stage, version = entry.version, "stage replayed");
            println!("{stage}: v{} is now current", entry.version);
            Ok(())
        }
        Command::Cache { command } => match command {
            CacheCommand::List { archive } => {
                let manifest = StageCache::new(&archive)
                    .list()
                    .map_err(|e| wrap_config(e.into()))?;
                println!(
                    "{}",
                    serde_json::to_string_pretty(&manifest).unwrap_or_default()
                );
                Ok(())
            }
            CacheCommand::SetCurrent {
                archive,
                stage,
                version,
            } => {
                StageCache::new(&archive)
                    .set_current(&stage, version)
                    .map_err(|e| wrap_config(e.into()))?;
                println!("{stage}: current is now v{version}");
                Ok(())
            }
        },
        Command::Prompts => {
            let catalog = PromptCatalog::new(settings.prompts_dir.clone());
            for variant in catalog.discover() {
                println!(
                    "{}/{} ({:?}, {:?})",
                    variant.stage, variant.name, variant.component, variant.origin
                );
            }
            Ok(())
        }
        Command::Slides { archive, files } => {
            let orchestrator = build_orchestrator(settings).map_err(wrap_config)?;
            let slides = load_slides(&files).map_err(wrap_config)?;
            if slides.is_empty() {
                return Err(wrap_config(StageError::configuration(
                    "no slide files supplied",
                )));
            }
            // out-of-band: run only the slides stage and cache its result
            let entry = orchestrator
                .rerun_slides(&archive, slides)
                .await?;
            println!("slides: v{} is now current", entry.version);
            Ok(())
        }
    }
}
