//! Single-stage replay over the versioned cache (scenario: re-run Clean
//! with a different model)

mod common;

use common::{FixedTranscriber, ScriptedRouter, scripted_orchestrator, temp_root};
use std::collections::BTreeMap;
use std::sync::Arc;
use videokb::cache::StageCache;
use videokb::orchestrator::JobRequest;
use videokb::progress::{PipelineEvent, ProgressSink};

struct NullSink;

#[async_trait::async_trait]
impl ProgressSink for NullSink {
    async fn emit(&self, _event: PipelineEvent) {}
}

const EDUCATIONAL_FILE: &str = "2025.04.07 ПШ.SV Группа поддержки (Светлана Дмитрук).mp4";

#[tokio::test]
async fn test_rerun_clean_with_different_model() {
    let dir = tempfile::tempdir().unwrap();
    let root = temp_root(&dir);
    let orchestrator =
        scripted_orchestrator(&root, Arc::new(FixedTranscriber), Arc::new(ScriptedRouter));

    // complete a job first
    let job = JobRequest::new(root.join("inbox").join(EDUCATIONAL_FILE));
    orchestrator.run(job, Arc::new(NullSink)).await.unwrap();

    let archive = root.join("archive/2025/04.07 ПШ/Группа поддержки (Светлана Дмитрук)");
    let cache = StageCache::new(&archive);
    let before = cache.list().unwrap();
    assert_eq!(before.stages["clean"].current_version, 1);

    let v1_bytes = std::fs::read(archive.join(".cache/clean/v1.json")).unwrap();
    let results_bytes = std::fs::read(archive.join("pipeline_results.json")).unwrap();

    // replay clean with a different model
    let entry = orchestrator
        .rerun_stage(
            &archive,
            "clean",
            Some("claude-sonnet-4-5".to_string()),
            BTreeMap::new(),
        )
        .await
        .unwrap();
    assert_eq!(entry.version, 2);
    assert_eq!(entry.model_name, "claude-sonnet-4-5");

    // v2 created, pointer flipped, v1 untouched, results manifest unchanged
    let after = cache.list().unwrap();
    assert_eq!(after.stages["clean"].current_version, 2);
    assert!(archive.join(".cache/clean/v2.json").exists());
    assert_eq!(
        std::fs::read(archive.join(".cache/clean/v1.json")).unwrap(),
        v1_bytes
    );
    assert_eq!(
        std::fs::read(archive.join("pipeline_results.json")).unwrap(),
        results_bytes
    );
}

#[tokio::test]
async fn test_rerun_with_prompt_variant_recorded_in_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let root = temp_root(&dir);
    let orchestrator =
        scripted_orchestrator(&root, Arc::new(FixedTranscriber), Arc::new(ScriptedRouter));

    let job = JobRequest::new(root.join("inbox").join(EDUCATIONAL_FILE));
    orchestrator.run(job, Arc::new(NullSink)).await.unwrap();

    let archive = root.join("archive/2025/04.07 ПШ/Группа поддержки (Светлана Дмитрук)");
    let mut overrides = BTreeMap::new();
    overrides.insert("system".to_string(), "system_v2".to_string());

    let entry = orchestrator
        .rerun_stage(&archive, "clean", None, overrides)
        .await
        .unwrap();
    assert_eq!(entry.version, 2);
    assert_eq!(
        entry.prompt_overrides.get("system"),
        Some(&"system_v2".to_string())
    );

    let manifest = StageCache::new(&archive).list().unwrap();
    let versions = &manifest.stages["clean"].versions;
    assert_eq!(versions.len(), 2);
    assert!(versions[0].prompt_overrides.is_empty());
    assert_eq!(
        versions[1].prompt_overrides.get("system"),
        Some(&"system_v2".to_string())
    );
}

#[tokio::test]
async fn test_rerun_unknown_stage_is_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let root = temp_root(&dir);
    let orchestrator =
        scripted_orchestrator(&root, Arc::new(FixedTranscriber), Arc::new(ScriptedRouter));

    let err = orchestrator
        .rerun_stage(&root.join("archive/x"), "nonsense", None, BTreeMap::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), videokb::error::ErrorKind::Configuration);
}

#[tokio::test]
async fn test_rerun_unknown_prompt_variant_fails() {
    let dir = tempfile::tempdir().unwrap();
    let root = temp_root(&dir);
    let orchestrator =
        scripted_orchestrator(&root, Arc::new(FixedTranscriber), Arc::new(ScriptedRouter));

    let job = JobRequest::new(root.join("inbox").join(EDUCATIONAL_FILE));
    orchestrator.run(job, Arc::new(NullSink)).await.unwrap();

    let archive = root.join("archive/2025/04.07 ПШ/Группа поддержки (Светлана Дмитрук)");
    let mut overrides = BTreeMap::new();
    overrides.insert("system".to_string(), "system_v99".to_string());

    let err = orchestrator
        .rerun_stage(&archive, "clean", None, overrides)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), videokb::error::ErrorKind::Configuration);

    // no new version appeared
    let manifest = StageCache::new(&archive).list().unwrap();
    assert_eq!(manifest.stages["clean"].versions.len(), 1);
}
