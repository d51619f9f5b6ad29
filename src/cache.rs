//! Versioned per-stage result cache
//!
//! Copy-on-write log under the archive directory: version files are never
//! mutated, a new `v<N+1>.json` is appended and the manifest pointer flips.
//!
//! ```text
//! <archive>/.cache/
//!   manifest.json
//!   <stage>/v<N>.json
//! ```
//!
//! The manifest is the sole source of truth for "current". Writers on the
//! same archive serialize through an advisory file lock held around manifest
//! updates. Version files carry the stage result as canonical camelCase
//! JSON; the manifest itself keeps snake_case keys.

use crate::atomic_write::{write_file_atomic, write_json_canonical};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use fd_lock::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use thiserror::Error;
use tracing::debug;

const CACHE_DIR: &str = ".cache";
const MANIFEST_FILE: &str = "manifest.json";
const LOCK_FILE: &str = ".lock";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("stage '{stage}' has no version {version}")]
    VersionNotFound { stage: String, version: u32 },

    #[error("cache manifest is corrupted: {reason}")]
    CorruptManifest { reason: String },

    #[error("failed to acquire cache lock: {0}")]
    Lock(String),

    #[error("cache serialization failed: {0}")]
    Serialization(String),

    #[error("cache IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CacheError> for crate::error::StageError {
    fn from(err: CacheError) -> Self {
        crate::error::StageError::cache(err.to_string()).with_source(err)
    }
}

/// One recorded version of a stage result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub version: u32,
    pub model_name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub prompt_overrides: BTreeMap<String, String>,
}

/// Per-stage version list plus the current pointer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageVersions {
    pub current_version: u32,
    pub versions: Vec<CacheEntry>,
}

/// On-disk manifest naming the current version of every cached stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheManifest {
    #[serde(default)]
    pub stages: BTreeMap<String, StageVersions>,
}

/// Handle over one archive's cache directory.
pub struct StageCache {
    root: Utf8PathBuf,
}

impl StageCache {
    #[must_use]
    pub fn new(archive: &Utf8Path) -> Self {
        Self {
            root: archive.join(CACHE_DIR),
        }
    }

    fn manifest_path(&self) -> Utf8PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    fn version_path(&self, stage: &str, version: u32) -> Utf8PathBuf {
        self.root.join(stage).join(format!("v{version}.json"))
    }

    /// Acquire the per-archive advisory lock. Held for the duration of a
    /// manifest update; released on drop, on every exit path.
    fn lock_file(&self) -> Result<RwLock<std::fs::File>, CacheError> {
        std::fs::create_dir_all(&self.root)?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.root.join(LOCK_FILE))?;
        Ok(RwLock::new(file))
    }

    fn read_manifest(&self) -> Result<CacheManifest, CacheError> {
        let path = self.manifest_path();
        if !path.exists() {
            return Ok(CacheManifest::default());
        }
        let raw = std::fs::read_to_string(&path)?;
        serde_json::from_str(&raw).map_err(|e| CacheError::CorruptManifest {
            reason: e.to_string(),
        })
    }

    fn write_manifest(&self, manifest: &CacheManifest) -> Result<(), CacheError> {
        let json = serde_json::to_string_pretty(manifest)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;
        write_file_atomic(&self.manifest_path(), &json)
            .map_err(|e| CacheError::Serialization(e.to_string()))
    }

    /// Append a new version of a stage result and flip the current pointer.
    ///
    /// # Errors
    ///
    /// Serialization, lock, or IO failures; the version file and manifest
    /// are each written atomically, so an interruption leaves the previous
    /// state intact.
    pub fn save(
        &self,
        stage: &str,
        result: &serde_json::Value,
        model_name: &str,
        prompt_overrides: &BTreeMap<String, String>,
    ) -> Result<CacheEntry, CacheError> {
        let mut lock = self.lock_file()?;
        let _guard = lock
            .write()
            .map_err(|e| CacheError::Lock(e.to_string()))?;

        let mut manifest = self.read_manifest()?;
        let next_version = manifest
            .stages
            .get(stage)
            .and_then(|s| s.versions.iter().map(|v| v.version).max())
            .unwrap_or(0)
            + 1;

        write_json_canonical(&self.version_path(stage, next_version), result)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;

        let entry = CacheEntry {
            version: next_version,
            model_name: model_name.to_string(),
            created_at: Utc::now(),
            prompt_overrides: prompt_overrides.clone(),
        };

        let stage_versions = manifest
            .stages
            .entry(stage.to_string())
            .or_insert_with(|| StageVersions {
                current_version: next_version,
                versions: Vec::new(),
            });
        stage_versions.versions.push(entry.clone());
        stage_versions.current_version = next_version;

        self.write_manifest(&manifest)?;
        debug!(stage, version = next_version, "cache entry written");
        Ok(entry)
    }

    /// Load the referenced (or current) version of a stage result.
    ///
    /// Returns `None` when the stage has no versions at all.
    ///
    /// # Errors
    ///
    /// `VersionNotFound` for an explicit version the manifest doesn't know,
    /// `CorruptManifest` when the pointed-to file is missing or unreadable.
    pub fn load(
        &self,
        stage: &str,
        version: Option<u32>,
    ) -> Result<Option<serde_json::Value>, CacheError> {
        let manifest = self.read_manifest()?;
        let Some(stage_versions) = manifest.stages.get(stage) else {
            return Ok(None);
        };

        let version = match version {
            Some(v) => {
                if !stage_versions.versions.iter().any(|e| e.version == v) {
                    return Err(CacheError::VersionNotFound {
                        stage: stage.to_string(),
                        version: v,
                    });
                }
                v
            }
            None => stage_versions.current_version,
        };

        let path = self.version_path(stage, version);
        let raw = std::fs::read_to_string(&path).map_err(|e| CacheError::CorruptManifest {
            reason: format!("version file {path} unreadable: {e}"),
        })?;
        let value = serde_json::from_str(&raw).map_err(|e| CacheError::CorruptManifest {
            reason: format!("version file {path} is not valid JSON: {e}"),
        })?;
        Ok(Some(value))
    }

    /// Flip the current pointer to an existing version.
    ///
    /// # Errors
    ///
    /// `VersionNotFound` when the stage or version does not exist.
    pub fn set_current(&self, stage: &str, version: u32) -> Result<(), CacheError> {
        let mut lock = self.lock_file()?;
        let _guard = lock
            .write()
            .map_err(|e| CacheError::Lock(e.to_string()))?;

        let mut manifest = self.read_manifest()?;
        let stage_versions =
            manifest
                .stages
                .get_mut(stage)
                .ok_or_else(|| CacheError::VersionNotFound {
                    stage: stage.to_string(),
                    version,
                })?;
        if !stage_versions.versions.iter().any(|e| e.version == version) {
            return Err(CacheError::VersionNotFound {
                stage: stage.to_string(),
                version,
            });
        }
        stage_versions.current_version = version;
        self.write_manifest(&manifest)?;
        debug!(stage, version, "cache current pointer updated");
        Ok(())
    }

    /// The manifest with all versions and metadata.
    ///
    /// # Errors
    ///
    /// `CorruptManifest` when the manifest exists but cannot be parsed.
    pub fn list(&self) -> Result<CacheManifest, CacheError> {
        self.read_manifest()
    }
}
