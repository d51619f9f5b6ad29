//! Media probing and audio extraction via external tools
//!
//! Both operations shell out to ffmpeg binaries located once at startup.
//! Subprocess work is awaitable through `tokio::process`.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use camino::Utf8Path;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::debug;

/// Media boundary: duration probe plus audio extraction, mockable in tests.
#[async_trait]
pub trait MediaTools: Send + Sync {
    /// Duration of the media file in seconds.
    async fn duration_seconds(&self, path: &Utf8Path) -> Result<f64>;

    /// Extract the audio track into `dest` (mp3).
    async fn extract_audio(&self, src: &Utf8Path, dest: &Utf8Path) -> Result<()>;
}

pub struct FfmpegTools {
    ffprobe: PathBuf,
    ffmpeg: PathBuf,
}

impl FfmpegTools {
    /// Locate `ffprobe` and `ffmpeg` on PATH.
    pub fn discover() -> Result<Self> {
        let ffprobe = which::which("ffprobe").context("ffprobe not found on PATH")?;
        let ffmpeg = which::which("ffmpeg").context("ffmpeg not found on PATH")?;
        Ok(Self { ffprobe, ffmpeg })
    }
}

#[async_trait]
impl MediaTools for FfmpegTools {
    async fn duration_seconds(&self, path: &Utf8Path) -> Result<f64> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path.as_str())
            .output()
            .await
            .with_context(|| format!("failed to run ffprobe for {path}"))?;

        if !output.status.success() {
            bail!(
                "ffprobe failed for {path}: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let raw = String::from_utf8_lossy(&output.stdout);
        let duration: f64 = raw
            .trim()
            .parse()
            .with_context(|| format!("ffprobe returned non-numeric duration: '{}'", raw.trim()))?;

        debug!(%path, duration, "probed media duration");
        Ok(duration)
    }

    async fn extract_audio(&self, src: &Utf8Path, dest: &Utf8Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {parent}"))?;
        }

        let output = Command::new(&self.ffmpeg)
            .args(["-y", "-i"])
            .arg(src.as_str())
            .args(["-vn", "-acodec", "libmp3lame", "-q:a", "4"])
            .arg(dest.as_str())
            .output()
            .await
            .with_context(|| format!("failed to run ffmpeg for {src}"))?;

        if !output.status.success() {
            bail!(
                "ffmpeg audio extraction failed for {src}: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        debug!(%src, %dest, "extracted audio track");
        Ok(())
    }
}
