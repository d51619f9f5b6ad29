//! PDF rasterization via an external renderer
//!
//! One PNG per page, returned in page order. Used by the slides stage to
//! expand a PDF into logical slides before the vision calls.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::debug;

/// PDF boundary, mockable in tests.
#[async_trait]
pub trait PdfRenderer: Send + Sync {
    /// Render each page to PNG bytes, in page order.
    async fn render_pages(&self, pdf: &[u8]) -> Result<Vec<Vec<u8>>>;
}

pub struct PdftoppmRenderer {
    binary: PathBuf,
    dpi: u32,
}

impl PdftoppmRenderer {
    /// Locate `pdftoppm` on PATH.
    pub fn discover() -> Result<Self> {
        let binary = which::which("pdftoppm").context("pdftoppm not found on PATH")?;
        Ok(Self { binary, dpi: 150 })
    }
}

#[async_trait]
impl PdfRenderer for PdftoppmRenderer {
    async fn render_pages(&self, pdf: &[u8]) -> Result<Vec<Vec<u8>>> {
        let dir = tempfile::tempdir().context("failed to create temp dir for PDF rendering")?;
        let input = dir.path().join("input.pdf");
        tokio::fs::write(&input, pdf)
            .await
            .context("failed to write temp PDF")?;

        let prefix = dir.path().join("page");
        let output = Command::new(&self.binary)
            .args(["-png", "-r", &self.dpi.to_string()])
            .arg(&input)
            .arg(&prefix)
            .output()
            .await
            .context("failed to run pdftoppm")?;

        if !output.status.success() {
            bail!(
                "pdftoppm failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        // pdftoppm names pages page-1.png, page-2.png, ...; sort numerically
        let mut pages: Vec<(u32, PathBuf)> = std::fs::read_dir(dir.path())
            .context("failed to list rendered pages")?
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                let number: u32 = name
                    .strip_prefix("page-")?
                    .strip_suffix(".png")?
                    .parse()
                    .ok()?;
                Some((number, entry.path()))
            })
            .collect();
        pages.sort_by_key(|(number, _)| *number);

        let mut result = Vec::with_capacity(pages.len());
        for (_, path) in pages {
            result.push(
                tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("failed to read rendered page {}", path.display()))?,
            );
        }

        debug!(pages = result.len(), "rendered PDF pages");
        Ok(result)
    }
}
