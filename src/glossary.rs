//! Glossary replacement engine (phase A of Clean)
//!
//! `glossary.yaml` maps canonical forms to their observed variations. The
//! engine applies variations longest-first so an overlapping shorter key can
//! never clobber part of a longer match; matching is case-insensitive with
//! Unicode word boundaries.

use anyhow::{Context, Result};
use camino::Utf8Path;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::warn;

#[derive(Debug, Deserialize)]
struct GlossaryFile {
    #[serde(default)]
    terms: BTreeMap<String, Vec<String>>,
}

#[derive(Debug)]
struct GlossaryRule {
    pattern: Regex,
    variation: String,
    canonical: String,
}

/// Compiled replacement set, ordered longest variation first.
#[derive(Debug, Default)]
pub struct Glossary {
    rules: Vec<GlossaryRule>,
}

impl Glossary {
    /// Load from `<config_dir>/glossary.yaml`; a missing file yields an
    /// empty glossary with a warning.
    pub fn load(config_dir: &Utf8Path) -> Result<Self> {
        let path = config_dir.join("glossary.yaml");
        if !path.exists() {
            warn!(%path, "glossary.yaml not found, phase A of clean is a no-op");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read glossary: {path}"))?;
        Self::from_yaml(&raw)
    }

    /// Compile from YAML text.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed YAML or a variation that fails to
    /// compile as a word-bounded pattern.
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let file: GlossaryFile = serde_yaml::from_str(raw).context("malformed glossary.yaml")?;

        let mut pairs: Vec<(String, String)> = Vec::new();
        for (canonical, variations) in file.terms {
            for variation in variations {
                pairs.push((variation, canonical.clone()));
            }
        }
        // Longest-first avoids partial overlap between variations.
        pairs.sort_by(|a, b| {
            b.0.chars()
                .count()
                .cmp(&a.0.chars().count())
                .then_with(|| a.0.cmp(&b.0))
        });

        let mut rules = Vec::with_capacity(pairs.len());
        for (variation, canonical) in pairs {
            let pattern = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(&variation)))
                .with_context(|| format!("glossary variation does not compile: '{variation}'"))?;
            rules.push(GlossaryRule {
                pattern,
                variation,
                canonical,
            });
        }
        Ok(Self { rules })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Apply all rules, recording one `"from→to"` entry per replacement
    /// occurrence, in rule order.
    #[must_use]
    pub fn apply(&self, text: &str) -> (String, Vec<String>) {
        let mut out = text.to_string();
        let mut corrections = Vec::new();
        for rule in &self.rules {
            let count = rule.pattern.find_iter(&out).count();
            if count == 0 {
                continue;
            }
            out = rule
                .pattern
                .replace_all(&out, rule.canonical.as_str())
                .into_owned();
            for _ in 0..count {
                corrections.push(format!("{}→{}", rule.variation, rule.canonical));
            }
        }
        (out, corrections)
    }
}
