//! Prompt catalog and variant resolution
//!
//! Each LLM-backed stage owns a directory of markdown fragments named by
//! component (`system`, `user`, `instructions`, `template`). The default
//! fragment carries the component's name; variants append a suffix
//! (`system_v2`). Built-ins are embedded at compile time; an external
//! prompts root, when configured, supersedes built-ins with the same
//! relative path (`<stage>/<name>.md`).

use crate::error::StageError;
use camino::Utf8PathBuf;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// One fragment of a stage's prompt set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptComponent {
    System,
    User,
    Instructions,
    Template,
}

impl PromptComponent {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Instructions => "instructions",
            Self::Template => "template",
        }
    }

    /// Parse a component name from an override key.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "system" => Some(Self::System),
            "user" => Some(Self::User),
            "instructions" => Some(Self::Instructions),
            "template" => Some(Self::Template),
            _ => None,
        }
    }
}

/// Components each stage's prompt set consists of.
///
/// Clean and slides use a system/user pair; story and summarize use
/// system/instructions/template; longread uses all four (instructions drives
/// the outline map step, template the reduce step).
#[must_use]
pub fn components_for(stage: &str) -> &'static [PromptComponent] {
    use PromptComponent::{Instructions, System, Template, User};
    match stage {
        "clean" | "slides" => &[System, User],
        "longread" => &[System, User, Instructions, Template],
        "story" | "summarize" => &[System, Instructions, Template],
        _ => &[],
    }
}

/// Built-in fragments, embedded at compile time. `(stage, name, content)`.
const BUILTIN: &[(&str, &str, &str)] = &[
    ("clean", "system", include_str!("../prompts/clean/system.md")),
    (
        "clean",
        "system_v2",
        include_str!("../prompts/clean/system_v2.md"),
    ),
    ("clean", "user", include_str!("../prompts/clean/user.md")),
    (
        "slides",
        "system",
        include_str!("../prompts/slides/system.md"),
    ),
    ("slides", "user", include_str!("../prompts/slides/user.md")),
    (
        "longread",
        "system",
        include_str!("../prompts/longread/system.md"),
    ),
    (
        "longread",
        "user",
        include_str!("../prompts/longread/user.md"),
    ),
    (
        "longread",
        "instructions",
        include_str!("../prompts/longread/instructions.md"),
    ),
    (
        "longread",
        "template",
        include_str!("../prompts/longread/template.md"),
    ),
    ("story", "system", include_str!("../prompts/story/system.md")),
    (
        "story",
        "instructions",
        include_str!("../prompts/story/instructions.md"),
    ),
    (
        "story",
        "template",
        include_str!("../prompts/story/template.md"),
    ),
    (
        "summarize",
        "system",
        include_str!("../prompts/summarize/system.md"),
    ),
    (
        "summarize",
        "instructions",
        include_str!("../prompts/summarize/instructions.md"),
    ),
    (
        "summarize",
        "template",
        include_str!("../prompts/summarize/template.md"),
    ),
];

/// Where a resolved fragment came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptOrigin {
    Builtin,
    External,
}

/// One discovered variant, for `prompts list`.
#[derive(Debug, Clone, Serialize)]
pub struct PromptVariantInfo {
    pub stage: String,
    pub component: PromptComponent,
    pub name: String,
    pub origin: PromptOrigin,
}

/// Resolved fragments for one stage invocation.
#[derive(Debug, Clone, Default)]
pub struct PromptSet {
    pub system: String,
    pub user: Option<String>,
    pub instructions: Option<String>,
    pub template: Option<String>,
}

/// Catalog over built-in fragments and an optional external root.
#[derive(Debug, Clone, Default)]
pub struct PromptCatalog {
    external_root: Option<Utf8PathBuf>,
}

impl PromptCatalog {
    #[must_use]
    pub fn new(external_root: Option<Utf8PathBuf>) -> Self {
        Self { external_root }
    }

    fn builtin(stage: &str, name: &str) -> Option<&'static str> {
        BUILTIN
            .iter()
            .find(|(s, n, _)| *s == stage && *n == name)
            .map(|(_, _, content)| *content)
    }

    fn external(&self, stage: &str, name: &str) -> Option<String> {
        let root = self.external_root.as_ref()?;
        let path = root.join(stage).join(format!("{name}.md"));
        std::fs::read_to_string(path).ok()
    }

    /// Resolve one fragment: external root wins over built-ins.
    ///
    /// # Errors
    ///
    /// `configuration` when the variant name does not belong to the
    /// component, or no fragment with that name exists in either source.
    pub fn resolve(
        &self,
        stage: &str,
        component: PromptComponent,
        variant: Option<&str>,
    ) -> Result<String, StageError> {
        let name = variant.unwrap_or(component.as_str());
        if name != component.as_str() && !name.starts_with(&format!("{}_", component.as_str())) {
            return Err(StageError::configuration(format!(
                "prompt variant '{name}' does not belong to component '{}' of stage '{stage}'",
                component.as_str()
            )));
        }
        if let Some(text) = self.external(stage, name) {
            return Ok(text);
        }
        if let Some(text) = Self::builtin(stage, name) {
            return Ok(text.to_string());
        }
        Err(StageError::configuration(format!(
            "no prompt fragment '{name}' for stage '{stage}'"
        )))
    }

    /// Resolve the full prompt set for a stage, applying per-component
    /// variant overrides (`component -> variant_name`).
    ///
    /// # Errors
    ///
    /// `configuration` when an override names an unknown component for the
    /// stage, or a fragment cannot be resolved.
    pub fn prompt_set(
        &self,
        stage: &str,
        overrides: &BTreeMap<String, String>,
    ) -> Result<PromptSet, StageError> {
        let components = components_for(stage);
        if components.is_empty() {
            return Err(StageError::configuration(format!(
                "stage '{stage}' has no prompt contract"
            )));
        }
        for key in overrides.keys() {
            let component = PromptComponent::parse(key).ok_or_else(|| {
                StageError::configuration(format!("unknown prompt component '{key}'"))
            })?;
            if !components.contains(&component) {
                return Err(StageError::configuration(format!(
                    "stage '{stage}' has no '{key}' component"
                )));
            }
        }

        let mut set = PromptSet::default();
        for component in components {
            let variant = overrides.get(component.as_str()).map(String::as_str);
            let text = self.resolve(stage, *component, variant)?;
            match component {
                PromptComponent::System => set.system = text,
                PromptComponent::User => set.user = Some(text),
                PromptComponent::Instructions => set.instructions = Some(text),
                PromptComponent::Template => set.template = Some(text),
            }
        }
        Ok(set)
    }

    /// Enumerate every variant from both sources, merged by filename.
    #[must_use]
    pub fn discover(&self) -> Vec<PromptVariantInfo> {
        let mut seen: BTreeSet<(String, String)> = BTreeSet::new();
        let mut out = Vec::new();

        if let Some(root) = &self.external_root {
            for stage in STAGES_WITH_PROMPTS.iter().copied() {
                let dir = root.join(stage);
                let Ok(entries) = std::fs::read_dir(&dir) else {
                    continue;
                };
                let mut names: Vec<String> = entries
                    .filter_map(Result::ok)
                    .filter_map(|e| e.file_name().into_string().ok())
                    .filter_map(|f| f.strip_suffix(".md").map(ToString::to_string))
                    .collect();
                names.sort();
                for name in names {
                    if let Some(component) = component_of(stage, &name) {
                        seen.insert((stage.to_string(), name.clone()));
                        out.push(PromptVariantInfo {
                            stage: stage.to_string(),
                            component,
                            name,
                            origin: PromptOrigin::External,
                        });
                    }
                }
            }
        }

        for (stage, name, _) in BUILTIN {
            if seen.contains(&((*stage).to_string(), (*name).to_string())) {
                continue;
            }
            if let Some(component) = component_of(stage, name) {
                out.push(PromptVariantInfo {
                    stage: (*stage).to_string(),
                    component,
                    name: (*name).to_string(),
                    origin: PromptOrigin::Builtin,
                });
            }
        }

        out.sort_by(|a, b| (&a.stage, &a.name).cmp(&(&b.stage, &b.name)));
        out
    }
}

/// Stages that own prompt directories.
pub const STAGES_WITH_PROMPTS: &[&str] = &["clean", "slides", "longread", "story", "summarize"];

fn component_of(stage: &str, name: &str) -> Option<PromptComponent> {
    components_for(stage)
        .iter()
        .copied()
        .find(|c| name == c.as_str() || name.starts_with(&format!("{}_", c.as_str())))
}

/// Fill `{placeholder}` slots in a user template.
#[must_use]
pub fn render_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in values {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}
