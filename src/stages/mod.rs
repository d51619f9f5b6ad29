//! Concrete stage implementations
//!
//! Each stage is a thin adapter: it reads prior results from the context,
//! calls an external service or a deterministic utility, and returns a typed
//! output. The default dependency graph:
//!
//! ```text
//! parse → transcribe → clean ─┬─ (educational) → longread → summarize ─┐
//!                             │                                        → chunk → save
//!                             └─ (leadership)  → story ────────────────┘
//! ```
//!
//! `slides` is registered as optional and invoked out-of-band; its result is
//! injected into the context before longread/story when supplied.

mod chunk;
mod clean;
mod longread;
mod parse;
mod save;
mod slides;
mod story;
mod summarize;
mod transcribe;

pub use chunk::ChunkStage;
pub use clean::CleanStage;
pub use longread::LongreadStage;
pub use parse::ParseStage;
pub use save::SaveStage;
pub use slides::SlidesStage;
pub use story::StoryStage;
pub use summarize::SummarizeStage;
pub use transcribe::TranscribeStage;

use crate::registry::StageRegistry;
use std::sync::Arc;

/// Registry with the default stage set in declaration order.
#[must_use]
pub fn default_registry() -> StageRegistry {
    let mut registry = StageRegistry::new();
    registry.register(Arc::new(ParseStage));
    registry.register(Arc::new(TranscribeStage));
    registry.register(Arc::new(CleanStage));
    registry.register(Arc::new(SlidesStage));
    registry.register(Arc::new(LongreadStage));
    registry.register(Arc::new(SummarizeStage));
    registry.register(Arc::new(StoryStage));
    registry.register(Arc::new(ChunkStage));
    registry.register(Arc::new(SaveStage));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pipeline_order() {
        let registry = default_registry();
        let order = registry.build_pipeline(&["save"]).unwrap();
        let names: Vec<&str> = order.iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec![
                "parse",
                "transcribe",
                "clean",
                "longread",
                "summarize",
                "story",
                "chunk",
                "save"
            ]
        );
        // slides is optional and nothing depends on it
        assert!(!names.contains(&"slides"));
    }

    #[test]
    fn test_slides_stage_is_optional() {
        let registry = default_registry();
        assert!(registry.get("slides").unwrap().optional());
        assert!(!registry.get("clean").unwrap().optional());
    }
}
