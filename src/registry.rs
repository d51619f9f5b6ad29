//! Stage registry and pipeline construction
//!
//! Holds stage definitions in declaration order and produces a total
//! execution order for a requested subset: the transitive closure of
//! dependencies, topologically sorted with Kahn's algorithm. Ties between
//! equal-rank nodes break by declaration order, so the plan is stable.

use crate::error::StageError;
use crate::stage::Stage;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Default)]
pub struct StageRegistry {
    stages: Vec<Arc<dyn Stage>>,
}

impl StageRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stage. Declaration order is the tie-break order for
    /// pipeline construction.
    pub fn register(&mut self, stage: Arc<dyn Stage>) {
        debug_assert!(
            self.get(stage.name()).is_none(),
            "duplicate stage '{}'",
            stage.name()
        );
        self.stages.push(stage);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Stage>> {
        self.stages.iter().find(|s| s.name() == name)
    }

    /// All registered stages in declaration order.
    #[must_use]
    pub fn stages(&self) -> &[Arc<dyn Stage>] {
        &self.stages
    }

    /// Expand `requested` to its transitive dependency closure.
    fn closure(&self, requested: &[&str]) -> Result<BTreeSet<String>, StageError> {
        let mut included: BTreeSet<String> = BTreeSet::new();
        let mut pending: Vec<String> = Vec::new();

        for name in requested {
            let stage = self.get(name).ok_or_else(|| {
                StageError::configuration(format!("unknown stage '{name}' requested"))
            })?;
            pending.push(stage.name().to_string());
        }

        while let Some(name) = pending.pop() {
            if !included.insert(name.clone()) {
                continue;
            }
            let stage = self.get(&name).ok_or_else(|| {
                StageError::configuration(format!("stage '{name}' depends on an unknown stage"))
            })?;
            for dep in stage.depends_on() {
                if self.get(dep).is_none() {
                    return Err(StageError::configuration(format!(
                        "stage '{name}' depends on unknown stage '{dep}'"
                    )));
                }
                pending.push((*dep).to_string());
            }
        }
        Ok(included)
    }

    /// Build a total execution order for the requested stage names.
    ///
    /// # Errors
    ///
    /// `configuration` for unknown stage names and for dependency cycles.
    pub fn build_pipeline(&self, requested: &[&str]) -> Result<Vec<Arc<dyn Stage>>, StageError> {
        let included = self.closure(requested)?;

        // in-degree over the included subgraph
        let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
        for stage in &self.stages {
            let name = stage.name();
            if !included.contains(name) {
                continue;
            }
            let degree = stage
                .depends_on()
                .iter()
                .filter(|dep| included.contains(**dep))
                .count();
            in_degree.insert(name, degree);
        }

        // Kahn's algorithm; each round scans declaration order so ties
        // resolve deterministically
        let mut order: Vec<Arc<dyn Stage>> = Vec::with_capacity(included.len());
        while order.len() < included.len() {
            let next = self.stages.iter().find(|stage| {
                in_degree
                    .get(stage.name())
                    .is_some_and(|degree| *degree == 0)
            });
            let Some(next) = next else {
                let stuck: Vec<&str> = in_degree
                    .iter()
                    .filter(|(_, d)| **d > 0)
                    .map(|(name, _)| *name)
                    .collect();
                return Err(StageError::configuration(format!(
                    "dependency cycle among stages: {}",
                    stuck.join(", ")
                )));
            };

            let name = next.name();
            order.push(next.clone());
            in_degree.remove(name);
            for stage in &self.stages {
                if !in_degree.contains_key(stage.name()) {
                    continue;
                }
                if stage.depends_on().contains(&name) {
                    if let Some(degree) = in_degree.get_mut(stage.name()) {
                        *degree -= 1;
                    }
                }
            }
        }

        Ok(order)
    }
}
