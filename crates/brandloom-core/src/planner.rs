//! Wave planner: dependency leveling over a selected skill subset.
//!
//! A wave is the maximal set of not-yet-planned skills whose required
//! dependencies are all satisfied by prior waves. Waves partition the
//! selected set; within a wave, dispatch order follows the catalog's
//! declaration order. Wave members are mutually independent by
//! construction, so in-wave order matters only for dispatch, not
//! correctness.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::catalog::SkillCatalog;
use crate::error::PipelineError;

/// Ordered sequence of waves produced by [`plan`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WavePlan {
    pub waves: Vec<Vec<String>>,
}

impl WavePlan {
    pub fn len(&self) -> usize {
        self.waves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waves.is_empty()
    }

    /// All planned skill ids in wave order.
    pub fn skills(&self) -> impl Iterator<Item = &String> {
        self.waves.iter().flatten()
    }

    /// Index of the wave containing `id`, if planned.
    pub fn wave_of(&self, id: &str) -> Option<usize> {
        self.waves
            .iter()
            .position(|wave| wave.iter().any(|s| s == id))
    }
}

/// Compute the wave plan for `selected` against `catalog`.
///
/// Fails fast, before any dispatch could happen, on:
/// - a selected id with no catalog definition ([`PipelineError::UnknownSkill`]);
/// - a required dependency outside the selected set
///   ([`PipelineError::UnsatisfiableDependency`]); optional dependencies
///   outside the selection are treated as already satisfied;
/// - a dependency cycle ([`PipelineError::DependencyCycle`] naming every
///   skill left unresolved when no progress is possible).
pub fn plan(catalog: &SkillCatalog, selected: &[String]) -> Result<WavePlan, PipelineError> {
    let selected_set: HashSet<&str> = selected.iter().map(String::as_str).collect();

    // Validate membership and required dependencies up front, and build
    // the effective ordering edges: required deps, plus optional deps
    // that happen to be selected.
    let mut deps_of: HashMap<&str, Vec<&str>> = HashMap::with_capacity(selected_set.len());
    for id in selected {
        let def = catalog
            .get(id)
            .ok_or_else(|| PipelineError::UnknownSkill(id.clone()))?;
        for dep in &def.depends_on {
            if !selected_set.contains(dep.as_str()) {
                return Err(PipelineError::UnsatisfiableDependency {
                    skill: id.clone(),
                    missing: dep.clone(),
                });
            }
        }
        let effective: Vec<&str> = def
            .depends_on
            .iter()
            .map(String::as_str)
            .chain(
                def.optional_depends_on
                    .iter()
                    .map(String::as_str)
                    .filter(|d| selected_set.contains(*d)),
            )
            .collect();
        deps_of.insert(def.id.as_str(), effective);
    }

    // Unresolved ids in catalog declaration order, for deterministic output.
    let mut unresolved: Vec<&str> = {
        let mut ids: Vec<&str> = selected_set.iter().copied().collect();
        ids.sort_by_key(|id| catalog.position(id));
        ids
    };
    let mut resolved: HashSet<&str> = HashSet::new();
    let mut waves: Vec<Vec<String>> = Vec::new();

    while !unresolved.is_empty() {
        let (ready, blocked): (Vec<&str>, Vec<&str>) =
            unresolved.iter().copied().partition(|id| {
                deps_of
                    .get(id)
                    .map(|deps| deps.iter().all(|d| resolved.contains(d)))
                    .unwrap_or(true)
            });

        if ready.is_empty() {
            let mut ids: Vec<String> = blocked.iter().map(|s| s.to_string()).collect();
            ids.sort();
            return Err(PipelineError::DependencyCycle { ids });
        }

        for id in &ready {
            resolved.insert(*id);
        }
        waves.push(ready.iter().map(|s| s.to_string()).collect());
        unresolved = blocked;
    }

    tracing::debug!(
        target: "brandloom::planner",
        waves = waves.len(),
        skills = selected.len(),
        "wave plan computed"
    );
    Ok(WavePlan { waves })
}
