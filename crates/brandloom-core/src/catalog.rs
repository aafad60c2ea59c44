//! Skill catalog: static definitions merged from ordered sources.
//!
//! A skill is one unit of work with declared dependencies and declared
//! output fields. Definitions come from TOML manifest files (and
//! in-memory lists for embedding); sources are applied in order and a
//! later source's definition for the same id fully replaces an earlier
//! one. The catalog is immutable once loaded and is passed by reference
//! into the planner and coordinator; there is no ambient global.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

fn default_true() -> bool {
    true
}

/// Whether a skill is an external-executor text task or a
/// provider-backed generation task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillKind {
    Text,
    Asset,
}

/// One declared output field: where to read it in the skill's result
/// JSON and where to write it in the brand document. Both are
/// dot-separated paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputField {
    pub source: String,
    pub target: String,
    #[serde(default = "default_true")]
    pub required: bool,
}

/// Static definition of a skill. Identity is `id`; never mutated after
/// catalog load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub category: String,
    pub kind: SkillKind,
    /// Hint only; actual wave placement comes from dependency leveling.
    #[serde(default)]
    pub wave_hint: Option<u32>,
    /// Required upstream skill ids. A required dependency outside the
    /// selected set makes the plan unsatisfiable.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Dependencies that still order execution when selected, but are
    /// treated as satisfied when excluded from the selection.
    #[serde(default)]
    pub optional_depends_on: Vec<String>,
    /// Declared output fields hydrated into the brand document after a
    /// text skill completes.
    #[serde(default)]
    pub output_fields: Vec<OutputField>,
    /// Style/reference anchor: must complete before other asset skills
    /// in its wave are dispatched.
    #[serde(default)]
    pub anchor: bool,
    /// Target generation model for asset skills.
    #[serde(default)]
    pub model: String,
    /// Variation seed; part of the cache key.
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub size_hint: Option<String>,
    /// Estimated USD cost per dispatch. Missing estimates fall back to a
    /// ledger default so spend is never silently dropped.
    #[serde(default)]
    pub estimated_cost: Option<f64>,
    #[serde(default)]
    pub description: String,
}

impl SkillDefinition {
    /// Display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// One ordered definition source for [`SkillCatalog::load`].
#[derive(Debug, Clone)]
pub enum CatalogSource {
    /// A TOML manifest file with `[[skill]]` tables.
    ManifestFile(PathBuf),
    /// Definitions supplied directly by the caller.
    Inline(Vec<SkillDefinition>),
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    skill: Vec<SkillDefinition>,
}

/// Mapping id → definition with stable declaration order. Lives for one
/// pipeline invocation.
#[derive(Debug, Default, Clone)]
pub struct SkillCatalog {
    skills: HashMap<String, SkillDefinition>,
    /// First-seen declaration order. A later source replacing an id
    /// keeps the id's original position so in-wave dispatch order is
    /// stable across overrides.
    order: Vec<String>,
}

impl SkillCatalog {
    /// Build a catalog from ordered sources, later sources overriding
    /// earlier ones by id (full replacement, no field merge). An empty
    /// source list yields an empty catalog. Fails only when a source
    /// cannot be read or parsed.
    pub fn load(sources: &[CatalogSource]) -> Result<Self, PipelineError> {
        let mut catalog = Self::default();
        for source in sources {
            match source {
                CatalogSource::ManifestFile(path) => {
                    let text = std::fs::read_to_string(path).map_err(|e| {
                        PipelineError::CatalogSource {
                            path: path.display().to_string(),
                            reason: e.to_string(),
                        }
                    })?;
                    let manifest: Manifest =
                        toml::from_str(&text).map_err(|e| PipelineError::CatalogSource {
                            path: path.display().to_string(),
                            reason: e.to_string(),
                        })?;
                    for def in manifest.skill {
                        catalog.insert(def);
                    }
                }
                CatalogSource::Inline(defs) => {
                    for def in defs {
                        catalog.insert(def.clone());
                    }
                }
            }
        }
        tracing::debug!(
            target: "brandloom::catalog",
            skills = catalog.len(),
            sources = sources.len(),
            "catalog loaded"
        );
        Ok(catalog)
    }

    fn insert(&mut self, def: SkillDefinition) {
        if !self.skills.contains_key(&def.id) {
            self.order.push(def.id.clone());
        }
        self.skills.insert(def.id.clone(), def);
    }

    pub fn get(&self, id: &str) -> Option<&SkillDefinition> {
        self.skills.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.skills.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    /// Ids in declaration order.
    pub fn ordered_ids(&self) -> &[String] {
        &self.order
    }

    /// Definitions in declaration order.
    pub fn iter_ordered(&self) -> impl Iterator<Item = &SkillDefinition> {
        self.order.iter().filter_map(|id| self.skills.get(id))
    }

    /// Stable position of an id in declaration order; unknown ids sort last.
    pub(crate) fn position(&self, id: &str) -> usize {
        self.order
            .iter()
            .position(|o| o == id)
            .unwrap_or(usize::MAX)
    }
}
