//! Scenario profiles: named execution presets mapped to skill subsets.
//!
//! A scenario pairs a budget tier with an ordered skill list and
//! per-skill context overrides. Depth truncates the list monotonically:
//! a deeper setting always selects a superset of a shallower one for
//! the same scenario.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Execution depth, shallowest to deepest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Depth {
    Surface,
    Focused,
    Comprehensive,
    Exhaustive,
}

impl Depth {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "surface" => Some(Self::Surface),
            "focused" => Some(Self::Focused),
            "comprehensive" => Some(Self::Comprehensive),
            "exhaustive" => Some(Self::Exhaustive),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Surface => "surface",
            Self::Focused => "focused",
            Self::Comprehensive => "comprehensive",
            Self::Exhaustive => "exhaustive",
        }
    }
}

/// Read-only scenario definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioProfile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub budget_tier: String,
    pub default_depth: Depth,
    /// Ordered skill ids; depth selects a prefix of this list.
    pub skill_ids: Vec<String>,
    /// How many skills each depth includes. Missing depths include the
    /// full list. Raw values are normalized so deeper never selects
    /// fewer skills than shallower.
    #[serde(default)]
    pub depth_limits: BTreeMap<Depth, usize>,
    /// Per-skill context overrides threaded into task descriptions.
    #[serde(default)]
    pub context_overrides: HashMap<String, String>,
}

impl ScenarioProfile {
    /// Skill prefix length for `depth`, monotone in depth.
    fn limit_for(&self, depth: Depth) -> usize {
        if self.depth_limits.is_empty() {
            return self.skill_ids.len();
        }
        // Strictly deeper than every configured cutoff: the full list.
        if self.depth_limits.keys().all(|d| *d < depth) {
            return self.skill_ids.len();
        }
        // Otherwise the widest cutoff at or below this depth; a depth
        // shallower than every cutoff clamps to the shallowest one.
        let limit = self
            .depth_limits
            .range(..=depth)
            .map(|(_, n)| *n)
            .max()
            .or_else(|| self.depth_limits.values().next().copied())
            .unwrap_or(self.skill_ids.len());
        limit.min(self.skill_ids.len())
    }
}

/// What a resolved scenario hands the planner and coordinator.
#[derive(Debug, Clone)]
pub struct ScenarioSelection {
    pub scenario_id: String,
    pub depth: Depth,
    pub skill_ids: Vec<String>,
    pub context_overrides: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ScenarioManifest {
    #[serde(default)]
    scenario: Vec<ScenarioProfile>,
}

/// Lookup table of scenario profiles.
#[derive(Debug, Default)]
pub struct ScenarioBook {
    profiles: HashMap<String, ScenarioProfile>,
}

impl ScenarioBook {
    /// Shipped scenario catalog. Manifest files merged on top override
    /// these by id.
    pub fn builtin() -> Self {
        fn ids(names: &[&str]) -> Vec<String> {
            names.iter().map(|s| s.to_string()).collect()
        }
        Self::new(vec![
            ScenarioProfile {
                id: "brand-genesis".to_string(),
                name: "Brand Genesis (Lean)".to_string(),
                budget_tier: "bootstrapped".to_string(),
                default_depth: Depth::Focused,
                skill_ids: ids(&[
                    "niche-validator",
                    "competitor-analysis",
                    "brand-name-studio",
                    "buyer-persona",
                    "product-positioning-summary",
                    "voice-and-tone",
                    "visual-identity-core",
                ]),
                depth_limits: BTreeMap::from([
                    (Depth::Surface, 2),
                    (Depth::Focused, 5),
                ]),
                context_overrides: HashMap::new(),
            },
            ScenarioProfile {
                id: "crowdfunding-lean".to_string(),
                name: "Crowdfunding Lean".to_string(),
                budget_tier: "lean".to_string(),
                default_depth: Depth::Comprehensive,
                skill_ids: ids(&[
                    "buyer-persona",
                    "competitor-analysis",
                    "product-positioning-summary",
                    "voice-and-tone",
                    "campaign-page-copy",
                    "style-anchor",
                    "hero-image",
                    "campaign-gallery",
                ]),
                depth_limits: BTreeMap::from([
                    (Depth::Surface, 3),
                    (Depth::Focused, 5),
                ]),
                context_overrides: HashMap::new(),
            },
            ScenarioProfile {
                id: "bootstrapped-dtc".to_string(),
                name: "Bootstrapped DTC".to_string(),
                budget_tier: "bootstrapped".to_string(),
                default_depth: Depth::Focused,
                skill_ids: ids(&[
                    "buyer-persona",
                    "product-positioning-summary",
                    "voice-and-tone",
                    "style-anchor",
                    "hero-image",
                ]),
                depth_limits: BTreeMap::from([(Depth::Surface, 2)]),
                context_overrides: HashMap::new(),
            },
        ])
    }

    pub fn new(profiles: Vec<ScenarioProfile>) -> Self {
        let mut book = Self::default();
        for p in profiles {
            book.profiles.insert(p.id.clone(), p);
        }
        book
    }

    /// Merge scenario definitions from a TOML manifest, later files
    /// overriding earlier profiles by id.
    pub fn merge_file(&mut self, path: &Path) -> Result<(), PipelineError> {
        let text =
            std::fs::read_to_string(path).map_err(|e| PipelineError::CatalogSource {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        let manifest: ScenarioManifest =
            toml::from_str(&text).map_err(|e| PipelineError::CatalogSource {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        for p in manifest.scenario {
            self.profiles.insert(p.id.clone(), p);
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&ScenarioProfile> {
        self.profiles.get(id)
    }

    /// Resolve a scenario id and depth string into a concrete skill
    /// subset. Unknown scenario is a hard failure; an unknown depth
    /// falls back to the scenario's default with a warning so a
    /// minimally specified invocation stays runnable.
    pub fn resolve(
        &self,
        scenario_id: &str,
        depth: Option<&str>,
    ) -> Result<ScenarioSelection, PipelineError> {
        let profile = self
            .profiles
            .get(scenario_id)
            .ok_or_else(|| PipelineError::UnknownScenario(scenario_id.to_string()))?;

        let depth = match depth {
            None => profile.default_depth,
            Some(raw) => match Depth::parse(raw) {
                Some(d) => d,
                None => {
                    tracing::warn!(
                        target: "brandloom::scenario",
                        scenario = scenario_id,
                        requested = raw,
                        fallback = profile.default_depth.as_str(),
                        "unknown depth, using scenario default"
                    );
                    profile.default_depth
                }
            },
        };

        let limit = profile.limit_for(depth);
        Ok(ScenarioSelection {
            scenario_id: profile.id.clone(),
            depth,
            skill_ids: profile.skill_ids[..limit].to_vec(),
            context_overrides: profile.context_overrides.clone(),
        })
    }
}
