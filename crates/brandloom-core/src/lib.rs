//! brandloom-core: wave-orchestrated brand artifact pipeline.
//!
//! Loads a skill catalog, resolves a scenario into a skill selection,
//! levels the selection into dependency waves, and drives each wave
//! through an execution coordinator that hands text skills to an
//! external executor and asset skills to a generation provider behind
//! a content-addressable cache and a budget ledger. Runs persist their
//! state after every transition and can be resumed.

mod cache;
mod catalog;
mod clock;
mod config;
mod error;
mod executor;
mod fsutil;
mod hydrator;
mod ledger;
mod planner;
mod provider;
mod report;
mod scenario;
mod state;

// Catalog and planning.
pub use catalog::{CatalogSource, OutputField, SkillCatalog, SkillDefinition, SkillKind};
pub use planner::{plan, WavePlan};
pub use scenario::{Depth, ScenarioBook, ScenarioProfile, ScenarioSelection};

// Execution.
pub use clock::{Clock, SystemClock};
pub use config::PipelineConfig;
pub use executor::{CancelToken, WaveExecutor};
pub use provider::{Artifact, AssetProvider, AssetRequest, HttpImageProvider, ProviderError};

// Artifacts and accounting.
pub use cache::{cache_key, AssetCache, CacheEntry, CacheKey};
pub use hydrator::{get_nested, set_nested, BrandDocument};
pub use ledger::{CostLedger, LedgerLine, DEFAULT_ASSET_COST};
pub use state::{SkillRecord, SkillStatus, StateStore};

// Outcomes.
pub use error::PipelineError;
pub use report::{RunOutcome, RunReport, SkillLine};
