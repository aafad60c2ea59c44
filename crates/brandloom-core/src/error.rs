//! Pipeline error taxonomy.
//!
//! One variant per failure kind so callers can branch without parsing
//! message text. Planning errors abort before any dispatch; budget and
//! cancellation errors abort a running pipeline; per-skill errors are
//! recorded against the skill and surface in the final report instead.

use thiserror::Error;

use crate::provider::ProviderError;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The planner made no progress with skills still unresolved.
    #[error("dependency cycle among skills: {}", .ids.join(", "))]
    DependencyCycle { ids: Vec<String> },

    /// A required dependency sits outside the selected skill set.
    #[error("skill '{skill}' depends on '{missing}', which is not in the selected set")]
    UnsatisfiableDependency { skill: String, missing: String },

    /// A selected skill id has no catalog definition.
    #[error("unknown skill: {0}")]
    UnknownSkill(String),

    #[error("unknown scenario: {0}")]
    UnknownScenario(String),

    /// A text skill's result file never appeared within the timeout.
    #[error("skill '{skill}' produced no result within {waited_secs}s")]
    SkillTimeout { skill: String, waited_secs: u64 },

    /// A result file appeared but stayed unparsable across polls.
    #[error("skill '{skill}' result is not valid JSON: {reason}")]
    SkillResultMalformed { skill: String, reason: String },

    /// Hydration found declared output fields missing from the result.
    #[error("skill '{skill}' output missing required fields: {}", .missing_fields.join(", "))]
    SkillOutputInvalid {
        skill: String,
        missing_fields: Vec<String>,
    },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Dispatching would push spend past the configured ceiling.
    #[error("budget exceeded: dispatch needs ${needed:.2} but only ${remaining:.2} remains")]
    BudgetExceeded { needed: f64, remaining: f64 },

    /// The state file exists but cannot be trusted for a resume.
    #[error("resume state corrupt: {0}")]
    ResumeStateCorrupt(String),

    #[error("unreadable catalog source '{path}': {reason}")]
    CatalogSource { path: String, reason: String },

    /// Cooperative cancellation was observed; state is already persisted.
    #[error("run cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// Lock-poisoning and similar defects that should never happen in practice.
    pub(crate) fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
