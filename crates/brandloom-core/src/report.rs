//! Run reports.
//!
//! A run ends in a machine-distinguishable outcome plus a per-skill
//! breakdown, written next to the brand document so operators and CI
//! can inspect what happened without parsing logs.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::fsutil;
use crate::ledger::LedgerLine;
use crate::state::{SkillRecord, SkillStatus};

/// How a run ended. Serialized with an explicit tag so consumers can
/// branch without string matching on messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    /// Some skills failed but the run drained the remaining waves.
    Partial { failed: Vec<String> },
    BudgetExceeded { needed: f64, remaining: f64 },
    /// The wave plan could not be built.
    PlanRejected { reason: String },
    Cancelled,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Success)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillLine {
    pub skill_id: String,
    pub status: SkillStatus,
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub scenario_id: String,
    pub outcome: RunOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub skills: Vec<SkillLine>,
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub total_cost: f64,
    pub cost_lines: Vec<LedgerLine>,
}

impl RunReport {
    pub fn build(
        run_id: &str,
        scenario_id: &str,
        outcome: RunOutcome,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        records: &BTreeMap<String, SkillRecord>,
        total_cost: f64,
        cost_lines: Vec<LedgerLine>,
    ) -> Self {
        let skills: Vec<SkillLine> = records
            .iter()
            .map(|(id, r)| SkillLine {
                skill_id: id.clone(),
                status: r.status,
                retry_count: r.retry_count,
                error: r.error.clone(),
            })
            .collect();
        let count = |s: SkillStatus| skills.iter().filter(|l| l.status == s).count();
        Self {
            run_id: run_id.to_string(),
            scenario_id: scenario_id.to_string(),
            outcome,
            started_at,
            finished_at,
            completed: count(SkillStatus::Completed),
            skipped: count(SkillStatus::Skipped),
            failed: count(SkillStatus::Failed),
            skills,
            total_cost,
            cost_lines,
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), PipelineError> {
        fsutil::atomic_write_json(path, self)
    }
}
