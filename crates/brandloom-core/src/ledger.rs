//! Cost ledger and budget enforcement.
//!
//! Budget is checked strictly before dispatch: a provider call is only
//! made when the estimated cost still fits the ceiling. A ceiling at or
//! below zero means no asset work may run at all.

use std::path::Path;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::catalog::SkillDefinition;
use crate::error::PipelineError;
use crate::fsutil;

/// Fallback per-asset estimate when a skill does not declare one.
pub const DEFAULT_ASSET_COST: f64 = 0.08;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerLine {
    pub asset_id: String,
    pub estimated: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<f64>,
}

#[derive(Debug, Default)]
struct LedgerInner {
    lines: Vec<LedgerLine>,
}

/// On-disk shape of the persisted ledger.
#[derive(Serialize, Deserialize)]
struct LedgerFile {
    ceiling: Option<f64>,
    total: f64,
    lines: Vec<LedgerLine>,
}

/// Running cost ledger for one pipeline run.
pub struct CostLedger {
    ceiling: Option<f64>,
    inner: RwLock<LedgerInner>,
}

impl CostLedger {
    /// `ceiling: None` disables budget enforcement entirely.
    pub fn new(ceiling: Option<f64>) -> Self {
        Self {
            ceiling,
            inner: RwLock::new(LedgerInner::default()),
        }
    }

    /// Reload a ledger persisted by an interrupted run, so its spend
    /// still counts against the ceiling. Open reservations from the
    /// dead run are dropped; their skills are pending again and will
    /// re-reserve. A missing file starts the ledger empty.
    pub fn resume(path: &Path, ceiling: Option<f64>) -> Result<Self, PipelineError> {
        if !path.exists() {
            return Ok(Self::new(ceiling));
        }
        let file: LedgerFile = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        let lines: Vec<LedgerLine> = file
            .lines
            .into_iter()
            .filter(|l| l.actual.is_some())
            .collect();
        tracing::info!(
            target: "brandloom::ledger",
            path = %path.display(),
            carried = lines.len(),
            "resuming cost ledger"
        );
        Ok(Self {
            ceiling,
            inner: RwLock::new(LedgerInner { lines }),
        })
    }

    /// Persist the ledger for resume and post-run inspection.
    pub fn save(&self, path: &Path) -> Result<(), PipelineError> {
        let file = LedgerFile {
            ceiling: self.ceiling,
            total: self.total_spent()?,
            lines: self.lines()?,
        };
        fsutil::atomic_write_json(path, &file)
    }

    pub fn ceiling(&self) -> Option<f64> {
        self.ceiling
    }

    /// A ceiling at or below zero forbids any asset dispatch.
    pub fn exhausted_from_start(&self) -> bool {
        matches!(self.ceiling, Some(c) if c <= 0.0)
    }

    pub fn estimate_for(def: &SkillDefinition) -> f64 {
        def.estimated_cost.unwrap_or(DEFAULT_ASSET_COST)
    }

    /// Reserve budget for an asset before its provider call. Fails with
    /// the shortfall when the estimate does not fit what remains.
    pub fn reserve(&self, asset_id: &str, estimated: f64) -> Result<(), PipelineError> {
        let mut inner = self.write()?;
        if let Some(ceiling) = self.ceiling {
            let committed: f64 = inner.lines.iter().map(|l| l.estimated).sum();
            let remaining = ceiling - committed;
            if estimated > remaining {
                return Err(PipelineError::BudgetExceeded {
                    needed: estimated,
                    remaining,
                });
            }
        }
        inner.lines.push(LedgerLine {
            asset_id: asset_id.to_string(),
            estimated,
            actual: None,
        });
        tracing::debug!(
            target: "brandloom::ledger",
            asset = asset_id,
            estimated,
            "budget reserved"
        );
        Ok(())
    }

    /// Record the settled cost for a previously reserved asset. With no
    /// provider-reported figure the estimate stands as the actual.
    pub fn record(&self, asset_id: &str, actual: Option<f64>) -> Result<(), PipelineError> {
        let mut inner = self.write()?;
        if let Some(line) = inner
            .lines
            .iter_mut()
            .rev()
            .find(|l| l.asset_id == asset_id && l.actual.is_none())
        {
            line.actual = Some(actual.unwrap_or(line.estimated));
        }
        Ok(())
    }

    /// Drop the reservation for an asset whose dispatch never happened,
    /// e.g. a cache hit discovered after reserving or a cancelled task.
    pub fn release(&self, asset_id: &str) -> Result<(), PipelineError> {
        let mut inner = self.write()?;
        if let Some(pos) = inner
            .lines
            .iter()
            .rposition(|l| l.asset_id == asset_id && l.actual.is_none())
        {
            inner.lines.remove(pos);
        }
        Ok(())
    }

    /// Remaining headroom, `None` when no ceiling is set.
    pub fn remaining_budget(&self) -> Result<Option<f64>, PipelineError> {
        let ceiling = match self.ceiling {
            Some(c) => c,
            None => return Ok(None),
        };
        let inner = self.read()?;
        let committed: f64 = inner.lines.iter().map(|l| l.estimated).sum();
        Ok(Some(ceiling - committed))
    }

    pub fn total_spent(&self) -> Result<f64, PipelineError> {
        let inner = self.read()?;
        Ok(inner.lines.iter().filter_map(|l| l.actual).sum())
    }

    pub fn lines(&self) -> Result<Vec<LedgerLine>, PipelineError> {
        Ok(self.read()?.lines.clone())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, LedgerInner>, PipelineError> {
        self.inner
            .read()
            .map_err(|e| PipelineError::internal(format!("ledger lock poisoned: {e}")))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, LedgerInner>, PipelineError> {
        self.inner
            .write()
            .map_err(|e| PipelineError::internal(format!("ledger lock poisoned: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_fails_when_estimate_exceeds_remaining() {
        let ledger = CostLedger::new(Some(0.10));
        ledger.reserve("anchor-image", 0.08).unwrap();
        let err = ledger.reserve("variant-image", 0.08).unwrap_err();
        match err {
            PipelineError::BudgetExceeded { needed, remaining } => {
                assert_eq!(needed, 0.08);
                assert!((remaining - 0.02).abs() < 1e-9);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn zero_or_negative_ceiling_is_exhausted_from_start() {
        assert!(CostLedger::new(Some(0.0)).exhausted_from_start());
        assert!(CostLedger::new(Some(-1.0)).exhausted_from_start());
        assert!(!CostLedger::new(Some(0.01)).exhausted_from_start());
        assert!(!CostLedger::new(None).exhausted_from_start());
    }

    #[test]
    fn no_ceiling_never_rejects() {
        let ledger = CostLedger::new(None);
        for i in 0..100 {
            ledger.reserve(&format!("asset-{i}"), 10.0).unwrap();
        }
        assert_eq!(ledger.remaining_budget().unwrap(), None);
    }

    #[test]
    fn record_defaults_actual_to_estimate() {
        let ledger = CostLedger::new(Some(1.0));
        ledger.reserve("a", 0.08).unwrap();
        ledger.reserve("b", 0.12).unwrap();
        ledger.record("a", None).unwrap();
        ledger.record("b", Some(0.10)).unwrap();
        assert!((ledger.total_spent().unwrap() - 0.18).abs() < 1e-9);
    }

    #[test]
    fn resume_carries_spend_and_drops_open_reservations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cost_ledger.json");

        let ledger = CostLedger::new(Some(0.20));
        ledger.reserve("anchor-image", 0.08).unwrap();
        ledger.record("anchor-image", Some(0.07)).unwrap();
        // Reservation left open by a crash mid-dispatch.
        ledger.reserve("variant-image", 0.08).unwrap();
        ledger.save(&path).unwrap();

        let resumed = CostLedger::resume(&path, Some(0.20)).unwrap();
        assert!((resumed.total_spent().unwrap() - 0.07).abs() < 1e-9);
        // The anchor's estimate is still committed; the dead run's open
        // reservation is not, so the variant can reserve again.
        assert!((resumed.remaining_budget().unwrap().unwrap() - 0.12).abs() < 1e-9);
        resumed.reserve("variant-image", 0.08).unwrap();
        assert!((resumed.remaining_budget().unwrap().unwrap() - 0.04).abs() < 1e-9);
    }

    #[test]
    fn resume_without_a_ledger_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ledger =
            CostLedger::resume(&dir.path().join("cost_ledger.json"), Some(0.10)).unwrap();
        assert!(ledger.lines().unwrap().is_empty());
        assert_eq!(ledger.remaining_budget().unwrap(), Some(0.10));
    }

    #[test]
    fn release_returns_headroom() {
        let ledger = CostLedger::new(Some(0.10));
        ledger.reserve("a", 0.08).unwrap();
        ledger.release("a").unwrap();
        ledger.reserve("b", 0.08).unwrap();
        assert!((ledger.remaining_budget().unwrap().unwrap() - 0.02).abs() < 1e-9);
    }
}
