//! Resumable run state.
//!
//! Every skill transition is persisted to disk before the coordinator
//! proceeds, so a crash mid-run can be resumed with completed work
//! skipped. State writes swap a temp file into place so the file on
//! disk is always a complete JSON document.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::fsutil;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillStatus {
    Pending,
    Dispatched,
    Completed,
    Failed,
    /// Completed in a previous run and not re-executed on resume.
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillRecord {
    pub status: SkillStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatched_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SkillRecord {
    fn pending() -> Self {
        Self {
            status: SkillStatus::Pending,
            dispatched_at: None,
            completed_at: None,
            retry_count: 0,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StateFile {
    run_id: String,
    started_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_completed_wave: Option<usize>,
    skills: BTreeMap<String, SkillRecord>,
}

/// Durable per-run state, persisted on every transition.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    inner: RwLock<StateFile>,
    // Persists share one temp path; writes must not interleave.
    persist_lock: Mutex<()>,
}

impl StateStore {
    /// Start a fresh run covering `skill_ids`.
    pub fn create(
        path: impl Into<PathBuf>,
        run_id: &str,
        skill_ids: &[String],
        now: DateTime<Utc>,
    ) -> Result<Self, PipelineError> {
        let state = StateFile {
            run_id: run_id.to_string(),
            started_at: now,
            updated_at: now,
            last_completed_wave: None,
            skills: skill_ids
                .iter()
                .map(|id| (id.clone(), SkillRecord::pending()))
                .collect(),
        };
        let store = Self {
            path: path.into(),
            inner: RwLock::new(state),
            persist_lock: Mutex::new(()),
        };
        store.persist()?;
        Ok(store)
    }

    /// Resume from an existing state file. Completed skills are marked
    /// skipped; anything else (including skills dispatched when the
    /// previous run died) goes back to pending. Skills newly added to
    /// the selection since the interrupted run start out pending.
    pub fn resume(
        path: impl Into<PathBuf>,
        skill_ids: &[String],
        now: DateTime<Utc>,
    ) -> Result<Self, PipelineError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| {
            PipelineError::ResumeStateCorrupt(format!("{}: {e}", path.display()))
        })?;
        let mut state: StateFile = serde_json::from_str(&text).map_err(|e| {
            PipelineError::ResumeStateCorrupt(format!("{}: {e}", path.display()))
        })?;

        let mut skipped = 0usize;
        for id in skill_ids {
            let record = state
                .skills
                .entry(id.clone())
                .or_insert_with(SkillRecord::pending);
            match record.status {
                SkillStatus::Completed | SkillStatus::Skipped => {
                    record.status = SkillStatus::Skipped;
                    skipped += 1;
                }
                _ => *record = SkillRecord::pending(),
            }
        }
        state.updated_at = now;
        tracing::info!(
            target: "brandloom::state",
            run_id = %state.run_id,
            skipped,
            total = skill_ids.len(),
            "resuming interrupted run"
        );

        let store = Self {
            path,
            inner: RwLock::new(state),
            persist_lock: Mutex::new(()),
        };
        store.persist()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn run_id(&self) -> Result<String, PipelineError> {
        Ok(self.read()?.run_id.clone())
    }

    pub fn status(&self, skill_id: &str) -> Result<Option<SkillStatus>, PipelineError> {
        Ok(self.read()?.skills.get(skill_id).map(|r| r.status))
    }

    pub fn record(&self, skill_id: &str) -> Result<Option<SkillRecord>, PipelineError> {
        Ok(self.read()?.skills.get(skill_id).cloned())
    }

    /// True when the skill finished in this run or a previous one.
    pub fn is_settled(&self, skill_id: &str) -> Result<bool, PipelineError> {
        Ok(matches!(
            self.status(skill_id)?,
            Some(SkillStatus::Completed | SkillStatus::Skipped)
        ))
    }

    pub fn last_completed_wave(&self) -> Result<Option<usize>, PipelineError> {
        Ok(self.read()?.last_completed_wave)
    }

    /// Mark a skill dispatched and persist before returning.
    pub fn mark_dispatched(
        &self,
        skill_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), PipelineError> {
        self.update(skill_id, now, |r| {
            r.status = SkillStatus::Dispatched;
            r.dispatched_at = Some(now);
            r.error = None;
        })
    }

    pub fn mark_completed(
        &self,
        skill_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), PipelineError> {
        self.update(skill_id, now, |r| {
            r.status = SkillStatus::Completed;
            r.completed_at = Some(now);
            r.error = None;
        })
    }

    pub fn mark_failed(
        &self,
        skill_id: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), PipelineError> {
        self.update(skill_id, now, |r| {
            r.status = SkillStatus::Failed;
            r.completed_at = Some(now);
            r.error = Some(error.to_string());
        })
    }

    pub fn bump_retry(&self, skill_id: &str, now: DateTime<Utc>) -> Result<(), PipelineError> {
        self.update(skill_id, now, |r| r.retry_count += 1)
    }

    /// Record wave completion, gating resume to whole-wave granularity.
    pub fn complete_wave(&self, wave: usize, now: DateTime<Utc>) -> Result<(), PipelineError> {
        {
            let mut state = self.write()?;
            state.last_completed_wave = Some(wave);
            state.updated_at = now;
        }
        self.persist()
    }

    /// Snapshot of all records, for reporting.
    pub fn records(&self) -> Result<BTreeMap<String, SkillRecord>, PipelineError> {
        Ok(self.read()?.skills.clone())
    }

    fn update(
        &self,
        skill_id: &str,
        now: DateTime<Utc>,
        f: impl FnOnce(&mut SkillRecord),
    ) -> Result<(), PipelineError> {
        {
            let mut state = self.write()?;
            let record = state
                .skills
                .get_mut(skill_id)
                .ok_or_else(|| PipelineError::UnknownSkill(skill_id.to_string()))?;
            f(record);
            state.updated_at = now;
        }
        self.persist()
    }

    fn persist(&self) -> Result<(), PipelineError> {
        let _guard = self
            .persist_lock
            .lock()
            .map_err(|e| PipelineError::internal(format!("persist lock poisoned: {e}")))?;
        let state = self.read()?;
        fsutil::atomic_write_json(&self.path, &*state)
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, StateFile>, PipelineError> {
        self.inner
            .read()
            .map_err(|e| PipelineError::internal(format!("state lock poisoned: {e}")))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, StateFile>, PipelineError> {
        self.inner
            .write()
            .map_err(|e| PipelineError::internal(format!("state lock poisoned: {e}")))
    }
}
