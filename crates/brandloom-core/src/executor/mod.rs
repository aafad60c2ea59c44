//! Execution coordinator.
//!
//! Walks a wave plan in order. Text skills are handed to an external
//! executor through task files and polled for results; asset skills go
//! through the cache, the budget ledger and the provider. Within a
//! wave, anchor assets complete first so the remaining asset skills can
//! reference them for style consistency, then run concurrently under a
//! bounded pool. Every state transition is persisted before the
//! coordinator moves on, which is what makes interrupted runs
//! resumable.

mod assets;
mod text;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;

use crate::cache::AssetCache;
use crate::catalog::{SkillCatalog, SkillKind};
use crate::clock::Clock;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::hydrator::BrandDocument;
use crate::ledger::CostLedger;
use crate::planner::WavePlan;
use crate::provider::AssetProvider;
use crate::report::{RunOutcome, RunReport};
use crate::scenario::ScenarioSelection;
use crate::state::{SkillStatus, StateStore};

/// Cooperative cancellation handle, cloneable into signal handlers.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Shared run context handed to per-skill workers.
pub(crate) struct ExecCtx {
    pub(crate) catalog: Arc<SkillCatalog>,
    pub(crate) config: PipelineConfig,
    pub(crate) state: StateStore,
    pub(crate) cache: AssetCache,
    pub(crate) ledger: CostLedger,
    pub(crate) provider: Arc<dyn AssetProvider>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) cancel: CancelToken,
    /// Set when a worker hits the budget ceiling; later dispatches bail
    /// out without touching the provider.
    pub(crate) budget_halt: AtomicBool,
    pub(crate) document: Mutex<BrandDocument>,
    /// Most recent completed anchor artifact, referenced by the other
    /// asset skills in the wave.
    pub(crate) last_anchor: RwLock<Option<PathBuf>>,
    pub(crate) overrides: HashMap<String, String>,
}

impl ExecCtx {
    pub(crate) fn skill(&self, id: &str) -> Result<&crate::catalog::SkillDefinition, PipelineError> {
        self.catalog
            .get(id)
            .ok_or_else(|| PipelineError::UnknownSkill(id.to_string()))
    }

    pub(crate) fn check_cancelled(&self) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub(crate) fn cache_ttl(&self) -> Option<chrono::Duration> {
        self.config.cache_ttl_days.map(chrono::Duration::days)
    }
}

/// Wave-ordered pipeline driver.
pub struct WaveExecutor {
    ctx: Arc<ExecCtx>,
    scenario_id: String,
}

impl WaveExecutor {
    /// Build a coordinator for one run. `resume` replays a previous
    /// run's state file; a fresh run starts a new one.
    pub fn new(
        config: PipelineConfig,
        catalog: Arc<SkillCatalog>,
        selection: &ScenarioSelection,
        provider: Arc<dyn AssetProvider>,
        clock: Arc<dyn Clock>,
        resume: bool,
    ) -> Result<Self, PipelineError> {
        std::fs::create_dir_all(config.tasks_dir())?;
        std::fs::create_dir_all(config.outputs_dir())?;

        let now = clock.now();
        let state = if resume {
            StateStore::resume(config.state_path(), &selection.skill_ids, now)?
        } else {
            let run_id = uuid::Uuid::new_v4().to_string();
            StateStore::create(config.state_path(), &run_id, &selection.skill_ids, now)?
        };

        let cache = AssetCache::open(&config.cache_dir)?;
        cache.set_bypass(config.cache_bypass);
        let ledger = if resume {
            // Spend from the interrupted run still counts against the
            // ceiling.
            CostLedger::resume(&config.ledger_path(), config.budget_ceiling)?
        } else {
            CostLedger::new(config.budget_ceiling)
        };
        let document = Mutex::new(BrandDocument::load(&config.document_path)?);

        let ctx = Arc::new(ExecCtx {
            catalog,
            config,
            state,
            cache,
            ledger,
            provider,
            clock,
            cancel: CancelToken::new(),
            budget_halt: AtomicBool::new(false),
            document,
            last_anchor: RwLock::new(None),
            overrides: selection.context_overrides.clone(),
        });
        Ok(Self {
            ctx,
            scenario_id: selection.scenario_id.clone(),
        })
    }

    /// Handle for signal-driven cancellation.
    pub fn cancel_token(&self) -> CancelToken {
        self.ctx.cancel.clone()
    }

    /// Snapshot of the brand document, for inspection after a run.
    pub fn document_value(&self) -> Result<serde_json::Value, PipelineError> {
        let doc = self
            .ctx
            .document
            .lock()
            .map_err(|e| PipelineError::internal(format!("document lock poisoned: {e}")))?;
        Ok(doc.root().clone())
    }

    /// Drive the plan to a terminal outcome. Per-skill failures are
    /// recorded and the run continues; budget exhaustion and
    /// cancellation stop it.
    pub async fn run(&self, plan: &WavePlan) -> Result<RunReport, PipelineError> {
        let started_at = self.ctx.clock.now();
        let run_id = self.ctx.state.run_id()?;

        if let Some(outcome) = self.preflight(plan)? {
            return self.finish(&run_id, started_at, outcome);
        }

        // Waves completed by an interrupted run still flow through
        // run_wave: every skill in them is settled and gets skipped
        // one by one, which republishes any anchor reference the
        // skills of later waves depend on.
        let mut halt: Option<RunOutcome> = None;
        for (index, wave) in plan.waves.iter().enumerate() {
            tracing::info!(
                target: "brandloom::executor",
                wave = index,
                skills = wave.len(),
                "starting wave"
            );
            match self.run_wave(wave).await {
                Ok(()) => {
                    self.ctx.state.complete_wave(index, self.ctx.clock.now())?;
                }
                Err(PipelineError::Cancelled) => {
                    tracing::warn!(
                        target: "brandloom::executor",
                        wave = index,
                        "cancellation observed, stopping"
                    );
                    halt = Some(RunOutcome::Cancelled);
                    break;
                }
                Err(PipelineError::BudgetExceeded { needed, remaining }) => {
                    tracing::warn!(
                        target: "brandloom::executor",
                        wave = index,
                        needed,
                        remaining,
                        "budget ceiling reached, stopping"
                    );
                    halt = Some(RunOutcome::BudgetExceeded { needed, remaining });
                    break;
                }
                Err(other) => return Err(other),
            }
        }

        let outcome = match halt {
            Some(outcome) => outcome,
            None => {
                let failed: Vec<String> = self
                    .ctx
                    .state
                    .records()?
                    .iter()
                    .filter(|(_, r)| r.status == SkillStatus::Failed)
                    .map(|(id, _)| id.clone())
                    .collect();
                if failed.is_empty() {
                    RunOutcome::Success
                } else {
                    RunOutcome::Partial { failed }
                }
            }
        };
        self.finish(&run_id, started_at, outcome)
    }

    /// Checks that reject a run before any dispatch.
    fn preflight(&self, plan: &WavePlan) -> Result<Option<RunOutcome>, PipelineError> {
        if !self.ctx.ledger.exhausted_from_start() {
            return Ok(None);
        }
        let first_asset = plan.skills().find_map(|id| {
            self.ctx
                .catalog
                .get(id)
                .filter(|d| d.kind == SkillKind::Asset && !self.ctx.state.is_settled(id).unwrap_or(false))
        });
        match first_asset {
            Some(def) => {
                let needed = CostLedger::estimate_for(def);
                let remaining = self.ctx.ledger.ceiling().unwrap_or(0.0);
                tracing::warn!(
                    target: "brandloom::executor",
                    skill = %def.id,
                    needed,
                    remaining,
                    "budget ceiling leaves no room for asset work"
                );
                Ok(Some(RunOutcome::BudgetExceeded { needed, remaining }))
            }
            None => Ok(None),
        }
    }

    async fn run_wave(&self, wave: &[String]) -> Result<(), PipelineError> {
        let mut text_skills = Vec::new();
        let mut anchors = Vec::new();
        let mut pool_assets = Vec::new();
        for id in wave {
            let def = self.ctx.skill(id)?;
            if self.ctx.state.is_settled(id)? {
                // A settled anchor still owns the reference slot for
                // the assets dispatched after it.
                if def.kind == SkillKind::Asset && def.anchor {
                    assets::restore_anchor(&self.ctx, def)?;
                }
                tracing::debug!(target: "brandloom::executor", skill = %id, "already settled, skipping");
                continue;
            }
            match def.kind {
                SkillKind::Text => text_skills.push(id.clone()),
                SkillKind::Asset if def.anchor => anchors.push(id.clone()),
                SkillKind::Asset => pool_assets.push(id.clone()),
            }
        }

        // Text skills run sequentially: hydration after each completion
        // feeds later task descriptions in the same wave.
        for id in &text_skills {
            text::run_text_skill(&self.ctx, id).await?;
        }

        // Anchors complete before any pooled asset is dispatched.
        for id in &anchors {
            assets::run_asset_skill(&self.ctx, id).await?;
        }

        let semaphore = Arc::new(Semaphore::new(self.ctx.config.asset_pool_size));
        let mut handles = Vec::with_capacity(pool_assets.len());
        for id in pool_assets {
            let ctx = Arc::clone(&self.ctx);
            let semaphore = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| PipelineError::internal(format!("asset pool closed: {e}")))?;
                assets::run_asset_skill(&ctx, &id).await
            }));
        }

        // Drain every worker before deciding how the wave ended, so a
        // halt does not leave tasks writing behind our back.
        let mut first_halt: Option<PipelineError> = None;
        for handle in handles {
            let result = handle
                .await
                .map_err(|e| PipelineError::internal(format!("asset worker panicked: {e}")))?;
            if let Err(err) = result {
                match &err {
                    PipelineError::BudgetExceeded { .. } => {
                        // Budget beats cancellation for the outcome.
                        first_halt = Some(err);
                    }
                    _ if first_halt.is_none() => first_halt = Some(err),
                    _ => {}
                }
            }
        }
        match first_halt {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn finish(
        &self,
        run_id: &str,
        started_at: DateTime<Utc>,
        outcome: RunOutcome,
    ) -> Result<RunReport, PipelineError> {
        let finished_at = self.ctx.clock.now();
        let records = self.ctx.state.records()?;
        let report = RunReport::build(
            run_id,
            &self.scenario_id,
            outcome,
            started_at,
            finished_at,
            &records,
            self.ctx.ledger.total_spent()?,
            self.ctx.ledger.lines()?,
        );
        report.save(&self.ctx.config.report_path())?;
        self.ctx.ledger.save(&self.ctx.config.ledger_path())?;
        tracing::info!(
            target: "brandloom::executor",
            run_id,
            outcome = ?report.outcome,
            completed = report.completed,
            skipped = report.skipped,
            failed = report.failed,
            total_cost = report.total_cost,
            "run finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogSource, OutputField, SkillDefinition};
    use crate::clock::test_support::ManualClock;
    use crate::planner;
    use crate::provider::test_support::ScriptedProvider;
    use crate::provider::ProviderError;
    use crate::scenario::Depth;
    use serde_json::json;
    use std::path::Path;

    fn text_skill(id: &str, deps: &[&str], field: (&str, &str)) -> SkillDefinition {
        SkillDefinition {
            id: id.into(),
            name: String::new(),
            category: "strategy".into(),
            kind: SkillKind::Text,
            wave_hint: None,
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
            optional_depends_on: vec![],
            output_fields: vec![OutputField {
                source: field.0.into(),
                target: field.1.into(),
                required: true,
            }],
            anchor: false,
            model: String::new(),
            seed: 0,
            size_hint: None,
            estimated_cost: None,
            description: format!("produce {id}"),
        }
    }

    fn asset_skill(id: &str, deps: &[&str], anchor: bool, cost: Option<f64>) -> SkillDefinition {
        SkillDefinition {
            id: id.into(),
            name: String::new(),
            category: "visual".into(),
            kind: SkillKind::Asset,
            wave_hint: None,
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
            optional_depends_on: vec![],
            output_fields: vec![],
            anchor,
            model: "flux-2-pro".into(),
            seed: 7,
            size_hint: None,
            estimated_cost: cost,
            description: format!("render {id}"),
        }
    }

    fn setup(
        workspace: &Path,
        skills: Vec<SkillDefinition>,
        budget: Option<f64>,
    ) -> (PipelineConfig, Arc<SkillCatalog>, ScenarioSelection, WavePlan) {
        let config = PipelineConfig {
            workspace_dir: workspace.to_path_buf(),
            document_path: workspace.join("brand.json"),
            cache_dir: workspace.join("cache"),
            budget_ceiling: budget,
            ..PipelineConfig::default()
        };
        let ids: Vec<String> = skills.iter().map(|s| s.id.clone()).collect();
        let catalog =
            Arc::new(SkillCatalog::load(&[CatalogSource::Inline(skills)]).unwrap());
        let selection = ScenarioSelection {
            scenario_id: "launch".into(),
            depth: Depth::Focused,
            skill_ids: ids.clone(),
            context_overrides: HashMap::new(),
        };
        let plan = planner::plan(&catalog, &ids).unwrap();
        (config, catalog, selection, plan)
    }

    fn executor(
        config: &PipelineConfig,
        catalog: &Arc<SkillCatalog>,
        selection: &ScenarioSelection,
        provider: Arc<ScriptedProvider>,
        resume: bool,
    ) -> WaveExecutor {
        WaveExecutor::new(
            config.clone(),
            Arc::clone(catalog),
            selection,
            provider,
            Arc::new(ManualClock::new()),
            resume,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn text_skill_completes_and_hydrates_when_result_appears() {
        let dir = tempfile::tempdir().unwrap();
        let (config, catalog, selection, plan) = setup(
            dir.path(),
            vec![text_skill("persona", &[], ("persona.summary", "brand.persona"))],
            None,
        );
        let provider = Arc::new(ScriptedProvider::always_ok());
        let exec = executor(&config, &catalog, &selection, provider, false);

        let task_path = config.tasks_dir().join("persona.md");
        let output_path = config.outputs_dir().join("persona.json");
        let writer = async {
            // Respond once the task file is handed off.
            while !task_path.exists() {
                tokio::task::yield_now().await;
            }
            std::fs::write(
                &output_path,
                serde_json::to_vec(&json!({"persona": {"summary": "maker-led"}})).unwrap(),
            )
            .unwrap();
        };
        let (report, ()) = tokio::join!(exec.run(&plan), writer);
        let report = report.unwrap();

        assert_eq!(report.outcome, RunOutcome::Success);
        assert_eq!(report.completed, 1);
        let doc = exec.document_value().unwrap();
        assert_eq!(doc["brand"]["persona"], "maker-led");
        // The task file carried the skill description.
        let task = std::fs::read_to_string(&task_path).unwrap();
        assert!(task.contains("produce persona"));
    }

    #[tokio::test]
    async fn text_skill_times_out_into_partial_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let (config, catalog, selection, plan) = setup(
            dir.path(),
            vec![text_skill("persona", &[], ("v", "brand.persona"))],
            None,
        );
        let provider = Arc::new(ScriptedProvider::always_ok());
        let exec = executor(&config, &catalog, &selection, provider, false);

        // No result file ever appears; the manual clock fast-forwards
        // through the poll loop and every retry.
        let report = exec.run(&plan).await.unwrap();
        assert_eq!(
            report.outcome,
            RunOutcome::Partial { failed: vec!["persona".into()] }
        );
        let record = exec.ctx.state.record("persona").unwrap().unwrap();
        assert_eq!(record.status, SkillStatus::Failed);
        assert_eq!(record.retry_count, config.max_retries);
    }

    #[tokio::test]
    async fn second_run_hits_cache_with_zero_provider_calls() {
        let dir = tempfile::tempdir().unwrap();
        let (config, catalog, selection, plan) = setup(
            dir.path(),
            vec![asset_skill("anchor-image", &[], true, Some(0.08))],
            None,
        );

        let first = Arc::new(ScriptedProvider::always_ok());
        let exec = executor(&config, &catalog, &selection, Arc::clone(&first), false);
        assert!(exec.run(&plan).await.unwrap().outcome.is_success());
        assert_eq!(first.call_count(), 1);

        // Fresh run, same semantic inputs.
        let second = Arc::new(ScriptedProvider::always_ok());
        let exec = executor(&config, &catalog, &selection, Arc::clone(&second), false);
        assert!(exec.run(&plan).await.unwrap().outcome.is_success());
        assert_eq!(second.call_count(), 0);
    }

    #[tokio::test]
    async fn budget_below_first_estimate_aborts_before_any_provider_call() {
        let dir = tempfile::tempdir().unwrap();
        let (config, catalog, selection, plan) = setup(
            dir.path(),
            vec![asset_skill("anchor-image", &[], true, Some(0.08))],
            Some(0.05),
        );
        let provider = Arc::new(ScriptedProvider::always_ok());
        let exec = executor(&config, &catalog, &selection, Arc::clone(&provider), false);

        let report = exec.run(&plan).await.unwrap();
        assert!(matches!(report.outcome, RunOutcome::BudgetExceeded { .. }));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn zero_ceiling_with_asset_selected_aborts_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let (config, catalog, selection, plan) = setup(
            dir.path(),
            vec![asset_skill("anchor-image", &[], true, Some(0.08))],
            Some(0.0),
        );
        let provider = Arc::new(ScriptedProvider::always_ok());
        let exec = executor(&config, &catalog, &selection, Arc::clone(&provider), false);

        let report = exec.run(&plan).await.unwrap();
        assert!(matches!(report.outcome, RunOutcome::BudgetExceeded { .. }));
        assert_eq!(provider.call_count(), 0);
        // Nothing was ever dispatched.
        assert_eq!(
            exec.ctx.state.status("anchor-image").unwrap(),
            Some(SkillStatus::Pending)
        );
    }

    #[tokio::test]
    async fn anchor_completes_first_and_feeds_references() {
        let dir = tempfile::tempdir().unwrap();
        let (config, catalog, selection, plan) = setup(
            dir.path(),
            vec![
                asset_skill("anchor-image", &[], true, Some(0.08)),
                asset_skill("variant-a", &[], false, Some(0.08)),
                asset_skill("variant-b", &[], false, Some(0.08)),
            ],
            None,
        );
        // All three share a wave.
        assert_eq!(plan.waves.len(), 1);

        let provider = Arc::new(ScriptedProvider::always_ok());
        let exec = executor(&config, &catalog, &selection, Arc::clone(&provider), false);
        let report = exec.run(&plan).await.unwrap();
        assert!(report.outcome.is_success());

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].skill_id, "anchor-image");
        assert!(requests[0].reference_artifact.is_none());
        for req in &requests[1..] {
            // Variants carry the anchor artifact for style consistency.
            assert!(req.reference_artifact.is_some());
        }
    }

    #[tokio::test]
    async fn transient_provider_failures_are_retried_permanent_are_not() {
        let dir = tempfile::tempdir().unwrap();
        let (config, catalog, selection, plan) = setup(
            dir.path(),
            vec![
                asset_skill("anchor-image", &[], true, Some(0.08)),
                asset_skill("variant-a", &["anchor-image"], false, Some(0.08)),
            ],
            None,
        );
        // Anchor: transient then success. Variant: permanent, no retry.
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(ProviderError::Transient("429".into())),
            Ok(crate::provider::Artifact {
                bytes: b"img".to_vec(),
                media_type: "image/png".into(),
                reported_cost: Some(0.07),
            }),
            Err(ProviderError::Permanent("bad model".into())),
        ]));
        let exec = executor(&config, &catalog, &selection, Arc::clone(&provider), false);
        let report = exec.run(&plan).await.unwrap();

        assert_eq!(
            report.outcome,
            RunOutcome::Partial { failed: vec!["variant-a".into()] }
        );
        // 2 anchor attempts + 1 variant attempt.
        assert_eq!(provider.call_count(), 3);
        // Failed variant's reservation was released.
        assert!((report.total_cost - 0.07).abs() < 1e-9);
    }

    #[tokio::test]
    async fn cancellation_before_run_dispatches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (config, catalog, selection, plan) = setup(
            dir.path(),
            vec![asset_skill("anchor-image", &[], true, Some(0.08))],
            None,
        );
        let provider = Arc::new(ScriptedProvider::always_ok());
        let exec = executor(&config, &catalog, &selection, Arc::clone(&provider), false);
        exec.cancel_token().cancel();

        let report = exec.run(&plan).await.unwrap();
        assert_eq!(report.outcome, RunOutcome::Cancelled);
        assert_eq!(provider.call_count(), 0);
        // State persisted for a later resume.
        assert!(config.state_path().exists());
    }

    #[tokio::test]
    async fn resume_skips_settled_skills() {
        let dir = tempfile::tempdir().unwrap();
        let (config, catalog, selection, plan) = setup(
            dir.path(),
            vec![asset_skill("anchor-image", &[], true, Some(0.08))],
            None,
        );
        let provider = Arc::new(ScriptedProvider::always_ok());
        let exec = executor(&config, &catalog, &selection, Arc::clone(&provider), false);
        assert!(exec.run(&plan).await.unwrap().outcome.is_success());
        assert_eq!(provider.call_count(), 1);

        let resumed_provider = Arc::new(ScriptedProvider::always_ok());
        let exec = executor(&config, &catalog, &selection, Arc::clone(&resumed_provider), true);
        let report = exec.run(&plan).await.unwrap();
        assert!(report.outcome.is_success());
        assert_eq!(report.skipped, 1);
        assert_eq!(resumed_provider.call_count(), 0);
    }

    #[tokio::test]
    async fn persistently_malformed_result_fails_with_the_real_reason() {
        let dir = tempfile::tempdir().unwrap();
        let (mut config, catalog, selection, plan) = setup(
            dir.path(),
            vec![text_skill("persona", &[], ("persona.summary", "brand.persona"))],
            None,
        );
        config.max_retries = 0;
        let provider = Arc::new(ScriptedProvider::always_ok());
        let exec = executor(&config, &catalog, &selection, provider, false);

        let task_path = config.tasks_dir().join("persona.md");
        let output_path = config.outputs_dir().join("persona.json");
        let writer = async {
            while !task_path.exists() {
                tokio::task::yield_now().await;
            }
            // Truncated JSON that never gets finished.
            std::fs::write(&output_path, b"{\"persona\": ").unwrap();
        };
        let (report, ()) = tokio::join!(exec.run(&plan), writer);
        let report = report.unwrap();

        assert_eq!(
            report.outcome,
            RunOutcome::Partial { failed: vec!["persona".into()] }
        );
        let record = exec.ctx.state.record("persona").unwrap().unwrap();
        let error = record.error.unwrap();
        // Failure names the parse problem, not a timeout.
        assert!(error.contains("not valid JSON"), "error was: {error}");
        assert!(!output_path.exists());
    }

    #[tokio::test]
    async fn resumed_run_still_references_the_settled_anchor() {
        let dir = tempfile::tempdir().unwrap();
        let (config, catalog, mut selection, _) = setup(
            dir.path(),
            vec![
                asset_skill("anchor-image", &[], true, Some(0.08)),
                asset_skill("variant-a", &["anchor-image"], false, Some(0.08)),
            ],
            None,
        );

        // First run covers only the anchor.
        selection.skill_ids = vec!["anchor-image".into()];
        let anchor_plan = planner::plan(&catalog, &selection.skill_ids).unwrap();
        let provider = Arc::new(ScriptedProvider::always_ok());
        let exec = executor(&config, &catalog, &selection, Arc::clone(&provider), false);
        assert!(exec.run(&anchor_plan).await.unwrap().outcome.is_success());
        assert_eq!(provider.call_count(), 1);

        // Resumed run adds the variant; the anchor is settled and never
        // re-dispatched, but its artifact still backs the reference.
        selection.skill_ids = vec!["anchor-image".into(), "variant-a".into()];
        let full_plan = planner::plan(&catalog, &selection.skill_ids).unwrap();
        let resumed = Arc::new(ScriptedProvider::always_ok());
        let exec = executor(&config, &catalog, &selection, Arc::clone(&resumed), true);
        assert!(exec.run(&full_plan).await.unwrap().outcome.is_success());

        let requests = resumed.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].skill_id, "variant-a");
        assert!(requests[0].reference_artifact.is_some());
    }

    #[tokio::test]
    async fn resumed_run_counts_prior_spend_against_the_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        let (config, catalog, mut selection, _) = setup(
            dir.path(),
            vec![
                asset_skill("anchor-image", &[], true, Some(0.08)),
                asset_skill("variant-a", &["anchor-image"], false, Some(0.08)),
            ],
            Some(0.10),
        );

        // First run spends most of the ceiling on the anchor.
        selection.skill_ids = vec!["anchor-image".into()];
        let anchor_plan = planner::plan(&catalog, &selection.skill_ids).unwrap();
        let provider = Arc::new(ScriptedProvider::always_ok());
        let exec = executor(&config, &catalog, &selection, Arc::clone(&provider), false);
        assert!(exec.run(&anchor_plan).await.unwrap().outcome.is_success());

        // The resumed run inherits that spend, so the variant no longer
        // fits and is never dispatched.
        selection.skill_ids = vec!["anchor-image".into(), "variant-a".into()];
        let full_plan = planner::plan(&catalog, &selection.skill_ids).unwrap();
        let resumed = Arc::new(ScriptedProvider::always_ok());
        let exec = executor(&config, &catalog, &selection, Arc::clone(&resumed), true);
        let report = exec.run(&full_plan).await.unwrap();

        assert!(matches!(report.outcome, RunOutcome::BudgetExceeded { .. }));
        assert_eq!(resumed.call_count(), 0);
    }

    #[tokio::test]
    async fn retry_task_file_carries_missing_field_hint() {
        let dir = tempfile::tempdir().unwrap();
        let (mut config, catalog, selection, plan) = setup(
            dir.path(),
            vec![text_skill("persona", &[], ("persona.summary", "brand.persona"))],
            None,
        );
        config.max_retries = 1;
        let provider = Arc::new(ScriptedProvider::always_ok());
        let exec = executor(&config, &catalog, &selection, provider, false);

        let task_path = config.tasks_dir().join("persona.md");
        let output_path = config.outputs_dir().join("persona.json");
        let writer = async {
            while !task_path.exists() {
                tokio::task::yield_now().await;
            }
            // First attempt: wrong shape, hydration rejects it.
            std::fs::write(&output_path, br#"{"wrong": 1}"#).unwrap();
            // Wait for the re-dispatched task mentioning the gap.
            loop {
                let text = std::fs::read_to_string(&task_path).unwrap_or_default();
                if text.contains("persona.summary") && text.contains("missing") {
                    break;
                }
                tokio::task::yield_now().await;
            }
            std::fs::write(
                &output_path,
                serde_json::to_vec(&json!({"persona": {"summary": "fixed"}})).unwrap(),
            )
            .unwrap();
        };
        let (report, ()) = tokio::join!(exec.run(&plan), writer);
        let report = report.unwrap();
        assert!(report.outcome.is_success());
        let doc = exec.document_value().unwrap();
        assert_eq!(doc["brand"]["persona"], "fixed");
    }
}
