//! Asset skill dispatch: cache, budget, provider.
//!
//! Order of checks is deliberate: cache lookup first (a hit costs
//! nothing and skips the budget entirely), then budget reservation
//! strictly before the provider call, then up to the configured number
//! of attempts with exponential backoff on transient failures.

use std::path::PathBuf;
use std::sync::atomic::Ordering;

use serde_json::json;

use super::ExecCtx;
use crate::cache::cache_key;
use crate::catalog::SkillDefinition;
use crate::error::PipelineError;
use crate::ledger::CostLedger;
use crate::provider::AssetRequest;

const DEFAULT_ASSET_MODEL: &str = "flux-2-pro";

/// The semantic inputs a skill's artifact is keyed on: brief text with
/// any scenario override appended, and the effective model.
fn semantic_inputs(ctx: &ExecCtx, def: &SkillDefinition) -> (String, String) {
    let mut description = def.description.clone();
    if let Some(extra) = ctx.overrides.get(&def.id) {
        description.push('\n');
        description.push_str(extra);
    }
    let model = if def.model.is_empty() {
        DEFAULT_ASSET_MODEL.to_string()
    } else {
        def.model.clone()
    };
    (description, model)
}

/// Republish the reference artifact of an anchor that settled in an
/// earlier run (or an earlier pass over this wave), so the assets
/// dispatched now still carry it. Its key is rebuilt from the same
/// semantic inputs the original dispatch used.
pub(super) fn restore_anchor(ctx: &ExecCtx, def: &SkillDefinition) -> Result<(), PipelineError> {
    let (description, model) = semantic_inputs(ctx, def);
    let key = cache_key(&description, &model, def.seed);
    let Some(path) = ctx.cache.peek(&key) else {
        tracing::warn!(
            target: "brandloom::executor",
            skill = %def.id,
            key = %key,
            "settled anchor has no cached artifact, variants run unreferenced"
        );
        return Ok(());
    };
    let mut anchor = ctx
        .last_anchor
        .write()
        .map_err(|e| PipelineError::internal(format!("anchor lock poisoned: {e}")))?;
    *anchor = Some(path);
    Ok(())
}

pub(super) async fn run_asset_skill(ctx: &ExecCtx, id: &str) -> Result<(), PipelineError> {
    ctx.check_cancelled()?;
    if ctx.budget_halt.load(Ordering::SeqCst) {
        // A sibling already hit the ceiling; leave this skill pending.
        return Ok(());
    }
    let def = ctx.skill(id)?;

    let (description, model) = semantic_inputs(ctx, def);
    let key = cache_key(&description, &model, def.seed);

    if let Some(path) = ctx.cache.lookup(&key, ctx.clock.now()) {
        tracing::info!(
            target: "brandloom::executor",
            skill = %id,
            key = %key,
            "cache hit, no provider call"
        );
        return complete(ctx, def, path).await;
    }

    let estimate = CostLedger::estimate_for(def);
    if let Err(err) = ctx.ledger.reserve(id, estimate) {
        if matches!(err, PipelineError::BudgetExceeded { .. }) {
            ctx.budget_halt.store(true, Ordering::SeqCst);
        }
        return Err(err);
    }
    ctx.state.mark_dispatched(id, ctx.clock.now())?;

    let reference_artifact = if def.anchor {
        None
    } else {
        ctx.last_anchor
            .read()
            .map_err(|e| PipelineError::internal(format!("anchor lock poisoned: {e}")))?
            .clone()
    };
    let request = AssetRequest {
        skill_id: id.to_string(),
        description,
        model,
        seed: def.seed,
        size_hint: def.size_hint.clone(),
        reference_artifact,
    };

    let attempts = ctx.config.provider_attempts;
    let mut backoff = ctx.config.retry_backoff;
    for attempt in 1..=attempts {
        if ctx.cancel.is_cancelled() {
            ctx.ledger.release(id)?;
            return Err(PipelineError::Cancelled);
        }
        match ctx.provider.generate(&request).await {
            Ok(artifact) => {
                let path =
                    ctx.cache
                        .store(&key, &artifact.bytes, ctx.cache_ttl(), ctx.clock.now())?;
                ctx.ledger.record(id, artifact.reported_cost)?;
                tracing::info!(
                    target: "brandloom::executor",
                    skill = %id,
                    attempt,
                    bytes = artifact.bytes.len(),
                    "asset generated"
                );
                return complete(ctx, def, path).await;
            }
            Err(err) if err.is_transient() && attempt < attempts => {
                tracing::warn!(
                    target: "brandloom::executor",
                    skill = %id,
                    attempt,
                    backoff_secs = backoff.as_secs(),
                    error = %err,
                    "transient provider failure, retrying"
                );
                ctx.state.bump_retry(id, ctx.clock.now())?;
                ctx.clock.sleep(backoff).await;
                backoff *= 2;
            }
            Err(err) => {
                ctx.ledger.release(id)?;
                ctx.state.mark_failed(id, &err.to_string(), ctx.clock.now())?;
                tracing::warn!(
                    target: "brandloom::executor",
                    skill = %id,
                    attempt,
                    error = %err,
                    "asset skill failed"
                );
                return Ok(());
            }
        }
    }
    Ok(())
}

/// Record a finished artifact: hydrate declared fields, mark the skill
/// completed, and publish an anchor for the rest of the wave.
async fn complete(
    ctx: &ExecCtx,
    def: &SkillDefinition,
    artifact_path: PathBuf,
) -> Result<(), PipelineError> {
    if !def.output_fields.is_empty() {
        let result = json!({ "artifact_path": artifact_path });
        let hydrated = {
            let mut doc = ctx
                .document
                .lock()
                .map_err(|e| PipelineError::internal(format!("document lock poisoned: {e}")))?;
            doc.hydrate(def, &result)
        };
        match hydrated {
            Ok(_) => {}
            Err(PipelineError::SkillOutputInvalid { missing_fields, .. }) => {
                // A declared source other than artifact_path is a
                // manifest defect; record it against the skill instead
                // of halting the run.
                ctx.state.mark_failed(
                    &def.id,
                    &format!(
                        "asset result has no field(s): {}",
                        missing_fields.join(", ")
                    ),
                    ctx.clock.now(),
                )?;
                return Ok(());
            }
            Err(other) => return Err(other),
        }
    }
    ctx.state.mark_completed(&def.id, ctx.clock.now())?;
    if def.anchor {
        let mut anchor = ctx
            .last_anchor
            .write()
            .map_err(|e| PipelineError::internal(format!("anchor lock poisoned: {e}")))?;
        *anchor = Some(artifact_path);
    }
    Ok(())
}
