//! Brandloom Pipeline Daemon (Headless Driver)
//!
//! Loads configuration from the environment, builds the skill catalog,
//! resolves the requested scenario, plans waves, and drives one run to
//! completion. The run outcome maps to a distinct process exit code so
//! CI and wrappers can branch without parsing logs.
//!
//! Exit codes: 0 success, 1 partial (some skills failed), 2 plan
//! rejected, 3 budget exceeded, 4 resume state corrupt, 130 cancelled.

use std::path::PathBuf;
use std::sync::Arc;

use brandloom_core::{
    plan, CatalogSource, HttpImageProvider, PipelineConfig, PipelineError, RunOutcome,
    ScenarioBook, SkillCatalog, SystemClock, WaveExecutor,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env::var calls)
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[brandloom-daemon] .env not loaded: {e} (using system environment)");
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let code = match run().await {
        Ok(outcome) => exit_code(&outcome),
        Err(err) => {
            tracing::error!(error = %err, "pipeline run failed");
            match err {
                PipelineError::DependencyCycle { .. }
                | PipelineError::UnsatisfiableDependency { .. }
                | PipelineError::UnknownSkill(_)
                | PipelineError::UnknownScenario(_)
                | PipelineError::CatalogSource { .. } => 2,
                PipelineError::ResumeStateCorrupt(_) => 4,
                _ => 1,
            }
        }
    };
    std::process::exit(code);
}

fn exit_code(outcome: &RunOutcome) -> i32 {
    match outcome {
        RunOutcome::Success => 0,
        RunOutcome::Partial { .. } => 1,
        RunOutcome::PlanRejected { .. } => 2,
        RunOutcome::BudgetExceeded { .. } => 3,
        RunOutcome::Cancelled => 130,
    }
}

async fn run() -> Result<RunOutcome, PipelineError> {
    let config = PipelineConfig::from_env();

    // Manifest sources in priority order: later files override earlier
    // definitions with the same id.
    let mut sources: Vec<CatalogSource> = Vec::new();
    for path in env_paths("BRANDLOOM_SKILL_MANIFESTS") {
        sources.push(CatalogSource::ManifestFile(path));
    }
    let catalog = Arc::new(SkillCatalog::load(&sources)?);
    if catalog.is_empty() {
        tracing::warn!("skill catalog is empty, nothing to run");
    }

    let mut book = ScenarioBook::builtin();
    for path in env_paths("BRANDLOOM_SCENARIO_FILES") {
        book.merge_file(&path)?;
    }
    let scenario_id =
        std::env::var("BRANDLOOM_SCENARIO").unwrap_or_else(|_| "brand-genesis".into());
    let depth = std::env::var("BRANDLOOM_DEPTH").ok();
    let selection = book.resolve(&scenario_id, depth.as_deref())?;

    let wave_plan = match plan(&catalog, &selection.skill_ids) {
        Ok(p) => p,
        Err(err) => {
            tracing::error!(error = %err, "wave plan rejected");
            return Ok(RunOutcome::PlanRejected {
                reason: err.to_string(),
            });
        }
    };
    tracing::info!(
        scenario = %selection.scenario_id,
        depth = selection.depth.as_str(),
        waves = wave_plan.len(),
        skills = wave_plan.skills().count(),
        "wave plan ready"
    );

    let endpoint = config
        .provider_endpoint
        .clone()
        .unwrap_or_else(|| "http://127.0.0.1:8787/generate".into());
    let provider = Arc::new(HttpImageProvider::new(
        endpoint,
        config.provider_api_key.clone(),
    ));

    let resume = config.state_path().exists()
        && std::env::var("BRANDLOOM_RESUME")
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);
    let executor = WaveExecutor::new(
        config,
        catalog,
        &selection,
        provider,
        Arc::new(SystemClock),
        resume,
    )?;

    // CTRL-C flips the cancellation flag; the coordinator persists
    // state and stops at the next safe point.
    let cancel = executor.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("CTRL-C received; cancelling run");
            cancel.cancel();
        }
    });

    let report = executor.run(&wave_plan).await?;
    Ok(report.outcome)
}

fn env_paths(name: &str) -> Vec<PathBuf> {
    std::env::var(name)
        .map(|v| {
            v.split(':')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .collect()
        })
        .unwrap_or_default()
}
