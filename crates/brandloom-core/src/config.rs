//! Pipeline configuration loaded from environment.
//!
//! Everything the coordinator needs to run sits in one struct so the
//! daemon can bootstrap from `.env` and tests can build a config by
//! hand. Unset or invalid values fall back to defaults.

use std::path::PathBuf;
use std::time::Duration;

/// Pipeline configuration loaded from environment.
///
/// | Env | Default | Description |
/// |-----|---------|--------------|
/// | BRANDLOOM_WORKSPACE | ./brandloom | Root for tasks/, outputs/, state and report files. |
/// | BRANDLOOM_DOCUMENT | {workspace}/brand.json | Brand document under hydration. |
/// | BRANDLOOM_CACHE_DIR | {workspace}/cache | Artifact cache directory. |
/// | BRANDLOOM_POLL_INTERVAL_SECS | 5 | Text-skill result polling interval. |
/// | BRANDLOOM_SKILL_TIMEOUT_SECS | 600 | Per-skill wait ceiling (interactive). |
/// | BRANDLOOM_HEADLESS | false | Headless mode: widened timeouts, heartbeat logs. |
/// | BRANDLOOM_HEADLESS_TIMEOUT_MULT | 4 | Timeout multiplier applied in headless mode. |
/// | BRANDLOOM_ASSET_POOL | 3 | Concurrent non-anchor asset dispatches per wave. |
/// | BRANDLOOM_PROVIDER_ATTEMPTS | 3 | Provider attempts per asset dispatch. |
/// | BRANDLOOM_RETRY_BACKOFF_SECS | 1 | Initial backoff between provider attempts, doubles. |
/// | BRANDLOOM_MAX_RETRIES | 2 | Re-dispatches after a failed text skill. |
/// | BRANDLOOM_CACHE_TTL_DAYS | unset | Cache entry lifetime; unset = never expires. |
/// | BRANDLOOM_CACHE_BYPASS | false | Force regeneration; stores still refresh the cache. |
/// | BRANDLOOM_BUDGET_CEILING | unset | Asset spend ceiling in USD; unset = unlimited. |
/// | BRANDLOOM_PROVIDER_ENDPOINT | unset | HTTP image backend URL (daemon wiring). |
/// | BRANDLOOM_PROVIDER_API_KEY | unset | Bearer token for the image backend. |
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub workspace_dir: PathBuf,
    pub document_path: PathBuf,
    pub cache_dir: PathBuf,
    pub poll_interval: Duration,
    pub skill_timeout: Duration,
    pub headless: bool,
    pub headless_timeout_mult: u32,
    pub asset_pool_size: usize,
    pub provider_attempts: u32,
    pub retry_backoff: Duration,
    pub max_retries: u32,
    pub cache_ttl_days: Option<i64>,
    pub cache_bypass: bool,
    pub budget_ceiling: Option<f64>,
    pub provider_endpoint: Option<String>,
    pub provider_api_key: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let workspace_dir = PathBuf::from("./brandloom");
        Self {
            document_path: workspace_dir.join("brand.json"),
            cache_dir: workspace_dir.join("cache"),
            workspace_dir,
            poll_interval: Duration::from_secs(5),
            skill_timeout: Duration::from_secs(600),
            headless: false,
            headless_timeout_mult: 4,
            asset_pool_size: 3,
            provider_attempts: 3,
            retry_backoff: Duration::from_secs(1),
            max_retries: 2,
            cache_ttl_days: None,
            cache_bypass: false,
            budget_ceiling: None,
            provider_endpoint: None,
            provider_api_key: None,
        }
    }
}

impl PipelineConfig {
    /// Load from environment. Unset or invalid => defaults (see struct docs).
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let workspace_dir = env_opt_string("BRANDLOOM_WORKSPACE")
            .map(PathBuf::from)
            .unwrap_or(defaults.workspace_dir);
        let document_path = env_opt_string("BRANDLOOM_DOCUMENT")
            .map(PathBuf::from)
            .unwrap_or_else(|| workspace_dir.join("brand.json"));
        let cache_dir = env_opt_string("BRANDLOOM_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| workspace_dir.join("cache"));
        Self {
            workspace_dir,
            document_path,
            cache_dir,
            poll_interval: Duration::from_secs(env_u64("BRANDLOOM_POLL_INTERVAL_SECS", 5)),
            skill_timeout: Duration::from_secs(env_u64("BRANDLOOM_SKILL_TIMEOUT_SECS", 600)),
            headless: env_bool("BRANDLOOM_HEADLESS", false),
            headless_timeout_mult: env_u64("BRANDLOOM_HEADLESS_TIMEOUT_MULT", 4).max(1) as u32,
            asset_pool_size: env_u64("BRANDLOOM_ASSET_POOL", 3).max(1) as usize,
            provider_attempts: env_u64("BRANDLOOM_PROVIDER_ATTEMPTS", 3).max(1) as u32,
            retry_backoff: Duration::from_secs(env_u64("BRANDLOOM_RETRY_BACKOFF_SECS", 1)),
            max_retries: env_u64("BRANDLOOM_MAX_RETRIES", 2) as u32,
            cache_ttl_days: env_opt_i64("BRANDLOOM_CACHE_TTL_DAYS"),
            cache_bypass: env_bool("BRANDLOOM_CACHE_BYPASS", false),
            budget_ceiling: env_opt_f64("BRANDLOOM_BUDGET_CEILING"),
            provider_endpoint: env_opt_string("BRANDLOOM_PROVIDER_ENDPOINT"),
            provider_api_key: env_opt_string("BRANDLOOM_PROVIDER_API_KEY"),
        }
    }

    /// Effective per-skill timeout, widened in headless mode.
    pub fn effective_timeout(&self) -> Duration {
        if self.headless {
            self.skill_timeout * self.headless_timeout_mult
        } else {
            self.skill_timeout
        }
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.workspace_dir.join("tasks")
    }

    pub fn outputs_dir(&self) -> PathBuf {
        self.workspace_dir.join("outputs")
    }

    pub fn state_path(&self) -> PathBuf {
        self.workspace_dir.join("run_state.json")
    }

    pub fn report_path(&self) -> PathBuf {
        self.workspace_dir.join("run_report.json")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.workspace_dir.join("cost_ledger.json")
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => v.trim().eq_ignore_ascii_case("true") || (v.trim().is_empty() && default),
        Err(_) => default,
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    match std::env::var(name) {
        Ok(v) => v.trim().parse().unwrap_or(default),
        Err(_) => default,
    }
}

fn env_opt_i64(name: &str) -> Option<i64> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn env_opt_f64(name: &str) -> Option<f64> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn env_opt_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headless_widens_timeout() {
        let mut config = PipelineConfig::default();
        config.skill_timeout = Duration::from_secs(100);
        assert_eq!(config.effective_timeout(), Duration::from_secs(100));
        config.headless = true;
        assert_eq!(config.effective_timeout(), Duration::from_secs(400));
    }

    #[test]
    fn derived_paths_follow_workspace() {
        let mut config = PipelineConfig::default();
        config.workspace_dir = PathBuf::from("/tmp/bl");
        assert_eq!(config.tasks_dir(), PathBuf::from("/tmp/bl/tasks"));
        assert_eq!(config.state_path(), PathBuf::from("/tmp/bl/run_state.json"));
    }
}
