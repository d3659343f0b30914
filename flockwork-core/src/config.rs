//! Configuration for the execution engine
//!
//! Configuration is resolved with the following priority (highest to lowest):
//! 1. Programmatic overrides (`Config::with_overrides`)
//! 2. Environment variables (`FLOCKWORK_*`)
//! 3. Config file (`~/.config/flockwork/config.toml`)
//! 4. Default values

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::selector::ModelTier;
use crate::{Error, Result};

/// Merge strategy used by the merge pipeline (§4.D).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    Regular,
    Squash,
}

impl Default for MergeStrategy {
    fn default() -> Self {
        MergeStrategy::Regular
    }
}

/// §6 `parallel.*` — concurrency and merge behavior.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ParallelConfig {
    pub enabled: bool,
    pub max_concurrency: u32,
    pub merge_strategy: MergeStrategy,
    /// Whether a single task failure aborts the rest of its epic-worker's
    /// stream for the current batch (§4.E step 4). Default `false`: a
    /// failure is recorded and the worker proceeds to the epic's next task.
    pub fatal_epic: bool,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrency: 3,
            merge_strategy: MergeStrategy::Regular,
            fatal_epic: false,
        }
    }
}

impl ParallelConfig {
    fn validate(&self) -> Result<()> {
        if !(1..=10).contains(&self.max_concurrency) {
            return Err(Error::Config(format!(
                "parallel.max_concurrency must be in 1..=10, got {}",
                self.max_concurrency
            )));
        }
        Ok(())
    }
}

/// §6 `learning.*` — expertise store behavior.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LearningConfig {
    pub enabled: bool,
    pub expertise_max_lines: usize,
    pub validate_after_days: u32,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            expertise_max_lines: 1000,
            validate_after_days: 30,
        }
    }
}

/// §6 `cost.complexity_thresholds` — tier boundaries for the model selector.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ComplexityThresholds {
    pub haiku_max: f64,
    pub opus_min: f64,
}

impl Default for ComplexityThresholds {
    fn default() -> Self {
        Self {
            haiku_max: 0.3,
            opus_min: 0.7,
        }
    }
}

/// §6 `cost.*` — budget and model-selection overrides.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CostConfig {
    pub budget_limit: Option<f64>,
    pub force_model: Option<ModelTier>,
    pub model_overrides: HashMap<String, ModelTier>,
    pub priority_overrides: HashMap<i64, ModelTier>,
    pub complexity_thresholds: ComplexityThresholds,
}

/// §6 `repo.*` — worktree placement and the optional post-merge test suite.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RepoConfig {
    pub worktree_dir: PathBuf,
    /// Shell command run in the main directory after a clean merge (§4.D
    /// step 5). `None` skips the step entirely.
    pub test_command: Option<String>,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            worktree_dir: PathBuf::from(".worktrees"),
            test_command: None,
        }
    }
}

/// §6 `agent.*` — per-task agent invocation limits.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AgentConfig {
    #[serde(with = "humantime_serde::option")]
    pub per_task_timeout: Option<Duration>,
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub parallel: ParallelConfig,
    pub learning: LearningConfig,
    pub cost: CostConfig,
    pub repo: RepoConfig,
    pub agent: AgentConfig,
}

impl Config {
    /// Load configuration from the default config file location, falling
    /// back to defaults if no file is present.
    pub fn load() -> Result<Self> {
        match Self::default_config_path() {
            Some(path) if path.exists() => Self::load_from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from_file(path: &PathBuf) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.parallel.validate()?;
        Ok(config)
    }

    /// `~/.config/flockwork/config.toml`
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("flockwork").join("config.toml"))
    }

    /// Apply `FLOCKWORK_*` environment variable overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("FLOCKWORK_MAX_CONCURRENCY") {
            if let Ok(n) = v.parse() {
                self.parallel.max_concurrency = n;
            }
        }
        if let Ok(v) = std::env::var("FLOCKWORK_BUDGET_LIMIT") {
            if let Ok(n) = v.parse() {
                self.cost.budget_limit = Some(n);
            }
        }
        if let Ok(v) = std::env::var("FLOCKWORK_MERGE_STRATEGY") {
            match v.to_lowercase().as_str() {
                "squash" => self.parallel.merge_strategy = MergeStrategy::Squash,
                "regular" => self.parallel.merge_strategy = MergeStrategy::Regular,
                other => tracing::warn!("ignoring unrecognized FLOCKWORK_MERGE_STRATEGY={other}"),
            }
        }
        self
    }

    /// Apply programmatic overrides (the equivalent of CLI flags for a
    /// library with no front-end of its own).
    pub fn with_overrides(
        mut self,
        max_concurrency: Option<u32>,
        budget_limit: Option<f64>,
    ) -> Self {
        if let Some(n) = max_concurrency {
            self.parallel.max_concurrency = n;
        }
        if let Some(limit) = budget_limit {
            self.cost.budget_limit = Some(limit);
        }
        self
    }

    /// Load with all overrides applied: overrides > env > file > defaults.
    pub fn load_with_overrides(
        max_concurrency: Option<u32>,
        budget_limit: Option<f64>,
    ) -> Result<Self> {
        Ok(Self::load()?
            .with_env_overrides()
            .with_overrides(max_concurrency, budget_limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let config = Config::default();
        assert_eq!(config.parallel.max_concurrency, 3);
        assert_eq!(config.parallel.merge_strategy, MergeStrategy::Regular);
        assert_eq!(config.learning.expertise_max_lines, 1000);
        assert_eq!(config.learning.validate_after_days, 30);
    }

    #[test]
    fn overrides_take_precedence() {
        let config = Config::default().with_overrides(Some(5), Some(12.5));
        assert_eq!(config.parallel.max_concurrency, 5);
        assert_eq!(config.cost.budget_limit, Some(12.5));
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let toml = r#"
[parallel]
max_concurrency = 7
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.parallel.max_concurrency, 7);
        assert_eq!(config.parallel.merge_strategy, MergeStrategy::Regular);
        assert_eq!(config.learning.expertise_max_lines, 1000);
    }

    #[test]
    fn rejects_out_of_range_concurrency() {
        let config = Config {
            parallel: ParallelConfig {
                max_concurrency: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.parallel.validate().is_err());
    }

    #[test]
    fn cost_overrides_parse_by_task_type_and_priority() {
        let toml = r#"
[cost]
budget_limit = 10.0
force_model = "sonnet"

[cost.model_overrides]
testing = "haiku"

[cost.priority_overrides]
1 = "opus"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.cost.budget_limit, Some(10.0));
        assert_eq!(config.cost.force_model, Some(ModelTier::Sonnet));
        assert_eq!(config.cost.model_overrides.get("testing"), Some(&ModelTier::Haiku));
        assert_eq!(config.cost.priority_overrides.get(&1), Some(&ModelTier::Opus));
    }
}
