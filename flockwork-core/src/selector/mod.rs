//! `ModelSelector`: picks a model tier for a task under a cost budget
//! (§4.F).

mod complexity;
mod tiers;

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Duration as ChronoDuration;

pub use complexity::{score, ComplexityScore};
pub use tiers::{ModelTier, TierPrice};

use crate::config::{ComplexityThresholds, CostConfig};
use crate::model::Task;
use crate::{Error, Result};

/// A flat per-task token estimate used only to bound the budget check
/// before a real invocation has run (§4.F step 4). Actual spend is recorded
/// afterwards via `record_outcome`.
const ESTIMATED_INPUT_TOKENS: u64 = 20_000;
const ESTIMATED_OUTPUT_TOKENS: u64 = 4_000;

fn tier_from_score(overall: f64, thresholds: &ComplexityThresholds) -> ModelTier {
    if overall <= thresholds.haiku_max {
        ModelTier::Haiku
    } else if overall <= thresholds.opus_min {
        ModelTier::Sonnet
    } else {
        ModelTier::Opus
    }
}

#[derive(Debug, Clone, Default)]
struct TaskTypeStats {
    successes: u64,
    failures: u64,
}

pub struct ModelSelector {
    cost: CostConfig,
    prices: HashMap<ModelTier, TierPrice>,
    stats: Mutex<HashMap<String, TaskTypeStats>>,
}

impl ModelSelector {
    pub fn new(cost: CostConfig, prices: HashMap<ModelTier, TierPrice>) -> Self {
        Self {
            cost,
            prices,
            stats: Mutex::new(HashMap::new()),
        }
    }

    /// `task_type` is the domain classification from the expertise manager
    /// (§4.G), doubling as the "task type" key the spec's per-type override
    /// refers to. `spent` is the project's running total so far.
    pub fn select(&self, task: &Task, task_type: &str, epic_priority: i64, spent: f64) -> Result<(ModelTier, f64)> {
        if let Some(forced) = self.cost.force_model {
            return Ok((forced, self.estimate(forced)));
        }
        if let Some(by_type) = self.cost.model_overrides.get(task_type) {
            return Ok((*by_type, self.estimate(*by_type)));
        }
        if let Some(by_priority) = self.cost.priority_overrides.get(&epic_priority) {
            return Ok((*by_priority, self.estimate(*by_priority)));
        }

        let complexity = score(&task.description, &task.action, None);
        let base_tier = tier_from_score(complexity.overall, &self.cost.complexity_thresholds);

        self.apply_budget(base_tier, spent)
    }

    fn estimate(&self, tier: ModelTier) -> f64 {
        self.prices
            .get(&tier)
            .map(|p| p.estimate_cost(ESTIMATED_INPUT_TOKENS, ESTIMATED_OUTPUT_TOKENS))
            .unwrap_or(0.0)
    }

    /// The real price of a completed call, once its actual token counts are
    /// known (as opposed to `estimate`, used before the call for budget
    /// enforcement).
    pub fn actual_cost(&self, tier: ModelTier, input_tokens: u64, output_tokens: u64) -> f64 {
        self.prices
            .get(&tier)
            .map(|p| p.estimate_cost(input_tokens, output_tokens))
            .unwrap_or(0.0)
    }

    fn apply_budget(&self, preferred: ModelTier, spent: f64) -> Result<(ModelTier, f64)> {
        let Some(limit) = self.cost.budget_limit else {
            return Ok((preferred, self.estimate(preferred)));
        };

        for &candidate in preferred.cheaper_or_equal().iter().rev() {
            let estimated = self.estimate(candidate);
            if spent + estimated <= limit {
                return Ok((candidate, estimated));
            }
        }

        if spent >= limit {
            return Err(Error::BudgetExhausted);
        }
        // Cheapest tier still doesn't fit but budget isn't exhausted yet:
        // run it anyway at the cheapest tier and let the next check catch up.
        Ok((ModelTier::Haiku, self.estimate(ModelTier::Haiku)))
    }

    pub fn record_outcome(&self, task_type: &str, success: bool) {
        let mut stats = self.stats.lock().unwrap();
        let entry = stats.entry(task_type.to_string()).or_default();
        if success {
            entry.successes += 1;
        } else {
            entry.failures += 1;
        }
    }

    /// Historical success rate for a task type, if any outcomes have been
    /// recorded yet.
    pub fn success_rate(&self, task_type: &str) -> Option<f64> {
        let stats = self.stats.lock().unwrap();
        let entry = stats.get(task_type)?;
        let total = entry.successes + entry.failures;
        if total == 0 {
            return None;
        }
        Some(entry.successes as f64 / total as f64)
    }
}

/// Used by §4.G's `validate_after_days` pruning of stale entries; kept here
/// since both the expertise store and the selector reason about "how old is
/// too old" against the same `chrono::Duration` unit.
pub fn days(n: i64) -> ChronoDuration {
    ChronoDuration::days(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ComplexityThresholds;
    use crate::model::{DependencyType, EpicId, TaskId};
    use std::collections::BTreeSet;

    fn cheap_prices() -> HashMap<ModelTier, TierPrice> {
        let mut prices = HashMap::new();
        prices.insert(
            ModelTier::Haiku,
            TierPrice {
                input_per_million: 0.25,
                output_per_million: 1.25,
            },
        );
        prices.insert(
            ModelTier::Sonnet,
            TierPrice {
                input_per_million: 3.0,
                output_per_million: 15.0,
            },
        );
        prices.insert(
            ModelTier::Opus,
            TierPrice {
                input_per_million: 15.0,
                output_per_million: 75.0,
            },
        );
        prices
    }

    fn sample_task(description: &str) -> Task {
        Task {
            id: TaskId::from("t1"),
            epic_id: EpicId::from("e1"),
            priority: 0,
            description: description.to_string(),
            action: String::new(),
            depends_on: BTreeSet::new(),
            dependency_type: DependencyType::Hard,
            done: false,
            predicted_files: None,
        }
    }

    #[test]
    fn force_model_overrides_everything() {
        let mut cost = CostConfig::default();
        cost.force_model = Some(ModelTier::Opus);
        let selector = ModelSelector::new(cost, cheap_prices());
        let (tier, _) = selector.select(&sample_task("trivial fix"), "general", 0, 0.0).unwrap();
        assert_eq!(tier, ModelTier::Opus);
    }

    #[test]
    fn per_type_override_beats_complexity_score() {
        let mut cost = CostConfig::default();
        cost.model_overrides.insert("testing".to_string(), ModelTier::Haiku);
        let selector = ModelSelector::new(cost, cheap_prices());
        let (tier, _) = selector
            .select(&sample_task("design and architect a complex integration"), "testing", 0, 0.0)
            .unwrap();
        assert_eq!(tier, ModelTier::Haiku);
    }

    #[test]
    fn budget_exhausted_fails_the_task() {
        let mut cost = CostConfig::default();
        cost.budget_limit = Some(0.0);
        cost.complexity_thresholds = ComplexityThresholds {
            haiku_max: 0.0,
            opus_min: 0.0,
        };
        let selector = ModelSelector::new(cost, cheap_prices());
        let err = selector
            .select(&sample_task("design an architecture"), "general", 0, 0.0)
            .unwrap_err();
        assert!(matches!(err, Error::BudgetExhausted));
    }

    #[test]
    fn downgrades_to_cheaper_tier_that_fits_budget() {
        let mut cost = CostConfig::default();
        cost.budget_limit = Some(0.05);
        cost.complexity_thresholds = ComplexityThresholds {
            haiku_max: 0.0,
            opus_min: 0.0,
        };
        let selector = ModelSelector::new(cost, cheap_prices());
        let (tier, _) = selector
            .select(&sample_task("design an architecture"), "general", 0, 0.0)
            .unwrap();
        assert_eq!(tier, ModelTier::Haiku);
    }

    #[test]
    fn record_outcome_tracks_success_rate() {
        let selector = ModelSelector::new(CostConfig::default(), cheap_prices());
        selector.record_outcome("testing", true);
        selector.record_outcome("testing", false);
        assert_eq!(selector.success_rate("testing"), Some(0.5));
        assert_eq!(selector.success_rate("unseen"), None);
    }
}
