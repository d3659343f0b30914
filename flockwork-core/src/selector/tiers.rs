//! Model tiers and their per-million-token prices (§4.F).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Haiku,
    Sonnet,
    Opus,
}

impl ModelTier {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelTier::Haiku => "haiku",
            ModelTier::Sonnet => "sonnet",
            ModelTier::Opus => "opus",
        }
    }

    /// Tiers cheaper than or equal to this one, cheapest first — the
    /// downgrade search order for budget enforcement (§4.F step 4).
    pub fn cheaper_or_equal(self) -> &'static [ModelTier] {
        match self {
            ModelTier::Haiku => &[ModelTier::Haiku],
            ModelTier::Sonnet => &[ModelTier::Haiku, ModelTier::Sonnet],
            ModelTier::Opus => &[ModelTier::Haiku, ModelTier::Sonnet, ModelTier::Opus],
        }
    }
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-million-token prices for one tier (configuration, not code, per
/// §4.F — callers build this from their own pricing table).
#[derive(Debug, Clone, Copy)]
pub struct TierPrice {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl TierPrice {
    pub fn estimate_cost(self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 / 1_000_000.0) * self.input_per_million
            + (output_tokens as f64 / 1_000_000.0) * self.output_per_million
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cheaper_or_equal_is_ordered_cheapest_first() {
        assert_eq!(ModelTier::Opus.cheaper_or_equal(), &[ModelTier::Haiku, ModelTier::Sonnet, ModelTier::Opus]);
        assert_eq!(ModelTier::Haiku.cheaper_or_equal(), &[ModelTier::Haiku]);
    }

    #[test]
    fn estimate_cost_scales_with_tokens() {
        let price = TierPrice {
            input_per_million: 1.0,
            output_per_million: 5.0,
        };
        assert_eq!(price.estimate_cost(1_000_000, 1_000_000), 6.0);
        assert_eq!(price.estimate_cost(0, 0), 0.0);
    }
}
