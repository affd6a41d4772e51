//! `CostPreflight`: a char-count-based token/cost estimate taken before the
//! first model call, using the same per-token pricing model as
//! `ModelInfo::cost_usd`. Interactive overage prompts reuse the confirm-once
//! discipline other dangerous actions in this workspace follow
//! (`tools::permission::ApprovalMemory`).

use nyzhi_provider::{ModelInfo, Usage};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context_assembler::ContextBundle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PricingSource {
    ModelCatalog,
    Override,
    Fallback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostEstimate {
    pub char_count: usize,
    pub estimated_tokens: u32,
    pub estimated_cost: f64,
    pub pricing_source: PricingSource,
}

#[derive(Debug, Clone)]
pub struct Pricing {
    pub model: ModelInfo,
    pub source: PricingSource,
}

#[derive(Debug, Error)]
pub enum CostPreflightError {
    #[error("estimated cost ${estimated:.4} exceeds cap ${cap:.4} and was not confirmed")]
    ExceedsCapUnconfirmed { estimated: f64, cap: f64 },
}

#[derive(Debug, Clone, Copy)]
pub struct CostPreflightConfig {
    pub max_cost_per_run: f64,
    pub char_per_token: f64,
}

impl Default for CostPreflightConfig {
    fn default() -> Self {
        Self { max_cost_per_run: 1.0, char_per_token: 4.0 }
    }
}

pub struct CostPreflight {
    config: CostPreflightConfig,
}

impl CostPreflight {
    pub fn new(config: CostPreflightConfig) -> Self {
        Self { config }
    }

    pub fn estimate_from_bundle(&self, bundle: &ContextBundle, pricing: &Pricing) -> CostEstimate {
        self.estimate(&bundle.serialized.content, pricing)
    }

    pub fn estimate(&self, text: &str, pricing: &Pricing) -> CostEstimate {
        let char_count = text.chars().count();
        let estimated_tokens = ((char_count as f64) / self.config.char_per_token).ceil() as u32;
        let usage = Usage { input_tokens: estimated_tokens, output_tokens: estimated_tokens / 4, cache_read_tokens: 0, cache_creation_tokens: 0 };
        let estimated_cost = pricing.model.cost_usd(&usage);
        CostEstimate { char_count, estimated_tokens, estimated_cost, pricing_source: pricing.source }
    }

    pub fn estimate_from_usage(&self, usage: &Usage, pricing: &Pricing) -> f64 {
        pricing.model.cost_usd(usage)
    }

    /// Applies the cap check. `confirm` is only consulted when the estimate
    /// exceeds `maxCostPerRun`; non-interactive callers should pass a closure
    /// that always returns `false`.
    pub fn enforce_cap(&self, estimate: &CostEstimate, interactive: bool, confirm: impl FnOnce() -> bool) -> Result<(), CostPreflightError> {
        if estimate.estimated_cost <= self.config.max_cost_per_run {
            return Ok(());
        }
        if interactive && confirm() {
            return Ok(());
        }
        Err(CostPreflightError::ExceedsCapUnconfirmed { estimated: estimate.estimated_cost, cap: self.config.max_cost_per_run })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nyzhi_provider::ModelTier;

    fn pricing() -> Pricing {
        Pricing {
            model: ModelInfo {
                id: "m".into(),
                name: "m".into(),
                provider: "test".into(),
                context_window: 100_000,
                max_output_tokens: 4096,
                supports_tools: true,
                supports_streaming: true,
                supports_vision: false,
                input_price_per_m: 3.0,
                output_price_per_m: 15.0,
                cache_read_price_per_m: 0.3,
                cache_write_price_per_m: 3.75,
                tier: ModelTier::Medium,
                thinking: None,
            },
            source: PricingSource::ModelCatalog,
        }
    }

    #[test]
    fn estimate_scales_with_text_length() {
        let cp = CostPreflight::new(CostPreflightConfig::default());
        let short = cp.estimate("hello world", &pricing());
        let long = cp.estimate(&"hello world ".repeat(1000), &pricing());
        assert!(long.estimated_cost > short.estimated_cost);
    }

    #[test]
    fn enforce_cap_passes_under_budget() {
        let cp = CostPreflight::new(CostPreflightConfig { max_cost_per_run: 10.0, char_per_token: 4.0 });
        let estimate = cp.estimate("small request", &pricing());
        assert!(cp.enforce_cap(&estimate, false, || false).is_ok());
    }

    #[test]
    fn enforce_cap_fails_noninteractive_over_budget() {
        let cp = CostPreflight::new(CostPreflightConfig { max_cost_per_run: 0.000001, char_per_token: 4.0 });
        let estimate = cp.estimate(&"x".repeat(10_000), &pricing());
        assert!(cp.enforce_cap(&estimate, false, || false).is_err());
    }

    #[test]
    fn enforce_cap_passes_interactive_confirmed() {
        let cp = CostPreflight::new(CostPreflightConfig { max_cost_per_run: 0.000001, char_per_token: 4.0 });
        let estimate = cp.estimate(&"x".repeat(10_000), &pricing());
        assert!(cp.enforce_cap(&estimate, true, || true).is_ok());
    }
}
