//! Token and spend accounting for provider calls.

use std::sync::Mutex;

use serde::Serialize;

/// USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl TokenPricing {
    /// Same rate for every token, as embedding and rerank APIs bill.
    #[must_use]
    pub fn flat(per_million: f64) -> Self {
        Self {
            input_per_million: per_million,
            output_per_million: per_million,
        }
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (self.input_per_million * input_tokens as f64
            + self.output_per_million * output_tokens as f64)
            / 1_000_000.0
    }
}

/// Running totals for one component.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CostSummary {
    pub total_tokens: u64,
    pub total_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub total_cost_usd: f64,
}

impl CostSummary {
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.cache_hits + self.cache_misses;
        if lookups == 0 {
            0.0
        } else {
            self.cache_hits as f64 / lookups as f64
        }
    }
}

/// Owned by each billing component; survives cache clears.
pub struct CostTracker {
    pricing: TokenPricing,
    state: Mutex<CostSummary>,
}

impl CostTracker {
    #[must_use]
    pub fn new(pricing: TokenPricing) -> Self {
        Self {
            pricing,
            state: Mutex::new(CostSummary::default()),
        }
    }

    #[must_use]
    pub fn pricing(&self) -> TokenPricing {
        self.pricing
    }

    /// Record one billed provider request and return its cost.
    pub fn record_request(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        let cost = self.pricing.cost(input_tokens, output_tokens);
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        state.total_requests += 1;
        state.total_tokens += input_tokens + output_tokens;
        state.total_cost_usd += cost;
        cost
    }

    pub fn record_lookups(&self, hits: u64, misses: u64) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        state.cache_hits += hits;
        state.cache_misses += misses;
    }

    #[must_use]
    pub fn summary(&self) -> CostSummary {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn reset(&self) {
        *self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = CostSummary::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_pricing_cost() {
        let pricing = TokenPricing::flat(0.18);
        assert!((pricing.cost(1_000_000, 0) - 0.18).abs() < 1e-12);
        assert!((pricing.cost(0, 0)).abs() < f64::EPSILON);
    }

    #[test]
    fn split_pricing_bills_output_separately() {
        let pricing = TokenPricing {
            input_per_million: 0.15,
            output_per_million: 0.60,
        };
        assert!((pricing.cost(1_000_000, 1_000_000) - 0.75).abs() < 1e-12);
    }

    #[test]
    fn tracker_accumulates() {
        let tracker = CostTracker::new(TokenPricing::flat(1.0));
        let cost = tracker.record_request(500_000, 0);
        tracker.record_request(500_000, 0);
        tracker.record_lookups(3, 1);
        let summary = tracker.summary();
        assert!((cost - 0.5).abs() < 1e-12);
        assert_eq!(summary.total_requests, 2);
        assert_eq!(summary.total_tokens, 1_000_000);
        assert!((summary.total_cost_usd - 1.0).abs() < 1e-12);
        assert!((summary.hit_rate() - 0.75).abs() < 1e-12);
    }

    #[test]
    fn reset_zeroes_totals() {
        let tracker = CostTracker::new(TokenPricing::flat(1.0));
        tracker.record_request(10, 0);
        tracker.reset();
        assert_eq!(tracker.summary(), CostSummary::default());
    }

    #[test]
    fn hit_rate_without_lookups_is_zero() {
        assert!(CostSummary::default().hit_rate().abs() < f64::EPSILON);
    }
}
