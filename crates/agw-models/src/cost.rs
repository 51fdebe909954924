// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cost computation.
//!
//! A completion's cost is the sum of its token components at the pricing
//! table's rates. Cached prompt tokens bill at the discounted rate when the
//! provider publishes one; reasoning tokens bill as completion tokens.

use agw_core::run::LlmUsage;

use crate::Pricing;

const MILLION: f64 = 1_000_000.0;

/// Compute the USD cost of one completion.
#[must_use]
pub fn compute_cost(usage: &LlmUsage, pricing: &Pricing) -> f64 {
    let prompt = usage.prompt_token_count.unwrap_or(0) as f64;
    let cached = usage.cached_token_count.unwrap_or(0) as f64;
    let audio = usage.audio_token_count.unwrap_or(0) as f64;
    let completion = usage.completion_token_count.unwrap_or(0) as f64;
    let reasoning = usage.reasoning_token_count.unwrap_or(0) as f64;

    // Cached and audio tokens are part of the prompt count; bill the
    // remainder at the plain prompt rate.
    let plain_prompt = (prompt - cached - audio).max(0.0);

    let mut cost = plain_prompt * pricing.prompt_usd_per_million / MILLION;
    cost += cached * pricing.cached_usd_per_million.unwrap_or(pricing.prompt_usd_per_million)
        / MILLION;
    cost += audio * pricing.audio_usd_per_million.unwrap_or(pricing.prompt_usd_per_million)
        / MILLION;
    cost += (completion + reasoning) * pricing.completion_usd_per_million / MILLION;
    cost
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(prompt: u64, completion: u64) -> LlmUsage {
        LlmUsage {
            prompt_token_count: Some(prompt),
            completion_token_count: Some(completion),
            ..Default::default()
        }
    }

    #[test]
    fn plain_prompt_and_completion() {
        let pricing = Pricing {
            prompt_usd_per_million: 2.0,
            completion_usd_per_million: 10.0,
            cached_usd_per_million: None,
            audio_usd_per_million: None,
        };
        let cost = compute_cost(&usage(1_000_000, 100_000), &pricing);
        assert!((cost - 3.0).abs() < 1e-9);
    }

    #[test]
    fn cached_tokens_bill_at_the_discount() {
        let pricing = Pricing {
            prompt_usd_per_million: 2.0,
            completion_usd_per_million: 10.0,
            cached_usd_per_million: Some(0.5),
            audio_usd_per_million: None,
        };
        let mut u = usage(1_000_000, 0);
        u.cached_token_count = Some(500_000);
        let cost = compute_cost(&u, &pricing);
        // 500k at 2.0 + 500k at 0.5 per million.
        assert!((cost - 1.25).abs() < 1e-9);
    }

    #[test]
    fn reasoning_tokens_bill_as_completion() {
        let pricing = Pricing {
            prompt_usd_per_million: 0.0,
            completion_usd_per_million: 10.0,
            cached_usd_per_million: None,
            audio_usd_per_million: None,
        };
        let mut u = usage(0, 100_000);
        u.reasoning_token_count = Some(100_000);
        let cost = compute_cost(&u, &pricing);
        assert!((cost - 2.0).abs() < 1e-9);
    }

    #[test]
    fn missing_usage_costs_nothing() {
        let pricing = Pricing {
            prompt_usd_per_million: 2.0,
            completion_usd_per_million: 10.0,
            cached_usd_per_million: None,
            audio_usd_per_million: None,
        };
        assert_eq!(compute_cost(&LlmUsage::default(), &pricing), 0.0);
    }
}
