//! Token usage accounting.
//!
//! Providers with prompt caching report how many prompt tokens were served
//! from cache; those tokens are billed at a discount. Normalization turns
//! the provider-reported figures into the billable ones and recomputes the
//! total so batch and streaming paths agree.

use serde::{Deserialize, Serialize};

fn is_zero(v: &i64) -> bool {
    *v == 0
}

/// Token usage in the OpenAI wire shape, with cache extensions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt tokens; billable figure after normalization
    #[serde(default)]
    pub prompt_tokens: i64,

    /// Completion tokens
    #[serde(default)]
    pub completion_tokens: i64,

    /// Total tokens; recomputed after normalization
    #[serde(default)]
    pub total_tokens: i64,

    /// Prompt tokens served from the provider's cache
    #[serde(default, skip_serializing_if = "is_zero")]
    pub prompt_cache_hit_tokens: i64,

    /// Prompt tokens that missed the cache
    #[serde(default, skip_serializing_if = "is_zero")]
    pub prompt_cache_miss_tokens: i64,
}

impl Usage {
    /// Whether every counter is zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prompt_tokens == 0
            && self.completion_tokens == 0
            && self.total_tokens == 0
            && self.prompt_cache_hit_tokens == 0
            && self.prompt_cache_miss_tokens == 0
    }

    /// Discount cached prompt tokens and recompute the total.
    ///
    /// Billed prompt tokens are
    /// `reported_prompt - floor(cache_hit_tokens * discount)`; the total
    /// becomes `billed_prompt + completion_tokens`. Idempotence is not
    /// guaranteed, so callers apply this exactly once per response.
    pub fn apply_cache_discount(&mut self, discount: f64) {
        let rebate = (self.prompt_cache_hit_tokens as f64 * discount).floor() as i64;
        self.prompt_tokens -= rebate;
        self.total_tokens = self.prompt_tokens + self.completion_tokens;
    }

    /// Keep the most recent non-empty usage report.
    ///
    /// Streams may attach usage to any chunk; the last non-empty report
    /// wins, matching how providers send a final cumulative figure.
    pub fn merge_latest(&mut self, other: &Self) {
        if !other.is_empty() {
            *self = *other;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_discount_at_85_percent() {
        let mut usage = Usage {
            prompt_tokens: 1000,
            completion_tokens: 200,
            total_tokens: 1200,
            prompt_cache_hit_tokens: 600,
            prompt_cache_miss_tokens: 400,
        };
        usage.apply_cache_discount(0.85);
        // floor(600 * 0.85) = 510
        assert_eq!(usage.prompt_tokens, 490);
        assert_eq!(usage.total_tokens, 690);
        assert_eq!(usage.completion_tokens, 200);
    }

    #[test]
    fn cache_discount_at_90_percent() {
        let mut usage = Usage {
            prompt_tokens: 1000,
            completion_tokens: 200,
            total_tokens: 1200,
            prompt_cache_hit_tokens: 600,
            prompt_cache_miss_tokens: 400,
        };
        usage.apply_cache_discount(0.90);
        assert_eq!(usage.prompt_tokens, 460);
        assert_eq!(usage.total_tokens, 660);
    }

    #[test]
    fn rebate_floors_fractional_tokens() {
        let mut usage = Usage {
            prompt_tokens: 100,
            completion_tokens: 10,
            total_tokens: 110,
            prompt_cache_hit_tokens: 7,
            prompt_cache_miss_tokens: 93,
        };
        usage.apply_cache_discount(0.85);
        // floor(7 * 0.85) = floor(5.95) = 5
        assert_eq!(usage.prompt_tokens, 95);
        assert_eq!(usage.total_tokens, 105);
    }

    #[test]
    fn no_cache_hits_still_recomputes_total() {
        let mut usage = Usage {
            prompt_tokens: 50,
            completion_tokens: 20,
            total_tokens: 0,
            ..Usage::default()
        };
        usage.apply_cache_discount(0.85);
        assert_eq!(usage.prompt_tokens, 50);
        assert_eq!(usage.total_tokens, 70);
    }

    #[test]
    fn merge_keeps_latest_non_empty() {
        let mut current = Usage::default();
        let report = Usage {
            prompt_tokens: 12,
            completion_tokens: 4,
            total_tokens: 16,
            ..Usage::default()
        };
        current.merge_latest(&report);
        assert_eq!(current, report);

        // An empty follow-up must not wipe the report
        current.merge_latest(&Usage::default());
        assert_eq!(current, report);
    }

    #[test]
    fn cache_fields_stay_off_the_wire_when_zero() {
        let usage = Usage {
            prompt_tokens: 5,
            completion_tokens: 1,
            total_tokens: 6,
            ..Usage::default()
        };
        let json = serde_json::to_value(usage).expect("serialize");
        assert!(json.get("prompt_cache_hit_tokens").is_none());

        let cached: Usage = serde_json::from_value(serde_json::json!({
            "prompt_tokens": 10,
            "completion_tokens": 2,
            "total_tokens": 12,
            "prompt_cache_hit_tokens": 8
        }))
        .expect("deserialize");
        assert_eq!(cached.prompt_cache_hit_tokens, 8);
    }
}
