//! Composite scorer (C3): legacy 6-factor and 5-factor weighted blends,
//! each producing a score in `[0, 1]`.
//!
//! Grounded in the reference engine's multi-factor ranking style (weighted
//! sum of independently-clamped factors, sorted descending) while following
//! the exact weights and derivations spec section 4.3 pins down.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fsrs;
use crate::model::{ImportanceTier, Memory};

/// Days over which recency decays by one e-fold.
pub const RECENCY_SCALE_DAYS: f64 = 30.0;

/// One scoring factor's contribution, for explainability.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FactorBreakdown {
    pub value: f64,
    pub weight: f64,
    pub contribution: f64,
}

fn factor(value: f64, weight: f64) -> FactorBreakdown {
    let clamped = value.clamp(0.0, 1.0);
    FactorBreakdown {
        value: clamped,
        weight,
        contribution: clamped * weight,
    }
}

/// `importance_tier -> tier_boost` table. Per spec section 9's documented
/// open question, the correct value for `deprecated` is `0.1` (the `0.5`
/// seen in some legacy callers is treated as a bug, not an alternative).
pub fn tier_boost(tier: ImportanceTier) -> f64 {
    match tier {
        ImportanceTier::Constitutional | ImportanceTier::Critical => 1.0,
        ImportanceTier::Important => 0.8,
        ImportanceTier::Normal => 0.5,
        ImportanceTier::Temporary => 0.3,
        ImportanceTier::Deprecated => 0.1,
    }
}

/// Breakdown of the legacy 6-factor composite score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyBreakdown {
    pub similarity: FactorBreakdown,
    pub importance: FactorBreakdown,
    pub recency: FactorBreakdown,
    pub retrievability: FactorBreakdown,
    pub popularity: FactorBreakdown,
    pub tier_boost: FactorBreakdown,
}

impl LegacyBreakdown {
    pub fn total(&self) -> f64 {
        (self.similarity.contribution
            + self.importance.contribution
            + self.recency.contribution
            + self.retrievability.contribution
            + self.popularity.contribution
            + self.tier_boost.contribution)
            .clamp(0.0, 1.0)
    }
}

/// Recency factor: `exp(-days_since_update / RECENCY_SCALE_DAYS)`,
/// clamped so future-dated `updated_at` never exceeds 1.
fn recency_factor(updated_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let days = (now - updated_at).num_milliseconds() as f64 / 86_400_000.0;
    let days = days.max(0.0);
    (-days / RECENCY_SCALE_DAYS).exp().clamp(0.0, 1.0)
}

/// Popularity factor: `log10(access_count + 1) / 3`, clamped to 1.
fn popularity_factor(access_count: i64) -> f64 {
    let n = access_count.max(0) as f64;
    ((n + 1.0).log10() / 3.0).clamp(0.0, 1.0)
}

/// Score a memory with the legacy 6-factor weighting. `similarity` is the
/// raw `0..=100` similarity from the search source.
pub fn score_legacy(memory: &Memory, similarity: f64, now: DateTime<Utc>) -> LegacyBreakdown {
    let r = fsrs::retrievability(memory.days_since_last_review(now), memory.stability);

    LegacyBreakdown {
        similarity: factor(similarity / 100.0, 0.30),
        importance: factor(memory.importance_weight, 0.25),
        recency: factor(recency_factor(memory.updated_at, now), 0.10),
        retrievability: factor(r, 0.15),
        popularity: factor(popularity_factor(memory.access_count), 0.15),
        tier_boost: factor(tier_boost(memory.importance_tier), 0.05),
    }
}

/// Query-intent hint used by the `pattern` factor of the 5-factor variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryIntent {
    Any,
    Episodic,
    Semantic,
}

/// Inputs to the pattern factor that aren't derivable from `Memory` alone.
#[derive(Debug, Clone, Default)]
pub struct PatternSignals {
    pub exact_title_match: bool,
    pub partial_title_match: bool,
    pub any_anchor_match: bool,
    pub intent_matches_memory_type: bool,
}

/// Breakdown of the 5-factor composite score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiveFactorBreakdown {
    pub temporal: FactorBreakdown,
    pub usage: FactorBreakdown,
    pub importance: FactorBreakdown,
    pub pattern: FactorBreakdown,
    pub citation: FactorBreakdown,
}

impl FiveFactorBreakdown {
    pub fn total(&self) -> f64 {
        (self.temporal.contribution
            + self.usage.contribution
            + self.importance.contribution
            + self.pattern.contribution
            + self.citation.contribution)
            .clamp(0.0, 1.0)
    }
}

/// Usage factor: `min(1.5, 1 + 0.05*access_count)` remapped `[1.0,1.5] -> [0,1]`.
fn usage_factor(access_count: i64) -> f64 {
    let raw = (1.0 + 0.05 * access_count.max(0) as f64).min(1.5);
    ((raw - 1.0) / 0.5).clamp(0.0, 1.0)
}

/// Pattern factor: baseline similarity plus fixed, additive, capped bonuses.
fn pattern_factor(similarity: f64, signals: &PatternSignals) -> f64 {
    let mut v = 0.5 * (similarity / 100.0);
    if signals.exact_title_match {
        v += 0.30;
    }
    if signals.partial_title_match {
        v += 0.15;
    }
    if signals.any_anchor_match {
        v += 0.25;
    }
    if signals.intent_matches_memory_type {
        v += 0.20;
    }
    v.clamp(0.0, 1.0)
}

/// Citation factor: `1 / (1 + 0.1*days_since_last_cited)` within 90 days,
/// else 0.
fn citation_factor(last_cited: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    match last_cited {
        Some(t) => {
            let days = (now - t).num_milliseconds() as f64 / 86_400_000.0;
            let days = days.max(0.0);
            if days > 90.0 {
                0.0
            } else {
                1.0 / (1.0 + 0.1 * days)
            }
        }
        None => 0.0,
    }
}

/// Score a memory with the 5-factor weighting (temporal, usage, importance,
/// pattern, citation).
pub fn score_five_factor(
    memory: &Memory,
    similarity: f64,
    signals: &PatternSignals,
    now: DateTime<Utc>,
) -> FiveFactorBreakdown {
    let temporal = fsrs::retrievability(memory.days_since_last_review(now), memory.stability);

    FiveFactorBreakdown {
        temporal: factor(temporal, 0.25),
        usage: factor(usage_factor(memory.access_count), 0.15),
        importance: factor(memory.importance_weight, 0.25),
        pattern: factor(pattern_factor(similarity, signals), 0.20),
        citation: factor(citation_factor(memory.last_cited, now), 0.15),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weights_sum_to_one(weights: &[f64]) -> bool {
        (weights.iter().sum::<f64>() - 1.0).abs() < 1e-9
    }

    #[test]
    fn legacy_weights_sum_to_one() {
        assert!(weights_sum_to_one(&[0.30, 0.25, 0.10, 0.15, 0.15, 0.05]));
    }

    #[test]
    fn five_factor_weights_sum_to_one() {
        assert!(weights_sum_to_one(&[0.25, 0.15, 0.25, 0.20, 0.15]));
    }

    #[test]
    fn legacy_score_is_bounded() {
        let now = Utc::now();
        let mut m = Memory::new(1, "proj", "/tmp/a.md");
        m.importance_weight = 1.0;
        m.access_count = 1_000_000;
        let b = score_legacy(&m, 100.0, now);
        assert!(b.total() <= 1.0 && b.total() >= 0.0);
    }

    #[test]
    fn higher_similarity_never_decreases_legacy_score() {
        let now = Utc::now();
        let m = Memory::new(1, "proj", "/tmp/a.md");
        let low = score_legacy(&m, 10.0, now).total();
        let high = score_legacy(&m, 90.0, now).total();
        assert!(high >= low);
    }

    #[test]
    fn deprecated_tier_boost_is_point_one() {
        assert_eq!(tier_boost(ImportanceTier::Deprecated), 0.1);
    }

    #[test]
    fn unknown_future_update_does_not_exceed_full_recency() {
        let now = Utc::now();
        let future = now + chrono::Duration::days(10);
        assert!(recency_factor(future, now) <= 1.0);
    }

    #[test]
    fn five_factor_score_is_bounded() {
        let now = Utc::now();
        let mut m = Memory::new(1, "proj", "/tmp/a.md");
        m.importance_weight = 1.0;
        m.last_cited = Some(now);
        let signals = PatternSignals {
            exact_title_match: true,
            partial_title_match: true,
            any_anchor_match: true,
            intent_matches_memory_type: true,
        };
        let b = score_five_factor(&m, 100.0, &signals, now);
        assert!(b.total() <= 1.0);
    }
}
