//! Five-state lifecycle classifier (C2).
//!
//! Maps `{retrievability, lastAccess}` to one of HOT/WARM/COLD/DORMANT/
//! ARCHIVED, and projects that back onto the legacy three-tier
//! HOT/WARM/COLD model for callers that haven't migrated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RecollectError, Result};
use crate::fsrs;
use crate::model::Memory;

/// Days since last access beyond which a memory is archived regardless
/// of its retrievability.
pub const ARCHIVE_AFTER_DAYS: f64 = 90.0;

/// The five lifecycle states of a working-memory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryTier {
    Hot,
    Warm,
    Cold,
    Dormant,
    Archived,
}

impl MemoryTier {
    /// Backward-compatible 3-tier projection: HOT->HOT, WARM->WARM,
    /// {COLD, DORMANT, ARCHIVED}->COLD.
    pub fn as_legacy_tier(&self) -> LegacyTier {
        match self {
            MemoryTier::Hot => LegacyTier::Hot,
            MemoryTier::Warm => LegacyTier::Warm,
            MemoryTier::Cold | MemoryTier::Dormant | MemoryTier::Archived => LegacyTier::Cold,
        }
    }
}

/// The legacy 3-tier projection used by older callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LegacyTier {
    Hot,
    Warm,
    Cold,
}

/// Thresholds applied to retrievability. Invariant: `hot > warm > cold`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StateThresholds {
    pub hot: f64,
    pub warm: f64,
    pub cold: f64,
}

impl Default for StateThresholds {
    fn default() -> Self {
        Self {
            hot: 0.80,
            warm: 0.25,
            cold: 0.05,
        }
    }
}

impl StateThresholds {
    pub fn validate(&self) -> Result<()> {
        if !(self.hot > self.warm && self.warm > self.cold) {
            return Err(RecollectError::InvalidInput(format!(
                "state thresholds must satisfy hot > warm > cold, got hot={}, warm={}, cold={}",
                self.hot, self.warm, self.cold
            )));
        }
        Ok(())
    }

    /// Classify a raw retrievability value against these thresholds.
    /// Boundaries are inclusive on the high side.
    pub fn classify_retrievability(&self, r: f64) -> MemoryTier {
        if r >= self.hot {
            MemoryTier::Hot
        } else if r >= self.warm {
            MemoryTier::Warm
        } else if r >= self.cold {
            MemoryTier::Cold
        } else {
            MemoryTier::Dormant
        }
    }
}

/// Resolve the retrievability value used for classification, following
/// the fixed fallback order: explicit R -> FSRS-derived R ->
/// attention_score -> 0.
pub fn resolve_retrievability(
    explicit_r: Option<f64>,
    memory: Option<&Memory>,
    attention_score: Option<f64>,
    at: DateTime<Utc>,
) -> f64 {
    if let Some(r) = explicit_r {
        return r;
    }
    if let Some(m) = memory {
        let t = m.days_since_last_review(at);
        return fsrs::retrievability(t, m.stability);
    }
    attention_score.unwrap_or(0.0)
}

/// Classify a memory into one of the five lifecycle states.
///
/// 1. If `days_since(last_access) > 90`, ARCHIVED takes precedence over
///    any retrievability-based class.
/// 2. Otherwise resolve R via the fallback chain and apply thresholds.
pub fn classify(
    memory: &Memory,
    thresholds: &StateThresholds,
    at: DateTime<Utc>,
) -> MemoryTier {
    if memory.days_since_last_access(at) > ARCHIVE_AFTER_DAYS {
        return MemoryTier::Archived;
    }
    let r = resolve_retrievability(None, Some(memory), None, at);
    thresholds.classify_retrievability(r)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Memory;

    fn memory_with_review(days_ago: i64, stability: f64) -> Memory {
        let now = Utc::now();
        let mut m = Memory::new(1, "proj", "/tmp/a.md");
        m.last_review = Some(now - chrono::Duration::days(days_ago));
        m.stability = stability;
        m
    }

    #[test]
    fn archived_takes_precedence_over_retrievability() {
        let m = memory_with_review(91, 1000.0);
        let tier = classify(&m, &StateThresholds::default(), Utc::now());
        assert_eq!(tier, MemoryTier::Archived);
    }

    #[test]
    fn hot_threshold_is_inclusive() {
        let thresholds = StateThresholds::default();
        assert_eq!(thresholds.classify_retrievability(0.80), MemoryTier::Hot);
        assert_eq!(thresholds.classify_retrievability(0.7999), MemoryTier::Warm);
        assert_eq!(thresholds.classify_retrievability(0.25), MemoryTier::Warm);
        assert_eq!(thresholds.classify_retrievability(0.05), MemoryTier::Cold);
        assert_eq!(thresholds.classify_retrievability(0.0), MemoryTier::Dormant);
    }

    #[test]
    fn legacy_projection_merges_cold_states() {
        assert_eq!(MemoryTier::Cold.as_legacy_tier(), LegacyTier::Cold);
        assert_eq!(MemoryTier::Dormant.as_legacy_tier(), LegacyTier::Cold);
        assert_eq!(MemoryTier::Archived.as_legacy_tier(), LegacyTier::Cold);
        assert_eq!(MemoryTier::Hot.as_legacy_tier(), LegacyTier::Hot);
        assert_eq!(MemoryTier::Warm.as_legacy_tier(), LegacyTier::Warm);
    }

    #[test]
    fn invalid_threshold_ordering_is_rejected() {
        let bad = StateThresholds {
            hot: 0.5,
            warm: 0.6,
            cold: 0.1,
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn retrievability_fallback_chain() {
        let now = Utc::now();
        assert_eq!(resolve_retrievability(Some(0.7), None, Some(0.1), now), 0.7);
        assert_eq!(resolve_retrievability(None, None, Some(0.4), now), 0.4);
        assert_eq!(resolve_retrievability(None, None, None, now), 0.0);
    }
}
