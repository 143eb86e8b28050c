//! Session-scoped working memory (C11).
//!
//! Tracks which memories are "in mind" for a session across turns, with
//! per-turn attention decay, co-activation boosts for memories mentioned
//! together, and activation-on-access. Two decay modes are supported:
//! the legacy exponential curve and the FSRS power-law curve, selected
//! per deployment rather than per call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fsrs;
use crate::model::WorkingMemoryEntry;
use crate::state::{MemoryTier, StateThresholds};

/// Attention decays by this fraction per turn under the legacy
/// exponential model.
pub const LEGACY_DECAY_RATE: f64 = 0.85;
/// Co-activation boost applied to memories mentioned in the same turn as
/// another active memory, attenuated by how many memories share the turn.
pub const CO_ACTIVATION_BOOST: f64 = 0.15;
/// Floor below which an entry is dropped from working memory entirely.
pub const EVICTION_FLOOR: f64 = 0.02;

/// Which decay curve governs attention falloff between turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecayMode {
    LegacyExponential,
    FsrsPowerLaw,
}

/// Apply one turn's worth of decay to an attention score.
///
/// `turns_elapsed` must be `>= 0`; a negative value is treated as 0 (no
/// decay), matching the crate's general clock-skew tolerance.
pub fn decay_attention(score: f64, turns_elapsed: i64, mode: DecayMode) -> f64 {
    let turns = turns_elapsed.max(0) as f64;
    if turns == 0.0 {
        return score.clamp(0.0, 1.0);
    }
    let decayed = match mode {
        DecayMode::LegacyExponential => score * LEGACY_DECAY_RATE.powf(turns),
        DecayMode::FsrsPowerLaw => score * fsrs::retrievability(turns, fsrs::DEFAULT_STABILITY),
    };
    decayed.clamp(0.0, 1.0)
}

/// Boost applied when `co_activated_count` other memories were mentioned
/// in the same turn. Diminishing returns: each additional co-activated
/// memory contributes less than the last.
pub fn co_activation_boost(co_activated_count: usize) -> f64 {
    if co_activated_count == 0 {
        return 0.0;
    }
    let n = co_activated_count as f64;
    (CO_ACTIVATION_BOOST * (1.0 - (-n / 3.0).exp())).min(CO_ACTIVATION_BOOST * 2.0)
}

/// An in-memory, per-session working-memory table.
#[derive(Debug, Default)]
pub struct WorkingMemoryStore {
    entries: std::collections::HashMap<(String, i64), WorkingMemoryEntry>,
}

impl WorkingMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defensive validation: session ids must be non-empty and memory
    /// ids must be positive. Invalid input is a safe no-op rather than a
    /// panic or error, since this is a best-effort attention tracker.
    fn is_valid(session_id: &str, memory_id: i64) -> bool {
        !session_id.trim().is_empty() && memory_id > 0
    }

    /// Record that `memory_id` was mentioned in `session_id` at `turn`.
    /// Creates a fresh HOT entry if one doesn't exist yet, otherwise
    /// refreshes it to full attention (activation-on-access).
    pub fn activate(&mut self, session_id: &str, memory_id: i64, turn: i64, now: DateTime<Utc>) {
        if !Self::is_valid(session_id, memory_id) {
            return;
        }
        let key = (session_id.to_string(), memory_id);
        match self.entries.get_mut(&key) {
            Some(entry) => {
                entry.attention_score = 1.0;
                entry.last_mentioned_turn = turn;
                entry.tier = MemoryTier::Hot;
                entry.updated_at = now;
            }
            None => {
                self.entries
                    .insert(key, WorkingMemoryEntry::new(session_id, memory_id, turn, now));
            }
        }
    }

    /// Apply co-activation boosts to every other currently-active memory
    /// in the session when `memory_ids` are mentioned together in one turn.
    pub fn co_activate(&mut self, session_id: &str, memory_ids: &[i64], now: DateTime<Utc>) {
        if memory_ids.len() < 2 {
            return;
        }
        let boost = co_activation_boost(memory_ids.len() - 1);
        for id in memory_ids {
            if let Some(entry) = self.entries.get_mut(&(session_id.to_string(), *id)) {
                entry.attention_score = (entry.attention_score + boost).min(1.0);
                entry.updated_at = now;
            }
        }
    }

    /// Advance every entry in `session_id` by one turn: decay attention,
    /// reclassify its tier, and drop entries that fall below the
    /// eviction floor. Returns how many entries were evicted.
    pub fn advance_turn(
        &mut self,
        session_id: &str,
        current_turn: i64,
        mode: DecayMode,
        thresholds: &StateThresholds,
        now: DateTime<Utc>,
    ) -> usize {
        let mut evicted = 0;
        let mut to_remove = Vec::new();

        for (key, entry) in self.entries.iter_mut() {
            if key.0 != session_id {
                continue;
            }
            let turns_elapsed = current_turn - entry.last_mentioned_turn;
            entry.attention_score = decay_attention(entry.attention_score, turns_elapsed, mode);
            entry.tier = thresholds.classify_retrievability(entry.attention_score);
            entry.updated_at = now;

            if entry.attention_score < EVICTION_FLOOR {
                to_remove.push(key.clone());
            }
        }

        for key in to_remove {
            self.entries.remove(&key);
            evicted += 1;
        }
        evicted
    }

    pub fn get(&self, session_id: &str, memory_id: i64) -> Option<&WorkingMemoryEntry> {
        self.entries.get(&(session_id.to_string(), memory_id))
    }

    /// All entries for a session, most recently mentioned first.
    pub fn active_for_session(&self, session_id: &str) -> Vec<&WorkingMemoryEntry> {
        let mut entries: Vec<&WorkingMemoryEntry> = self
            .entries
            .iter()
            .filter(|((sid, _), _)| sid == session_id)
            .map(|(_, entry)| entry)
            .collect();
        entries.sort_by(|a, b| b.last_mentioned_turn.cmp(&a.last_mentioned_turn));
        entries
    }

    /// Drop every entry belonging to a session, e.g. when it ends.
    pub fn clear_session(&mut self, session_id: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(sid, _), _| sid != session_id);
        before - self.entries.len()
    }
}

/// A co-activation or decay event worth auditing, mirroring the shape of
/// a `ConflictRecord` but for working-memory transitions rather than PE
/// gate decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingMemoryAuditEntry {
    pub session_id: String,
    pub memory_id: i64,
    pub previous_tier: MemoryTier,
    pub new_tier: MemoryTier,
    pub timestamp: DateTime<Utc>,
}
