//! Prediction-error arbitration gate (C7).
//!
//! Decides whether an incoming memory candidate should create a new
//! memory, reinforce an existing one, update it in place, create a
//! linked sibling, or supersede it outright - based on similarity to the
//! closest existing memory plus a fixed-rule contradiction detector.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{ContradictionType, GateAction};

/// Similarity thresholds (on a `0.0..=1.0` scale) that partition the
/// gate's decision space into three bands. Invariant:
/// `duplicate > high_match > medium_match`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GateThresholds {
    pub duplicate: f64,
    pub high_match: f64,
    pub medium_match: f64,
}

impl Default for GateThresholds {
    fn default() -> Self {
        Self {
            duplicate: 0.95,
            high_match: 0.90,
            medium_match: 0.70,
        }
    }
}

/// One existing memory being weighed as a possible match for new content.
#[derive(Debug, Clone)]
pub struct GateCandidate<'a> {
    pub memory_id: i64,
    pub content: &'a str,
    pub similarity: f64,
}

/// Outcome of an arbitration pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateDecision {
    pub action: GateAction,
    pub reason: String,
    /// The top candidate's similarity, or `0.0` when there were no
    /// candidates.
    pub similarity: f64,
    /// The top candidate's memory id, or `None` when there were no
    /// candidates (always CREATE in that case).
    pub candidate: Option<i64>,
    pub contradiction_detected: bool,
    pub contradiction_type: Option<ContradictionType>,
    /// Every candidate at or above `medium_match`, for CREATE_LINKED's
    /// `related_ids`. Empty for every other action.
    pub related_ids: Vec<i64>,
}

const ABSOLUTE_MARKERS: &[&str] = &["always", "never", "all", "none", "every", "no one"];
const BOOLEAN_MARKERS: &[(&str, &str)] = &[
    ("is enabled", "is disabled"),
    ("is true", "is false"),
    ("is on", "is off"),
    ("is active", "is inactive"),
    ("works", "doesn't work"),
];
const NEGATION_PREFIXES: &[&str] = &["not ", "no longer ", "never "];
const IMPERATIVE_MARKERS: &[(&str, &str)] = &[
    ("must", "must not"),
    ("should", "should not"),
    ("always use", "never use"),
    ("required", "forbidden"),
];

/// Detect a contradiction between two content strings using the fixed
/// rule table (absolute quantifiers, boolean-state flips, negation, and
/// imperative-polarity flips). Checked in that order; the first match
/// wins.
pub fn detect_contradiction(new_content: &str, existing_content: &str) -> Option<ContradictionType> {
    let new_lower = new_content.to_lowercase();
    let existing_lower = existing_content.to_lowercase();

    let new_has_absolute = ABSOLUTE_MARKERS.iter().any(|m| new_lower.contains(m));
    let existing_has_absolute = ABSOLUTE_MARKERS.iter().any(|m| existing_lower.contains(m));
    if new_has_absolute && existing_has_absolute && new_lower != existing_lower {
        return Some(ContradictionType::Absolute);
    }

    for (pos, neg) in BOOLEAN_MARKERS {
        let new_pos = new_lower.contains(pos);
        let new_neg = new_lower.contains(neg);
        let existing_pos = existing_lower.contains(pos);
        let existing_neg = existing_lower.contains(neg);
        if (new_pos && existing_neg) || (new_neg && existing_pos) {
            return Some(ContradictionType::Boolean);
        }
    }

    for prefix in NEGATION_PREFIXES {
        if let Some(rest) = new_lower.strip_prefix(prefix) {
            if !rest.is_empty() && existing_lower.contains(rest.trim()) {
                return Some(ContradictionType::Negation);
            }
        }
        if let Some(rest) = existing_lower.strip_prefix(prefix) {
            if !rest.is_empty() && new_lower.contains(rest.trim()) {
                return Some(ContradictionType::Negation);
            }
        }
    }

    for (pos, neg) in IMPERATIVE_MARKERS {
        let new_pos = new_lower.contains(pos) && !new_lower.contains(neg);
        let new_neg = new_lower.contains(neg);
        let existing_pos = existing_lower.contains(pos) && !existing_lower.contains(neg);
        let existing_neg = existing_lower.contains(neg);
        if (new_pos && existing_neg) || (new_neg && existing_pos) {
            return Some(ContradictionType::Imperative);
        }
    }

    None
}

/// Arbitrate new content against the full list of existing candidate
/// matches.
///
/// Algorithm:
/// 1. No candidates -> CREATE.
/// 2. Otherwise take the highest-similarity candidate.
/// 3. `top.similarity >= duplicate` -> REINFORCE unconditionally; the
///    duplicate band always wins, even over a contradiction.
/// 4. `top.similarity >= high_match` -> run the contradiction detector
///    against the top candidate only; a detected contradiction forces
///    SUPERSEDE, otherwise UPDATE.
/// 5. `top.similarity >= medium_match` -> CREATE_LINKED, with
///    `related_ids` set to every candidate at or above `medium_match`.
/// 6. Otherwise -> CREATE.
pub fn arbitrate(new_content: &str, candidates: &[GateCandidate], thresholds: &GateThresholds) -> GateDecision {
    let Some(top) = candidates
        .iter()
        .max_by(|a, b| a.similarity.partial_cmp(&b.similarity).unwrap_or(std::cmp::Ordering::Equal))
    else {
        return GateDecision {
            action: GateAction::Create,
            reason: "no candidates, creating a new memory".to_string(),
            similarity: 0.0,
            candidate: None,
            contradiction_detected: false,
            contradiction_type: None,
            related_ids: Vec::new(),
        };
    };

    let s = top.similarity;

    if s >= thresholds.duplicate {
        return GateDecision {
            action: GateAction::Reinforce,
            reason: "near-exact duplicate, reinforcing existing memory".to_string(),
            similarity: s,
            candidate: Some(top.memory_id),
            contradiction_detected: false,
            contradiction_type: None,
            related_ids: Vec::new(),
        };
    }

    if s >= thresholds.high_match {
        if let Some(kind) = detect_contradiction(new_content, top.content) {
            return GateDecision {
                action: GateAction::Supersede,
                reason: format!("{kind:?} contradiction detected against memory {}", top.memory_id),
                similarity: s,
                candidate: Some(top.memory_id),
                contradiction_detected: true,
                contradiction_type: Some(kind),
                related_ids: Vec::new(),
            };
        }
        return GateDecision {
            action: GateAction::Update,
            reason: "high similarity, updating existing memory in place".to_string(),
            similarity: s,
            candidate: Some(top.memory_id),
            contradiction_detected: false,
            contradiction_type: None,
            related_ids: Vec::new(),
        };
    }

    if s >= thresholds.medium_match {
        let related_ids = candidates
            .iter()
            .filter(|c| c.similarity >= thresholds.medium_match)
            .map(|c| c.memory_id)
            .collect();
        return GateDecision {
            action: GateAction::CreateLinked,
            reason: "medium similarity, creating a linked sibling".to_string(),
            similarity: s,
            candidate: Some(top.memory_id),
            contradiction_detected: false,
            contradiction_type: None,
            related_ids,
        };
    }

    GateDecision {
        action: GateAction::Create,
        reason: "no meaningful match, creating a new memory".to_string(),
        similarity: s,
        candidate: Some(top.memory_id),
        contradiction_detected: false,
        contradiction_type: None,
        related_ids: Vec::new(),
    }
}

/// In-memory conflict log (bounded ring buffer). A production deployment
/// persists these via `MemoryStore`; this module only defines the audit
/// shape and query helpers over an in-process buffer, used by tests and
/// the default non-persistent mode.
#[derive(Debug, Default)]
pub struct ConflictLog {
    records: std::collections::VecDeque<crate::model::ConflictRecord>,
    capacity: usize,
}

/// Summary counts returned by `ConflictLog::stats`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConflictStats {
    pub total: usize,
    pub contradictions: usize,
    pub by_action: std::collections::HashMap<String, usize>,
}

impl ConflictLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: std::collections::VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, record: crate::model::ConflictRecord) {
        if self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Most recent records first, limited to `limit`.
    pub fn get_recent_conflicts(&self, limit: usize) -> Vec<crate::model::ConflictRecord> {
        self.records.iter().rev().take(limit).cloned().collect()
    }

    pub fn get_conflict_stats(&self) -> ConflictStats {
        let mut stats = ConflictStats::default();
        stats.total = self.records.len();
        for r in &self.records {
            if r.contradiction_detected {
                stats.contradictions += 1;
            }
            *stats
                .by_action
                .entry(format!("{:?}", r.action))
                .or_default() += 1;
        }
        stats
    }
}

/// Build a `ConflictRecord` from a decision, truncating previews per
/// spec 4.7.
pub fn to_conflict_record(
    decision: &GateDecision,
    new_content: &str,
    existing_content: &str,
    new_memory_id: Option<i64>,
    spec_folder: impl Into<String>,
    at: DateTime<Utc>,
) -> crate::model::ConflictRecord {
    crate::model::ConflictRecord {
        timestamp: at,
        action: decision.action,
        new_memory_id,
        existing_memory_id: decision.candidate,
        similarity: decision.similarity,
        reason: decision.reason.clone(),
        contradiction_detected: decision.contradiction_detected,
        contradiction_type: decision.contradiction_type,
        new_content_preview: crate::model::truncate_preview(new_content),
        existing_content_preview: crate::model::truncate_preview(existing_content),
        spec_folder: spec_folder.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one<'a>(existing: &'a str, sim: f64) -> Vec<GateCandidate<'a>> {
        vec![GateCandidate {
            memory_id: 1,
            content: existing,
            similarity: sim,
        }]
    }

    #[test]
    fn empty_candidates_create() {
        let d = arbitrate("the sky is blue", &[], &GateThresholds::default());
        assert_eq!(d.action, GateAction::Create);
        assert_eq!(d.candidate, None);
        assert_eq!(d.similarity, 0.0);
    }

    #[test]
    fn duplicate_band_reinforces() {
        let d = arbitrate("the sky is blue", &one("the sky is green", 0.98), &GateThresholds::default());
        assert_eq!(d.action, GateAction::Reinforce);
    }

    #[test]
    fn duplicate_band_reinforces_even_with_a_contradiction() {
        let d = arbitrate(
            "the service always retries failed jobs",
            &one("the service never retries failed jobs", 0.99),
            &GateThresholds::default(),
        );
        assert_eq!(d.action, GateAction::Reinforce);
        assert!(!d.contradiction_detected);
    }

    #[test]
    fn high_band_updates() {
        let d = arbitrate("foo", &one("bar", 0.92), &GateThresholds::default());
        assert_eq!(d.action, GateAction::Update);
    }

    #[test]
    fn medium_band_creates_linked() {
        let d = arbitrate("foo", &one("bar", 0.80), &GateThresholds::default());
        assert_eq!(d.action, GateAction::CreateLinked);
        assert_eq!(d.related_ids, vec![1]);
    }

    #[test]
    fn low_similarity_creates_new() {
        let d = arbitrate("foo", &one("bar", 0.1), &GateThresholds::default());
        assert_eq!(d.action, GateAction::Create);
    }

    #[test]
    fn contradiction_in_high_match_band_forces_supersede() {
        let d = arbitrate(
            "the service always retries failed jobs",
            &one("the service never retries failed jobs", 0.92),
            &GateThresholds::default(),
        );
        assert_eq!(d.action, GateAction::Supersede);
        assert!(d.contradiction_detected);
        assert_eq!(d.contradiction_type, Some(ContradictionType::Absolute));
    }

    #[test]
    fn multi_candidate_picks_the_closest_match() {
        let candidates = vec![
            GateCandidate { memory_id: 1, content: "unrelated", similarity: 0.2 },
            GateCandidate { memory_id: 2, content: "foo bar", similarity: 0.85 },
            GateCandidate { memory_id: 3, content: "also related", similarity: 0.72 },
        ];
        let d = arbitrate("foo bar baz", &candidates, &GateThresholds::default());
        assert_eq!(d.candidate, Some(2));
        assert_eq!(d.action, GateAction::CreateLinked);
        let mut related = d.related_ids.clone();
        related.sort();
        assert_eq!(related, vec![2, 3]);
    }

    #[test]
    fn boolean_flip_is_detected() {
        let kind = detect_contradiction("feature flag is enabled", "feature flag is disabled");
        assert_eq!(kind, Some(ContradictionType::Boolean));
    }

    #[test]
    fn negation_is_detected() {
        let kind = detect_contradiction("not using redis for sessions", "using redis for sessions");
        assert_eq!(kind, Some(ContradictionType::Negation));
    }

    #[test]
    fn imperative_flip_is_detected() {
        let kind = detect_contradiction("you must review before merging", "you must not review before merging");
        assert_eq!(kind, Some(ContradictionType::Imperative));
    }

    #[test]
    fn no_contradiction_when_content_agrees() {
        assert_eq!(detect_contradiction("the sky is blue", "the sky is blue today"), None);
    }

    #[test]
    fn conflict_log_evicts_oldest_past_capacity() {
        let mut log = ConflictLog::new(2);
        let candidates = one("b", 0.5);
        let decision = arbitrate("a", &candidates, &GateThresholds::default());
        for i in 0..3 {
            log.record(to_conflict_record(&decision, "a", "b", Some(i), "proj", Utc::now()));
        }
        assert_eq!(log.get_recent_conflicts(10).len(), 2);
    }

    #[test]
    fn conflict_stats_counts_contradictions() {
        let mut log = ConflictLog::new(10);
        let candidates = one("never true", 0.92);
        let decision = arbitrate("always true", &candidates, &GateThresholds::default());
        log.record(to_conflict_record(&decision, "always true", "never true", Some(1), "proj", Utc::now()));
        let stats = log.get_conflict_stats();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.contradictions, 1);
    }
}
