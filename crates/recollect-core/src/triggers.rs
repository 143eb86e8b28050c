//! Deterministic trigger-phrase matching (C6).
//!
//! A lightweight companion to hybrid search: scans a turn's text for any
//! of a memory's registered trigger phrases using case-insensitive,
//! word-boundary-aware substring matching. No embeddings or ranking
//! math involved - this exists for fast, explainable recall of memories
//! an agent explicitly tagged with activation phrases.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::Memory;
use crate::working_memory::WorkingMemoryStore;

/// One matched memory plus which phrase fired.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerMatch {
    pub memory_id: i64,
    pub matched_phrase: String,
}

/// Whether a response came from plain phrase matching or also ran C11
/// working-memory co-activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchType {
    #[serde(rename = "trigger-phrase")]
    TriggerPhrase,
    #[serde(rename = "trigger-phrase-cognitive")]
    TriggerPhraseCognitive,
}

/// Response envelope returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerSearchResponse {
    pub count: usize,
    pub results: Vec<TriggerMatch>,
    pub latency_ms: u64,
    pub match_type: MatchType,
}

/// True if `phrase` occurs in `haystack` on word boundaries, both
/// case-folded. A "word boundary" here means the match isn't immediately
/// flanked by another alphanumeric character, so "cat" matches in
/// "the cat sat" but not in "concatenate".
fn word_boundary_contains(haystack: &str, phrase: &str) -> bool {
    if phrase.is_empty() {
        return false;
    }
    let haystack_lower = haystack.to_lowercase();
    let phrase_lower = phrase.to_lowercase();

    let hb = haystack_lower.as_bytes();
    let pb = phrase_lower.as_bytes();
    let mut start = 0;
    while let Some(rel) = haystack_lower[start..].find(&phrase_lower) {
        let idx = start + rel;
        let before_ok = idx == 0 || !is_word_byte(hb[idx - 1]);
        let end = idx + pb.len();
        let after_ok = end >= hb.len() || !is_word_byte(hb[end]);
        if before_ok && after_ok {
            return true;
        }
        start = idx + 1;
        if start >= haystack_lower.len() {
            break;
        }
    }
    false
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Scan a single memory's trigger phrases against `text`, returning the
/// first phrase that matches (memories may register many synonymous
/// phrases; only one match is needed to activate).
pub fn match_memory(memory: &Memory, text: &str) -> Option<TriggerMatch> {
    memory
        .trigger_phrases
        .iter()
        .find(|phrase| word_boundary_contains(text, phrase))
        .map(|phrase| TriggerMatch {
            memory_id: memory.id,
            matched_phrase: phrase.clone(),
        })
}

/// Scan a candidate set of memories against `text`, timing the pass.
pub fn search_triggers(memories: &[Memory], text: &str) -> TriggerSearchResponse {
    let started = Instant::now();
    let results: Vec<TriggerMatch> = memories.iter().filter_map(|m| match_memory(m, text)).collect();
    TriggerSearchResponse {
        count: results.len(),
        latency_ms: started.elapsed().as_millis() as u64,
        results,
        match_type: MatchType::TriggerPhrase,
    }
}

/// Session-aware variant of `search_triggers`. When `include_cognitive`
/// is set, every matched memory is activated in `working_memory` for
/// `session_id`/`turn_number` and the set as a whole is passed through
/// C11 co-activation, boosting memories mentioned together in this turn;
/// the response is tagged `trigger-phrase-cognitive`. When unset, this
/// behaves exactly like `search_triggers`.
pub fn search_triggers_for_session(
    memories: &[Memory],
    text: &str,
    session_id: &str,
    turn_number: i64,
    include_cognitive: bool,
    working_memory: &mut WorkingMemoryStore,
    now: DateTime<Utc>,
) -> TriggerSearchResponse {
    let started = Instant::now();
    let results: Vec<TriggerMatch> = memories.iter().filter_map(|m| match_memory(m, text)).collect();

    let match_type = if include_cognitive {
        let ids: Vec<i64> = results.iter().map(|r| r.memory_id).collect();
        for id in &ids {
            working_memory.activate(session_id, *id, turn_number, now);
        }
        working_memory.co_activate(session_id, &ids, now);
        MatchType::TriggerPhraseCognitive
    } else {
        MatchType::TriggerPhrase
    };

    TriggerSearchResponse {
        count: results.len(),
        latency_ms: started.elapsed().as_millis() as u64,
        results,
        match_type,
    }
}
