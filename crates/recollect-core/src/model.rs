//! Core data model: `Memory`, `WorkingMemoryEntry`, `ConflictRecord`,
//! `CacheEntry`, and the consolidation-internal `PatternGroup`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::MemoryTier;

/// Episodic vs. semantic: raw recording vs. consolidated abstraction.
/// Only episodic memories are eligible for decay, pruning, and replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    Episodic,
    Semantic,
}

/// Importance tier. Constitutional and critical tiers are exempt from
/// attention decay and consolidation pruning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportanceTier {
    Constitutional,
    Critical,
    Important,
    Normal,
    Temporary,
    Deprecated,
}

impl ImportanceTier {
    /// Parse from a free-form string, falling back to `Normal` for
    /// anything unrecognized per spec 4.3 ("Unknown tier -> normal").
    pub fn parse_lenient(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "constitutional" => ImportanceTier::Constitutional,
            "critical" => ImportanceTier::Critical,
            "important" => ImportanceTier::Important,
            "temporary" => ImportanceTier::Temporary,
            "deprecated" => ImportanceTier::Deprecated,
            _ => ImportanceTier::Normal,
        }
    }

    /// Constitutional and critical tiers are exempt from attention decay
    /// and consolidation pruning.
    pub fn is_exempt_from_decay(&self) -> bool {
        matches!(
            self,
            ImportanceTier::Constitutional | ImportanceTier::Critical
        )
    }
}

/// A single Markdown memory artifact plus its index row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    /// Surrogate, unique, monotonic id.
    pub id: i64,
    /// Namespace grouping memories into a logical "project" scope.
    pub spec_folder: String,
    /// Absolute path to the canonical Markdown artifact.
    pub file_path: String,
    pub title: String,
    pub summary: Option<String>,
    /// Stable digest over the normalized body; changes iff the body changes.
    pub content_hash: String,
    pub memory_type: MemoryType,
    pub importance_tier: ImportanceTier,
    /// Independent of tier; may be updated without re-tiering.
    pub importance_weight: f64,
    pub trigger_phrases: Vec<String>,
    pub related_memories: Vec<i64>,
    pub anchors: Vec<String>,
    pub last_cited: Option<DateTime<Utc>>,

    // FSRS fields
    pub stability: f64,
    pub difficulty: f64,
    pub last_review: Option<DateTime<Utc>>,
    pub review_count: i64,

    pub access_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Memory {
    /// Construct a new memory with FSRS defaults (`stability = 1.0`,
    /// `difficulty = 5.0`) and every other field at its zero value.
    pub fn new(id: i64, spec_folder: impl Into<String>, file_path: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            spec_folder: spec_folder.into(),
            file_path: file_path.into(),
            title: String::new(),
            summary: None,
            content_hash: String::new(),
            memory_type: MemoryType::Episodic,
            importance_tier: ImportanceTier::Normal,
            importance_weight: 0.5,
            trigger_phrases: Vec::new(),
            related_memories: Vec::new(),
            anchors: Vec::new(),
            last_cited: None,
            stability: crate::fsrs::DEFAULT_STABILITY,
            difficulty: crate::fsrs::DEFAULT_DIFFICULTY,
            last_review: None,
            review_count: 0,
            access_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Days elapsed between `last_review` (falling back to `updated_at`,
    /// then `created_at`) and `at`. Never negative.
    pub fn days_since_last_review(&self, at: DateTime<Utc>) -> f64 {
        let reference = self.last_review.unwrap_or(self.updated_at);
        days_between(reference, at)
    }

    /// Days elapsed since the memory was last accessed, used by the state
    /// classifier's ARCHIVED rule. Falls back to `updated_at` when no
    /// review has happened yet.
    pub fn days_since_last_access(&self, at: DateTime<Utc>) -> f64 {
        let reference = self.last_review.unwrap_or(self.updated_at);
        days_between(reference, at)
    }
}

/// Elapsed days between two timestamps, clamped to zero for non-positive
/// deltas (covers future-dated or equal timestamps).
pub fn days_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    let ms = (later - earlier).num_milliseconds() as f64;
    (ms / 86_400_000.0).max(0.0)
}

/// Per-session, per-memory working-memory entry (C11).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingMemoryEntry {
    pub session_id: String,
    pub memory_id: i64,
    pub attention_score: f64,
    pub last_mentioned_turn: i64,
    pub tier: MemoryTier,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkingMemoryEntry {
    pub fn new(session_id: impl Into<String>, memory_id: i64, turn: i64, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.into(),
            memory_id,
            attention_score: 1.0,
            last_mentioned_turn: turn,
            tier: MemoryTier::Hot,
            created_at: now,
            updated_at: now,
        }
    }
}

/// The decision an arbitration pass (C7) reached, logged for audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateAction {
    Create,
    Reinforce,
    Update,
    CreateLinked,
    Supersede,
}

impl GateAction {
    /// Priority order for logging/arbitration, highest first:
    /// `SUPERSEDE > UPDATE > REINFORCE > CREATE_LINKED > CREATE`.
    pub fn priority(&self) -> u8 {
        match self {
            GateAction::Supersede => 4,
            GateAction::Update => 3,
            GateAction::Reinforce => 2,
            GateAction::CreateLinked => 1,
            GateAction::Create => 0,
        }
    }
}

/// One of the fixed contradiction rule categories (C7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContradictionType {
    Absolute,
    Boolean,
    Negation,
    Imperative,
}

/// Audit-log row recording a PE-gate decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub timestamp: DateTime<Utc>,
    pub action: GateAction,
    pub new_memory_id: Option<i64>,
    pub existing_memory_id: Option<i64>,
    pub similarity: f64,
    pub reason: String,
    pub contradiction_detected: bool,
    pub contradiction_type: Option<ContradictionType>,
    pub new_content_preview: String,
    pub existing_content_preview: String,
    pub spec_folder: String,
}

/// Truncate a content preview to at most 200 characters, appending `...`
/// when truncated, as required by spec 4.7/4.3.
pub fn truncate_preview(content: &str) -> String {
    const LIMIT: usize = 200;
    if content.chars().count() <= LIMIT {
        return content.to_string();
    }
    let truncated: String = content.chars().take(LIMIT).collect();
    format!("{truncated}...")
}

/// A tool-cache entry (C10).
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub tool_name: String,
    pub value: serde_json::Value,
    pub created_at: i64,
    pub expires_at: i64,
}

/// Transient grouping produced by the consolidation ABSTRACT phase (C8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    ExactDuplicate,
    TriggerSimilarity,
    TitleSimilarity,
}

#[derive(Debug, Clone)]
pub struct PatternGroup {
    pub pattern_type: PatternType,
    pub memories: Vec<i64>,
    pub representative: i64,
    pub strength: f64,
    pub occurrences: usize,
}
