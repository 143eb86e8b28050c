//! # Recollect Core
//!
//! Cognitive retrieval core for an agent memory engine: a library, not a
//! service. It owns the math and policy an agent's long-term memory
//! needs - FSRS-derived decay, a five-state lifecycle classifier,
//! composite ranking, hybrid BM25/vector search, trigger-phrase
//! matching, prediction-error arbitration between new and existing
//! memories, sleep-like consolidation, atomic on-disk persistence, a
//! session-scoped tool-result cache, and per-turn working memory - and
//! nothing about transport, storage engines, or embedding providers.
//! Those live behind the traits in [`collaborators`], so a host process
//! can wire in whatever SQL database, vector index, or embedding model
//! it likes.
//!
//! ## Quick start
//!
//! ```
//! use recollect_core::model::Memory;
//! use recollect_core::state::{classify, StateThresholds};
//! use chrono::Utc;
//!
//! let memory = Memory::new(1, "demo-project", "/tmp/demo.md");
//! let tier = classify(&memory, &StateThresholds::default(), Utc::now());
//! assert_eq!(tier, recollect_core::state::MemoryTier::Hot);
//! ```
//!
//! ## Feature flags
//!
//! - `sqlite-store` (default): a SQLite+FTS5-backed reference
//!   implementation of [`collaborators::MemoryStore`] and
//!   [`collaborators::FtsIndex`]. Disable it to depend on this crate
//!   with no database at all and supply your own adapters.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod bm25;
pub mod cache;
pub mod collaborators;
pub mod config;
pub mod consolidation;
pub mod error;
pub mod fsrs;
pub mod gate;
pub mod model;
pub mod scoring;
pub mod search;
pub mod state;
pub mod storage;
pub mod summary;
pub mod transaction;
pub mod triggers;
pub mod working_memory;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use config::RecollectConfig;
pub use error::{RecollectError, Result};
pub use model::Memory;
pub use state::MemoryTier;

#[cfg(feature = "sqlite-store")]
#[cfg_attr(docsrs, doc(cfg(feature = "sqlite-store")))]
pub use storage::SqliteStore;

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// FSRS model generation this crate's retrievability curve approximates.
pub const FSRS_GENERATION: u8 = 1;

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage: `use recollect_core::prelude::*;`.
pub mod prelude {
    pub use crate::bm25::{Bm25Hit, Bm25Index, Bm25SearchOptions};
    pub use crate::cache::{CacheStats, ToolCache};
    pub use crate::collaborators::{Clock, EmbeddingProvider, FtsIndex, MemoryStore, SystemClock, VectorIndex};
    pub use crate::config::RecollectConfig;
    pub use crate::consolidation::{ConsolidationEngine, ConsolidationOptions, ConsolidationResult};
    pub use crate::error::{RecollectError, Result};
    pub use crate::gate::{arbitrate, GateCandidate, GateDecision, GateThresholds};
    pub use crate::model::{GateAction, ImportanceTier, Memory, MemoryType, WorkingMemoryEntry};
    pub use crate::scoring::{score_five_factor, score_legacy};
    pub use crate::search::{search, FtsHit, LexicalSource, SearchQuery, SearchResult, VectorHit};
    pub use crate::state::{classify, MemoryTier, StateThresholds};
    pub use crate::triggers::{search_triggers, search_triggers_for_session, MatchType, TriggerMatch};
    pub use crate::working_memory::{DecayMode, WorkingMemoryStore};
}
