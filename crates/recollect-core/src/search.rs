//! Hybrid search orchestration (C5).
//!
//! Runs two merges in sequence: first a lexical merge that unions FTS5
//! and BM25 hits (min-max normalized per channel, tagged with which
//! channel(s) contributed), then a lexical/vector fusion (RRF or linear)
//! over that merged lexical score. The result feeds the C3 composite
//! scorer, filtered by C2 lifecycle state before returning a tiered
//! content view.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bm25::{Bm25Hit, Bm25Index, Bm25SearchOptions};
use crate::error::{RecollectError, Result};
use crate::model::Memory;
use crate::scoring::{self, PatternSignals};
use crate::state::{MemoryTier, StateThresholds};

/// How the merged-lexical score and vector hits are combined.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FusionMode {
    /// Reciprocal Rank Fusion: `sum(1 / (k + rank))` per source.
    ReciprocalRankFusion,
    /// Weighted linear blend of each source's normalized score.
    Linear { keyword_weight: f64, vector_weight: f64 },
}

impl Default for FusionMode {
    fn default() -> Self {
        FusionMode::ReciprocalRankFusion
    }
}

/// RRF's rank-smoothing constant.
pub const RRF_K: f64 = 60.0;

/// A candidate vector hit, `(memory_id, cosine_similarity in [-1, 1])`.
#[derive(Debug, Clone, Copy)]
pub struct VectorHit {
    pub memory_id: i64,
    pub similarity: f32,
}

/// A candidate FTS5 hit, `(memory_id, bm25-or-rank-derived score)`. The
/// caller runs `FtsIndex::search` and passes the raw results in here;
/// this module does no I/O of its own.
#[derive(Debug, Clone, Copy)]
pub struct FtsHit {
    pub memory_id: i64,
    pub score: f64,
}

/// Which channel(s) contributed to a memory's lexical score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LexicalSource {
    Fts5,
    Bm25,
    Both,
}

/// One lexical hit after the FTS5/BM25 merge.
#[derive(Debug, Clone, Copy)]
pub struct LexicalHit {
    pub memory_id: i64,
    pub score: f64,
    pub source: LexicalSource,
}

/// Search request parameters.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub text: String,
    pub spec_folder: Option<String>,
    pub limit: usize,
    pub fusion: FusionMode,
    pub min_score: f64,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            text: String::new(),
            spec_folder: None,
            limit: 10,
            fusion: FusionMode::default(),
            min_score: 0.0,
        }
    }
}

/// One search result, carrying the merged lexical score, which lexical
/// channel(s) produced it, and the final composite score after C3/C2 are
/// applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub memory_id: i64,
    pub combined_lexical_score: f64,
    /// `None` when the result came from the vector channel alone.
    pub source: Option<LexicalSource>,
    pub composite_score: f64,
    pub tier: MemoryTier,
    pub content_view: String,
}

/// Validate a raw query string before it reaches any retrieval source.
pub fn validate_query(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(RecollectError::empty_query());
    }
    if text.chars().count() > 2000 {
        return Err(RecollectError::InvalidInput(
            "query exceeds maximum length of 2000 characters".into(),
        ));
    }
    Ok(())
}

/// Normalize a list of `(id, raw_score)` pairs to `[0, 1]` by min-max
/// scaling. An empty list stays empty; a list where every score ties
/// maps every id to `1.0`.
fn min_max_normalize(pairs: &[(i64, f64)]) -> HashMap<i64, f64> {
    if pairs.is_empty() {
        return HashMap::new();
    }
    let min = pairs.iter().map(|(_, s)| *s).fold(f64::INFINITY, f64::min);
    let max = pairs.iter().map(|(_, s)| *s).fold(f64::NEG_INFINITY, f64::max);
    if (max - min).abs() < f64::EPSILON {
        return pairs.iter().map(|(id, _)| (*id, 1.0)).collect();
    }
    pairs.iter().map(|(id, s)| (*id, (s - min) / (max - min))).collect()
}

/// Stage 1: merge FTS5 and BM25 hits into a single lexical score per
/// memory id. When both channels contribute a hit for an id, each
/// channel's raw scores are first min-max normalized within that
/// channel, then combined `0.5 * fts5 + 0.5 * bm25`. When only one
/// channel contributes, its native (non-normalized) score is preserved
/// as-is and tagged with that channel alone.
pub fn merge_lexical(fts5_hits: &[FtsHit], bm25_hits: &[Bm25Hit]) -> Vec<LexicalHit> {
    let fts5_pairs: Vec<(i64, f64)> = fts5_hits.iter().map(|h| (h.memory_id, h.score)).collect();
    let bm25_pairs: Vec<(i64, f64)> = bm25_hits.iter().map(|h| (h.doc_id, h.score)).collect();

    let fts5_raw: HashMap<i64, f64> = fts5_pairs.iter().copied().collect();
    let bm25_raw: HashMap<i64, f64> = bm25_pairs.iter().copied().collect();
    let fts5_norm = min_max_normalize(&fts5_pairs);
    let bm25_norm = min_max_normalize(&bm25_pairs);

    let mut ids: Vec<i64> = fts5_raw.keys().chain(bm25_raw.keys()).copied().collect();
    ids.sort_unstable();
    ids.dedup();

    ids.into_iter()
        .map(|id| match (fts5_raw.get(&id), bm25_raw.get(&id)) {
            (Some(_), Some(_)) => {
                let f = fts5_norm.get(&id).copied().unwrap_or(0.0);
                let b = bm25_norm.get(&id).copied().unwrap_or(0.0);
                LexicalHit {
                    memory_id: id,
                    score: 0.5 * f + 0.5 * b,
                    source: LexicalSource::Both,
                }
            }
            (Some(f), None) => LexicalHit {
                memory_id: id,
                score: *f,
                source: LexicalSource::Fts5,
            },
            (None, Some(b)) => LexicalHit {
                memory_id: id,
                score: *b,
                source: LexicalSource::Bm25,
            },
            (None, None) => unreachable!("id came from one of the two maps"),
        })
        .collect()
}

fn rrf_contribution(rank: usize) -> f64 {
    1.0 / (RRF_K + (rank + 1) as f64)
}

/// Stage 2: fuse the merged lexical hits with vector hits using the
/// requested fusion mode. Degrades gracefully to lexical-only scoring
/// when `vector_hits` is empty (embedding provider unavailable).
pub fn fuse_lexical_and_vector(
    lexical: &[LexicalHit],
    vector_hits: &[VectorHit],
    fusion: FusionMode,
) -> HashMap<i64, f64> {
    match fusion {
        FusionMode::ReciprocalRankFusion => {
            let mut ranked: Vec<&LexicalHit> = lexical.iter().collect();
            ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

            let mut scores: HashMap<i64, f64> = HashMap::new();
            for (rank, hit) in ranked.iter().enumerate() {
                *scores.entry(hit.memory_id).or_default() += rrf_contribution(rank);
            }
            for (rank, hit) in vector_hits.iter().enumerate() {
                *scores.entry(hit.memory_id).or_default() += rrf_contribution(rank);
            }
            scores
        }
        FusionMode::Linear {
            keyword_weight,
            vector_weight,
        } => {
            let lexical_pairs: Vec<(i64, f64)> = lexical.iter().map(|h| (h.memory_id, h.score)).collect();
            let vec_pairs: Vec<(i64, f64)> = vector_hits
                .iter()
                .map(|h| (h.memory_id, h.similarity as f64))
                .collect();
            let lexical_norm = min_max_normalize(&lexical_pairs);
            let vec_norm = min_max_normalize(&vec_pairs);

            let mut ids: Vec<i64> = lexical_norm.keys().chain(vec_norm.keys()).copied().collect();
            ids.sort_unstable();
            ids.dedup();

            ids.into_iter()
                .map(|id| {
                    let k = lexical_norm.get(&id).copied().unwrap_or(0.0);
                    let v = vec_norm.get(&id).copied().unwrap_or(0.0);
                    (id, k * keyword_weight + v * vector_weight)
                })
                .collect()
        }
    }
}

/// Select the content view returned alongside a result, tiered by
/// lifecycle state: HOT/WARM get the full body, COLD and below get the
/// summary (falling back to a truncated body when no summary exists).
pub fn select_content_view(memory: &Memory, tier: MemoryTier, full_body: &str) -> String {
    match tier {
        MemoryTier::Hot | MemoryTier::Warm => full_body.to_string(),
        MemoryTier::Cold | MemoryTier::Dormant | MemoryTier::Archived => memory
            .summary
            .clone()
            .unwrap_or_else(|| crate::model::truncate_preview(full_body)),
    }
}

/// Run a full hybrid search pass over an already-loaded candidate set.
///
/// `fts5_hits` and `vector_hits` are supplied by the caller (via
/// `FtsIndex`/`VectorIndex`); this module does no I/O of its own.
/// `bodies` must contain the full Markdown/plain-text body for every
/// memory in `candidates`, keyed by id - retrieval of those bodies from
/// storage is the caller's responsibility (through `MemoryStore`).
pub fn search(
    query: &SearchQuery,
    bm25: &Bm25Index,
    fts5_hits: &[FtsHit],
    vector_hits: &[VectorHit],
    candidates: &[Memory],
    bodies: &HashMap<i64, String>,
    thresholds: &StateThresholds,
    now: DateTime<Utc>,
) -> Result<Vec<SearchResult>> {
    validate_query(&query.text)?;

    let bm25_opts = Bm25SearchOptions {
        limit: None,
        spec_folder: query.spec_folder.clone(),
    };
    let bm25_hits = bm25.search(&query.text, &bm25_opts);
    let lexical = merge_lexical(fts5_hits, &bm25_hits);
    let source_by_id: HashMap<i64, LexicalSource> = lexical.iter().map(|h| (h.memory_id, h.source)).collect();
    let fused = fuse_lexical_and_vector(&lexical, vector_hits, query.fusion);

    let by_id: HashMap<i64, &Memory> = candidates.iter().map(|m| (m.id, m)).collect();

    let mut results: Vec<SearchResult> = fused
        .into_iter()
        .filter_map(|(id, lexical_score)| {
            let memory = by_id.get(&id)?;
            let tier = crate::state::classify(memory, thresholds, now);
            let similarity_pct = (lexical_score * 100.0).min(100.0);
            let breakdown = scoring::score_five_factor(
                memory,
                similarity_pct,
                &PatternSignals::default(),
                now,
            );
            let composite = breakdown.total();
            if composite < query.min_score {
                return None;
            }
            let body = bodies.get(&id).map(String::as_str).unwrap_or_default();
            Some(SearchResult {
                memory_id: id,
                combined_lexical_score: lexical_score,
                source: source_by_id.get(&id).copied(),
                composite_score: composite,
                tier,
                content_view: select_content_view(memory, tier, body),
            })
        })
        .collect();

    results.sort_by(|a, b| {
        b.composite_score
            .partial_cmp(&a.composite_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    results.truncate(query.limit);
    Ok(results)
}
