//! Consolidation engine (C8): a five-phase sleep-like maintenance pass
//! over episodic memories.
//!
//! REPLAY gathers eligible episodic memories, ABSTRACT groups them into
//! `PatternGroup`s by similarity signal, INTEGRATE turns groups whose
//! computed strength clears a threshold into semantic memories, PRUNE
//! archives every non-representative member of an integrated group, and
//! STRENGTHEN bumps the stability of frequently-accessed memories that
//! haven't been reviewed in a while. Defaults to dry-run so a host must
//! opt in to mutation.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RecollectError, Result};
use crate::fsrs::STRENGTHEN_STABILITY_CAP;
use crate::model::{Memory, MemoryType, PatternGroup, PatternType};

/// Minimum number of memories required to form a pattern group.
pub const MIN_GROUP_SIZE: usize = 2;
/// Memories untouched for this many days become REPLAY candidates.
pub const REPLAY_AFTER_DAYS: f64 = 7.0;
/// A group's computed strength must clear this bar to be INTEGRATEd;
/// groups below it are left alone and counted as skipped.
pub const INTEGRATE_STRENGTH_THRESHOLD: f64 = 0.6;
/// STRENGTHEN only considers memories accessed at least this many times.
pub const STRENGTHEN_ACCESS_FLOOR: i64 = 5;
/// STRENGTHEN skips memories reviewed more recently than this, so a
/// memory already fresh in the reviewer's mind isn't boosted again.
pub const STRENGTHEN_COOLDOWN_DAYS: f64 = 14.0;
/// STRENGTHEN multiplies stability by this factor, capped at
/// `STRENGTHEN_STABILITY_CAP`.
pub const STRENGTHEN_MULTIPLIER: f64 = 1.3;

/// Per-phase counters returned alongside the result, for observability.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsolidationMetrics {
    pub replayed: usize,
    pub groups_formed: usize,
    pub integrated: usize,
    /// Groups whose computed strength fell below the INTEGRATE threshold.
    pub skipped: usize,
    pub pruned: usize,
    pub strengthened: usize,
}

/// Outcome of a consolidation run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsolidationResult {
    pub dry_run: bool,
    pub metrics: ConsolidationMetrics,
    /// Ids of memories that would be (or were) pruned.
    pub pruned_ids: Vec<i64>,
    /// Ids of memories that would be (or were) strengthened.
    pub strengthened_ids: Vec<i64>,
    /// Synthetic semantic memories produced by INTEGRATE. Only populated
    /// (and only persisted by the caller) when `dry_run` is false.
    pub integrated_memories: Vec<Memory>,
    /// Memories whose stability was boosted by STRENGTHEN. Only
    /// populated when `dry_run` is false.
    pub strengthened_memories: Vec<Memory>,
    /// Id of the pre-deprecation snapshot taken before PRUNE archived
    /// anything. `None` on a dry run or when nothing was pruned.
    pub backup_id: Option<String>,
}

/// Options controlling a single run. `dry_run` defaults to `true`:
/// callers must explicitly opt into mutation.
#[derive(Debug, Clone)]
pub struct ConsolidationOptions {
    pub dry_run: bool,
    pub min_group_size: usize,
    pub replay_after_days: f64,
    pub integrate_strength_threshold: f64,
}

impl Default for ConsolidationOptions {
    fn default() -> Self {
        Self {
            dry_run: true,
            min_group_size: MIN_GROUP_SIZE,
            replay_after_days: REPLAY_AFTER_DAYS,
            integrate_strength_threshold: INTEGRATE_STRENGTH_THRESHOLD,
        }
    }
}

/// REPLAY: select episodic, non-decay-exempt memories last reviewed
/// more than `replay_after_days` ago.
fn replay(memories: &[Memory], options: &ConsolidationOptions, now: DateTime<Utc>) -> Vec<Memory> {
    memories
        .iter()
        .filter(|m| m.memory_type == MemoryType::Episodic)
        .filter(|m| !m.importance_tier.is_exempt_from_decay())
        .filter(|m| m.days_since_last_review(now) >= options.replay_after_days)
        .cloned()
        .collect()
}

/// Pick a group's representative: highest `access_count`, ties broken
/// by the most recently `updated_at` member.
fn pick_representative(ids: &[i64], memories_by_id: &HashMap<i64, &Memory>) -> i64 {
    *ids.iter()
        .max_by(|a, b| {
            let ma = memories_by_id[a];
            let mb = memories_by_id[b];
            ma.access_count.cmp(&mb.access_count).then(ma.updated_at.cmp(&mb.updated_at))
        })
        .expect("group must have at least one member")
}

/// Mean pairwise Jaccard similarity of the token sets `token_set`
/// extracts from each member of `ids`. A singleton group has nothing to
/// compare against and scores a neutral 1.0.
fn mean_pairwise_jaccard<F>(ids: &[i64], memories_by_id: &HashMap<i64, &Memory>, token_set: F) -> f64
where
    F: Fn(&Memory) -> HashSet<String>,
{
    if ids.len() < 2 {
        return 1.0;
    }
    let sets: Vec<HashSet<String>> = ids.iter().map(|id| token_set(memories_by_id[id])).collect();
    let mut total = 0.0;
    let mut pairs = 0usize;
    for i in 0..sets.len() {
        for j in (i + 1)..sets.len() {
            let intersection = sets[i].intersection(&sets[j]).count();
            let union = sets[i].union(&sets[j]).count();
            total += if union == 0 { 0.0 } else { intersection as f64 / union as f64 };
            pairs += 1;
        }
    }
    if pairs == 0 {
        0.0
    } else {
        total / pairs as f64
    }
}

fn trigger_set(m: &Memory) -> HashSet<String> {
    m.trigger_phrases.iter().map(|p| p.to_lowercase()).collect()
}

fn title_token_set(m: &Memory) -> HashSet<String> {
    m.title.to_lowercase().split_whitespace().map(|s| s.to_string()).collect()
}

/// ABSTRACT: group replayed memories by a coarse similarity signal.
/// Grouping keys are tried in a fixed order - exact content-hash
/// duplicates first, then shared trigger phrases, then shared title
/// tokens - and a memory only ever joins the first group it matches.
/// Each group's `strength` is the mean pairwise similarity of its
/// members under that signal (exact duplicates are trivially 1.0).
fn abstract_groups(replayed: &[Memory], memories_by_id: &HashMap<i64, &Memory>, min_group_size: usize) -> Vec<PatternGroup> {
    let mut groups: Vec<PatternGroup> = Vec::new();
    let mut claimed: HashSet<i64> = HashSet::new();

    // Exact duplicates by content hash.
    let mut by_hash: HashMap<&str, Vec<i64>> = HashMap::new();
    for m in replayed {
        if !m.content_hash.is_empty() {
            by_hash.entry(m.content_hash.as_str()).or_default().push(m.id);
        }
    }
    for (_, ids) in by_hash {
        if ids.len() >= min_group_size {
            let representative = pick_representative(&ids, memories_by_id);
            for id in &ids {
                claimed.insert(*id);
            }
            groups.push(PatternGroup {
                pattern_type: PatternType::ExactDuplicate,
                occurrences: ids.len(),
                memories: ids,
                representative,
                strength: 1.0,
            });
        }
    }

    // Shared trigger phrases among the remaining, unclaimed memories.
    let mut by_phrase: HashMap<&str, Vec<i64>> = HashMap::new();
    for m in replayed {
        if claimed.contains(&m.id) {
            continue;
        }
        for phrase in &m.trigger_phrases {
            by_phrase.entry(phrase.as_str()).or_default().push(m.id);
        }
    }
    for (_, ids) in by_phrase {
        let unclaimed: Vec<i64> = ids.into_iter().filter(|id| !claimed.contains(id)).collect();
        if unclaimed.len() >= min_group_size {
            let representative = pick_representative(&unclaimed, memories_by_id);
            let strength = mean_pairwise_jaccard(&unclaimed, memories_by_id, trigger_set);
            for id in &unclaimed {
                claimed.insert(*id);
            }
            groups.push(PatternGroup {
                pattern_type: PatternType::TriggerSimilarity,
                occurrences: unclaimed.len(),
                memories: unclaimed,
                representative,
                strength,
            });
        }
    }

    // Shared title tokens among whatever remains.
    let mut by_title: HashMap<String, Vec<i64>> = HashMap::new();
    for m in replayed {
        if claimed.contains(&m.id) {
            continue;
        }
        for token in m.title.to_lowercase().split_whitespace() {
            if token.len() > 3 {
                by_title.entry(token.to_string()).or_default().push(m.id);
            }
        }
    }
    for (_, ids) in by_title {
        let unclaimed: Vec<i64> = ids.into_iter().filter(|id| !claimed.contains(id)).collect();
        if unclaimed.len() >= min_group_size {
            let representative = pick_representative(&unclaimed, memories_by_id);
            let strength = mean_pairwise_jaccard(&unclaimed, memories_by_id, title_token_set);
            for id in &unclaimed {
                claimed.insert(*id);
            }
            groups.push(PatternGroup {
                pattern_type: PatternType::TitleSimilarity,
                occurrences: unclaimed.len(),
                memories: unclaimed,
                representative,
                strength,
            });
        }
    }

    groups
}

/// INTEGRATE: turn each qualifying pattern group into one synthetic
/// semantic memory, seeded from the representative member. `groups` is
/// expected to already be filtered down to those clearing the strength
/// threshold.
fn integrate(groups: &[PatternGroup], memories_by_id: &HashMap<i64, &Memory>, now: DateTime<Utc>) -> Vec<Memory> {
    groups
        .iter()
        .filter_map(|group| {
            let rep = memories_by_id.get(&group.representative)?;
            let mut semantic = (*rep).clone();
            semantic.memory_type = MemoryType::Semantic;
            semantic.related_memories = group.memories.clone();
            semantic.updated_at = now;
            semantic.summary = Some(format!(
                "Consolidated from {} related memories ({:?} pattern).",
                group.occurrences, group.pattern_type
            ));
            Some(semantic)
        })
        .collect()
}

/// PRUNE: once a group has been folded into an INTEGRATE semantic
/// memory, every other member is archived unconditionally - the
/// representative already carries the group forward, so there is no
/// separate importance gate here.
fn prune(integrated_groups: &[PatternGroup]) -> Vec<i64> {
    integrated_groups
        .iter()
        .flat_map(|group| group.memories.iter().filter(|id| **id != group.representative).copied())
        .collect()
}

/// STRENGTHEN: memories accessed often but not reviewed recently get
/// their stability bumped (capped), rewarding demonstrated usefulness
/// without double-counting a review that just happened.
fn strengthen(memories: &[Memory], now: DateTime<Utc>) -> Vec<Memory> {
    memories
        .iter()
        .filter(|m| m.access_count >= STRENGTHEN_ACCESS_FLOOR)
        .filter(|m| m.days_since_last_review(now) >= STRENGTHEN_COOLDOWN_DAYS)
        .map(|m| {
            let mut boosted = m.clone();
            boosted.stability = apply_strengthen_cap(boosted.stability, STRENGTHEN_MULTIPLIER);
            boosted.updated_at = now;
            boosted
        })
        .collect()
}

/// Apply the STRENGTHEN stability cap to a single memory's stability.
pub fn apply_strengthen_cap(stability: f64, multiplier: f64) -> f64 {
    (stability * multiplier).min(STRENGTHEN_STABILITY_CAP)
}

/// Single-execution guard: only one consolidation run may be in flight
/// per engine instance.
#[derive(Debug, Default)]
pub struct ConsolidationEngine {
    running: AtomicBool,
}

impl ConsolidationEngine {
    pub fn new() -> Self {
        Self { running: AtomicBool::new(false) }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run the full REPLAY -> ABSTRACT -> INTEGRATE -> PRUNE ->
    /// STRENGTHEN pipeline over `memories`. Read-only unless
    /// `options.dry_run` is explicitly set to `false`; even then this
    /// function only computes the result - persisting it is the
    /// caller's job, typically through a checkpoint-backed transaction.
    pub fn run(&self, memories: &[Memory], options: &ConsolidationOptions, now: DateTime<Utc>) -> Result<ConsolidationResult> {
        if self.running.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            return Err(RecollectError::InvalidInput("a consolidation run is already in progress".into()));
        }

        let result = self.run_inner(memories, options, now);
        self.running.store(false, Ordering::SeqCst);
        result
    }

    fn run_inner(&self, memories: &[Memory], options: &ConsolidationOptions, now: DateTime<Utc>) -> Result<ConsolidationResult> {
        let replayed = replay(memories, options, now);
        let memories_by_id: HashMap<i64, &Memory> = memories.iter().map(|m| (m.id, m)).collect();
        let groups = abstract_groups(&replayed, &memories_by_id, options.min_group_size);

        let (integrated_groups, skipped_groups): (Vec<PatternGroup>, Vec<PatternGroup>) =
            groups.iter().cloned().partition(|g| g.strength >= options.integrate_strength_threshold);

        let integrated_memories = integrate(&integrated_groups, &memories_by_id, now);
        let pruned_ids = prune(&integrated_groups);
        let strengthened = strengthen(memories, now);
        let strengthened_ids: Vec<i64> = strengthened.iter().map(|m| m.id).collect();

        let backup_id = if !options.dry_run && !pruned_ids.is_empty() {
            Some(format!("consolidation-backup-{}", now.timestamp_millis()))
        } else {
            None
        };

        Ok(ConsolidationResult {
            dry_run: options.dry_run,
            metrics: ConsolidationMetrics {
                replayed: replayed.len(),
                groups_formed: groups.len(),
                integrated: integrated_groups.len(),
                skipped: skipped_groups.len(),
                pruned: pruned_ids.len(),
                strengthened: strengthened.len(),
            },
            pruned_ids,
            strengthened_ids,
            integrated_memories: if options.dry_run { Vec::new() } else { integrated_memories },
            strengthened_memories: if options.dry_run { Vec::new() } else { strengthened },
            backup_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn old_episodic(id: i64, days_ago: i64, hash: &str) -> Memory {
        let now = Utc::now();
        let mut m = Memory::new(id, "proj", format!("/tmp/{id}.md"));
        m.memory_type = MemoryType::Episodic;
        m.content_hash = hash.to_string();
        m.updated_at = now - Duration::days(days_ago);
        m
    }

    #[test]
    fn empty_input_yields_empty_result() {
        let engine = ConsolidationEngine::new();
        let result = engine.run(&[], &ConsolidationOptions::default(), Utc::now()).unwrap();
        assert_eq!(result.metrics.replayed, 0);
        assert!(result.pruned_ids.is_empty());
    }

    #[test]
    fn duplicate_group_forms_and_integrates_when_not_dry_run() {
        let memories: Vec<Memory> = (0..3).map(|i| old_episodic(i, 10, "same-hash")).collect();
        let engine = ConsolidationEngine::new();
        let options = ConsolidationOptions { dry_run: false, ..Default::default() };
        let result = engine.run(&memories, &options, Utc::now()).unwrap();
        assert_eq!(result.metrics.groups_formed, 1);
        assert_eq!(result.integrated_memories.len(), 1);
        assert_eq!(result.integrated_memories[0].memory_type, MemoryType::Semantic);
    }

    #[test]
    fn dry_run_never_returns_integrated_or_strengthened_memories() {
        let memories: Vec<Memory> = (0..3).map(|i| old_episodic(i, 10, "same-hash")).collect();
        let engine = ConsolidationEngine::new();
        let result = engine.run(&memories, &ConsolidationOptions::default(), Utc::now()).unwrap();
        assert!(result.dry_run);
        assert!(result.integrated_memories.is_empty());
        assert!(result.strengthened_memories.is_empty());
        assert!(result.backup_id.is_none());
        assert_eq!(result.metrics.integrated, 1);
    }

    #[test]
    fn below_min_group_size_forms_no_groups() {
        let memories: Vec<Memory> = (0..1).map(|i| old_episodic(i, 10, "same-hash")).collect();
        let engine = ConsolidationEngine::new();
        let result = engine.run(&memories, &ConsolidationOptions::default(), Utc::now()).unwrap();
        assert_eq!(result.metrics.groups_formed, 0);
    }

    #[test]
    fn two_exact_duplicates_now_meet_the_minimum_group_size() {
        let memories: Vec<Memory> = (0..2).map(|i| old_episodic(i, 10, "same-hash")).collect();
        let engine = ConsolidationEngine::new();
        let result = engine.run(&memories, &ConsolidationOptions::default(), Utc::now()).unwrap();
        assert_eq!(result.metrics.groups_formed, 1);
    }

    #[test]
    fn representative_is_the_member_with_the_highest_access_count() {
        let mut a = old_episodic(1, 10, "same-hash");
        let mut b = old_episodic(2, 10, "same-hash");
        a.access_count = 1;
        b.access_count = 9;
        let options = ConsolidationOptions { dry_run: false, ..Default::default() };
        let result = ConsolidationEngine::new().run(&[a, b], &options, Utc::now()).unwrap();
        assert_eq!(result.integrated_memories[0].id, 2);
    }

    #[test]
    fn low_strength_group_is_skipped_not_integrated() {
        let now = Utc::now();
        let mut a = old_episodic(1, 10, "");
        let mut b = old_episodic(2, 10, "");
        a.trigger_phrases = vec!["deploy".into(), "rollback".into(), "staging".into()];
        b.trigger_phrases = vec!["deploy".into()];

        let options = ConsolidationOptions { dry_run: false, ..Default::default() };
        let result = ConsolidationEngine::new().run(&[a, b], &options, now).unwrap();
        assert_eq!(result.metrics.groups_formed, 1);
        assert_eq!(result.metrics.integrated, 0);
        assert_eq!(result.metrics.skipped, 1);
        assert!(result.integrated_memories.is_empty());
        assert!(result.pruned_ids.is_empty());
    }

    #[test]
    fn high_strength_trigger_group_integrates_and_prunes_the_rest() {
        let mut a = old_episodic(1, 10, "");
        let mut b = old_episodic(2, 10, "");
        let mut c = old_episodic(3, 10, "");
        a.trigger_phrases = vec!["deploy checklist".into()];
        b.trigger_phrases = vec!["deploy checklist".into()];
        c.trigger_phrases = vec!["deploy checklist".into()];
        a.access_count = 5;

        let options = ConsolidationOptions { dry_run: false, ..Default::default() };
        let result = ConsolidationEngine::new().run(&[a, b, c], &options, Utc::now()).unwrap();
        assert_eq!(result.metrics.integrated, 1);
        // Identical trigger sets give Jaccard 1.0, so both non-representative
        // members get pruned.
        assert_eq!(result.pruned_ids.len(), 2);
        assert!(!result.pruned_ids.contains(&1));
        assert!(result.backup_id.is_some());
    }

    #[test]
    fn concurrent_run_is_rejected() {
        let engine = ConsolidationEngine::new();
        engine.running.store(true, Ordering::SeqCst);
        let result = engine.run(&[], &ConsolidationOptions::default(), Utc::now());
        assert!(result.is_err());
    }

    #[test]
    fn strengthen_requires_access_count_and_a_cooldown_since_last_review() {
        let now = Utc::now();
        let mut frequent_but_fresh = Memory::new(1, "proj", "/tmp/a.md");
        frequent_but_fresh.access_count = 10;
        frequent_but_fresh.last_review = Some(now);

        let mut frequent_and_stale = Memory::new(2, "proj", "/tmp/b.md");
        frequent_and_stale.access_count = 10;
        frequent_and_stale.last_review = Some(now - Duration::days(20));

        let mut rare_and_stale = Memory::new(3, "proj", "/tmp/c.md");
        rare_and_stale.access_count = 1;
        rare_and_stale.last_review = Some(now - Duration::days(20));

        let options = ConsolidationOptions { dry_run: false, ..Default::default() };
        let result = ConsolidationEngine::new()
            .run(&[frequent_but_fresh, frequent_and_stale, rare_and_stale], &options, now)
            .unwrap();
        assert_eq!(result.strengthened_ids, vec![2]);
        assert_eq!(
            result.strengthened_memories[0].stability,
            apply_strengthen_cap(crate::fsrs::DEFAULT_STABILITY, STRENGTHEN_MULTIPLIER)
        );
    }

    #[test]
    fn strengthen_cap_never_exceeds_limit() {
        assert_eq!(apply_strengthen_cap(400.0, 2.0), STRENGTHEN_STABILITY_CAP);
    }

    #[test]
    fn exempt_tiers_are_never_replayed() {
        let mut m = old_episodic(1, 100, "h");
        m.importance_tier = crate::model::ImportanceTier::Critical;
        let replayed = replay(&[m], &ConsolidationOptions::default(), Utc::now());
        assert!(replayed.is_empty());
    }
}
