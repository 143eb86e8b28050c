//! Runtime configuration for the retrieval core.
//!
//! This is a plain, validated struct — not a config-file parser (file and
//! CLI parsing remain the embedding binary's job). `from_env` overlays a
//! handful of `RECOLLECT_*` environment variables the same way the
//! reference storage layer overlays a single encryption-key variable.

use crate::error::{RecollectError, Result};
use crate::state::StateThresholds;

/// Aggregates every overridable constant named across the spec.
#[derive(Debug, Clone)]
pub struct RecollectConfig {
    /// Master switch for the BM25 lexical index (C4). When off,
    /// `bm25::Bm25Index::search` returns an empty result.
    pub enable_bm25: bool,

    /// Five-state classifier thresholds (C2).
    pub state_thresholds: StateThresholds,

    /// Context-window caps applied after ranking (C2/C5).
    pub max_hot: usize,
    pub max_warm: usize,

    /// Tool cache sizing (C10).
    pub cache_max_entries: usize,
    pub cache_default_ttl_ms: i64,
    pub cache_cleanup_interval_ms: u64,

    /// Index-scan rate limit cooldown, in milliseconds (5.).
    pub index_scan_cooldown_ms: i64,

    /// Consolidation policy (C8).
    pub consolidation_dry_run: bool,
    pub consolidation_min_age_days: i64,
    pub consolidation_max_files: usize,
}

impl Default for RecollectConfig {
    fn default() -> Self {
        Self {
            enable_bm25: true,
            state_thresholds: StateThresholds::default(),
            max_hot: 5,
            max_warm: 10,
            cache_max_entries: 1000,
            cache_default_ttl_ms: 60_000,
            cache_cleanup_interval_ms: 60_000,
            index_scan_cooldown_ms: 60_000,
            consolidation_dry_run: true,
            consolidation_min_age_days: 7,
            consolidation_max_files: 50,
        }
    }
}

impl RecollectConfig {
    /// Build a config from defaults overlaid with `RECOLLECT_*` env vars.
    /// Unset or unparsable variables silently fall back to the default.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("RECOLLECT_ENABLE_BM25") {
            cfg.enable_bm25 = v != "0" && !v.eq_ignore_ascii_case("false");
        }
        if let Some(v) = env_f64("RECOLLECT_THRESHOLD_HOT") {
            cfg.state_thresholds.hot = v;
        }
        if let Some(v) = env_f64("RECOLLECT_THRESHOLD_WARM") {
            cfg.state_thresholds.warm = v;
        }
        if let Some(v) = env_f64("RECOLLECT_THRESHOLD_COLD") {
            cfg.state_thresholds.cold = v;
        }
        if let Some(v) = env_usize("RECOLLECT_MAX_HOT") {
            cfg.max_hot = v;
        }
        if let Some(v) = env_usize("RECOLLECT_MAX_WARM") {
            cfg.max_warm = v;
        }
        if let Some(v) = env_usize("RECOLLECT_CACHE_MAX_ENTRIES") {
            cfg.cache_max_entries = v;
        }
        if let Some(v) = env_i64("RECOLLECT_CACHE_DEFAULT_TTL_MS") {
            cfg.cache_default_ttl_ms = v;
        }
        if let Ok(v) = std::env::var("RECOLLECT_CONSOLIDATION_DRY_RUN") {
            cfg.consolidation_dry_run = v != "0" && !v.eq_ignore_ascii_case("false");
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate the ordering invariants the spec requires; never silently
    /// normalize a violation.
    pub fn validate(&self) -> Result<()> {
        self.state_thresholds.validate()?;
        if self.max_hot == 0 {
            return Err(RecollectError::InvalidInput(
                "max_hot must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn env_f64(key: &str) -> Option<f64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_i64(key: &str) -> Option<i64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(RecollectConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_bad_threshold_ordering() {
        let mut cfg = RecollectConfig::default();
        cfg.state_thresholds.warm = 0.9;
        assert!(cfg.validate().is_err());
    }
}
