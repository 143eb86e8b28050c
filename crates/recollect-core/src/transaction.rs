//! Atomic transaction manager (C9).
//!
//! Writes a memory's markdown body to a sibling temp file, fsyncs it, and
//! renames it into place - the save either fully lands or the original
//! file is untouched. The write is then coupled to an indexing step: a
//! caller-supplied `index_fn` runs against the freshly-written canonical
//! path, and if it fails the just-written file is quarantined by renaming
//! it to a `_pending` sibling rather than left live and unindexed. A
//! bounded recovery sweep later finds those `_pending` files, restores
//! them to their canonical names, and re-runs the indexer.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::{RecollectError, Result};

/// Counters accumulated across transaction manager operations, for
/// observability.
#[derive(Debug, Clone, Default)]
pub struct TransactionMetrics {
    pub successful_transactions: u64,
    pub failed_transactions: u64,
    pub rollback_count: u64,
    pub pending_files_created: u64,
    pub pending_files_recovered: u64,
    pub last_failure_reason: Option<String>,
    pub last_failure_time: Option<DateTime<Utc>>,
}

/// Upper bound on how many pending files a single recovery sweep will
/// ever touch in one call, regardless of `max_files`, so a corrupted
/// storage tree can't turn recovery into an unbounded scan.
pub const MAX_RECOVERY_FILES: usize = 10_000;
/// Default per-call bound on how many pending files one sweep restores.
pub const DEFAULT_RECOVERY_BATCH: usize = 50;
/// How many directory levels deep a recovery sweep will descend.
const MAX_RECOVERY_DEPTH: usize = 16;

/// What happened to a save that failed after the rename but during
/// indexing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveStatus {
    Success,
    Pending,
    RolledBack,
}

/// Outcome of an `atomic_save` call.
#[derive(Debug, Clone)]
pub struct SaveOutcome {
    pub status: SaveStatus,
    /// Where the content ended up: the canonical path on `Success`, the
    /// pending path on `Pending`, the (now removed) canonical path on
    /// `RolledBack`.
    pub file_path: PathBuf,
    pub error: Option<String>,
}

/// Behavior when `index_fn` fails after the write has already landed.
#[derive(Debug, Clone, Copy)]
pub struct SaveOptions {
    /// Quarantine the file at a `_pending` sibling path rather than
    /// leaving it live and unindexed. Default `true`.
    pub create_pending_on_failure: bool,
    /// Delete the file outright instead of quarantining it. Only takes
    /// effect when `create_pending_on_failure` is `false`.
    pub rollback_on_failure: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            create_pending_on_failure: true,
            rollback_on_failure: false,
        }
    }
}

/// Result of a `recover` sweep.
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    /// Total pending files found in the tree, independent of `max_files`.
    pub found: usize,
    /// How many of those were actually attempted this call.
    pub processed: usize,
    pub recovered: usize,
    pub failed: usize,
}

/// The pending-file path for a target: the sibling file obtained by
/// inserting `_pending` before the extension, e.g.
/// `/data/memories/foo.md` -> `/data/memories/foo_pending.md`.
/// Invertible via `canonical_path`.
pub fn pending_path(target: &Path) -> PathBuf {
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    let stem = target.file_stem().and_then(|s| s.to_str()).unwrap_or("memory");
    let ext = target.extension().and_then(|e| e.to_str()).unwrap_or("md");
    dir.join(format!("{stem}_pending.{ext}"))
}

/// The canonical path a pending file quarantines, the inverse of
/// `pending_path`. A pending path without a `_pending` suffix on its
/// stem is returned unchanged.
pub fn canonical_path(pending: &Path) -> PathBuf {
    let dir = pending.parent().unwrap_or_else(|| Path::new("."));
    let stem = pending.file_stem().and_then(|s| s.to_str()).unwrap_or("memory");
    let ext = pending.extension().and_then(|e| e.to_str()).unwrap_or("md");
    let stem = stem.strip_suffix("_pending").unwrap_or(stem);
    dir.join(format!("{stem}.{ext}"))
}

fn is_pending_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.ends_with("_pending.md"))
        .unwrap_or(false)
}

fn tmp_path(target: &Path) -> PathBuf {
    let mut os = target.as_os_str().to_os_string();
    os.push(".tmp");
    PathBuf::from(os)
}

/// Transaction manager bound to an allowed base directory. Saves outside
/// this directory, or not ending in `.md`, are rejected.
pub struct TransactionManager {
    base_dir: PathBuf,
    metrics: std::sync::Mutex<TransactionMetrics>,
}

impl TransactionManager {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            metrics: std::sync::Mutex::new(TransactionMetrics::default()),
        }
    }

    pub fn metrics(&self) -> TransactionMetrics {
        self.metrics.lock().expect("transaction metrics mutex poisoned").clone()
    }

    /// Reject paths that don't end in `.md`, contain a `..` traversal
    /// segment, or fall outside the allowed base directory.
    fn validate_path(&self, path: &Path) -> Result<()> {
        if path.extension().and_then(|e| e.to_str()) != Some("md") {
            return Err(RecollectError::PathAccessDenied(format!(
                "{} does not end in .md",
                path.display()
            )));
        }
        if path.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(RecollectError::PathAccessDenied(format!(
                "{} contains a parent-directory traversal segment",
                path.display()
            )));
        }
        if !path.starts_with(&self.base_dir) {
            return Err(RecollectError::PathAccessDenied(format!(
                "{} escapes the allowed base directory {}",
                path.display(),
                self.base_dir.display()
            )));
        }
        Ok(())
    }

    fn record_failure(&self, reason: String, now: DateTime<Utc>) {
        let mut metrics = self.metrics.lock().expect("transaction metrics mutex poisoned");
        metrics.failed_transactions += 1;
        metrics.last_failure_reason = Some(reason);
        metrics.last_failure_time = Some(now);
    }

    /// Write `content` to `target`, then invoke `index_fn(target)`.
    ///
    /// Algorithm (spec 4.9):
    /// 1. Validate `target` (`.md` extension, under the allowed base
    ///    directory, no traversal).
    /// 2. Write a sibling `.tmp` file, fsync it, atomically rename it
    ///    onto `target`.
    /// 3. Invoke `index_fn(target)`.
    /// 4. On success, return `Success`.
    /// 5. On indexing failure, quarantine the already-written file by
    ///    renaming it to its pending path (`create_pending_on_failure`,
    ///    the default), or delete it (`rollback_on_failure`), or return
    ///    the error as-is if neither is set.
    pub fn atomic_save(
        &self,
        target: &Path,
        content: &str,
        options: &SaveOptions,
        now: DateTime<Utc>,
        index_fn: impl FnOnce(&Path) -> Result<()>,
    ) -> Result<SaveOutcome> {
        self.validate_path(target)?;

        let tmp = tmp_path(target);
        {
            let mut file = File::create(&tmp)
                .map_err(|e| RecollectError::StorageFailed(format!("create temp file: {e}")))?;
            file.write_all(content.as_bytes())
                .map_err(|e| RecollectError::StorageFailed(format!("write temp file: {e}")))?;
            file.sync_all()
                .map_err(|e| RecollectError::StorageFailed(format!("fsync temp file: {e}")))?;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| RecollectError::StorageFailed(format!("create target dir: {e}")))?;
        }

        if let Err(e) = fs::rename(&tmp, target) {
            let msg = format!("rename into place failed: {e}");
            self.record_failure(msg.clone(), now);
            return Err(RecollectError::StorageFailed(msg));
        }

        if let Some(parent) = target.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        match index_fn(target) {
            Ok(()) => {
                let mut metrics = self.metrics.lock().expect("transaction metrics mutex poisoned");
                metrics.successful_transactions += 1;
                Ok(SaveOutcome {
                    status: SaveStatus::Success,
                    file_path: target.to_path_buf(),
                    error: None,
                })
            }
            Err(e) => {
                self.record_failure(e.to_string(), now);
                if options.create_pending_on_failure {
                    let pending = pending_path(target);
                    fs::rename(target, &pending).map_err(|rename_err| {
                        RecollectError::StorageFailed(format!(
                            "indexing failed ({e}) and quarantine rename also failed: {rename_err}"
                        ))
                    })?;
                    let mut metrics = self.metrics.lock().expect("transaction metrics mutex poisoned");
                    metrics.pending_files_created += 1;
                    Ok(SaveOutcome {
                        status: SaveStatus::Pending,
                        file_path: pending,
                        error: Some(e.to_string()),
                    })
                } else if options.rollback_on_failure {
                    fs::remove_file(target)
                        .map_err(|rm_err| RecollectError::StorageFailed(format!("rollback remove failed: {rm_err}")))?;
                    let mut metrics = self.metrics.lock().expect("transaction metrics mutex poisoned");
                    metrics.rollback_count += 1;
                    Ok(SaveOutcome {
                        status: SaveStatus::RolledBack,
                        file_path: target.to_path_buf(),
                        error: Some(e.to_string()),
                    })
                } else {
                    Err(e)
                }
            }
        }
    }

    fn find_pending_files(&self) -> Result<Vec<PathBuf>> {
        let mut out = Vec::new();
        self.walk(&self.base_dir, 0, &mut out)?;
        out.sort();
        Ok(out)
    }

    fn walk(&self, dir: &Path, depth: usize, out: &mut Vec<PathBuf>) -> Result<()> {
        if depth > MAX_RECOVERY_DEPTH || out.len() >= MAX_RECOVERY_FILES || !dir.exists() {
            return Ok(());
        }
        let entries = fs::read_dir(dir).map_err(|e| RecollectError::StorageFailed(format!("read dir: {e}")))?;
        for entry in entries {
            let entry = entry.map_err(|e| RecollectError::StorageFailed(format!("read dir entry: {e}")))?;
            let path = entry.path();
            if out.len() >= MAX_RECOVERY_FILES {
                break;
            }
            if path.is_dir() {
                self.walk(&path, depth + 1, out)?;
            } else if is_pending_file(&path) {
                out.push(path);
            }
        }
        Ok(())
    }

    /// Sweep the base directory for `_pending.md` files left by a prior
    /// crash: rename each back to its canonical path, then invoke
    /// `index_fn` against it. Bounded to `max_files` per call.
    pub fn recover(&self, max_files: usize, mut index_fn: impl FnMut(&Path) -> Result<()>) -> Result<RecoveryReport> {
        let pending = self.find_pending_files()?;
        let found = pending.len();
        let mut report = RecoveryReport {
            found,
            ..Default::default()
        };

        for path in pending.into_iter().take(max_files) {
            report.processed += 1;
            let canonical = canonical_path(&path);
            match fs::rename(&path, &canonical) {
                Ok(()) => match index_fn(&canonical) {
                    Ok(()) => {
                        report.recovered += 1;
                        let mut metrics = self.metrics.lock().expect("transaction metrics mutex poisoned");
                        metrics.pending_files_recovered += 1;
                    }
                    Err(_) => report.failed += 1,
                },
                Err(_) => report.failed += 1,
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_path_is_a_sibling_file_not_a_subdirectory() {
        let p = pending_path(Path::new("/data/memories/foo.md"));
        assert_eq!(p, PathBuf::from("/data/memories/foo_pending.md"));
    }

    #[test]
    fn pending_path_and_canonical_path_are_inverses() {
        let original = Path::new("/data/memories/foo.md");
        let pending = pending_path(original);
        assert_eq!(canonical_path(&pending), original);
    }

    #[test]
    fn atomic_save_invokes_index_fn_after_rename() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("memory.md");
        let mgr = TransactionManager::new(dir.path());
        let indexed_path = std::sync::Mutex::new(None);

        let outcome = mgr
            .atomic_save(&target, "hello", &SaveOptions::default(), Utc::now(), |p| {
                assert!(p.exists());
                *indexed_path.lock().unwrap() = Some(p.to_path_buf());
                Ok(())
            })
            .unwrap();

        assert_eq!(outcome.status, SaveStatus::Success);
        assert_eq!(indexed_path.into_inner().unwrap().unwrap(), target);
        assert!(target.exists());
        assert_eq!(mgr.metrics().successful_transactions, 1);
    }

    #[test]
    fn atomic_save_overwrites_existing_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("memory.md");
        let mgr = TransactionManager::new(dir.path());
        mgr.atomic_save(&target, "first", &SaveOptions::default(), Utc::now(), |_| Ok(())).unwrap();
        mgr.atomic_save(&target, "second", &SaveOptions::default(), Utc::now(), |_| Ok(())).unwrap();

        let contents = fs::read_to_string(&target).unwrap();
        assert_eq!(contents, "second");
    }

    #[test]
    fn failed_index_fn_quarantines_the_written_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("memory.md");
        let mgr = TransactionManager::new(dir.path());

        let outcome = mgr
            .atomic_save(&target, "hello", &SaveOptions::default(), Utc::now(), |_| {
                Err(RecollectError::IndexUnavailable("fts5 offline".into()))
            })
            .unwrap();

        assert_eq!(outcome.status, SaveStatus::Pending);
        assert!(!target.exists());
        assert!(outcome.file_path.exists());
        assert_eq!(outcome.file_path, pending_path(&target));
        assert_eq!(mgr.metrics().pending_files_created, 1);
        assert_eq!(mgr.metrics().failed_transactions, 1);
        assert!(mgr.metrics().last_failure_reason.is_some());
    }

    #[test]
    fn failed_index_fn_with_rollback_option_deletes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("memory.md");
        let mgr = TransactionManager::new(dir.path());
        let options = SaveOptions {
            create_pending_on_failure: false,
            rollback_on_failure: true,
        };

        let outcome = mgr
            .atomic_save(&target, "hello", &options, Utc::now(), |_| {
                Err(RecollectError::IndexUnavailable("fts5 offline".into()))
            })
            .unwrap();

        assert_eq!(outcome.status, SaveStatus::RolledBack);
        assert!(!target.exists());
        assert_eq!(mgr.metrics().rollback_count, 1);
    }

    #[test]
    fn non_md_target_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("memory.json");
        let mgr = TransactionManager::new(dir.path());
        let err = mgr.atomic_save(&target, "hello", &SaveOptions::default(), Utc::now(), |_| Ok(()));
        assert!(matches!(err, Err(RecollectError::PathAccessDenied(_))));
    }

    #[test]
    fn target_outside_base_dir_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let mgr = TransactionManager::new(dir.path());
        let target = other.path().join("memory.md");
        let err = mgr.atomic_save(&target, "hello", &SaveOptions::default(), Utc::now(), |_| Ok(()));
        assert!(matches!(err, Err(RecollectError::PathAccessDenied(_))));
    }

    #[test]
    fn recover_restores_pending_files_and_reindexes_them() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = TransactionManager::new(dir.path());
        fs::write(dir.path().join("a_pending.md"), b"a").unwrap();
        fs::write(dir.path().join("b_pending.md"), b"b").unwrap();

        let mut indexed = Vec::new();
        let report = mgr
            .recover(10, |p| {
                indexed.push(p.to_path_buf());
                Ok(())
            })
            .unwrap();

        assert_eq!(report.found, 2);
        assert_eq!(report.processed, 2);
        assert_eq!(report.recovered, 2);
        assert!(dir.path().join("a.md").exists());
        assert!(dir.path().join("b.md").exists());
        assert_eq!(mgr.metrics().pending_files_recovered, 2);
    }

    #[test]
    fn recover_is_bounded_by_max_files() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = TransactionManager::new(dir.path());
        fs::write(dir.path().join("a_pending.md"), b"a").unwrap();
        fs::write(dir.path().join("b_pending.md"), b"b").unwrap();
        fs::write(dir.path().join("c_pending.md"), b"c").unwrap();

        let report = mgr.recover(2, |_| Ok(())).unwrap();
        assert_eq!(report.found, 3);
        assert_eq!(report.processed, 2);
        assert_eq!(report.recovered, 2);
        assert!(dir.path().join("c_pending.md").exists());
    }

    #[test]
    fn recover_on_empty_directory_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = TransactionManager::new(dir.path());
        let report = mgr.recover(DEFAULT_RECOVERY_BATCH, |_| Ok(())).unwrap();
        assert_eq!(report.found, 0);
    }
}
