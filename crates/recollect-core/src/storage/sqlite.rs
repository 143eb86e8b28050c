//! SQLite-backed `MemoryStore` + `FtsIndex` adapter.
//!
//! A single connection guarded by a mutex, matching the crate's general
//! "small embedded store, no connection pool" posture. FTS5 is used for
//! the on-disk full-text index; the in-process `bm25` module remains the
//! source of truth for ranking math so this index only needs to support
//! candidate retrieval.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::collaborators::{FtsIndex, MemoryStore};
use crate::error::{RecollectError, Result};
use crate::model::{ImportanceTier, Memory, MemoryType};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS memories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    spec_folder TEXT NOT NULL,
    file_path TEXT NOT NULL,
    title TEXT NOT NULL DEFAULT '',
    summary TEXT,
    content_hash TEXT NOT NULL DEFAULT '',
    memory_type TEXT NOT NULL,
    importance_tier TEXT NOT NULL,
    importance_weight REAL NOT NULL,
    trigger_phrases TEXT NOT NULL DEFAULT '[]',
    related_memories TEXT NOT NULL DEFAULT '[]',
    anchors TEXT NOT NULL DEFAULT '[]',
    last_cited TEXT,
    stability REAL NOT NULL,
    difficulty REAL NOT NULL,
    last_review TEXT,
    review_count INTEGER NOT NULL DEFAULT 0,
    access_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_memories_spec_folder ON memories(spec_folder);

CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
    body,
    content=''
);
";

/// SQLite-backed implementation of both storage contracts. Cheap to
/// clone-share via `Arc`; the internal connection is mutex-guarded
/// rather than pooled, matching the crate's single-writer assumption.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| RecollectError::StorageFailed(format!("open sqlite db: {e}")))?;
        Self::configure(&conn)?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| RecollectError::StorageFailed(format!("apply schema: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| RecollectError::StorageFailed(format!("open in-memory db: {e}")))?;
        Self::configure(&conn)?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| RecollectError::StorageFailed(format!("apply schema: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn configure(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| RecollectError::StorageFailed(format!("configure connection: {e}")))
    }

    fn row_to_memory(row: &rusqlite::Row) -> rusqlite::Result<Memory> {
        let memory_type_str: String = row.get("memory_type")?;
        let tier_str: String = row.get("importance_tier")?;
        let trigger_phrases_json: String = row.get("trigger_phrases")?;
        let related_json: String = row.get("related_memories")?;
        let anchors_json: String = row.get("anchors")?;

        Ok(Memory {
            id: row.get("id")?,
            spec_folder: row.get("spec_folder")?,
            file_path: row.get("file_path")?,
            title: row.get("title")?,
            summary: row.get("summary")?,
            content_hash: row.get("content_hash")?,
            memory_type: if memory_type_str == "semantic" {
                MemoryType::Semantic
            } else {
                MemoryType::Episodic
            },
            importance_tier: ImportanceTier::parse_lenient(&tier_str),
            importance_weight: row.get("importance_weight")?,
            trigger_phrases: serde_json::from_str(&trigger_phrases_json).unwrap_or_default(),
            related_memories: serde_json::from_str(&related_json).unwrap_or_default(),
            anchors: serde_json::from_str(&anchors_json).unwrap_or_default(),
            last_cited: row.get::<_, Option<String>>("last_cited")?.and_then(|s| {
                DateTime::parse_from_rfc3339(&s).ok().map(|d| d.with_timezone(&Utc))
            }),
            stability: row.get("stability")?,
            difficulty: row.get("difficulty")?,
            last_review: row.get::<_, Option<String>>("last_review")?.and_then(|s| {
                DateTime::parse_from_rfc3339(&s).ok().map(|d| d.with_timezone(&Utc))
            }),
            review_count: row.get("review_count")?,
            access_count: row.get("access_count")?,
            created_at: DateTime::parse_from_rfc3339(&row.get::<_, String>("created_at")?)
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            updated_at: DateTime::parse_from_rfc3339(&row.get::<_, String>("updated_at")?)
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }
}

#[async_trait]
impl MemoryStore for SqliteStore {
    async fn get(&self, id: i64) -> Result<Option<Memory>> {
        let conn = self.conn.lock().expect("sqlite connection mutex poisoned");
        conn.query_row("SELECT * FROM memories WHERE id = ?1", params![id], Self::row_to_memory)
            .optional()
            .map_err(|e| RecollectError::StorageFailed(format!("get memory {id}: {e}")))
    }

    async fn insert(&self, memory: &Memory) -> Result<i64> {
        let conn = self.conn.lock().expect("sqlite connection mutex poisoned");
        conn.execute(
            "INSERT INTO memories (
                spec_folder, file_path, title, summary, content_hash, memory_type,
                importance_tier, importance_weight, trigger_phrases, related_memories,
                anchors, last_cited, stability, difficulty, last_review, review_count,
                access_count, created_at, updated_at
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19)",
            params![
                memory.spec_folder,
                memory.file_path,
                memory.title,
                memory.summary,
                memory.content_hash,
                memory_type_str(memory.memory_type),
                tier_str(memory.importance_tier),
                memory.importance_weight,
                serde_json::to_string(&memory.trigger_phrases).unwrap_or_default(),
                serde_json::to_string(&memory.related_memories).unwrap_or_default(),
                serde_json::to_string(&memory.anchors).unwrap_or_default(),
                memory.last_cited.map(|d| d.to_rfc3339()),
                memory.stability,
                memory.difficulty,
                memory.last_review.map(|d| d.to_rfc3339()),
                memory.review_count,
                memory.access_count,
                memory.created_at.to_rfc3339(),
                memory.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| RecollectError::StorageFailed(format!("insert memory: {e}")))?;
        Ok(conn.last_insert_rowid())
    }

    async fn update(&self, memory: &Memory) -> Result<()> {
        let conn = self.conn.lock().expect("sqlite connection mutex poisoned");
        let rows = conn
            .execute(
                "UPDATE memories SET spec_folder=?1, file_path=?2, title=?3, summary=?4,
                 content_hash=?5, memory_type=?6, importance_tier=?7, importance_weight=?8,
                 trigger_phrases=?9, related_memories=?10, anchors=?11, last_cited=?12,
                 stability=?13, difficulty=?14, last_review=?15, review_count=?16,
                 access_count=?17, updated_at=?18
                 WHERE id=?19",
                params![
                    memory.spec_folder,
                    memory.file_path,
                    memory.title,
                    memory.summary,
                    memory.content_hash,
                    memory_type_str(memory.memory_type),
                    tier_str(memory.importance_tier),
                    memory.importance_weight,
                    serde_json::to_string(&memory.trigger_phrases).unwrap_or_default(),
                    serde_json::to_string(&memory.related_memories).unwrap_or_default(),
                    serde_json::to_string(&memory.anchors).unwrap_or_default(),
                    memory.last_cited.map(|d| d.to_rfc3339()),
                    memory.stability,
                    memory.difficulty,
                    memory.last_review.map(|d| d.to_rfc3339()),
                    memory.review_count,
                    memory.access_count,
                    memory.updated_at.to_rfc3339(),
                    memory.id,
                ],
            )
            .map_err(|e| RecollectError::StorageFailed(format!("update memory {}: {e}", memory.id)))?;
        if rows == 0 {
            return Err(RecollectError::NotFound(format!("memory {}", memory.id)));
        }
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().expect("sqlite connection mutex poisoned");
        let rows = conn
            .execute("DELETE FROM memories WHERE id = ?1", params![id])
            .map_err(|e| RecollectError::StorageFailed(format!("delete memory {id}: {e}")))?;
        if rows == 0 {
            return Err(RecollectError::NotFound(format!("memory {id}")));
        }
        Ok(())
    }

    async fn list_by_folder(&self, spec_folder: &str) -> Result<Vec<Memory>> {
        let conn = self.conn.lock().expect("sqlite connection mutex poisoned");
        let mut stmt = conn
            .prepare("SELECT * FROM memories WHERE spec_folder = ?1")
            .map_err(|e| RecollectError::StorageFailed(format!("prepare list query: {e}")))?;
        let rows = stmt
            .query_map(params![spec_folder], Self::row_to_memory)
            .map_err(|e| RecollectError::StorageFailed(format!("list memories: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| RecollectError::StorageFailed(format!("collect memories: {e}")))
    }

    async fn touch_access(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().expect("sqlite connection mutex poisoned");
        let rows = conn
            .execute(
                "UPDATE memories SET access_count = access_count + 1 WHERE id = ?1",
                params![id],
            )
            .map_err(|e| RecollectError::StorageFailed(format!("touch access {id}: {e}")))?;
        if rows == 0 {
            return Err(RecollectError::NotFound(format!("memory {id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl FtsIndex for SqliteStore {
    async fn index(&self, memory_id: i64, text: &str) -> Result<()> {
        let conn = self.conn.lock().expect("sqlite connection mutex poisoned");
        conn.execute(
            "INSERT INTO memories_fts (rowid, body) VALUES (?1, ?2)
             ON CONFLICT(rowid) DO UPDATE SET body = excluded.body",
            params![memory_id, text],
        )
        .map_err(|e| RecollectError::StorageFailed(format!("fts index {memory_id}: {e}")))?;
        Ok(())
    }

    async fn remove(&self, memory_id: i64) -> Result<()> {
        let conn = self.conn.lock().expect("sqlite connection mutex poisoned");
        conn.execute("DELETE FROM memories_fts WHERE rowid = ?1", params![memory_id])
            .map_err(|e| RecollectError::StorageFailed(format!("fts remove {memory_id}: {e}")))?;
        Ok(())
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<(i64, f64)>> {
        let conn = self.conn.lock().expect("sqlite connection mutex poisoned");
        let sanitized = sanitize_fts5_query(query);
        if sanitized.is_empty() {
            return Ok(Vec::new());
        }
        let mut stmt = conn
            .prepare("SELECT rowid, bm25(memories_fts) AS rank FROM memories_fts WHERE memories_fts MATCH ?1 ORDER BY rank LIMIT ?2")
            .map_err(|e| RecollectError::StorageFailed(format!("prepare fts search: {e}")))?;
        let rows = stmt
            .query_map(params![sanitized, limit as i64], |row| {
                let id: i64 = row.get(0)?;
                let rank: f64 = row.get(1)?;
                // FTS5's bm25() returns lower-is-better; invert to match
                // this crate's higher-is-better convention elsewhere.
                Ok((id, -rank))
            })
            .map_err(|e| RecollectError::StorageFailed(format!("fts search: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| RecollectError::StorageFailed(format!("collect fts results: {e}")))
    }
}

fn memory_type_str(t: MemoryType) -> &'static str {
    match t {
        MemoryType::Episodic => "episodic",
        MemoryType::Semantic => "semantic",
    }
}

fn tier_str(t: ImportanceTier) -> &'static str {
    match t {
        ImportanceTier::Constitutional => "constitutional",
        ImportanceTier::Critical => "critical",
        ImportanceTier::Important => "important",
        ImportanceTier::Normal => "normal",
        ImportanceTier::Temporary => "temporary",
        ImportanceTier::Deprecated => "deprecated",
    }
}

/// Strip characters meaningful to FTS5 query syntax that weren't meant
/// as such by the caller, so a stray `"` or `-` in user text doesn't
/// throw a syntax error. Each remaining term is quoted independently.
pub fn sanitize_fts5_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|term| {
            let cleaned: String = term.chars().filter(|c| c.is_alphanumeric() || *c == '_').collect();
            cleaned
        })
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{t}\""))
        .collect::<Vec<_>>()
        .join(" OR ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_memory() -> Memory {
        let mut m = Memory::new(0, "proj", "/tmp/a.md");
        m.title = "Deploy checklist".into();
        m
    }

    #[tokio::test]
    async fn insert_then_get_roundtrips() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store.insert(&sample_memory()).await.unwrap();
        let fetched = store.get(id).await.unwrap().unwrap();
        assert_eq!(fetched.title, "Deploy checklist");
    }

    #[tokio::test]
    async fn get_missing_returns_none() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.get(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_missing_is_not_found() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut m = sample_memory();
        m.id = 999;
        assert!(store.update(&m).await.is_err());
    }

    #[tokio::test]
    async fn touch_access_increments_count() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store.insert(&sample_memory()).await.unwrap();
        store.touch_access(id).await.unwrap();
        store.touch_access(id).await.unwrap();
        assert_eq!(store.get(id).await.unwrap().unwrap().access_count, 2);
    }

    #[tokio::test]
    async fn list_by_folder_filters_correctly() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert(&sample_memory()).await.unwrap();
        let mut other = sample_memory();
        other.spec_folder = "other-proj".into();
        store.insert(&other).await.unwrap();

        let results = store.list_by_folder("proj").await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn fts_index_and_search_roundtrip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store.insert(&sample_memory()).await.unwrap();
        store.index(id, "deploy checklist before shipping to production").await.unwrap();
        let hits = store.search("deploy", 10).await.unwrap();
        assert_eq!(hits[0].0, id);
    }

    #[test]
    fn sanitize_strips_fts5_syntax_characters() {
        let sanitized = sanitize_fts5_query("foo\"bar -baz");
        assert_eq!(sanitized, "\"foobar\" OR \"baz\"");
    }

    #[test]
    fn sanitize_empty_query_yields_empty_string() {
        assert_eq!(sanitize_fts5_query("   "), "");
    }
}
