//! Capability-handle collaborators (C6 plumbing): narrow trait contracts
//! for the external systems this crate is deliberately agnostic about
//! (embeddings, vector search, full-text search, persistence, markdown,
//! time). Concrete adapters live behind the `sqlite-store` feature or in
//! the embedding host's own crate; tests wire in fakes directly.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::Memory;

/// Converts raw Markdown memory bodies into plain-text for summaries and
/// lexical indexing. The default implementation used in tests is the
/// crate's own `summary` module; a real deployment may swap in a fuller
/// CommonMark-aware parser.
pub trait MarkdownParser: Send + Sync {
    fn to_plain_text(&self, markdown: &str) -> String;
}

/// Turns text into a dense embedding vector. Implementations may call out
/// to a local model or a remote API; callers must treat failures as
/// recoverable (fall back to lexical-only search) rather than fatal.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    fn dimensions(&self) -> usize;
}

/// A nearest-neighbor index over embedding vectors keyed by memory id.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, memory_id: i64, vector: &[f32]) -> Result<()>;
    async fn remove(&self, memory_id: i64) -> Result<()>;
    /// Returns `(memory_id, cosine_similarity)` pairs, best first.
    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<(i64, f32)>>;
}

/// A full-text search index (e.g. SQLite FTS5). Distinct from the crate's
/// own in-memory BM25 index so a host can swap in a database-backed one
/// without touching the ranking math.
#[async_trait]
pub trait FtsIndex: Send + Sync {
    async fn index(&self, memory_id: i64, text: &str) -> Result<()>;
    async fn remove(&self, memory_id: i64) -> Result<()>;
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<(i64, f64)>>;
}

/// Durable storage for `Memory` rows. The `sqlite-store` feature provides
/// a concrete `SqliteStore` implementation; anything satisfying this
/// trait can stand in for it in tests or alternate hosts.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn get(&self, id: i64) -> Result<Option<Memory>>;
    async fn insert(&self, memory: &Memory) -> Result<i64>;
    async fn update(&self, memory: &Memory) -> Result<()>;
    async fn delete(&self, id: i64) -> Result<()>;
    async fn list_by_folder(&self, spec_folder: &str) -> Result<Vec<Memory>>;
    async fn touch_access(&self, id: i64) -> Result<()>;
}

/// Source of wall-clock time, injected so tests can control elapsed time
/// without sleeping.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Production clock backed by `SystemTime`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Test double returning a fixed, externally-advanceable time.
#[derive(Debug)]
pub struct FixedClock {
    millis: std::sync::atomic::AtomicI64,
}

impl FixedClock {
    pub fn new(millis: i64) -> Self {
        Self {
            millis: std::sync::atomic::AtomicI64::new(millis),
        }
    }

    pub fn advance(&self, delta_ms: i64) {
        self.millis
            .fetch_add(delta_ms, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn set(&self, millis: i64) {
        self.millis.store(millis, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_ms(&self) -> i64 {
        self.millis.load(std::sync::atomic::Ordering::SeqCst)
    }
}
