//! Split persistence layer.
//!
//! A relational SQLite store and a flat vector store share one index
//! directory. The relational side is the authority for all derived data;
//! the vector side is append-mostly and rebuilt on deletions.

mod sqlite;
mod vector;

pub use sqlite::{DB_FILE, SqliteStore, SymbolFilter, WriteBatch};
pub use vector::{ID_MAP_FILE, VECTORS_FILE, VectorStore};

use crate::error::Result;
use std::path::Path;

/// Both halves of the split store, opened together.
pub struct IndexStore {
    pub sqlite: SqliteStore,
    pub vectors: parking_lot::Mutex<VectorStore>,
}

impl IndexStore {
    pub fn open(index_dir: &Path, dimension: usize) -> Result<Self> {
        Ok(Self {
            sqlite: SqliteStore::open(index_dir)?,
            vectors: parking_lot::Mutex::new(VectorStore::open(index_dir, dimension)?),
        })
    }

    pub fn open_existing(index_dir: &Path, dimension: usize) -> Result<Self> {
        Ok(Self {
            sqlite: SqliteStore::open_existing(index_dir)?,
            vectors: parking_lot::Mutex::new(VectorStore::open(index_dir, dimension)?),
        })
    }

    /// Check that the two halves agree on embedding cardinality/ordering.
    pub fn verify_integrity(&self) -> Result<()> {
        let count = self.vectors.lock().len();
        self.sqlite.verify_embedding_integrity(count)
    }
}
