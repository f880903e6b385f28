//! Flat vector store for semantic search.
//!
//! Exact nearest-neighbor over L2-normalized vectors using inner product
//! (cosine similarity once normalized). Vector ids are dense and
//! sequential; deletion rebuilds the whole store and is kept off the hot
//! path. Persistence is two files next to the relational database:
//! `vectors.bin` (raw f32 matrix with a small header) and
//! `vector_id_map.bin` (symbol_id <-> vector_id pairs).

use crate::error::{CerberusError, Result};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

pub const VECTORS_FILE: &str = "vectors.bin";
pub const ID_MAP_FILE: &str = "vector_id_map.bin";

const MAGIC: &[u8; 4] = b"CVEC";
const FORMAT_VERSION: u32 = 1;

pub struct VectorStore {
    dimension: usize,
    /// Row-major, `len * dimension` floats, every row unit-length.
    data: Vec<f32>,
    /// symbol_id -> vector_id
    id_map: BTreeMap<i64, i64>,
    index_dir: PathBuf,
}

impl VectorStore {
    /// Load the store from `index_dir`, or create an empty one.
    ///
    /// The dimension is fixed at construction; a persisted store with a
    /// different dimension is an integrity error.
    pub fn open(index_dir: &Path, dimension: usize) -> Result<Self> {
        std::fs::create_dir_all(index_dir)?;
        let vectors_path = index_dir.join(VECTORS_FILE);

        let mut store = Self {
            dimension,
            data: Vec::new(),
            id_map: BTreeMap::new(),
            index_dir: index_dir.to_path_buf(),
        };

        if vectors_path.exists() {
            store.load()?;
        }
        Ok(store)
    }

    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn contains_symbol(&self, symbol_id: i64) -> bool {
        self.id_map.contains_key(&symbol_id)
    }

    /// Add a batch of vectors; returns their dense sequential vector ids.
    pub fn add_vectors_batch(
        &mut self,
        symbol_ids: &[i64],
        vectors: &[Vec<f32>],
    ) -> Result<Vec<i64>> {
        if symbol_ids.len() != vectors.len() {
            return Err(CerberusError::Integrity {
                reason: format!(
                    "batch mismatch: {} symbol ids vs {} vectors",
                    symbol_ids.len(),
                    vectors.len()
                ),
            });
        }
        let start = self.len() as i64;
        let mut ids = Vec::with_capacity(symbol_ids.len());
        for (offset, (symbol_id, vector)) in symbol_ids.iter().zip(vectors).enumerate() {
            if vector.len() != self.dimension {
                return Err(CerberusError::Integrity {
                    reason: format!(
                        "vector dimension {} does not match store dimension {}",
                        vector.len(),
                        self.dimension
                    ),
                });
            }
            let vector_id = start + offset as i64;
            self.data.extend(normalized(vector));
            self.id_map.insert(*symbol_id, vector_id);
            ids.push(vector_id);
        }
        Ok(ids)
    }

    /// Exact top-k search. Returns `(score, vector_id)` pairs, best first.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(f32, i64)> {
        if self.is_empty() || query.len() != self.dimension {
            return Vec::new();
        }
        let query = normalized(query);
        let mut scored: Vec<(f32, i64)> = (0..self.len())
            .map(|row| {
                let offset = row * self.dimension;
                let vector = &self.data[offset..offset + self.dimension];
                let score = vector.iter().zip(&query).map(|(a, b)| a * b).sum();
                (score, row as i64)
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k.min(scored.len()));
        scored
    }

    /// Reverse lookup from vector id to symbol id.
    pub fn symbol_id_for(&self, vector_id: i64) -> Option<i64> {
        self.id_map
            .iter()
            .find(|(_, v)| **v == vector_id)
            .map(|(s, _)| *s)
    }

    /// Remove vectors by id, rebuilding the store with dense ids.
    ///
    /// Returns the surviving `(symbol_id, new_vector_id)` mapping so the
    /// relational side can be renumbered in step.
    pub fn remove_vectors(&mut self, vector_ids: &[i64]) -> Vec<(i64, i64)> {
        if vector_ids.is_empty() {
            return self.id_map.iter().map(|(s, v)| (*s, *v)).collect();
        }
        let removing: std::collections::HashSet<i64> = vector_ids.iter().copied().collect();

        let mut new_data = Vec::new();
        let mut remaining = Vec::new();
        let mut next_id: i64 = 0;

        // Preserve vector order so surviving rows stay dense and sorted.
        let mut by_vector: Vec<(i64, i64)> = self.id_map.iter().map(|(s, v)| (*v, *s)).collect();
        by_vector.sort_unstable();

        for (vector_id, symbol_id) in by_vector {
            if removing.contains(&vector_id) {
                continue;
            }
            let offset = vector_id as usize * self.dimension;
            new_data.extend_from_slice(&self.data[offset..offset + self.dimension]);
            remaining.push((symbol_id, next_id));
            next_id += 1;
        }

        self.data = new_data;
        self.id_map = remaining.iter().map(|(s, v)| (*s, *v)).collect();
        remaining
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.id_map.clear();
    }

    /// Persist both files. The matrix and the id map are written together;
    /// a partial pair is treated as corruption on load.
    pub fn save(&self) -> Result<()> {
        let vectors_path = self.index_dir.join(VECTORS_FILE);
        let map_path = self.index_dir.join(ID_MAP_FILE);

        let mut buf = Vec::with_capacity(16 + self.data.len() * 4);
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        buf.extend_from_slice(&(self.dimension as u32).to_le_bytes());
        buf.extend_from_slice(&(self.len() as u64).to_le_bytes());
        for value in &self.data {
            buf.extend_from_slice(&value.to_le_bytes());
        }
        write_atomic(&vectors_path, &buf)?;

        let mut map_buf = Vec::with_capacity(8 + self.id_map.len() * 16);
        map_buf.extend_from_slice(&(self.id_map.len() as u64).to_le_bytes());
        for (symbol_id, vector_id) in &self.id_map {
            map_buf.extend_from_slice(&symbol_id.to_le_bytes());
            map_buf.extend_from_slice(&vector_id.to_le_bytes());
        }
        write_atomic(&map_path, &map_buf)?;
        Ok(())
    }

    fn load(&mut self) -> Result<()> {
        let vectors_path = self.index_dir.join(VECTORS_FILE);
        let map_path = self.index_dir.join(ID_MAP_FILE);

        let mut file = std::fs::File::open(&vectors_path)?;
        let mut header = [0u8; 20];
        file.read_exact(&mut header).map_err(|_| corrupt("vectors.bin header"))?;
        if &header[0..4] != MAGIC {
            return Err(corrupt("vectors.bin magic"));
        }
        let version = u32::from_le_bytes(header[4..8].try_into().unwrap());
        if version != FORMAT_VERSION {
            return Err(corrupt("vectors.bin version"));
        }
        let dimension = u32::from_le_bytes(header[8..12].try_into().unwrap()) as usize;
        if dimension != self.dimension {
            return Err(CerberusError::Integrity {
                reason: format!(
                    "vector store dimension {dimension} does not match configured {}",
                    self.dimension
                ),
            });
        }
        let count = u64::from_le_bytes(header[12..20].try_into().unwrap()) as usize;

        let mut raw = Vec::new();
        file.read_to_end(&mut raw)?;
        if raw.len() != count * dimension * 4 {
            return Err(corrupt("vectors.bin payload size"));
        }
        self.data = raw
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes(b.try_into().unwrap()))
            .collect();

        let map_raw = std::fs::read(&map_path).map_err(|_| corrupt("vector_id_map.bin missing"))?;
        if map_raw.len() < 8 {
            return Err(corrupt("vector_id_map.bin header"));
        }
        let entries = u64::from_le_bytes(map_raw[0..8].try_into().unwrap()) as usize;
        if map_raw.len() != 8 + entries * 16 {
            return Err(corrupt("vector_id_map.bin payload size"));
        }
        self.id_map.clear();
        for i in 0..entries {
            let offset = 8 + i * 16;
            let symbol_id = i64::from_le_bytes(map_raw[offset..offset + 8].try_into().unwrap());
            let vector_id =
                i64::from_le_bytes(map_raw[offset + 8..offset + 16].try_into().unwrap());
            self.id_map.insert(symbol_id, vector_id);
        }

        if self.id_map.len() != count {
            return Err(corrupt("id map cardinality does not match vector count"));
        }
        Ok(())
    }
}

fn corrupt(what: &str) -> CerberusError {
    CerberusError::IndexCorrupted {
        reason: format!("vector store: {what}"),
    }
}

fn normalized(vector: &[f32]) -> Vec<f32> {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter().map(|v| v / norm).collect()
    } else {
        vector.to_vec()
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(bytes)?;
    temp.flush()?;
    temp.persist(path)
        .map_err(|e| CerberusError::FileWrite {
            path: path.to_path_buf(),
            source: e.error,
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn unit(dim: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[hot] = 1.0;
        v
    }

    #[test]
    fn batch_add_returns_dense_sequential_ids() {
        let temp = TempDir::new().unwrap();
        let mut store = VectorStore::open(temp.path(), 4).unwrap();
        let ids = store
            .add_vectors_batch(&[10, 20], &[unit(4, 0), unit(4, 1)])
            .unwrap();
        assert_eq!(ids, [0, 1]);
        let ids = store.add_vectors_batch(&[30], &[unit(4, 2)]).unwrap();
        assert_eq!(ids, [2]);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn search_ranks_by_cosine_similarity() {
        let temp = TempDir::new().unwrap();
        let mut store = VectorStore::open(temp.path(), 3).unwrap();
        store
            .add_vectors_batch(
                &[1, 2, 3],
                &[
                    vec![1.0, 0.0, 0.0],
                    vec![0.7, 0.7, 0.0],
                    vec![0.0, 0.0, 1.0],
                ],
            )
            .unwrap();

        let results = store.search(&[1.0, 0.0, 0.0], 2);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].1, 0);
        assert!(results[0].0 > 0.99);
        assert_eq!(results[1].1, 1);
    }

    #[test]
    fn vectors_are_normalized_on_insert() {
        let temp = TempDir::new().unwrap();
        let mut store = VectorStore::open(temp.path(), 2).unwrap();
        store
            .add_vectors_batch(&[1], &[vec![3.0, 4.0]])
            .unwrap();
        let results = store.search(&[3.0, 4.0], 1);
        assert!((results[0].0 - 1.0).abs() < 1e-5);
    }

    #[test]
    fn dimension_mismatch_is_an_error() {
        let temp = TempDir::new().unwrap();
        let mut store = VectorStore::open(temp.path(), 4).unwrap();
        let err = store.add_vectors_batch(&[1], &[vec![1.0, 0.0]]).unwrap_err();
        assert!(matches!(err, CerberusError::Integrity { .. }));
    }

    #[test]
    fn save_and_reload_round_trip() {
        let temp = TempDir::new().unwrap();
        {
            let mut store = VectorStore::open(temp.path(), 3).unwrap();
            store
                .add_vectors_batch(&[7, 8], &[unit(3, 0), unit(3, 2)])
                .unwrap();
            store.save().unwrap();
        }
        let store = VectorStore::open(temp.path(), 3).unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.contains_symbol(7));
        assert_eq!(store.symbol_id_for(1), Some(8));

        let results = store.search(&unit(3, 2), 1);
        assert_eq!(store.symbol_id_for(results[0].1), Some(8));
    }

    #[test]
    fn reload_with_wrong_dimension_fails() {
        let temp = TempDir::new().unwrap();
        {
            let mut store = VectorStore::open(temp.path(), 3).unwrap();
            store.add_vectors_batch(&[1], &[unit(3, 0)]).unwrap();
            store.save().unwrap();
        }
        let err = VectorStore::open(temp.path(), 4).unwrap_err();
        assert!(matches!(err, CerberusError::Integrity { .. }));
    }

    #[test]
    fn remove_rebuilds_with_dense_ids() {
        let temp = TempDir::new().unwrap();
        let mut store = VectorStore::open(temp.path(), 2).unwrap();
        store
            .add_vectors_batch(&[1, 2, 3], &[unit(2, 0), unit(2, 1), unit(2, 0)])
            .unwrap();

        let remaining = store.remove_vectors(&[1]);
        assert_eq!(remaining, [(1, 0), (3, 1)]);
        assert_eq!(store.len(), 2);
        assert!(!store.contains_symbol(2));

        // Surviving vectors keep their content under new ids.
        let results = store.search(&unit(2, 0), 2);
        assert_eq!(results[0].0, 1.0);
    }
}
