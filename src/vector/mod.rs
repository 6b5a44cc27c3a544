#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::embeddings::EmbeddingProvider;
use crate::store::models::ChunkRecord;
use crate::{Result, RetrievalError};

/// Binary artifact holding the embedding matrix.
pub const VECTORS_FILE: &str = "vectors.bin";
/// Textual artifact mapping vector slots to chunk ids.
pub const VECTOR_MAP_FILE: &str = "vector_map.json";

/// Flat exact nearest-neighbor index over chunk embeddings.
///
/// Vectors live in a row-major matrix; slot `i` (the row number) maps to
/// `slots[i]`. Slots are assigned in insertion order and are not stable
/// across rebuilds: a rebuild produces a whole new index instance, and any
/// external reference to a slot number must be re-resolved through the map.
///
/// Distances are squared Euclidean, returned raw; normalization to a
/// similarity happens at the presentation layer, never here.
#[derive(Debug)]
pub struct VectorIndex {
    dimension: usize,
    data: Vec<f32>,
    slots: Vec<String>,
}

/// One nearest-neighbor match, smaller distance is better.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub chunk_id: String,
    pub distance: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct VectorsFile {
    dimension: usize,
    data: Vec<f32>,
}

impl VectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            data: Vec::new(),
            slots: Vec::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn push(&mut self, chunk_id: String, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.dimension {
            return Err(RetrievalError::IndexBuild(format!(
                "Embedding for chunk {} has dimension {}, expected {}",
                chunk_id,
                embedding.len(),
                self.dimension
            )));
        }
        self.data.extend_from_slice(embedding);
        self.slots.push(chunk_id);
        Ok(())
    }

    /// Build a fresh index over the whole corpus.
    ///
    /// Chunks with blank text are skipped. Embeddings are requested in
    /// batches of `batch_size` and inserted in corpus order, so rebuilding
    /// from the same corpus assigns the same slots. The previous index (if
    /// any) is untouched; callers swap the returned instance in once the
    /// build has succeeded.
    pub fn build(
        chunks: &[ChunkRecord],
        provider: &dyn EmbeddingProvider,
        batch_size: usize,
    ) -> Result<Self> {
        let indexable: Vec<&ChunkRecord> = chunks.iter().filter(|c| c.has_text()).collect();
        if indexable.is_empty() {
            return Err(RetrievalError::IndexBuild(
                "No indexable chunks in the corpus".to_string(),
            ));
        }

        let dimension = provider.dimension();
        let batch_size = batch_size.max(1);
        let mut index = Self::new(dimension);
        index.data.reserve(indexable.len() * dimension);
        index.slots.reserve(indexable.len());

        info!(
            "Building vector index over {} chunks ({} per batch)",
            indexable.len(),
            batch_size
        );

        for batch in indexable.chunks(batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embeddings = provider
                .embed_batch(&texts)
                .map_err(|e| RetrievalError::IndexBuild(format!("Embedding batch failed: {}", e)))?;

            if embeddings.len() != batch.len() {
                return Err(RetrievalError::IndexBuild(format!(
                    "Provider returned {} embeddings for a batch of {}",
                    embeddings.len(),
                    batch.len()
                )));
            }

            for (chunk, embedding) in batch.iter().zip(embeddings.iter()) {
                index.push(chunk.chunk_id.clone(), embedding)?;
            }

            debug!("Embedded {}/{} chunks", index.len(), indexable.len());
        }

        info!("Vector index built with {} vectors", index.len());
        Ok(index)
    }

    /// Up to `k` nearest neighbors of `query_vector`, ascending distance.
    /// An empty index yields an empty result, a query vector of the wrong
    /// length is an error, never silently truncated or padded.
    pub fn search(&self, query_vector: &[f32], k: usize) -> Result<Vec<VectorHit>> {
        if query_vector.len() != self.dimension {
            return Err(RetrievalError::DimensionMismatch {
                expected: self.dimension,
                actual: query_vector.len(),
            });
        }
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(f32, usize)> = self
            .data
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(slot, row)| (squared_l2(row, query_vector), slot))
            .collect();

        scored.sort_by(|a, b| a.0.total_cmp(&b.0));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(distance, slot)| VectorHit {
                chunk_id: self.slots[slot].clone(),
                distance,
            })
            .collect())
    }

    /// Persist the matrix and the slot map as a unit.
    ///
    /// Both artifacts are written to temporary files first and renamed into
    /// place only after both writes succeeded, so a failed save leaves any
    /// previously persisted index intact.
    pub fn save<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let vectors_path = dir.join(VECTORS_FILE);
        let map_path = dir.join(VECTOR_MAP_FILE);
        let vectors_tmp = tmp_path(&vectors_path);
        let map_tmp = tmp_path(&map_path);

        let file = File::create(&vectors_tmp)?;
        bincode::serialize_into(
            BufWriter::new(file),
            &VectorsFile {
                dimension: self.dimension,
                data: self.data.clone(),
            },
        )
        .map_err(|e| RetrievalError::Io(std::io::Error::other(e)))?;

        // One entry per slot, keyed by the slot integer, as the map file
        // format requires.
        let map: BTreeMap<usize, &String> = self.slots.iter().enumerate().collect();
        let file = File::create(&map_tmp)?;
        serde_json::to_writer_pretty(BufWriter::new(file), &map)
            .map_err(|e| RetrievalError::Io(std::io::Error::other(e)))?;

        fs::rename(&vectors_tmp, &vectors_path)?;
        fs::rename(&map_tmp, &map_path)?;

        info!(
            "Saved vector index ({} vectors, dimension {}) to {}",
            self.len(),
            self.dimension,
            dir.display()
        );
        Ok(())
    }

    /// Restore a persisted index. Fails explicitly on missing or corrupt
    /// artifacts or when the two artifacts disagree; silent fallback to an
    /// empty index is the facade's decision, not this function's.
    pub fn load<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let vectors_path = dir.join(VECTORS_FILE);
        let map_path = dir.join(VECTOR_MAP_FILE);

        let file = File::open(&vectors_path).map_err(|e| {
            RetrievalError::IndexLoad(format!("{}: {}", vectors_path.display(), e))
        })?;
        let vectors: VectorsFile = bincode::deserialize_from(BufReader::new(file))
            .map_err(|e| RetrievalError::IndexLoad(format!("{}: {}", vectors_path.display(), e)))?;

        let file = File::open(&map_path)
            .map_err(|e| RetrievalError::IndexLoad(format!("{}: {}", map_path.display(), e)))?;
        let map: BTreeMap<usize, String> = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| RetrievalError::IndexLoad(format!("{}: {}", map_path.display(), e)))?;

        if vectors.dimension == 0 {
            return Err(RetrievalError::IndexLoad(
                "Vector file declares dimension 0".to_string(),
            ));
        }
        if vectors.data.len() % vectors.dimension != 0 {
            return Err(RetrievalError::IndexLoad(format!(
                "Vector data length {} is not a multiple of dimension {}",
                vectors.data.len(),
                vectors.dimension
            )));
        }

        let count = vectors.data.len() / vectors.dimension;
        if map.len() != count {
            return Err(RetrievalError::IndexLoad(format!(
                "Slot map has {} entries for {} vectors",
                map.len(),
                count
            )));
        }

        // Slots must be dense 0..N-1; a gap means the pair of artifacts is
        // inconsistent.
        let mut slots = Vec::with_capacity(count);
        for (expected, (slot, chunk_id)) in map.into_iter().enumerate() {
            if slot != expected {
                return Err(RetrievalError::IndexLoad(format!(
                    "Slot map is not dense: expected slot {}, found {}",
                    expected, slot
                )));
            }
            slots.push(chunk_id);
        }

        debug!(
            "Loaded vector index ({} vectors, dimension {}) from {}",
            count,
            vectors.dimension,
            dir.display()
        );

        Ok(Self {
            dimension: vectors.dimension,
            data: vectors.data,
            slots,
        })
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}
