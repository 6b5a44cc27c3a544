use super::*;
use crate::embeddings::EmbeddingProvider;
use tempfile::TempDir;

/// Deterministic provider for build tests: each text maps to a fixed
/// 3-dimensional point.
struct GridEmbedder;

impl EmbeddingProvider for GridEmbedder {
    fn dimension(&self) -> usize {
        3
    }

    fn embed(&self, text: &str) -> crate::Result<Vec<f32>> {
        let mut batch = self.embed_batch(&[text.to_string()])?;
        Ok(batch.remove(0))
    }

    fn embed_batch(&self, texts: &[String]) -> crate::Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| match text.as_str() {
                "origin" => vec![0.0, 0.0, 0.0],
                "near" => vec![1.0, 0.0, 0.0],
                "far" => vec![10.0, 10.0, 10.0],
                other => vec![other.len() as f32, 0.0, 0.0],
            })
            .collect())
    }
}

/// Provider that returns vectors of the wrong length.
struct BrokenEmbedder;

impl EmbeddingProvider for BrokenEmbedder {
    fn dimension(&self) -> usize {
        3
    }

    fn embed(&self, _text: &str) -> crate::Result<Vec<f32>> {
        Ok(vec![0.0; 2])
    }

    fn embed_batch(&self, texts: &[String]) -> crate::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![0.0; 2]).collect())
    }
}

fn chunk(id: i64, chunk_id: &str, text: &str) -> ChunkRecord {
    ChunkRecord {
        id,
        chunk_id: chunk_id.to_string(),
        document_id: format!("doc-{}", id),
        doc_type: None,
        doc_number: None,
        file_name: None,
        chunk_index: 0,
        text: text.to_string(),
    }
}

fn sample_index() -> VectorIndex {
    let chunks = vec![
        chunk(1, "c-origin", "origin"),
        chunk(2, "c-near", "near"),
        chunk(3, "c-far", "far"),
    ];
    VectorIndex::build(&chunks, &GridEmbedder, 2).expect("Build should succeed")
}

#[test]
fn build_assigns_slots_in_corpus_order() {
    let index = sample_index();
    assert_eq!(index.len(), 3);
    assert_eq!(index.dimension(), 3);
}

#[test]
fn build_skips_blank_chunks() {
    let chunks = vec![
        chunk(1, "c1", "origin"),
        chunk(2, "c-blank", "   \n"),
        chunk(3, "c3", "near"),
    ];
    let index = VectorIndex::build(&chunks, &GridEmbedder, 10).expect("Build should succeed");
    assert_eq!(index.len(), 2);
}

#[test]
fn build_fails_on_empty_corpus() {
    let result = VectorIndex::build(&[], &GridEmbedder, 10);
    assert!(matches!(result, Err(RetrievalError::IndexBuild(_))));

    let blank_only = vec![chunk(1, "c1", "  ")];
    let result = VectorIndex::build(&blank_only, &GridEmbedder, 10);
    assert!(matches!(result, Err(RetrievalError::IndexBuild(_))));
}

#[test]
fn build_fails_on_provider_dimension_mismatch() {
    let chunks = vec![chunk(1, "c1", "origin")];
    let result = VectorIndex::build(&chunks, &BrokenEmbedder, 10);
    assert!(matches!(result, Err(RetrievalError::IndexBuild(_))));
}

#[test]
fn search_orders_by_ascending_distance() {
    let index = sample_index();

    // Query closest to "near", then "origin", then "far".
    let hits = index.search(&[1.5, 0.0, 0.0], 2).expect("Search failed");
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].chunk_id, "c-near");
    assert_eq!(hits[1].chunk_id, "c-origin");
    assert!(hits[0].distance < hits[1].distance);
}

#[test]
fn search_caps_at_index_size() {
    let index = sample_index();
    let hits = index.search(&[0.0, 0.0, 0.0], 10).expect("Search failed");
    assert_eq!(hits.len(), 3);
}

#[test]
fn search_rejects_wrong_dimension() {
    let index = sample_index();
    let result = index.search(&[1.0, 2.0], 3);
    assert!(matches!(
        result,
        Err(RetrievalError::DimensionMismatch {
            expected: 3,
            actual: 2
        })
    ));
}

#[test]
fn empty_index_returns_empty_results() {
    let index = VectorIndex::new(3);
    let hits = index.search(&[0.0, 0.0, 0.0], 5).expect("Search failed");
    assert!(hits.is_empty());
}

#[test]
fn save_load_round_trip_is_stable() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let dir = temp_dir.path().join("index");

    let index = sample_index();
    let probe = [1.5, 0.0, 0.0];
    let expected = index.search(&probe, 3).expect("Search failed");

    index.save(&dir).expect("Save failed");
    for _ in 0..10 {
        let loaded = VectorIndex::load(&dir).expect("Load failed");
        let hits = loaded.search(&probe, 3).expect("Search failed");
        assert_eq!(hits, expected);
        loaded.save(&dir).expect("Save failed");
    }
}

#[test]
fn load_fails_on_missing_artifacts() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let dir = temp_dir.path().join("index");

    assert!(matches!(
        VectorIndex::load(&dir),
        Err(RetrievalError::IndexLoad(_))
    ));

    // Vectors present, slot map absent: the pair is invalid.
    sample_index().save(&dir).expect("Save failed");
    std::fs::remove_file(dir.join(VECTOR_MAP_FILE)).expect("Failed to remove map file");
    assert!(matches!(
        VectorIndex::load(&dir),
        Err(RetrievalError::IndexLoad(_))
    ));
}

#[test]
fn load_fails_on_inconsistent_pair() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let dir = temp_dir.path().join("index");

    sample_index().save(&dir).expect("Save failed");

    // Drop one entry from the slot map; cardinality no longer matches.
    std::fs::write(dir.join(VECTOR_MAP_FILE), "{\"0\": \"c-origin\"}")
        .expect("Failed to overwrite map file");
    assert!(matches!(
        VectorIndex::load(&dir),
        Err(RetrievalError::IndexLoad(_))
    ));
}

#[test]
fn load_fails_on_corrupt_vectors_file() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let dir = temp_dir.path().join("index");

    sample_index().save(&dir).expect("Save failed");
    std::fs::write(dir.join(VECTORS_FILE), b"not bincode").expect("Failed to corrupt file");
    assert!(matches!(
        VectorIndex::load(&dir),
        Err(RetrievalError::IndexLoad(_))
    ));
}

#[test]
fn known_coordinates_scenario() {
    // Corpus of 3 chunks at known coordinates; the query sits closest to the
    // second chunk.
    let index = sample_index();
    let hits = index.search(&[0.9, 0.1, 0.0], 2).expect("Search failed");

    assert_eq!(hits[0].chunk_id, "c-near");
    assert_eq!(hits[1].chunk_id, "c-origin");
    assert!(hits[0].distance < hits[1].distance);
}
