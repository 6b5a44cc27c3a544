
use std::collections::HashSet;
use std::fmt;

use crate::lexical::LexicalHit;
use crate::vector::VectorHit;

/// Which engine produced a merged result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchSource {
    Vector,
    Lexical,
}

impl fmt::Display for SearchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchSource::Vector => write!(f, "vector"),
            SearchSource::Lexical => write!(f, "lexical"),
        }
    }
}

/// One entry of the merged result list.
///
/// `score` keeps the originating engine's semantics: a raw squared distance
/// (smaller is better) for `Vector`, a BM25-derived rank (larger is better)
/// for `Lexical`. The two scales are not comparable; `source` says which one
/// applies.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk_id: String,
    pub source: SearchSource,
    pub score: f32,
    pub snippet: Option<String>,
}

/// Combine both engines' results into one deduplicated, ordered list.
///
/// Ordering: every vector result first, in its native ascending-distance
/// order, then every lexical-only result in its native descending-relevance
/// order. A chunk found by both engines keeps its vector occurrence; dense
/// similarity is the primary signal, lexical search is a recall booster for
/// literal-term queries. Scores are never fused across engines, the two
/// scales are not comparable without calibration data.
pub fn merge(vector_hits: Vec<VectorHit>, lexical_hits: Vec<LexicalHit>) -> Vec<ScoredChunk> {
    let mut seen: HashSet<String> = HashSet::with_capacity(vector_hits.len() + lexical_hits.len());
    let mut merged = Vec::with_capacity(vector_hits.len() + lexical_hits.len());

    for hit in vector_hits {
        if seen.insert(hit.chunk_id.clone()) {
            merged.push(ScoredChunk {
                chunk_id: hit.chunk_id,
                source: SearchSource::Vector,
                score: hit.distance,
                snippet: None,
            });
        }
    }

    for hit in lexical_hits {
        if seen.insert(hit.chunk_id.clone()) {
            merged.push(ScoredChunk {
                chunk_id: hit.chunk_id,
                source: SearchSource::Lexical,
                score: hit.rank,
                snippet: Some(hit.snippet),
            });
        }
    }

    merged
}
