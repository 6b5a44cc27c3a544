
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::{Config, RetrievalMode};
use crate::context;
use crate::embeddings::EmbeddingProvider;
use crate::lexical::{LexicalHit, LexicalIndex};
use crate::merge::{self, ScoredChunk};
use crate::store::ChunkStore;
use crate::vector::{VectorHit, VectorIndex};
use crate::Result;

/// What retrieval can actually do, after crossing the configured mode with
/// live index availability. Resolved once at startup (and re-resolved when a
/// vector index is installed) so degradation is an observable state, not a
/// side effect of exception handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectiveMode {
    Hybrid,
    VectorOnly,
    LexicalOnly,
    Disabled,
}

impl EffectiveMode {
    pub fn uses_vector(self) -> bool {
        matches!(self, EffectiveMode::Hybrid | EffectiveMode::VectorOnly)
    }

    pub fn uses_lexical(self) -> bool {
        matches!(self, EffectiveMode::Hybrid | EffectiveMode::LexicalOnly)
    }
}

impl fmt::Display for EffectiveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EffectiveMode::Hybrid => write!(f, "hybrid"),
            EffectiveMode::VectorOnly => write!(f, "vector-only"),
            EffectiveMode::LexicalOnly => write!(f, "lexical-only"),
            EffectiveMode::Disabled => write!(f, "disabled"),
        }
    }
}

/// Cross the configured mode with what is actually available.
pub fn resolve_mode(
    configured: RetrievalMode,
    lexical_enabled: bool,
    vector_available: bool,
    lexical_available: bool,
) -> EffectiveMode {
    let wants_vector = matches!(configured, RetrievalMode::Hybrid | RetrievalMode::VectorOnly);
    let wants_lexical = matches!(configured, RetrievalMode::Hybrid | RetrievalMode::LexicalOnly)
        && lexical_enabled;

    match (
        wants_vector && vector_available,
        wants_lexical && lexical_available,
    ) {
        (true, true) => EffectiveMode::Hybrid,
        (true, false) => EffectiveMode::VectorOnly,
        (false, true) => EffectiveMode::LexicalOnly,
        (false, false) => EffectiveMode::Disabled,
    }
}

/// Facade over both search engines: the single public query surface.
///
/// All collaborators are injected by the composition root; the retriever
/// holds no global state. The vector index sits behind a pointer swap so a
/// rebuild can replace it atomically while in-flight queries finish against
/// the old snapshot.
pub struct HybridRetriever {
    store: ChunkStore,
    lexical: LexicalIndex,
    vector: RwLock<Option<Arc<VectorIndex>>>,
    embedder: Arc<dyn EmbeddingProvider>,
    mode: RwLock<EffectiveMode>,
    configured_mode: RetrievalMode,
    lexical_enabled: bool,
    lexical_available: bool,
    embed_timeout: Duration,
}

impl HybridRetriever {
    pub async fn new(
        store: ChunkStore,
        lexical: LexicalIndex,
        vector: Option<VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: &Config,
    ) -> Result<Self> {
        let lexical_available = lexical.is_available().await.unwrap_or(false);
        let mode = resolve_mode(
            config.search.mode,
            config.search.lexical_enabled,
            vector.is_some(),
            lexical_available,
        );
        info!(
            "Retrieval mode resolved: {} (configured: {:?}, vector index: {}, lexical index: {})",
            mode,
            config.search.mode,
            if vector.is_some() { "loaded" } else { "absent" },
            if lexical_available { "built" } else { "absent" },
        );

        Ok(Self {
            store,
            lexical,
            vector: RwLock::new(vector.map(Arc::new)),
            embedder,
            mode: RwLock::new(mode),
            configured_mode: config.search.mode,
            lexical_enabled: config.search.lexical_enabled,
            lexical_available,
            embed_timeout: Duration::from_secs(config.embedding.timeout_seconds),
        })
    }

    pub fn mode(&self) -> EffectiveMode {
        self.mode.read().map(|guard| *guard).unwrap_or(EffectiveMode::Disabled)
    }

    /// Swap in a freshly built vector index. Called by the composition root
    /// after a successful rebuild; queries already holding the previous
    /// snapshot finish against it.
    pub fn install_vector_index(&self, index: VectorIndex) {
        let slot = self.vector.write();
        if let Ok(mut slot) = slot {
            *slot = Some(Arc::new(index));
        }

        let mode = resolve_mode(
            self.configured_mode,
            self.lexical_enabled,
            true,
            self.lexical_available,
        );
        let current = self.mode.write();
        if let Ok(mut current) = current {
            if *current != mode {
                info!("Retrieval mode changed: {} -> {}", *current, mode);
            }
            *current = mode;
        }
    }

    fn vector_snapshot(&self) -> Option<Arc<VectorIndex>> {
        self.vector.read().ok().and_then(|guard| guard.clone())
    }

    /// Merged, ordered, deduplicated results with scores and provenance.
    ///
    /// Both engines run concurrently; each engine's failure is contained
    /// here and degrades to an empty contribution for this query.
    pub async fn retrieve_ranked(&self, query: &str, top_k: usize) -> Result<Vec<ScoredChunk>> {
        let mode = self.mode();
        if mode == EffectiveMode::Disabled {
            debug!("Retrieval disabled; returning no results");
            return Ok(Vec::new());
        }

        let (vector_hits, lexical_hits) = tokio::join!(
            self.vector_hits(mode, query, top_k),
            self.lexical_hits(mode, query, top_k),
        );

        let merged = merge::merge(vector_hits, lexical_hits);
        debug!(
            "Query produced {} merged results (mode: {})",
            merged.len(),
            mode
        );
        Ok(merged)
    }

    /// The single public query entry point: ranked retrieval plus context
    /// assembly. An empty string means "no retrieval augmentation", which
    /// the surrounding system must treat as a valid answer path.
    pub async fn retrieve(&self, query: &str, top_k: usize, max_tokens: usize) -> Result<String> {
        let ranked = self.retrieve_ranked(query, top_k).await?;
        if ranked.is_empty() {
            return Ok(String::new());
        }

        let ids: Vec<String> = ranked.iter().map(|r| r.chunk_id.clone()).collect();
        let records = self.store.get_chunks_by_ids(&ids).await?;
        let by_id: HashMap<String, _> = records
            .into_iter()
            .map(|record| (record.chunk_id.clone(), record))
            .collect();

        Ok(context::assemble(&ranked, &by_id, max_tokens))
    }

    /// Vector half of a query. The embedding round trip is the only network
    /// call in the query path; it runs off the async runtime with a timeout,
    /// and any failure degrades this query to lexical-only.
    async fn vector_hits(&self, mode: EffectiveMode, query: &str, top_k: usize) -> Vec<VectorHit> {
        if !mode.uses_vector() {
            return Vec::new();
        }
        let Some(index) = self.vector_snapshot() else {
            return Vec::new();
        };

        let embedder = Arc::clone(&self.embedder);
        let text = query.to_string();
        let embed_task =
            tokio::task::spawn_blocking(move || embedder.embed(&text));

        let embedding = match timeout(self.embed_timeout, embed_task).await {
            Ok(Ok(Ok(embedding))) => embedding,
            Ok(Ok(Err(e))) => {
                warn!("Embedding failed, degrading to lexical-only for this query: {}", e);
                return Vec::new();
            }
            Ok(Err(e)) => {
                warn!("Embedding task panicked: {}", e);
                return Vec::new();
            }
            Err(_) => {
                warn!(
                    "Embedding timed out after {:?}, degrading to lexical-only for this query",
                    self.embed_timeout
                );
                return Vec::new();
            }
        };

        match index.search(&embedding, top_k) {
            Ok(hits) => hits,
            Err(e) => {
                warn!("Vector search failed: {}", e);
                Vec::new()
            }
        }
    }

    async fn lexical_hits(&self, mode: EffectiveMode, query: &str, top_k: usize) -> Vec<LexicalHit> {
        if !mode.uses_lexical() {
            return Vec::new();
        }

        match self.lexical.search(query, top_k).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!("Lexical search failed: {}", e);
                Vec::new()
            }
        }
    }
}
