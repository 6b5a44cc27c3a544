use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::Config;
use crate::embeddings::{EmbeddingProvider, OpenAiClient};
use crate::lexical::LexicalIndex;
use crate::retriever::HybridRetriever;
use crate::store::ChunkStore;
use crate::vector::VectorIndex;

/// Rebuild the vector index from the chunk store and persist it.
pub async fn build_vector(config: &Config, batch_size: Option<usize>) -> Result<()> {
    let batch_size = batch_size.unwrap_or(config.embedding.batch_size);
    let store = ChunkStore::connect(config.database_path())
        .await
        .context("Failed to open chunk store")?;

    let store_count = store.count().await?;
    if store_count == 0 {
        anyhow::bail!(
            "Chunk store at {} is empty; load the corpus first",
            config.database_path().display()
        );
    }

    let chunks = store.fetch_all().await.context("Failed to read corpus")?;
    let provider: Arc<dyn EmbeddingProvider> =
        Arc::new(OpenAiClient::new(config).context("Failed to create embedding client")?);

    println!(
        "Building vector index over {} chunks (batch size {})...",
        chunks.len(),
        batch_size
    );

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")
            .context("Invalid progress template")?,
    );
    spinner.set_message("Requesting embeddings");
    spinner.enable_steady_tick(Duration::from_millis(120));

    let started = Instant::now();
    let build_provider = Arc::clone(&provider);
    let index = tokio::task::spawn_blocking(move || {
        VectorIndex::build(&chunks, build_provider.as_ref(), batch_size)
    })
    .await
    .context("Vector build task failed")?
    .context("Vector index build failed")?;

    spinner.finish_and_clear();

    index
        .save(config.index_dir())
        .context("Failed to persist vector index")?;

    let elapsed = started.elapsed();
    println!("Vector index built and saved to {}", config.index_dir().display());
    println!("  Vectors: {} (dimension {})", index.len(), index.dimension());
    println!("  Elapsed: {:.2}s", elapsed.as_secs_f64());

    report_consistency("vector", index.len() as u64, store_count);
    Ok(())
}

/// Rebuild the lexical (full-text) index in place and optimize it.
pub async fn build_lexical(config: &Config) -> Result<()> {
    let store = ChunkStore::connect(config.database_path())
        .await
        .context("Failed to open chunk store")?;

    let store_count = store.count().await?;
    if store_count == 0 {
        anyhow::bail!(
            "Chunk store at {} is empty; load the corpus first",
            config.database_path().display()
        );
    }

    let lexical = LexicalIndex::new(store.pool().clone());

    let started = Instant::now();
    let indexed = lexical
        .rebuild()
        .await
        .context("Lexical index rebuild failed")?;
    lexical
        .optimize()
        .await
        .context("Lexical index optimization failed")?;

    let elapsed = started.elapsed();
    println!("Lexical index rebuilt and optimized");
    println!("  Rows indexed: {}", indexed);
    println!("  Elapsed: {:.2}s", elapsed.as_secs_f64());

    report_consistency("lexical", indexed, store_count);
    Ok(())
}

/// Print the ranked merged result list for a query.
pub async fn search(config: &Config, query: &str, top_k: Option<usize>) -> Result<()> {
    let top_k = top_k.unwrap_or(config.search.top_k);
    let retriever = build_retriever(config).await?;

    let results = retriever
        .retrieve_ranked(query, top_k)
        .await
        .context("Retrieval failed")?;

    if results.is_empty() {
        println!("No results (mode: {})", retriever.mode());
        return Ok(());
    }

    println!("Results for '{}' (mode: {}):", query, retriever.mode());
    for (i, result) in results.iter().enumerate() {
        println!(
            "{:>3}. [{}] {} (score: {:.4})",
            i + 1,
            result.source,
            result.chunk_id,
            result.score
        );
        if let Some(snippet) = &result.snippet {
            println!("     {}", snippet);
        }
    }

    Ok(())
}

/// Print the assembled, token-bounded context for a query.
pub async fn context(
    config: &Config,
    query: &str,
    top_k: Option<usize>,
    max_tokens: Option<usize>,
) -> Result<()> {
    let top_k = top_k.unwrap_or(config.search.top_k);
    let max_tokens = max_tokens.unwrap_or(config.search.max_tokens);
    let retriever = build_retriever(config).await?;

    let context = retriever
        .retrieve(query, top_k, max_tokens)
        .await
        .context("Retrieval failed")?;

    if context.is_empty() {
        println!("(no context retrieved; mode: {})", retriever.mode());
    } else {
        println!("{}", context);
    }

    Ok(())
}

/// Report counts and availability for every artifact.
pub async fn status(config: &Config) -> Result<()> {
    println!("Chunk store: {}", config.database_path().display());

    let store = ChunkStore::connect(config.database_path())
        .await
        .context("Failed to open chunk store")?;
    let store_count = store.count().await?;
    println!("  Chunks: {}", store_count);

    match VectorIndex::load(config.index_dir()) {
        Ok(index) => {
            println!(
                "Vector index: {} vectors, dimension {} ({})",
                index.len(),
                index.dimension(),
                config.index_dir().display()
            );
        }
        Err(e) => println!("Vector index: unavailable ({})", e),
    }

    let lexical = LexicalIndex::new(store.pool().clone());
    if lexical.is_available().await? {
        println!("Lexical index: {} rows", lexical.count().await?);
    } else {
        println!("Lexical index: not built");
    }

    let retriever = build_retriever(config).await?;
    println!("Effective retrieval mode: {}", retriever.mode());

    Ok(())
}

/// Print the active configuration as TOML.
pub fn show_config(config: &Config) -> Result<()> {
    println!("Configuration directory: {}", config.base_dir.display());
    let rendered = toml::to_string_pretty(config).context("Failed to render configuration")?;
    println!("{}", rendered);
    Ok(())
}

/// Composition root for the query commands: wires the store, both indexes,
/// and the embedding client into a retriever. A vector index that fails to
/// load degrades the retriever rather than failing the command.
async fn build_retriever(config: &Config) -> Result<HybridRetriever> {
    let store = ChunkStore::connect(config.database_path())
        .await
        .context("Failed to open chunk store")?;
    let lexical = LexicalIndex::new(store.pool().clone());

    let vector = match VectorIndex::load(config.index_dir()) {
        Ok(index) => {
            info!("Loaded vector index with {} vectors", index.len());
            Some(index)
        }
        Err(e) => {
            warn!("Vector index unavailable, continuing without it: {}", e);
            None
        }
    };

    let provider: Arc<dyn EmbeddingProvider> =
        Arc::new(OpenAiClient::new(config).context("Failed to create embedding client")?);

    let retriever = HybridRetriever::new(store, lexical, vector, provider, config)
        .await
        .context("Failed to create retriever")?;
    Ok(retriever)
}

fn report_consistency(index_name: &str, index_count: u64, store_count: u64) {
    if index_count == store_count {
        println!("  Consistency: {} records match the chunk store", index_count);
    } else {
        // Upstream may intentionally skip blank chunks, so this is a
        // warning, not a failure.
        warn!(
            "{} index has {} records but the store has {} chunks",
            index_name, index_count, store_count
        );
        println!(
            "  Consistency: WARNING - {} index has {} records, store has {} chunks",
            index_name, index_count, store_count
        );
    }
}
