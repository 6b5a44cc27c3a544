
use itertools::Itertools;
use sqlx::Row;
use tracing::{debug, info};

use crate::store::DbPool;
use crate::{Result, RetrievalError};

/// FTS virtual table name. Lives in the same database as `chunks` and is
/// keyed to it through the content rowid, so lookups need no separate id map.
const FTS_TABLE: &str = "chunks_fts";

/// Lexical full-text index over chunk text.
///
/// Backed by a SQLite FTS5 external-content table with a Unicode-aware
/// tokenizer (diacritics folded), ranked with BM25. Exists for queries
/// carrying literal terminology (acronyms, standard numbers) that dense
/// embeddings tend to under-weight.
#[derive(Debug, Clone)]
pub struct LexicalIndex {
    pool: DbPool,
}

/// One full-text match. `rank` is the negated BM25 score, larger is better.
#[derive(Debug, Clone, PartialEq)]
pub struct LexicalHit {
    pub chunk_id: String,
    pub rank: f32,
    pub snippet: String,
}

impl LexicalIndex {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Drop and rebuild the full-text index from the chunk table.
    ///
    /// Idempotent: rebuilding over an unchanged corpus yields the same query
    /// results. Returns the number of indexed rows.
    pub async fn rebuild(&self) -> Result<u64> {
        info!("Rebuilding lexical index");

        sqlx::query(&format!("DROP TABLE IF EXISTS {FTS_TABLE}"))
            .execute(&self.pool)
            .await
            .map_err(|e| {
                RetrievalError::Database(format!("Failed to drop old FTS table: {}", e))
            })?;

        sqlx::query(&format!(
            "CREATE VIRTUAL TABLE {FTS_TABLE} USING fts5(
                text,
                content='chunks',
                content_rowid='id',
                tokenize=\"unicode61 remove_diacritics 2\"
            )"
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| RetrievalError::Database(format!("Failed to create FTS table: {}", e)))?;

        sqlx::query(&format!(
            "INSERT INTO {FTS_TABLE}({FTS_TABLE}) VALUES('rebuild')"
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| RetrievalError::Database(format!("Failed to populate FTS table: {}", e)))?;

        let count = self.count().await?;
        info!("Lexical index rebuilt with {} rows", count);
        Ok(count)
    }

    /// Merge incremental b-tree segments. A latency optimization after bulk
    /// loads, not required for correctness.
    pub async fn optimize(&self) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO {FTS_TABLE}({FTS_TABLE}) VALUES('optimize')"
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| RetrievalError::Database(format!("Failed to optimize FTS table: {}", e)))?;

        debug!("Lexical index optimized");
        Ok(())
    }

    /// Whether a built index exists in the database.
    pub async fn is_available(&self) -> Result<bool> {
        let row = sqlx::query("SELECT name FROM sqlite_master WHERE type='table' AND name = ?")
            .bind(FTS_TABLE)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RetrievalError::Database(format!("Failed to probe FTS table: {}", e)))?;

        Ok(row.is_some())
    }

    pub async fn count(&self) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {FTS_TABLE}"))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| RetrievalError::Database(format!("Failed to count FTS rows: {}", e)))?;

        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Up to `limit` matches ordered by descending relevance, each with a
    /// highlighted excerpt. No matches is an empty result, not an error;
    /// searching before the index was ever built is an error.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<LexicalHit>> {
        if !self.is_available().await? {
            return Err(RetrievalError::IndexUnavailable("lexical"));
        }

        let Some(match_expr) = fts_query(query) else {
            return Ok(Vec::new());
        };

        let sql = format!(
            "SELECT chunks.chunk_id AS chunk_id,
                    bm25({FTS_TABLE}) AS rank,
                    snippet({FTS_TABLE}, 0, '<b>', '</b>', '...', 10) AS snippet
             FROM {FTS_TABLE}
             JOIN chunks ON chunks.id = {FTS_TABLE}.rowid
             WHERE {FTS_TABLE} MATCH ?
             ORDER BY rank
             LIMIT ?"
        );

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(&sql)
            .bind(&match_expr)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RetrievalError::Database(format!("FTS query failed: {}", e)))?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let chunk_id: String = row
                .try_get("chunk_id")
                .map_err(|e| RetrievalError::Database(format!("Bad FTS row: {}", e)))?;
            let rank: f64 = row
                .try_get("rank")
                .map_err(|e| RetrievalError::Database(format!("Bad FTS row: {}", e)))?;
            let snippet: String = row
                .try_get("snippet")
                .map_err(|e| RetrievalError::Database(format!("Bad FTS row: {}", e)))?;

            // bm25() reports better matches as more negative; flip the sign
            // so larger is better on the way out.
            hits.push(LexicalHit {
                chunk_id,
                rank: (-rank) as f32,
                snippet,
            });
        }

        debug!("Lexical search matched {} chunks", hits.len());
        Ok(hits)
    }
}

/// Turn free text into an FTS5 MATCH expression.
///
/// Every whitespace-separated token is quoted (with embedded quotes doubled)
/// so user text can never hit FTS5 operator syntax; the implicit AND between
/// terms is preserved. Returns None when no tokens survive.
fn fts_query(raw: &str) -> Option<String> {
    let terms = raw
        .split_whitespace()
        .map(|token| format!("\"{}\"", token.replace('"', "\"\"")))
        .join(" ");

    if terms.is_empty() { None } else { Some(terms) }
}
