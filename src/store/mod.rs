
pub mod models;

use itertools::Itertools;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use tracing::debug;

use crate::store::models::ChunkRecord;
use crate::{Result, RetrievalError};

pub type DbPool = Pool<Sqlite>;

/// Read interface over the external chunk table.
///
/// Query-time access is limited to id-based lookups; the full scan exists for
/// index builds only. The store never mutates chunk rows.
#[derive(Debug, Clone)]
pub struct ChunkStore {
    pool: DbPool,
}

impl ChunkStore {
    pub async fn connect<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(&database_path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .map_err(|e| {
                RetrievalError::Database(format!(
                    "Failed to open chunk database {}: {}",
                    database_path.as_ref().display(),
                    e
                ))
            })?;

        sqlx::migrate!("src/store/migrations")
            .run(&pool)
            .await
            .map_err(|e| RetrievalError::Database(format!("Failed to run migrations: {}", e)))?;

        debug!(
            "Connected to chunk store at {}",
            database_path.as_ref().display()
        );
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub async fn count(&self) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| RetrievalError::Database(format!("Failed to count chunks: {}", e)))?;

        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Full corpus scan in stable insertion order. Build-time only.
    pub async fn fetch_all(&self) -> Result<Vec<ChunkRecord>> {
        let chunks = sqlx::query_as::<_, ChunkRecord>(
            "SELECT id, chunk_id, document_id, doc_type, doc_number, file_name, chunk_index, text
             FROM chunks ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RetrievalError::Database(format!("Failed to fetch chunks: {}", e)))?;

        debug!("Fetched {} chunks from store", chunks.len());
        Ok(chunks)
    }

    /// Resolve chunk records by their external ids. Unknown ids are silently
    /// absent from the result; the result order is unspecified.
    pub async fn get_chunks_by_ids(&self, chunk_ids: &[String]) -> Result<Vec<ChunkRecord>> {
        if chunk_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = chunk_ids.iter().map(|_| "?").join(", ");
        let sql = format!(
            "SELECT id, chunk_id, document_id, doc_type, doc_number, file_name, chunk_index, text
             FROM chunks WHERE chunk_id IN ({placeholders})"
        );

        let mut query = sqlx::query_as::<_, ChunkRecord>(&sql);
        for chunk_id in chunk_ids {
            query = query.bind(chunk_id);
        }

        let chunks = query.fetch_all(&self.pool).await.map_err(|e| {
            RetrievalError::Database(format!("Failed to fetch chunks by id: {}", e))
        })?;

        debug!(
            "Resolved {} of {} requested chunk ids",
            chunks.len(),
            chunk_ids.len()
        );
        Ok(chunks)
    }
}
