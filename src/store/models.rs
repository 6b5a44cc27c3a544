use sqlx::FromRow;

/// A contiguous span of source text with stable identity.
///
/// `chunk_id` is the external identity shared with both indexes; `id` is the
/// SQLite rowid used internally as the FTS5 content rowid. Chunks are created
/// in bulk by the upstream corpus loader and are immutable afterwards.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct ChunkRecord {
    pub id: i64,
    pub chunk_id: String,
    pub document_id: String,
    pub doc_type: Option<String>,
    pub doc_number: Option<String>,
    pub file_name: Option<String>,
    pub chunk_index: i64,
    pub text: String,
}

impl ChunkRecord {
    /// Whether this chunk carries indexable content. Blank chunks are kept in
    /// the store for traceability but are skipped at index-build time.
    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }
}
