pub mod openai;

pub use openai::OpenAiClient;

use crate::Result;

/// Remote embedding capability consumed by the vector index and the query
/// path. Implementations are blocking; the facade decides where calls run
/// and how long they may take.
pub trait EmbeddingProvider: Send + Sync {
    /// Length of every vector this provider returns.
    fn dimension(&self) -> usize;

    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of texts in one provider round trip. The result has the
    /// same length and order as the input.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}
