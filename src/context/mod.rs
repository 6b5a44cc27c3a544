
use std::collections::HashMap;
use tracing::debug;

use crate::merge::{ScoredChunk, SearchSource};
use crate::store::models::ChunkRecord;

const APPROX_CHARS_PER_TOKEN: usize = 4;

pub const CONTEXT_HEADER: &str = "--- KNOWLEDGE BASE CONTEXT ---";
pub const CONTEXT_FOOTER: &str = "--- END OF CONTEXT ---";
pub const TRUNCATION_FOOTER: &str = "--- CONTEXT TRUNCATED ---";

/// Deterministic token estimate: one token per four characters, rounded up.
/// Exact parity with the downstream model's tokenizer is a non-goal; this
/// only has to be a stable, conservative bound.
pub fn estimate_token_count(text: &str) -> usize {
    text.chars().count().div_ceil(APPROX_CHARS_PER_TOKEN)
}

/// Render a merged result list into a single context string bounded by
/// `max_tokens` (estimated).
///
/// Results are rendered in order, each as a provenance line plus the chunk's
/// full text, resolved through `chunks_by_id`. Whole blocks are appended
/// while they fit; the first block that does not fit ends the context with a
/// truncation footer. If not even the first block fits, that block alone is
/// cut to the remaining budget so a too-small budget still yields some
/// context rather than none. An empty result list yields an empty string;
/// the caller treats that as "answer without retrieval augmentation", not as
/// a failure.
pub fn assemble(
    results: &[ScoredChunk],
    chunks_by_id: &HashMap<String, ChunkRecord>,
    max_tokens: usize,
) -> String {
    if results.is_empty() {
        return String::new();
    }

    let budget_chars = max_tokens.saturating_mul(APPROX_CHARS_PER_TOKEN);

    let blocks: Vec<String> = results
        .iter()
        .filter_map(|result| {
            let chunk = chunks_by_id.get(&result.chunk_id)?;
            Some(render_block(result, chunk))
        })
        .collect();

    if blocks.is_empty() {
        debug!("No merged result resolved to a stored chunk");
        return String::new();
    }

    let mut out = String::with_capacity(budget_chars.min(1 << 16));
    out.push_str(CONTEXT_HEADER);
    out.push_str("\n\n");

    // Reserve room for the worst-case ending before committing to a block.
    let reserve = TRUNCATION_FOOTER.chars().count() + 1;
    let mut used = out.chars().count();
    let mut truncated = false;

    for (i, block) in blocks.iter().enumerate() {
        let block_chars = block.chars().count() + 1;
        if used + block_chars + reserve <= budget_chars {
            out.push_str(block);
            out.push('\n');
            used += block_chars;
            continue;
        }

        if i == 0 {
            // Not even one block fits whole: emit what the budget allows.
            let avail = budget_chars.saturating_sub(used + reserve + 4);
            if avail > 0 {
                out.extend(block.chars().take(avail));
                out.push_str("...\n");
            }
        }
        truncated = true;
        break;
    }

    out.push_str(if truncated {
        TRUNCATION_FOOTER
    } else {
        CONTEXT_FOOTER
    });

    // Last-resort clamp for degenerate budgets smaller than the frame
    // itself; keeps the estimate bound unconditional.
    if out.chars().count() > budget_chars {
        out = out.chars().take(budget_chars).collect();
    }

    debug!(
        "Assembled context of {} chars from {} blocks (truncated: {})",
        out.len(),
        blocks.len(),
        truncated
    );
    out
}

fn render_block(result: &ScoredChunk, chunk: &ChunkRecord) -> String {
    // Raw scores are kept raw everywhere else; the provenance line alone
    // shows a human-oriented relevance figure.
    let relevance = match result.source {
        SearchSource::Vector => 1.0 / (1.0 + result.score),
        SearchSource::Lexical => result.score,
    };

    format!(
        "[{}] Document: {} (relevance: {:.3})\n{}\n",
        result.source, chunk.document_id, relevance, chunk.text
    )
}
