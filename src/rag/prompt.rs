//! Prompt assembly for the answer flow.
//!
//! Every retrieved chunk becomes a numbered context block; the block number
//! is the 1-based position in the result list, which is exactly what the
//! citation extractor resolves against later. Blocks are never dropped or
//! truncated here, or that mapping would silently break.

use crate::rag::store::SearchResult;

/// Separator between context blocks.
pub const CONTEXT_SEPARATOR: &str = "\n---\n";

/// Build the final prompt for `question` over ranked `results`.
///
/// With no results this produces the explicit no-context prompt: the model
/// is told to say nothing relevant was found instead of inventing an answer.
pub fn build_prompt(question: &str, results: &[SearchResult]) -> String {
    if results.is_empty() {
        return format!(
            "No relevant context was found in the document collection for this question.\n\n\
             Question: {}\n\n\
             State that no relevant information was found in the available documents. \
             Do not answer from outside knowledge.",
            question
        );
    }

    let blocks: Vec<String> = results
        .iter()
        .enumerate()
        .map(|(idx, result)| format_block(idx + 1, result))
        .collect();

    format!(
        "You are answering a question from retrieved document excerpts.\n\n\
         Context:\n{}\n\n\
         Question: {}\n\n\
         Answer using only the context above and cite the excerpts that support \
         each claim with their [n] markers. If the context does not contain the \
         answer, say so.",
        blocks.join(CONTEXT_SEPARATOR),
        question
    )
}

fn format_block(number: usize, result: &SearchResult) -> String {
    let header = match result.chunk.page_number {
        Some(page) => format!(
            "[{}] source={} page={} score={:.1}%",
            number,
            result.chunk.document_name,
            page,
            result.score * 100.0
        ),
        None => format!(
            "[{}] source={} score={:.1}%",
            number,
            result.chunk.document_name,
            result.score * 100.0
        ),
    };
    format!("{}\n{}", header, result.chunk.text)
}
