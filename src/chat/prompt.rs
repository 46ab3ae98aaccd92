//! Prompt assembly for grounded answers.

use crate::generation::GenerationRequest;
use crate::retrieval::Source;

/// System instructions sent with every request.
pub const SYSTEM_PROMPT: &str = "You are a helpful assistant that answers questions based on provided documents. Be concise and accurate.";

const CITATION_INSTRUCTIONS: &str = "INSTRUCTIONS: Answer the user's question based ONLY on the above context. \
Use numbered citations like [1], [2] in your text corresponding to the sources provided. \
Do not mention 'Source 1' or 'File: ...' explicitly, just use the bracketed numbers. \
If the answer is not in the context, say you don't know.";

/// Render the numbered context block, one paragraph per source.
pub fn context_block(sources: &[Source]) -> String {
    sources
        .iter()
        .map(|source| {
            let page = source
                .page
                .map_or_else(|| "?".to_string(), |page| page.to_string());
            format!(
                "[{}] (File: {}, Page: {}): {}",
                source.citation_id,
                source.filename,
                page,
                source.excerpt_text.replace(['\r', '\n'], " ")
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Build the user prompt. Without sources the message goes to the model untouched.
pub fn build_prompt(message: &str, sources: &[Source]) -> String {
    if sources.is_empty() {
        return message.to_string();
    }
    format!(
        "Based on the following context, answer the user's question.\n\nContext:\n{}\n\n{}\n\nQuestion: {}\n\nAnswer:",
        context_block(sources),
        CITATION_INSTRUCTIONS,
        message
    )
}

/// Full generation request for `message` grounded on `sources`.
pub fn generation_request(message: &str, sources: &[Source]) -> GenerationRequest {
    GenerationRequest {
        system: SYSTEM_PROMPT.to_string(),
        prompt: build_prompt(message, sources),
    }
}
