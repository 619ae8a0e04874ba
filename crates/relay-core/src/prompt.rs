//! Prompt construction.
//!
//! Pure and deterministic: the same question and snippets always produce the
//! same prompt. Snippets keep the retriever's order (it encodes rank) and are
//! never truncated.

use std::fmt::Write;

use crate::types::ContextSnippet;

/// Instruction placed ahead of the snippets.
pub const SYSTEM_INSTRUCTION: &str = "You are an assistant. Use only the following snippets to answer. If answer not present, say you don't know.";

/// Provenance label used when a snippet has no source.
pub const UNKNOWN_SOURCE: &str = "unknown";

/// Compose the generation prompt for one user question.
pub fn build_prompt(question: &str, snippets: &[ContextSnippet]) -> String {
    let body_len: usize = snippets.iter().map(|s| s.text.len() + 64).sum();
    let mut prompt =
        String::with_capacity(SYSTEM_INSTRUCTION.len() + body_len + question.len() + 32);

    prompt.push_str(SYSTEM_INSTRUCTION);
    prompt.push_str("\n\n");
    for (i, snippet) in snippets.iter().enumerate() {
        if i > 0 {
            prompt.push_str("\n\n");
        }
        let source = snippet.metadata.provenance().unwrap_or(UNKNOWN_SOURCE);
        // Writing into a String cannot fail.
        let _ = write!(prompt, "Snippet {}:\n{}\nSource: {}", i + 1, snippet.text, source);
    }
    prompt.push_str("\n\nUser question: ");
    prompt.push_str(question);
    prompt.push_str("\nAnswer:");
    prompt
}
