//! Prompt and context assembly for answer generation.

use serde::Serialize;

use crate::search::SimilarChunk;

/// Default system prompt for code question answering.
pub const SYSTEM_PROMPT: &str = "You are an AI assistant designed to help users understand code. \
Your task is to always provide answers based on the context provided by the user. \
If the information the user is asking for is not present in the context, respond with: \"Sorry, I don't know.\".\n\
Your responses should be clear, concise, and relevant to the code provided. \
Do not speculate or offer answers beyond what is contained in the context.";

/// Concatenate ranked chunks into a context block.
///
/// Each chunk renders as `path\ntext\n`; chunks are joined with a newline,
/// so consecutive entries are separated by a blank line. No results yields
/// an empty string.
pub fn build_context(results: &[SimilarChunk]) -> String {
    results
        .iter()
        .map(|r| format!("{}\n{}\n", r.path, r.text))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Effective system message: the prompt, plus a context block when non-empty.
pub fn system_content(system_prompt: &str, context: Option<&str>) -> String {
    match context {
        Some(ctx) if !ctx.is_empty() => format!("{}\nContext: {}", system_prompt, ctx),
        _ => system_prompt.to_string(),
    }
}

/// A single chat message sent to a generation backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

/// `[system, user]` message pair for one question.
pub fn build_messages(system_prompt: &str, context: Option<&str>, question: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage {
            role: "system",
            content: system_content(system_prompt, context),
        },
        ChatMessage {
            role: "user",
            content: question.to_string(),
        },
    ]
}
