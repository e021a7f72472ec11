//! Token-budgeted prompt context assembly.
//!
//! Merges conversation memory and retrieved passages into one bounded
//! [`GenerationRequest`]. The budget is measured in estimated tokens using
//! a 4-chars-per-token heuristic; the policy is strict about granularity:
//! turns and passages are included whole or not at all, never truncated
//! mid-text.
//!
//! Priority order under the budget:
//!
//! 1. The current user turn — always included.
//! 2. Prior turns, most recent first, until one no longer fits (it and all
//!    older turns are dropped).
//! 3. Retrieved passages, highest score first, into whatever budget
//!    remains; a passage that does not fit is skipped, smaller lower-ranked
//!    passages may still be included.
//!
//! A context containing only the current user turn is valid. Assembly
//! cannot fail.

use crate::config::{ContextConfig, GenerationConfig};
use crate::models::{
    ChatMessage, GenerationRequest, PassageId, RetrievalResult, Role, Turn,
};

/// Approximate characters-per-token ratio.
///
/// A rough heuristic (4 chars ≈ 1 token); swapping in a proper tokenizer
/// only requires replacing [`estimate_tokens`].
pub const CHARS_PER_TOKEN: usize = 4;

/// Default system prompt for retrieval-grounded answers.
const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant that answers questions using the \
provided context. Use only the information in the context; if it does not contain the answer, \
say so. Cite sources by their number (Source 1, Source 2, ...) where possible.";

/// Estimate the token cost of a piece of text.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// An assembled prompt plus bookkeeping about what made it in.
#[derive(Debug, Clone)]
pub struct AssembledContext {
    pub request: GenerationRequest,
    /// Passages actually included, in inclusion order — these become the
    /// assistant turn's citations.
    pub cited_passages: Vec<PassageId>,
    /// Prior turns dropped for budget reasons.
    pub dropped_turns: usize,
    /// Retrieved passages that did not fit.
    pub dropped_passages: usize,
}

/// Assemble the prompt for one turn.
///
/// `prior_turns` is the full history in append order; only the most recent
/// `memory_window` turns are considered at all before budgeting.
pub fn assemble(
    prior_turns: &[Turn],
    retrieval: &RetrievalResult,
    user_text: &str,
    system_prompt: Option<&str>,
    context: &ContextConfig,
    generation: &GenerationConfig,
) -> AssembledContext {
    let base_system = system_prompt.unwrap_or(DEFAULT_SYSTEM_PROMPT);

    let mut remaining = context.token_budget;
    // The base system prompt and the current turn are fixed overhead: both
    // are charged against the budget but never dropped.
    remaining = remaining.saturating_sub(estimate_tokens(base_system));
    remaining = remaining.saturating_sub(estimate_tokens(user_text));

    // Memory, newest first, whole turns only.
    let window = prior_turns
        .iter()
        .rev()
        .take(context.memory_window)
        .collect::<Vec<_>>();
    let mut included_memory: Vec<&Turn> = Vec::new();
    let mut dropped_turns = prior_turns.len().saturating_sub(window.len());
    for &turn in &window {
        let cost = estimate_tokens(&turn.content);
        if cost <= remaining {
            remaining -= cost;
            included_memory.push(turn);
        } else {
            // This and every older turn are dropped.
            dropped_turns += window.len() - included_memory.len();
            break;
        }
    }

    // Passages, highest score first, whole passages only, into the budget
    // left after memory.
    let mut context_block = String::new();
    let mut cited_passages: Vec<PassageId> = Vec::new();
    let mut dropped_passages = 0;
    for scored in &retrieval.passages {
        let source_number = cited_passages.len() + 1;
        let entry = format!(
            "Source {} (document {}, passage {}):\n{}\n\n",
            source_number, scored.meta.document_id, scored.meta.position, scored.meta.text
        );
        // The first passage also pays for the context-block preamble.
        let preamble = if cited_passages.is_empty() {
            estimate_tokens("\n\nContext:\n")
        } else {
            0
        };
        let cost = estimate_tokens(&entry) + preamble;
        if cost <= remaining {
            remaining -= cost;
            context_block.push_str(&entry);
            cited_passages.push(scored.meta.passage_id);
        } else {
            dropped_passages += 1;
        }
    }

    let system = if context_block.is_empty() {
        base_system.to_string()
    } else {
        format!("{base_system}\n\nContext:\n{}", context_block.trim_end())
    };

    // Oldest first for the wire format.
    let mut messages: Vec<ChatMessage> = included_memory
        .into_iter()
        .rev()
        .map(|turn| ChatMessage {
            role: turn.role,
            content: turn.content.clone(),
        })
        .collect();
    messages.push(ChatMessage {
        role: Role::User,
        content: user_text.to_string(),
    });

    AssembledContext {
        request: GenerationRequest {
            system,
            messages,
            max_tokens: generation.max_tokens,
            temperature: generation.temperature,
        },
        cited_passages,
        dropped_turns,
        dropped_passages,
    }
}
