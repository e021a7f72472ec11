//! Boundary-aware overlapping text chunker.
//!
//! Splits document text into passage-sized spans that respect a configurable
//! `chunk_size` limit. Splitting prefers paragraph boundaries (`\n\n`), then
//! sentence boundaries, and falls back to a hard cut at the window edge when
//! no boundary exists. Each chunk after the first starts `chunk_overlap`
//! bytes before the previous chunk's end, so neighbouring passages share
//! trailing context across the split.
//!
//! [`chunks`] returns a lazy, restartable iterator of [`Span`]s over the
//! input; [`chunk_document`] materializes them into [`Passage`]s.
//!
//! # Algorithm
//!
//! 1. Open a window of `chunk_size` bytes at the cursor (snapped back to a
//!    UTF-8 character boundary).
//! 2. Split after the last paragraph boundary in the window, else after the
//!    last sentence boundary, else hard-cut at the window edge. Boundaries
//!    inside the overlap region are ignored so every chunk makes progress
//!    past the previous one.
//! 3. Advance the cursor to `end - chunk_overlap` for the next chunk.
//! 4. The remainder after the final window becomes the terminal chunk.
//!
//! Empty input yields an empty sequence; input no longer than `chunk_size`
//! yields exactly one chunk.

use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::models::{DocumentId, Passage, Span};

/// Lazily split `text` into overlapping chunk spans.
pub fn chunks<'a>(text: &'a str, config: &ChunkingConfig) -> Chunks<'a> {
    Chunks {
        text,
        chunk_size: config.chunk_size.max(1),
        overlap: config.chunk_overlap.min(config.chunk_size.saturating_sub(1)),
        cursor: 0,
    }
}

/// Materialize the chunk sequence for a document into passages.
pub fn chunk_document(
    document_id: DocumentId,
    text: &str,
    config: &ChunkingConfig,
) -> Vec<Passage> {
    chunks(text, config)
        .enumerate()
        .map(|(position, span)| Passage {
            id: Uuid::new_v4(),
            document_id,
            position,
            text: text[span.start..span.end].to_string(),
            span,
        })
        .collect()
}

/// Iterator over chunk spans. Restartable: cloning yields an independent
/// iterator over the same input from the start of its remaining range.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    text: &'a str,
    chunk_size: usize,
    overlap: usize,
    cursor: usize,
}

impl<'a> Iterator for Chunks<'a> {
    type Item = Span;

    fn next(&mut self) -> Option<Span> {
        let len = self.text.len();
        if self.cursor >= len {
            return None;
        }

        let start = self.cursor;
        let end = if len - start <= self.chunk_size {
            len
        } else {
            split_point(self.text, start, self.chunk_size, self.overlap)
        };

        self.cursor = if end >= len {
            len
        } else {
            // Repeat the previous chunk's tail; always move at least one
            // character forward.
            let next = end.saturating_sub(self.overlap).max(start + 1);
            advance_to_char_boundary(self.text, next)
        };

        Some(Span { start, end })
    }
}

/// Pick the split point for a window starting at `start`.
///
/// Boundary candidates at or before `start + overlap` are rejected: that
/// region repeats the previous chunk, and splitting inside it would re-emit
/// text the previous chunk already covered.
fn split_point(text: &str, start: usize, chunk_size: usize, overlap: usize) -> usize {
    let mut hard_end = snap_to_char_boundary(text, start + chunk_size);
    if hard_end <= start {
        // A single character wider than the whole window; emit it alone.
        hard_end = advance_to_char_boundary(text, start + 1);
    }

    let window = &text[start..hard_end];
    let floor = overlap.min(window.len().saturating_sub(1));

    if let Some(i) = window.rfind("\n\n") {
        let end_rel = i + 2;
        if end_rel > floor {
            return start + end_rel;
        }
    }

    let mut best: Option<usize> = None;
    for pattern in [". ", "! ", "? "] {
        if let Some(i) = window.rfind(pattern) {
            let end_rel = i + 2;
            if end_rel > floor {
                best = Some(best.map_or(end_rel, |b: usize| b.max(end_rel)));
            }
        }
    }
    if let Some(i) = window.rfind('\n') {
        let end_rel = i + 1;
        if end_rel > floor {
            best = Some(best.map_or(end_rel, |b: usize| b.max(end_rel)));
        }
    }

    match best {
        Some(end_rel) => start + end_rel,
        None => hard_end,
    }
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Snap a byte index forward to the nearest valid UTF-8 char boundary.
fn advance_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}
