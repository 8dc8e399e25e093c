//! Adaptive text chunker.
//!
//! Splits text into bounded, overlapping chunks for embedding. Split points
//! are chosen in preference order: after a sentence terminator (`.`, `!`,
//! `?` followed by whitespace or end of text), else at the last word
//! boundary inside the window, else a hard cut at the window edge.
//!
//! Guarantees, for any input and any `max_chars >= 1`, `overlap >= 0`:
//!
//! - chunks cover the input exactly (stitching them back together with the
//!   overlap removed reproduces the text),
//! - every chunk is at most `max_chars` characters,
//! - the loop terminates: a chosen end that fails to advance past the
//!   previous end is replaced by a full-window cut,
//! - `overlap` not strictly smaller than `max_chars` is clamped to
//!   `max_chars / 4`.
//!
//! All offsets are byte offsets on `char` boundaries, so chunks can be
//! persisted next to byte-ranged code symbols.

/// A bounded slice of the input text.
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    /// Position in the chunk sequence, starting at 0.
    pub index: usize,
    pub content: String,
    /// Byte offset of the first byte, inclusive.
    pub start: usize,
    /// Byte offset past the last byte, exclusive.
    pub end: usize,
}

/// Split `text` into chunks of at most `max_chars` characters with
/// `overlap` characters carried between consecutive chunks.
pub fn chunk_text(text: &str, max_chars: usize, overlap: usize) -> Vec<TextChunk> {
    let max_chars = max_chars.max(1);
    let overlap = if overlap >= max_chars {
        max_chars / 4
    } else {
        overlap
    };

    if text.is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut prev_end = 0usize;

    while start < text.len() {
        let window_end = advance_chars(text, start, max_chars);

        let mut end = if window_end >= text.len() {
            text.len()
        } else {
            let window = &text[start..window_end];
            match last_sentence_split(text, start, window) {
                Some(split) => split,
                None => match last_word_split(window) {
                    Some(rel) => start + rel,
                    None => window_end,
                },
            }
        };

        // Forward progress: a split that does not move past the previous
        // end would loop forever, so take the full window instead.
        if end <= prev_end {
            end = window_end;
            if end <= prev_end {
                end = text.len();
            }
        }

        chunks.push(TextChunk {
            index: chunks.len(),
            content: text[start..end].to_string(),
            start,
            end,
        });
        prev_end = end;

        if end >= text.len() {
            break;
        }

        let mut next_start = retreat_chars(text, end, overlap);
        if next_start <= start {
            next_start = end;
        }
        start = next_start;
    }

    chunks
}

/// Byte offset of the last sentence boundary inside `window`, in absolute
/// terms. A boundary sits right after `.`, `!`, or `?` when the following
/// character (in the full text) is whitespace or the text ends there.
fn last_sentence_split(text: &str, window_start: usize, window: &str) -> Option<usize> {
    let mut best = None;
    for (pos, ch) in window.char_indices() {
        if !matches!(ch, '.' | '!' | '?') {
            continue;
        }
        let after = window_start + pos + ch.len_utf8();
        let terminal = match text[after..].chars().next() {
            None => true,
            Some(next) => next.is_whitespace(),
        };
        if terminal && after > window_start {
            best = Some(after);
        }
    }
    best
}

/// Relative byte offset just past the last whitespace run in `window`,
/// so the cut lands between words.
fn last_word_split(window: &str) -> Option<usize> {
    let mut best = None;
    for (pos, ch) in window.char_indices() {
        if ch.is_whitespace() {
            let after = pos + ch.len_utf8();
            if after < window.len() {
                best = Some(after);
            }
        }
    }
    best
}

/// Byte offset `n` characters forward of `from`, clamped to the text end.
fn advance_chars(text: &str, from: usize, n: usize) -> usize {
    text[from..]
        .char_indices()
        .nth(n)
        .map(|(i, _)| from + i)
        .unwrap_or(text.len())
}

/// Byte offset `n` characters back from `from`, clamped to the text start.
fn retreat_chars(text: &str, from: usize, n: usize) -> usize {
    if n == 0 {
        return from;
    }
    let mut pos = from;
    for _ in 0..n {
        match text[..pos].char_indices().next_back() {
            Some((i, _)) => pos = i,
            None => return 0,
        }
    }
    pos
}
