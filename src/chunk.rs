//! Sentence-aware text chunker.
//!
//! Splits extracted document text into pieces of at most `chunk_size`
//! tokens. Sentences are kept whole wherever they fit; a sentence longer
//! than the budget is hard-split at the last whitespace before the limit.
//! With a non-zero `chunk_overlap`, each chunk after the first begins with
//! the trailing sentences of the previous chunk that fit in the overlap.
//!
//! Tokens are approximated as four characters, matching the estimate used
//! when sizing embedding requests.

use crate::config::ChunkingConfig;

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Split `text` into chunks. Empty or whitespace-only text yields no chunks.
pub fn split_text(text: &str, config: &ChunkingConfig) -> Vec<String> {
    let max_chars = config.chunk_size.max(1) * CHARS_PER_TOKEN;
    let overlap_chars = config.chunk_overlap * CHARS_PER_TOKEN;

    let mut pieces = Vec::new();
    for sentence in split_sentences(text) {
        if sentence.chars().count() > max_chars {
            pieces.extend(hard_split(sentence, max_chars));
        } else {
            pieces.push(sentence.to_string());
        }
    }

    let mut chunks = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_len = 0usize;

    for piece in pieces {
        let piece_len = piece.chars().count();
        let would_be = if current.is_empty() {
            piece_len
        } else {
            current_len + 1 + piece_len
        };

        if would_be > max_chars && !current.is_empty() {
            chunks.push(current.join(" "));
            current = carry_overlap(&current, overlap_chars, max_chars - piece_len);
            current_len = joined_len(&current);
        }

        current_len = if current.is_empty() {
            piece_len
        } else {
            current_len + 1 + piece_len
        };
        current.push(piece);
    }

    if !current.is_empty() {
        chunks.push(current.join(" "));
    }

    chunks
}

/// Split into trimmed sentences. A sentence ends at `.`, `!` or `?` followed
/// by whitespace, or at a blank line.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        let boundary = match c {
            '.' | '!' | '?' => chars.peek().map(|(_, n)| n.is_whitespace()).unwrap_or(false),
            '\n' => chars.peek().map(|(_, n)| *n == '\n').unwrap_or(false),
            _ => false,
        };
        if boundary {
            let end = i + c.len_utf8();
            push_trimmed(&mut sentences, &text[start..end]);
            start = end;
        }
    }
    push_trimmed(&mut sentences, &text[start..]);
    sentences
}

fn push_trimmed<'a>(out: &mut Vec<&'a str>, s: &'a str) {
    let trimmed = s.trim();
    if !trimmed.is_empty() {
        out.push(trimmed);
    }
}

/// Break an oversized sentence at whitespace so each piece fits `max_chars`.
fn hard_split(sentence: &str, max_chars: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut remaining = sentence.trim();

    while !remaining.is_empty() {
        if remaining.chars().count() <= max_chars {
            out.push(remaining.to_string());
            break;
        }
        let limit = remaining
            .char_indices()
            .nth(max_chars)
            .map(|(i, _)| i)
            .unwrap_or(remaining.len());
        let split_at = remaining[..limit]
            .rfind(char::is_whitespace)
            .filter(|&pos| pos > 0)
            .unwrap_or(limit);
        let piece = remaining[..split_at].trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }
        remaining = remaining[split_at..].trim_start();
    }

    out
}

/// Trailing pieces of `previous` whose joined length fits both the overlap
/// and the room left next to the incoming piece.
fn carry_overlap(previous: &[String], overlap_chars: usize, room: usize) -> Vec<String> {
    let budget = overlap_chars.min(room.saturating_sub(1));
    if budget == 0 {
        return Vec::new();
    }

    let mut carried: Vec<String> = Vec::new();
    let mut len = 0usize;
    for piece in previous.iter().rev() {
        let piece_len = piece.chars().count();
        let next = if carried.is_empty() {
            piece_len
        } else {
            len + 1 + piece_len
        };
        if next > budget {
            break;
        }
        len = next;
        carried.push(piece.clone());
    }
    carried.reverse();
    carried
}

fn joined_len(pieces: &[String]) -> usize {
    if pieces.is_empty() {
        return 0;
    }
    pieces.iter().map(|p| p.chars().count()).sum::<usize>() + pieces.len() - 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(chunk_size: usize, chunk_overlap: usize) -> ChunkingConfig {
        ChunkingConfig {
            chunk_size,
            chunk_overlap,
        }
    }

    #[test]
    fn empty_text_has_no_chunks() {
        assert!(split_text("", &cfg(200, 0)).is_empty());
        assert!(split_text("   \n\n  ", &cfg(200, 0)).is_empty());
    }

    #[test]
    fn short_text_single_chunk() {
        let chunks = split_text("Hello, world! How are you?", &cfg(200, 0));
        assert_eq!(chunks, vec!["Hello, world! How are you?".to_string()]);
    }

    #[test]
    fn sentences_are_packed_within_limit() {
        // chunk_size 5 => 20 chars
        let text = "One two three. Four five six. Seven eight.";
        let chunks = split_text(text, &cfg(5, 0));
        assert_eq!(
            chunks,
            vec![
                "One two three.".to_string(),
                "Four five six.".to_string(),
                "Seven eight.".to_string()
            ]
        );
        for c in &chunks {
            assert!(c.chars().count() <= 20);
        }
    }

    #[test]
    fn long_sentence_hard_split_at_whitespace() {
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa";
        let chunks = split_text(text, &cfg(4, 0));
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.chars().count() <= 16, "chunk too long: {c:?}");
            assert!(!c.starts_with(' ') && !c.ends_with(' '));
        }
        assert_eq!(chunks.join(" "), text);
    }

    #[test]
    fn overlap_repeats_trailing_sentence() {
        // 40 chars per chunk, 20 chars of overlap
        let text = "First one here. Second one here. Third one here.";
        let chunks = split_text(text, &cfg(10, 5));
        assert_eq!(
            chunks,
            vec![
                "First one here. Second one here.".to_string(),
                "Second one here. Third one here.".to_string()
            ]
        );
    }

    #[test]
    fn blank_lines_end_sentences() {
        let text = "Heading\n\nBody text without a period";
        let chunks = split_text(text, &cfg(3, 0));
        assert_eq!(chunks[0], "Heading");
    }

    #[test]
    fn multibyte_text_is_safe() {
        let text = "ééééééééééééééééééééééééééééééééééééééé ñññññ";
        let chunks = split_text(text, &cfg(2, 0));
        assert!(!chunks.is_empty());
        for c in &chunks {
            assert!(c.chars().count() <= 8);
        }
    }
}
