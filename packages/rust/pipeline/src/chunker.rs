//! Paragraph-aligned text splitting for oversized stage inputs.
//!
//! Splits prefer the last blank line at or before the size limit; when a
//! stretch of text has no paragraph boundary the split falls back to the
//! hard limit (respecting char boundaries). Output chunks are trimmed and
//! never empty, and the split is deterministic for a given input and limit.

/// Split `text` into chunks of at most `max_size` bytes.
///
/// A single chunk may exceed `max_size` only when one multi-byte character
/// is wider than the limit itself.
pub fn split(text: &str, max_size: usize) -> Vec<String> {
    let max_size = max_size.max(1);
    let mut chunks = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        if rest.len() <= max_size {
            push_trimmed(&mut chunks, rest);
            break;
        }

        // Largest char boundary at or below the limit.
        let mut hard = max_size;
        while hard > 0 && !rest.is_char_boundary(hard) {
            hard -= 1;
        }
        if hard == 0 {
            // One character wider than the limit; take it whole.
            hard = rest
                .chars()
                .next()
                .map(char::len_utf8)
                .unwrap_or(rest.len());
        }

        // Prefer the last paragraph boundary inside the window.
        let cut = match rest[..hard].rfind("\n\n") {
            Some(pos) if pos > 0 => pos,
            _ => hard,
        };

        push_trimmed(&mut chunks, &rest[..cut]);
        rest = rest[cut..].trim_start_matches(['\n', '\r']);
    }

    chunks
}

fn push_trimmed(chunks: &mut Vec<String>, piece: &str) {
    let trimmed = piece.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(split("hello world", 4000), vec!["hello world"]);
    }

    #[test]
    fn empty_and_whitespace_produce_no_chunks() {
        assert!(split("", 100).is_empty());
        assert!(split("  \n\n  ", 100).is_empty());
    }

    #[test]
    fn splits_at_last_paragraph_boundary() {
        let text = "first paragraph\n\nsecond paragraph\n\nthird paragraph";
        let chunks = split(text, 40);
        assert_eq!(
            chunks,
            vec!["first paragraph\n\nsecond paragraph", "third paragraph"]
        );
    }

    #[test]
    fn hard_split_when_no_boundary() {
        let text = "a".repeat(250);
        let chunks = split(&text, 100);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 100);
        assert_eq!(chunks[1].len(), 100);
        assert_eq!(chunks[2].len(), 50);
    }

    #[test]
    fn every_chunk_is_within_the_limit() {
        let text = "para one\n\npara two is a bit longer\n\nshort\n\n".repeat(20);
        for chunk in split(&text, 64) {
            assert!(!chunk.trim().is_empty());
            assert!(chunk.len() <= 64, "chunk too long: {}", chunk.len());
        }
    }

    #[test]
    fn content_survives_the_split() {
        let text = "alpha\n\nbravo\n\ncharlie\n\ndelta";
        let chunks = split(text, 14);
        let rejoined = chunks.join("\n\n");
        assert_eq!(rejoined, text);
    }

    #[test]
    fn split_is_deterministic() {
        let text = "x y z\n\n".repeat(100);
        assert_eq!(split(&text, 50), split(&text, 50));
    }

    #[test]
    fn multibyte_input_splits_on_char_boundaries() {
        let text = "é".repeat(100); // 2 bytes each
        let chunks = split(&text, 11);
        assert!(chunks.iter().all(|c| c.len() <= 11));
        assert_eq!(chunks.concat(), text);
    }
}
