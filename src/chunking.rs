//! Word-window chunking for embeddings.

/// Words per chunk. Roughly fits the embedder's 512-token window.
pub const CHUNK_WORDS: usize = 200;
/// Words shared between consecutive chunks.
pub const CHUNK_OVERLAP: usize = 40;

/// Split `text` into overlapping word windows.
///
/// Whitespace is normalized to single spaces. Blank input yields no chunks;
/// a text shorter than one window yields exactly one.
pub fn chunk_words(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() || size == 0 {
        return Vec::new();
    }
    let step = size.saturating_sub(overlap).max(1);

    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + size).min(words.len());
        chunks.push(words[start..end].join(" "));
        if end == words.len() {
            break;
        }
        start += step;
    }
    chunks
}

/// Chunk with the default window.
pub fn chunk_text(text: &str) -> Vec<String> {
    chunk_words(text, CHUNK_WORDS, CHUNK_OVERLAP)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_text_has_no_chunks() {
        assert!(chunk_text("  \n\t ").is_empty());
    }

    #[test]
    fn test_short_text_is_one_chunk() {
        assert_eq!(chunk_text("one  two\nthree"), vec!["one two three"]);
    }

    #[test]
    fn test_windows_overlap() {
        let text = (0..10).map(|i| i.to_string()).collect::<Vec<_>>().join(" ");
        let chunks = chunk_words(&text, 4, 1);
        assert_eq!(chunks, vec!["0 1 2 3", "3 4 5 6", "6 7 8 9"]);
    }

    #[test]
    fn test_every_word_is_covered() {
        let text = (0..450).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let chunks = chunk_text(&text);
        assert!(chunks.len() >= 3);
        assert!(chunks[0].starts_with("w0 "));
        assert!(chunks.last().unwrap().ends_with("w449"));
    }

    #[test]
    fn test_overlap_not_smaller_than_size_still_advances() {
        let chunks = chunk_words("a b c d", 2, 5);
        assert_eq!(chunks, vec!["a b", "b c", "c d"]);
    }
}
