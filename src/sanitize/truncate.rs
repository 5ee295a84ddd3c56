use super::{Draft, Stage};

/// Appended after a cut.
pub const TRUNCATED: &str = "[TRUNCATED]";

/// Caps payloads at a word count.
#[derive(Debug, Clone, Copy)]
pub struct Truncator {
    max_words: usize,
}

impl Truncator {
    pub fn new(max_words: usize) -> Self {
        Self { max_words }
    }

    /// Returns `None` when `text` already fits. A trailing [`TRUNCATED`]
    /// marker does not count toward the limit.
    pub fn truncate(&self, text: &str) -> Option<String> {
        let mut words: Vec<&str> = text.split_whitespace().collect();
        if words.last() == Some(&TRUNCATED) {
            words.pop();
        }
        if words.len() <= self.max_words {
            return None;
        }
        let mut out = words[..self.max_words].join(" ");
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(TRUNCATED);
        Some(out)
    }
}

impl Stage for Truncator {
    fn name(&self) -> &'static str {
        "truncate"
    }

    fn apply(&self, draft: &mut Draft) -> Result<(), String> {
        if let Some(cut) = self.truncate(&draft.text) {
            draft.text = cut;
        }
        Ok(())
    }
}
