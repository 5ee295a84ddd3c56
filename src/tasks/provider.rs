//! AI providers. Every entry point takes [`SanitizedPayload`], never raw text.

use std::collections::HashMap;

use serde::Serialize;

use crate::errors::Error;
use crate::sanitize::SanitizedPayload;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub category: String,
    pub confidence: f64,
}

pub trait AiProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Choose one of `categories` for the payload.
    fn classify(
        &self,
        payload: &SanitizedPayload,
        categories: &[String],
    ) -> Result<Classification, Error>;

    fn summarize(&self, payload: &SanitizedPayload, max_words: usize) -> Result<String, Error>;

    /// Combine several notes into one overview.
    fn synthesize(&self, payloads: &[SanitizedPayload]) -> Result<String, Error>;
}

/// Deterministic offline provider.
///
/// Classification counts keyword overlap between the payload and each
/// category name; summaries are the leading sentences; synthesis is one
/// bullet per note.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalProvider;

impl LocalProvider {
    pub fn new() -> Self {
        Self
    }
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 2)
        .map(str::to_lowercase)
}

/// Sentences of prose, skipping headings, frontmatter fences and blank lines.
fn sentences(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line == "---" {
            if !current.trim().is_empty() {
                out.push(current.trim().to_string());
            }
            current.clear();
            continue;
        }
        for word in line.split_whitespace() {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
            if word.ends_with(['.', '!', '?']) {
                out.push(current.trim().to_string());
                current.clear();
            }
        }
    }
    if !current.trim().is_empty() {
        out.push(current.trim().to_string());
    }
    out
}

impl AiProvider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    fn classify(
        &self,
        payload: &SanitizedPayload,
        categories: &[String],
    ) -> Result<Classification, Error> {
        if categories.is_empty() {
            return Err(Error::Task("classify needs at least one category".to_string()));
        }

        let mut freq: HashMap<String, usize> = HashMap::new();
        for w in words(payload.text()) {
            *freq.entry(w).or_default() += 1;
        }

        let scores: Vec<usize> = categories
            .iter()
            .map(|c| words(c).map(|w| freq.get(&w).copied().unwrap_or(0)).sum())
            .collect();
        let total: usize = scores.iter().sum();

        // First category wins ties, including the all-zero case.
        let mut best = 0;
        for (i, score) in scores.iter().enumerate() {
            if *score > scores[best] {
                best = i;
            }
        }

        Ok(Classification {
            category: categories[best].clone(),
            confidence: if total == 0 {
                0.0
            } else {
                scores[best] as f64 / total as f64
            },
        })
    }

    fn summarize(&self, payload: &SanitizedPayload, max_words: usize) -> Result<String, Error> {
        let mut summary: Vec<&str> = Vec::new();
        let sentences = sentences(payload.text());
        for sentence in &sentences {
            let count = sentence.split_whitespace().count();
            if !summary.is_empty() && summary.len() + count > max_words {
                break;
            }
            summary.extend(sentence.split_whitespace());
            if summary.len() >= max_words {
                summary.truncate(max_words);
                break;
            }
        }
        Ok(summary.join(" "))
    }

    fn synthesize(&self, payloads: &[SanitizedPayload]) -> Result<String, Error> {
        if payloads.is_empty() {
            return Err(Error::Task("synthesize needs at least one note".to_string()));
        }
        let mut out = format!("Synthesis of {} notes:\n", payloads.len());
        for payload in payloads {
            let lead = sentences(payload.text())
                .into_iter()
                .next()
                .unwrap_or_default();
            out.push_str("- ");
            out.push_str(&lead);
            out.push('\n');
        }
        Ok(out)
    }
}
