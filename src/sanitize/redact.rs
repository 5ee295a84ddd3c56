//! Secret redaction.

use regex::{Captures, Regex};

use super::{Draft, Stage};
use crate::errors::Error;

/// Replacement for every redacted span.
pub const REDACTED: &str = "[REDACTED]";

const MAX_PASSES: usize = 8;

/// Replaces credential-looking spans with [`REDACTED`] until nothing changes.
#[derive(Debug)]
pub struct Redactor {
    /// Whole-match patterns, most specific first.
    patterns: Vec<Regex>,
    /// `key = value` assignments; the key is kept, the value replaced.
    /// Values are a quoted string, a bracketed span or a bare word.
    assignment: Regex,
}

impl Redactor {
    pub fn new() -> Result<Self, Error> {
        let patterns = [
            r"(?s)-----BEGIN [A-Z ]*PRIVATE KEY-----.*?-----END [A-Z ]*PRIVATE KEY-----",
            r"\bsk-[A-Za-z0-9_-]{16,}",
            r"\bgh[pousr]_[A-Za-z0-9]{20,}",
            r"\bgithub_pat_[A-Za-z0-9_]{20,}",
            r"\bAKIA[0-9A-Z]{16}\b",
            r"\bxox[abposr]-[A-Za-z0-9-]{10,}",
            r"(?i)\bbearer\s+[A-Za-z0-9._~+/=-]{8,}",
        ]
        .into_iter()
        .map(Regex::new)
        .collect::<Result<Vec<_>, _>>()?;

        let assignment = Regex::new(
            r#"(?i)(\b[A-Za-z0-9_-]*(?:api[_-]?key|secret|password|passwd|token)[A-Za-z0-9_-]*\s*[:=]\s*)("[^"\n]*"?|'[^'\n]*'?|\[[^\]\n]*\]?|[^\s"',;\[]+)"#,
        )?;
        Ok(Self {
            patterns,
            assignment,
        })
    }

    /// One pass over every pattern.
    pub fn redact_once(&self, text: &str) -> String {
        let mut out = text.to_string();
        for pattern in &self.patterns {
            out = pattern.replace_all(&out, REDACTED).into_owned();
        }
        self.assignment
            .replace_all(&out, |caps: &Captures<'_>| {
                // An already-redacted value is left alone so passes settle.
                if &caps[2] == REDACTED {
                    caps[0].to_string()
                } else {
                    format!("{}{REDACTED}", &caps[1])
                }
            })
            .into_owned()
    }
}

impl Stage for Redactor {
    fn name(&self) -> &'static str {
        "redact"
    }

    fn apply(&self, draft: &mut Draft) -> Result<(), String> {
        for _ in 0..MAX_PASSES {
            let next = self.redact_once(&draft.text);
            if next == draft.text {
                return Ok(());
            }
            draft.text = next;
        }
        Err(format!("redaction did not settle after {MAX_PASSES} passes"))
    }
}
