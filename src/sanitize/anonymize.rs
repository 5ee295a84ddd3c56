//! Path and username pseudonymization.
//!
//! Tokens are `<path:xxxxxxxxxxxx>` / `<user:xxxxxxxxxxxx>`: the first 12 hex
//! chars of HMAC-SHA256 under a salt derived from the engine key and the UTC
//! day. The same value maps to the same token within a day, and tokens from
//! different days cannot be correlated.

use chrono::Utc;
use regex::Regex;

use super::{Draft, Stage, keyed_hex};
use crate::errors::Error;

const TOKEN_HEX: usize = 12;

/// Current UTC day as `YYYY-MM-DD`.
pub fn day_stamp() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

#[derive(Debug)]
pub struct Anonymizer {
    key: Vec<u8>,
    day: Option<String>,
    path: Regex,
    users: Option<Regex>,
}

impl Anonymizer {
    pub fn new(key: Vec<u8>, usernames: Vec<String>, day: Option<String>) -> Result<Self, Error> {
        let path = Regex::new(
            r#"(^|[\s(\["'=,])((?:~/|/|[A-Za-z]:\\)[^\s"'<>()\[\],;/\\][^\s"'<>()\[\],;]*)"#,
        )?;

        let mut names: Vec<String> = usernames
            .into_iter()
            .map(|u| u.trim().to_string())
            .filter(|u| u.chars().count() >= 2)
            .collect();
        // Longest first so `alice.smith` wins over `alice`.
        names.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        names.dedup();
        let users = if names.is_empty() {
            None
        } else {
            let alternation = names
                .iter()
                .map(|n| regex::escape(n))
                .collect::<Vec<_>>()
                .join("|");
            Some(Regex::new(&format!(r"(?i)\b(?:{alternation})\b"))?)
        };

        Ok(Self {
            key,
            day,
            path,
            users,
        })
    }

    fn salt(&self) -> String {
        let day = self.day.clone().unwrap_or_else(day_stamp);
        keyed_hex(&self.key, format!("notekeep-anon:{day}").as_bytes())
    }

    fn token(salt: &str, kind: &str, value: &str) -> String {
        let digest = keyed_hex(salt.as_bytes(), value.as_bytes());
        format!("<{kind}:{}>", &digest[..TOKEN_HEX])
    }

    /// Pseudonymize `text` with the salt for the configured day.
    pub fn anonymize(&self, text: &str) -> String {
        let salt = self.salt();

        let text = self.path.replace_all(text, |caps: &regex::Captures<'_>| {
            let raw = &caps[2];
            let path = raw.trim_end_matches(['.', ':', '!', '?']);
            let tail = &raw[path.len()..];
            format!("{}{}{tail}", &caps[1], Self::token(&salt, "path", path))
        });

        let Some(users) = &self.users else {
            return text.into_owned();
        };

        // Skip matches sitting right after `<`: that is an existing token kind.
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for m in users.find_iter(&text) {
            if text[..m.start()].ends_with('<') {
                continue;
            }
            out.push_str(&text[last..m.start()]);
            out.push_str(&Self::token(&salt, "user", &m.as_str().to_lowercase()));
            last = m.end();
        }
        out.push_str(&text[last..]);
        out
    }
}

impl Stage for Anonymizer {
    fn name(&self) -> &'static str {
        "anonymize"
    }

    fn apply(&self, draft: &mut Draft) -> Result<(), String> {
        draft.text = self.anonymize(&draft.text);
        Ok(())
    }
}
