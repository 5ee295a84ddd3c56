//! Outbound sanitization.
//!
//! Every payload bound for an AI provider passes through the same fixed chain:
//! redact, anonymize, truncate, sign. A stage failure aborts the whole run; no
//! partially sanitized text escapes. [`SanitizedPayload`] can only be built
//! here, so a provider that accepts it cannot receive raw text.

mod anonymize;
mod redact;
mod sign;
mod truncate;

pub use anonymize::{Anonymizer, day_stamp};
pub use redact::{REDACTED, Redactor};
pub use sign::{Signer, sha256_hex};
pub use truncate::{TRUNCATED, Truncator};

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::errors::Error;

type HmacSha256 = Hmac<Sha256>;

/// Text moving through the stages. `signature` is set by the last stage.
#[derive(Debug, Clone, Default)]
pub struct Draft {
    pub text: String,
    pub signature: Option<String>,
}

/// One sanitization step.
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Transform `draft` in place. The error string becomes the failure reason.
    fn apply(&self, draft: &mut Draft) -> Result<(), String>;
}

/// Output of a full pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizedPayload {
    text: String,
    signature: String,
}

impl SanitizedPayload {
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Hex SHA-256 of [`Self::text`].
    pub fn signature(&self) -> &str {
        &self.signature
    }
}

/// Inputs for building a [`Pipeline`].
#[derive(Debug, Clone)]
pub struct SanitizerConfig {
    /// Engine secret. Anonymization salts are derived from it per UTC day.
    pub key: Vec<u8>,
    /// Account names replaced with `<user:…>` tokens.
    pub usernames: Vec<String>,
    pub max_words: usize,
    /// Pin the salt day (`YYYY-MM-DD`). `None` uses the current UTC day.
    pub day: Option<String>,
}

impl SanitizerConfig {
    pub fn new(key: impl Into<Vec<u8>>, max_words: usize) -> Self {
        Self {
            key: key.into(),
            usernames: Vec::new(),
            max_words,
            day: None,
        }
    }

    pub fn with_usernames(mut self, usernames: impl IntoIterator<Item = String>) -> Self {
        self.usernames.extend(usernames);
        self
    }

    pub fn with_day(mut self, day: impl Into<String>) -> Self {
        self.day = Some(day.into());
        self
    }
}

/// Local account name from the environment, if any.
pub fn os_username() -> Option<String> {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .ok()
        .filter(|u| !u.trim().is_empty())
}

/// The fixed redact → anonymize → truncate → sign chain.
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    key: Vec<u8>,
}

impl Pipeline {
    /// # Errors
    ///
    /// Fails if a pattern set does not compile.
    pub fn new(config: SanitizerConfig) -> Result<Self, Error> {
        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(Redactor::new()?),
            Box::new(Anonymizer::new(
                config.key.clone(),
                config.usernames,
                config.day,
            )?),
            Box::new(Truncator::new(config.max_words)),
            Box::new(Signer),
        ];
        Ok(Self {
            stages,
            key: config.key,
        })
    }

    /// Stage names in execution order.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage over `input`.
    ///
    /// # Errors
    ///
    /// [`Error::Sanitization`] naming the failing stage. Input that is not
    /// valid UTF-8 or contains NUL fails at `decode`.
    pub fn sanitize(&self, input: &[u8]) -> Result<SanitizedPayload, Error> {
        let text = std::str::from_utf8(input).map_err(|e| Error::Sanitization {
            stage: "decode",
            reason: format!("invalid UTF-8 at byte {}", e.valid_up_to()),
        })?;
        if text.contains('\0') {
            return Err(Error::Sanitization {
                stage: "decode",
                reason: "embedded NUL byte".to_string(),
            });
        }

        let mut draft = Draft {
            text: text.to_string(),
            signature: None,
        };
        for stage in &self.stages {
            if let Err(reason) = stage.apply(&mut draft) {
                tracing::warn!(
                    target: "notekeep.sanitize",
                    stage = stage.name(),
                    %reason,
                    "sanitization failed closed"
                );
                return Err(Error::Sanitization {
                    stage: stage.name(),
                    reason,
                });
            }
        }

        let Some(signature) = draft.signature else {
            return Err(Error::Sanitization {
                stage: "sign",
                reason: "no signature produced".to_string(),
            });
        };
        tracing::debug!(
            target: "notekeep.sanitize",
            bytes_in = input.len(),
            bytes_out = draft.text.len(),
            %signature,
            "payload sanitized"
        );
        Ok(SanitizedPayload {
            text: draft.text,
            signature,
        })
    }

    /// Keyed hash of an identity for audit rows.
    pub fn hash_identity(&self, identity: &str) -> String {
        keyed_hex(&self.key, identity.as_bytes())
    }
}

/// Hex HMAC-SHA256 of `message` under `key`.
pub(crate) fn keyed_hex(key: &[u8], message: &[u8]) -> String {
    match HmacSha256::new_from_slice(key) {
        Ok(mut mac) => {
            mac.update(message);
            hex::encode(mac.finalize().into_bytes())
        }
        // HMAC accepts keys of any length; this arm is unreachable in practice.
        Err(_) => sha256_hex(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline(max_words: usize) -> Pipeline {
        let config = SanitizerConfig::new(b"test-key".to_vec(), max_words)
            .with_usernames(["alice".to_string()])
            .with_day("2026-01-15");
        Pipeline::new(config).unwrap()
    }

    #[test]
    fn test_stage_order_is_fixed() {
        assert_eq!(
            pipeline(10).stage_names(),
            vec!["redact", "anonymize", "truncate", "sign"]
        );
    }

    #[test]
    fn test_full_chain() {
        let input = "alice keeps api_key=abc123secret in /home/alice/.env for the deploy";
        let out = pipeline(2000).sanitize(input.as_bytes()).unwrap();

        assert!(!out.text().contains("abc123secret"));
        assert!(!out.text().contains("/home/alice"));
        assert!(!out.text().contains("alice"));
        assert!(out.text().contains(REDACTED));
        assert!(out.text().contains("<path:"));
        assert!(out.text().contains("<user:"));
        assert_eq!(out.signature(), sha256_hex(out.text().as_bytes()));
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        let p = pipeline(12);
        let input = "Token: ghp_abcdefghijklmnopqrstuvwx and ~/notes/secret.md belong to alice. \
                     one two three four five six seven eight nine ten eleven twelve thirteen";
        let once = p.sanitize(input.as_bytes()).unwrap();
        let twice = p.sanitize(once.text().as_bytes()).unwrap();
        assert_eq!(once.text(), twice.text());
        assert_eq!(once.signature(), twice.signature());
    }

    #[test]
    fn test_multiword_and_bracketed_secrets_do_not_leak() {
        let p = pipeline(2000);
        let input = "password = \"correct horse battery\" and passwd=[hunter2] end";
        let once = p.sanitize(input.as_bytes()).unwrap();
        assert_eq!(once.text(), "password = [REDACTED] and passwd=[REDACTED] end");

        let twice = p.sanitize(once.text().as_bytes()).unwrap();
        assert_eq!(twice.text(), once.text());
        assert_eq!(twice.signature(), once.signature());
    }

    #[test]
    fn test_invalid_utf8_fails_closed() {
        let err = pipeline(10).sanitize(&[0x66, 0xff, 0x6f]).unwrap_err();
        assert!(matches!(err, Error::Sanitization { stage: "decode", .. }));
    }

    #[test]
    fn test_nul_fails_closed() {
        let err = pipeline(10).sanitize(b"abc\0def").unwrap_err();
        assert!(matches!(err, Error::Sanitization { stage: "decode", .. }));
    }

    #[test]
    fn test_failing_stage_names_itself() {
        struct Broken;
        impl Stage for Broken {
            fn name(&self) -> &'static str {
                "broken"
            }
            fn apply(&self, _draft: &mut Draft) -> Result<(), String> {
                Err("nope".to_string())
            }
        }
        let mut p = pipeline(10);
        p.stages.insert(1, Box::new(Broken));
        let err = p.sanitize(b"hello").unwrap_err();
        assert!(matches!(err, Error::Sanitization { stage: "broken", .. }));
    }

    #[test]
    fn test_identity_hash_is_keyed() {
        let a = pipeline(10).hash_identity("bob");
        let other = Pipeline::new(SanitizerConfig::new(b"other".to_vec(), 10)).unwrap();
        assert_eq!(a.len(), 64);
        assert_ne!(a, other.hash_identity("bob"));
        assert_eq!(a, pipeline(10).hash_identity("bob"));
    }
}
