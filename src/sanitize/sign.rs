use sha2::{Digest, Sha256};

use super::{Draft, Stage};

/// Hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Final stage: fingerprints the text that will leave the process.
#[derive(Debug, Clone, Copy)]
pub struct Signer;

impl Stage for Signer {
    fn name(&self) -> &'static str {
        "sign"
    }

    fn apply(&self, draft: &mut Draft) -> Result<(), String> {
        draft.signature = Some(sha256_hex(draft.text.as_bytes()));
        Ok(())
    }
}
