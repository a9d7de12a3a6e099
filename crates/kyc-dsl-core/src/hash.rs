//! Content hash of canonical case text
//!
//! SHA-256 over the UTF-8 bytes, stored as lowercase hex.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn of(text: &str) -> Self {
        let digest = Sha256::digest(text.as_bytes());
        Self(hex::encode(digest))
    }

    /// Wrap a hex digest read back from storage
    pub fn from_hex(hex_digest: impl Into<String>) -> Self {
        Self(hex_digest.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for log lines
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        // sha256("")
        assert_eq!(
            ContentHash::of("").as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_same_text_same_hash() {
        let text = "(kyc-case X)\n";
        assert_eq!(ContentHash::of(text), ContentHash::of(text));
        assert_ne!(ContentHash::of(text), ContentHash::of("(kyc-case Y)\n"));
    }

    #[test]
    fn test_short() {
        assert_eq!(ContentHash::of("").short(), "e3b0c44298fc");
        assert_eq!(ContentHash::from_hex("abc").short(), "abc");
    }
}
