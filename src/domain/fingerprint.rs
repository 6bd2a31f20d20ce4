use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Collapses whitespace runs, trims and lowercases. Applying it twice is a no-op.
pub fn normalize_key(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<&str>>()
        .join(" ")
        .to_lowercase()
}

/// Dedup key of a business: hex SHA-256 over normalized name and address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(name: &str, address: &str) -> Self {
        let key = format!("{}|{}", normalize_key(name), normalize_key(address));

        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        let digest = hasher.finalize();

        Fingerprint(digest.iter().map(|b| format!("{:02x}", b)).collect())
    }

    /// Wraps a value read back from storage.
    pub fn from_stored(value: String) -> Self {
        Fingerprint(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
