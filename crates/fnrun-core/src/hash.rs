//! Content hash identifying a function's source.

use sha1::{Digest, Sha1};
use std::fmt;

/// Hex SHA-1 digest of a function's source text.
///
/// Identical source always maps to the same hash, and therefore to the same
/// function directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionHash(String);

impl FunctionHash {
    /// Hash `code`.
    pub fn of(code: &str) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(code.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// The lowercase hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FunctionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for FunctionHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
