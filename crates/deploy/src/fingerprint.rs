use derive_more::Display;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Content hash of compiled creation bytecode.
///
/// The fingerprint covers the bytecode only. Constructor arguments are tracked
/// separately on the record so that "code changed" and "arguments changed" can
/// be told apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BytecodeFingerprint(String);

impl BytecodeFingerprint {
    /// Compute the SHA-256 fingerprint of `bytecode`.
    ///
    /// The hash is deterministic - the same bytecode always produces the same
    /// hex-encoded fingerprint.
    pub fn of(bytecode: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytecode);
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}
