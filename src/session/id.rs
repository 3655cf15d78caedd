//! Session identifier generation and validation.

use std::fmt;
use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngCore;
use sha2::{Digest, Sha256};

/// Length of a valid identifier: a hex-encoded SHA-256 digest.
pub const SESSION_ID_LEN: usize = 64;

/// A validated session identifier: exactly 64 characters of `[a-fA-F0-9]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh identifier.
    ///
    /// Mixes wall-clock time, the caller's address and 32 random bytes
    /// through SHA-256, so collisions are bounded by the 256-bit digest.
    pub fn generate(client: Option<IpAddr>) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let mut nonce = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut nonce);

        let mut hasher = Sha256::new();
        hasher.update(now.as_nanos().to_be_bytes());
        if let Some(addr) = client {
            hasher.update(addr.to_string().as_bytes());
        }
        hasher.update(nonce);
        Self(hex::encode(hasher.finalize()))
    }

    /// Accept `candidate` only if it has the exact identifier shape.
    pub fn parse(candidate: &str) -> Option<Self> {
        is_valid(candidate).then(|| Self(candidate.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Pure shape check; does not stop at the first bad character.
pub fn is_valid(candidate: &str) -> bool {
    let bytes = candidate.as_bytes();
    if bytes.len() != SESSION_ID_LEN {
        return false;
    }
    bytes.iter().fold(true, |ok, b| ok & b.is_ascii_hexdigit())
}
