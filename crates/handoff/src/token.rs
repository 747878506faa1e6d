//! Capability tokens for receiver confirmation.
//!
//! A token is a bearer credential scoped to one handoff: 32 bytes from the OS
//! RNG, hex encoded. Stores index tokens by their BLAKE3 digest so lookups
//! never need the raw secret, and comparisons go through `blake3::Hash`, whose
//! equality is constant-time.

use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Raw token length in bytes.
pub const TOKEN_BYTES: usize = 32;

/// Secret confirmation token. The inner string is wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfirmationToken(String);

impl ConfirmationToken {
    /// Generate a fresh unguessable token.
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let token = Self(hex::encode(bytes));
        bytes.zeroize();
        token
    }

    /// Parse a token presented by a caller. Returns `None` for anything that
    /// is not exactly 64 lowercase or uppercase hex characters.
    pub fn parse(presented: &str) -> Option<Self> {
        let trimmed = presented.trim();
        if trimmed.len() != TOKEN_BYTES * 2 || !trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        Some(Self(trimmed.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn digest(&self) -> TokenDigest {
        TokenDigest(blake3::hash(self.0.as_bytes()))
    }

    /// Constant-time match against another token.
    pub fn matches(&self, other: &ConfirmationToken) -> bool {
        self.digest() == other.digest()
    }
}

impl std::fmt::Debug for ConfirmationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ConfirmationToken({}…)", self.digest().short())
    }
}

/// BLAKE3 digest of a confirmation token.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TokenDigest(blake3::Hash);

impl TokenDigest {
    pub fn to_hex(&self) -> String {
        self.0.to_hex().to_string()
    }

    /// Eight-character prefix, safe to log.
    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl std::fmt::Debug for TokenDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TokenDigest({})", self.short())
    }
}
