//! Session Identity
//!
//! Clients present an opaque session token when joining. The server does
//! not authenticate it; it only derives a stable `PlayerId` so the same
//! token always maps to the same seat across reconnects.

use sha2::{Sha256, Digest};
use thiserror::Error;

use crate::game::state::PlayerId;

/// Longest accepted session token, in bytes.
pub const MAX_SESSION_LEN: usize = 256;

/// Identity errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// Token is empty or whitespace.
    #[error("session token is empty")]
    Empty,
    /// Token exceeds `MAX_SESSION_LEN`.
    #[error("session token too long ({0} bytes)")]
    TooLong(usize),
    /// Token contains control characters.
    #[error("session token contains control characters")]
    InvalidCharacters,
}

/// A validated client session token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionIdentity {
    token: String,
}

impl SessionIdentity {
    /// Validate a raw token.
    pub fn parse(token: &str) -> Result<Self, IdentityError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(IdentityError::Empty);
        }
        if token.len() > MAX_SESSION_LEN {
            return Err(IdentityError::TooLong(token.len()));
        }
        if token.chars().any(char::is_control) {
            return Err(IdentityError::InvalidCharacters);
        }
        Ok(Self { token: token.to_string() })
    }

    /// Derive a deterministic PlayerId from the token.
    /// Uses SHA256 to create a 16-byte ID.
    pub fn player_id(&self) -> PlayerId {
        let mut hasher = Sha256::new();
        hasher.update(b"tridimensional-duels-player:");
        hasher.update(self.token.as_bytes());
        let hash = hasher.finalize();

        let mut id = [0u8; 16];
        id.copy_from_slice(&hash[..16]);
        PlayerId::new(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_id_derivation() {
        let a1 = SessionIdentity::parse("session-abc").unwrap().player_id();
        let a2 = SessionIdentity::parse("  session-abc ").unwrap().player_id();
        let b = SessionIdentity::parse("session-def").unwrap().player_id();

        // Same token gives the same id
        assert_eq!(a1, a2);
        assert_ne!(a1, b);
    }

    #[test]
    fn test_rejects_bad_tokens() {
        assert_eq!(SessionIdentity::parse(""), Err(IdentityError::Empty));
        assert_eq!(SessionIdentity::parse("   "), Err(IdentityError::Empty));
        assert_eq!(SessionIdentity::parse("a\u{0}b"), Err(IdentityError::InvalidCharacters));

        let long = "x".repeat(MAX_SESSION_LEN + 1);
        assert_eq!(SessionIdentity::parse(&long), Err(IdentityError::TooLong(MAX_SESSION_LEN + 1)));
    }
}
