//! Random callback tokens and shared secrets.

use rand::rngs::OsRng;
use rand::RngCore;

/// Bytes of entropy in a callback token.
pub const CALLBACK_TOKEN_BYTES: usize = 32;

/// Bytes of entropy in a subscription secret.
pub const SECRET_BYTES: usize = 64;

/// Source of callback tokens and secrets.
///
/// Tokens become a URL path segment, so implementations must return
/// URL-safe strings. Callback tokens and secrets are drawn independently.
pub trait TokenGenerator: Send + Sync {
    fn callback_token(&self) -> String;

    fn secret(&self) -> String;
}

/// Draws from the operating system's CSPRNG and hex encodes the bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsTokenGenerator;

impl OsTokenGenerator {
    fn random_hex(len: usize) -> String {
        let mut bytes = vec![0u8; len];
        OsRng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    }
}

impl TokenGenerator for OsTokenGenerator {
    fn callback_token(&self) -> String {
        Self::random_hex(CALLBACK_TOKEN_BYTES)
    }

    fn secret(&self) -> String {
        Self::random_hex(SECRET_BYTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_callback_token_shape() {
        let token = OsTokenGenerator.callback_token();
        assert_eq!(token.len(), CALLBACK_TOKEN_BYTES * 2);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_secret_shape() {
        let secret = OsTokenGenerator.secret();
        assert_eq!(secret.len(), SECRET_BYTES * 2);
        assert!(secret.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_tokens_are_distinct() {
        let tokens: HashSet<String> = (0..100).map(|_| OsTokenGenerator.callback_token()).collect();
        assert_eq!(tokens.len(), 100);
    }
}
