//! HMAC authentication of distributed content.
//!
//! A hub that was given `hub.secret` signs every delivery with
//! `X-Hub-Signature: <algorithm>=<hex digest>`, where the digest is the HMAC of
//! the raw body keyed with the secret. The comparison runs in constant time.

use std::fmt;
use std::str::FromStr;

use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};
use subtle::ConstantTimeEq;

use crate::error::ProtocolError;

/// Digest algorithms a hub may sign with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl SignatureAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            "sha384" => Ok(Self::Sha384),
            "sha512" => Ok(Self::Sha512),
            _ => Err(ProtocolError::UnsupportedSignatureAlgorithm(s.to_string())),
        }
    }
}

/// Why a delivery failed authentication.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthRejection {
    #[error("missing X-Hub-Signature header")]
    MissingSignature,

    #[error("malformed signature header: {0}")]
    MalformedSignature(String),

    #[error(transparent)]
    UnsupportedAlgorithm(ProtocolError),

    #[error("signature does not match body")]
    Mismatch,
}

/// How a delivery was authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authentication {
    /// The subscription has no secret; content is taken unauthenticated
    Unauthenticated,
    Verified(SignatureAlgorithm),
}

macro_rules! hmac_digest {
    ($digest:ty, $key:expr, $body:expr) => {{
        <Hmac<$digest> as Mac>::new_from_slice($key).map(|mut mac| {
            mac.update($body);
            mac.finalize().into_bytes().to_vec()
        })
    }};
}

/// Validates delivery signatures against a subscription secret.
pub struct ContentAuthenticator;

impl ContentAuthenticator {
    /// Whether a delivery should be accepted.
    ///
    /// True when there is no secret, or when the signature header carries
    /// the exact HMAC of `body`.
    pub fn verify(secret: Option<&str>, signature: Option<&str>, body: &[u8]) -> bool {
        Self::check(secret, signature, body).is_ok()
    }

    /// Like [`verify`](Self::verify), with the reason for a rejection.
    pub fn check(
        secret: Option<&str>,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<Authentication, AuthRejection> {
        let Some(secret) = secret else {
            return Ok(Authentication::Unauthenticated);
        };
        let header = signature.ok_or(AuthRejection::MissingSignature)?;

        let (name, digest_hex) = header
            .trim()
            .split_once('=')
            .ok_or_else(|| AuthRejection::MalformedSignature("expected <algorithm>=<hex>".to_string()))?;
        let algorithm: SignatureAlgorithm =
            name.parse().map_err(AuthRejection::UnsupportedAlgorithm)?;
        let supplied = hex::decode(digest_hex)
            .map_err(|e| AuthRejection::MalformedSignature(format!("invalid hex: {e}")))?;

        let computed = Self::digest(algorithm, secret.as_bytes(), body)?;

        if computed.ct_eq(&supplied).into() {
            Ok(Authentication::Verified(algorithm))
        } else {
            Err(AuthRejection::Mismatch)
        }
    }

    /// The `X-Hub-Signature` value a hub would send for `body`.
    pub fn sign(algorithm: SignatureAlgorithm, secret: &str, body: &[u8]) -> String {
        match Self::digest(algorithm, secret.as_bytes(), body) {
            Ok(digest) => format!("{algorithm}={}", hex::encode(digest)),
            Err(_) => format!("{algorithm}="),
        }
    }

    fn digest(algorithm: SignatureAlgorithm, key: &[u8], body: &[u8]) -> Result<Vec<u8>, AuthRejection> {
        let digest = match algorithm {
            SignatureAlgorithm::Sha1 => hmac_digest!(Sha1, key, body),
            SignatureAlgorithm::Sha256 => hmac_digest!(Sha256, key, body),
            SignatureAlgorithm::Sha384 => hmac_digest!(Sha384, key, body),
            SignatureAlgorithm::Sha512 => hmac_digest!(Sha512, key, body),
        };
        digest.map_err(|e| AuthRejection::MalformedSignature(e.to_string()))
    }
}
