//! Error types for JWKS fetching, parsing, and key lookup.

use std::fmt;

/// Errors surfaced by the JWKS cache.
///
/// Fetch and decode failures during a scheduled refresh are retried and then
/// logged; they only reach callers through the on-demand paths (`resolve`,
/// `refresh`).
#[derive(Debug, Clone)]
pub enum JwksError {
    /// Malformed base64url or JSON in key material or the JWKS body.
    Decode(String),
    /// A key record is missing required fields or has an unsupported type.
    MalformedKey(String),
    /// Transport or HTTP status failure while fetching the JWKS document.
    Fetch(String),
    /// The key identifier is absent, even after the allowed refresh attempt.
    UnknownKey(String),
}

impl fmt::Display for JwksError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode(msg) => write!(f, "Failed to decode key material: {}", msg),
            Self::MalformedKey(msg) => write!(f, "Malformed key: {}", msg),
            Self::Fetch(msg) => write!(f, "Failed to fetch JWKS: {}", msg),
            Self::UnknownKey(kid) => write!(f, "Unable to find key '{}' in JWKS", kid),
        }
    }
}

impl std::error::Error for JwksError {}
