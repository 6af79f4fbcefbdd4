//! Key records and key sets parsed from a JWKS document.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use tracing::debug;

use crate::error::JwksError;

/// A single JSON Web Key from a JWKS document.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key ID, used to match the JWT header kid.
    #[serde(default)]
    pub kid: String,
    /// Key type (e.g., "RSA")
    pub kty: String,
    /// Algorithm (e.g., "RS256")
    pub alg: Option<String>,
    /// Key use (e.g., "sig" for signature)
    #[serde(rename = "use")]
    pub key_use: Option<String>,
    /// RSA modulus (base64url encoded)
    #[serde(default)]
    pub n: String,
    /// RSA exponent (base64url encoded)
    #[serde(default)]
    pub e: String,
    /// X.509 certificate chain
    pub x5c: Option<Vec<String>>,
    /// X.509 certificate SHA-1 thumbprint
    pub x5t: Option<String>,
}

/// A JWKS document as served by the endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct JwksDocument {
    pub keys: Vec<Jwk>,
}

/// A key record with its lazily derived verification key.
///
/// Records are immutable once built; the derived [`DecodingKey`] is computed
/// on first use and published through a [`OnceLock`], so concurrent readers
/// never race on the memoization.
pub struct KeyRecord {
    jwk: Jwk,
    decoded: OnceLock<DecodingKey>,
}

impl KeyRecord {
    pub fn new(jwk: Jwk) -> Self {
        Self {
            jwk,
            decoded: OnceLock::new(),
        }
    }

    /// The raw key record as it appeared in the JWKS document.
    pub fn jwk(&self) -> &Jwk {
        &self.jwk
    }

    pub fn kid(&self) -> &str {
        &self.jwk.kid
    }

    /// Derive the verification key from the record's RSA components.
    ///
    /// The first call decodes the base64url `n`/`e` fields and builds the
    /// public key; later calls return the cached object. A caller that loses
    /// the publication race gets the winner's value.
    pub fn decoding_key(&self) -> Result<&DecodingKey, JwksError> {
        if let Some(key) = self.decoded.get() {
            return Ok(key);
        }
        let key = derive_rsa_key(&self.jwk)?;
        Ok(self.decoded.get_or_init(|| key))
    }
}

impl fmt::Debug for KeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRecord")
            .field("jwk", &self.jwk)
            .field("derived", &self.decoded.get().is_some())
            .finish()
    }
}

fn derive_rsa_key(jwk: &Jwk) -> Result<DecodingKey, JwksError> {
    if jwk.kty != "RSA" {
        return Err(JwksError::MalformedKey(format!(
            "unsupported key type '{}'",
            jwk.kty
        )));
    }
    if jwk.n.is_empty() || jwk.e.is_empty() {
        return Err(JwksError::MalformedKey(
            "missing required fields 'n' or 'e'".to_string(),
        ));
    }

    // Decode both components up front so malformed base64url is reported as
    // a decode failure rather than an opaque key-construction error.
    let modulus = URL_SAFE_NO_PAD
        .decode(&jwk.n)
        .map_err(|e| JwksError::Decode(format!("invalid base64url in 'n': {}", e)))?;
    let exponent = URL_SAFE_NO_PAD
        .decode(&jwk.e)
        .map_err(|e| JwksError::Decode(format!("invalid base64url in 'e': {}", e)))?;
    debug!(
        "Derived RSA key '{}' ({}-bit modulus, {}-byte exponent)",
        jwk.kid,
        modulus.len() * 8,
        exponent.len()
    );

    DecodingKey::from_rsa_components(&jwk.n, &jwk.e)
        .map_err(|e| JwksError::MalformedKey(format!("invalid RSA components: {}", e)))
}

/// An immutable key set built from one fetch of the JWKS endpoint.
///
/// Installed into the store as a whole unit; never mutated afterwards.
#[derive(Debug)]
pub struct KeySet {
    keys: HashMap<String, Arc<KeyRecord>>,
    url: String,
}

impl KeySet {
    /// An empty key set, used before the first successful fetch.
    pub fn empty(url: impl Into<String>) -> Self {
        Self {
            keys: HashMap::new(),
            url: url.into(),
        }
    }

    /// Build a key set from a parsed JWKS document.
    ///
    /// Keys are indexed by kid; the last record with a given kid wins.
    /// Non-RSA and encryption-use keys are skipped.
    pub fn from_document(doc: JwksDocument, url: impl Into<String>) -> Self {
        let mut keys = HashMap::new();
        for jwk in doc.keys {
            if jwk.kty != "RSA" {
                debug!("Skipping non-RSA key '{}' ({})", jwk.kid, jwk.kty);
                continue;
            }
            if jwk.key_use.as_deref() == Some("enc") {
                debug!("Skipping encryption key '{}'", jwk.kid);
                continue;
            }
            keys.insert(jwk.kid.clone(), Arc::new(KeyRecord::new(jwk)));
        }
        Self {
            keys,
            url: url.into(),
        }
    }

    pub fn get(&self, kid: &str) -> Option<&Arc<KeyRecord>> {
        self.keys.get(kid)
    }

    /// The endpoint URL this set was fetched from.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Real 2048-bit RSA public components.
    const TEST_N: &str = "0wCJ7S8OoLrBSMpZy2-816Gqv6Fj6GAosMHOdfBnFrA2cT-JDeAaEboSezGKSq8u-l4sBQ3BDhGeDYE9wOgpXdTaVgvrS9FsV8vaQaFLlXEEkLJShNa5VHPi2E-DNqLRSOwAA7ALRk48kF-6NYqG8EheahndgC2FFetHWgrDtTJqPFC5Xwrpn-S6hO4Ucw0yzI210izJ5_OggV9czBcbw_IWz6rs14F0yanolZCNhVgAa_qap8LHK6ghtrKjIK9fDzbljD6Uys0AkNQP4uXfcICOco_EDia8cWxj1JWwZcbyFQjk45ZJNdLUV48rlkjSdiCNHxTH7S36C_c470r7SQ";
    const TEST_E: &str = "AQAB";

    fn rsa_jwk(kid: &str, n: &str, e: &str) -> Jwk {
        Jwk {
            kid: kid.to_string(),
            kty: "RSA".to_string(),
            alg: Some("RS256".to_string()),
            key_use: Some("sig".to_string()),
            n: n.to_string(),
            e: e.to_string(),
            x5c: None,
            x5t: None,
        }
    }

    #[test]
    fn test_decoding_key_success() {
        let record = KeyRecord::new(rsa_jwk("k1", TEST_N, TEST_E));
        assert!(record.decoding_key().is_ok());
    }

    #[test]
    fn test_decoding_key_is_memoized() {
        let record = KeyRecord::new(rsa_jwk("k1", TEST_N, TEST_E));
        let first = record.decoding_key().unwrap();
        let second = record.decoding_key().unwrap();
        // Same cached object, not a re-derivation.
        assert!(std::ptr::eq(first, second));
    }

    #[test]
    fn test_decoding_key_missing_components() {
        let record = KeyRecord::new(rsa_jwk("k1", "", TEST_E));
        assert!(matches!(
            record.decoding_key(),
            Err(JwksError::MalformedKey(_))
        ));

        let record = KeyRecord::new(rsa_jwk("k1", TEST_N, ""));
        assert!(matches!(
            record.decoding_key(),
            Err(JwksError::MalformedKey(_))
        ));
    }

    #[test]
    fn test_decoding_key_invalid_base64() {
        let record = KeyRecord::new(rsa_jwk("k1", "!!!not-base64url!!!", TEST_E));
        assert!(matches!(record.decoding_key(), Err(JwksError::Decode(_))));

        let record = KeyRecord::new(rsa_jwk("k1", TEST_N, "%%%"));
        assert!(matches!(record.decoding_key(), Err(JwksError::Decode(_))));
    }

    #[test]
    fn test_decoding_key_unsupported_type() {
        let mut jwk = rsa_jwk("k1", TEST_N, TEST_E);
        jwk.kty = "EC".to_string();
        let record = KeyRecord::new(jwk);
        assert!(matches!(
            record.decoding_key(),
            Err(JwksError::MalformedKey(_))
        ));
    }

    #[test]
    fn test_jwk_deserialization_ignores_unknown_fields() {
        let json = r#"{
            "kty": "RSA",
            "kid": "test-key-1",
            "alg": "RS256",
            "use": "sig",
            "n": "abc",
            "e": "AQAB",
            "x5t": "thumb",
            "x5t#S256": "other-thumb"
        }"#;

        let jwk: Jwk = serde_json::from_str(json).unwrap();
        assert_eq!(jwk.kid, "test-key-1");
        assert_eq!(jwk.key_use, Some("sig".to_string()));
        assert_eq!(jwk.x5t, Some("thumb".to_string()));
    }

    #[test]
    fn test_key_set_last_duplicate_wins() {
        let doc: JwksDocument = serde_json::from_str(
            r#"{
            "keys": [
                {"kty": "RSA", "kid": "k1", "n": "first", "e": "AQAB"},
                {"kty": "RSA", "kid": "k1", "n": "second", "e": "AQAB"}
            ]
        }"#,
        )
        .unwrap();

        let set = KeySet::from_document(doc, "https://example.com/jwks");
        assert_eq!(set.len(), 1);
        assert_eq!(set.get("k1").unwrap().jwk().n, "second");
    }

    #[test]
    fn test_key_set_skips_non_signature_keys() {
        let doc: JwksDocument = serde_json::from_str(
            r#"{
            "keys": [
                {"kty": "RSA", "kid": "sig-key", "use": "sig", "n": "abc", "e": "AQAB"},
                {"kty": "RSA", "kid": "enc-key", "use": "enc", "n": "abc", "e": "AQAB"},
                {"kty": "EC", "kid": "ec-key", "x": "abc", "y": "def"}
            ]
        }"#,
        )
        .unwrap();

        let set = KeySet::from_document(doc, "https://example.com/jwks");
        assert_eq!(set.len(), 1);
        assert!(set.get("sig-key").is_some());
        assert!(set.get("enc-key").is_none());
        assert!(set.get("ec-key").is_none());
    }

    #[test]
    fn test_empty_key_set() {
        let set = KeySet::empty("https://example.com/jwks");
        assert!(set.is_empty());
        assert!(set.get("anything").is_none());
        assert_eq!(set.url(), "https://example.com/jwks");
    }
}
