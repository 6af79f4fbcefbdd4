//! Thread-safe holder of the current key set.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::key::{KeyRecord, KeySet};

/// Holds the currently installed [`KeySet`] snapshot.
///
/// Reads clone the snapshot `Arc` under a short read lock; installs swap the
/// whole set under a short write lock. Neither path ever spans a network
/// call, so lookups never block on an in-flight refresh, and readers holding
/// an old snapshot keep it intact across an install.
pub struct KeyStore {
    current: RwLock<Arc<KeySet>>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(KeySet::empty(""))),
        }
    }

    /// Look up a key by kid in the current snapshot.
    ///
    /// Absence is a normal outcome, not an error.
    pub async fn get(&self, kid: &str) -> Option<Arc<KeyRecord>> {
        self.current.read().await.get(kid).cloned()
    }

    /// Atomically replace the current snapshot.
    pub async fn install(&self, set: KeySet) {
        *self.current.write().await = Arc::new(set);
    }

    /// The current snapshot as a whole.
    pub async fn snapshot(&self) -> Arc<KeySet> {
        self.current.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.current.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.current.read().await.is_empty()
    }
}

impl Default for KeyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{Jwk, JwksDocument, KeySet};

    fn set_with_kid(kid: &str) -> KeySet {
        let doc = JwksDocument {
            keys: vec![Jwk {
                kid: kid.to_string(),
                kty: "RSA".to_string(),
                alg: Some("RS256".to_string()),
                key_use: Some("sig".to_string()),
                n: "abc".to_string(),
                e: "AQAB".to_string(),
                x5c: None,
                x5t: None,
            }],
        };
        KeySet::from_document(doc, "https://example.com/jwks")
    }

    #[tokio::test]
    async fn test_store_starts_empty() {
        let store = KeyStore::new();
        assert!(store.is_empty().await);
        assert!(store.get("k1").await.is_none());
    }

    #[tokio::test]
    async fn test_install_then_get() {
        let store = KeyStore::new();
        store.install(set_with_kid("k1")).await;

        assert_eq!(store.len().await, 1);
        let record = store.get("k1").await.expect("installed key");
        assert_eq!(record.kid(), "k1");
        assert!(store.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_install_replaces_whole_set() {
        let store = KeyStore::new();
        store.install(set_with_kid("k1")).await;
        store.install(set_with_kid("k2")).await;

        assert!(store.get("k1").await.is_none());
        assert!(store.get("k2").await.is_some());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_old_snapshot_survives_install() {
        let store = KeyStore::new();
        store.install(set_with_kid("k1")).await;

        let old = store.snapshot().await;
        store.install(set_with_kid("k2")).await;

        // An in-flight reader holding the previous snapshot still sees it.
        assert!(old.get("k1").is_some());
        assert!(store.get("k1").await.is_none());
    }
}
