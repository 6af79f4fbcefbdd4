//! The JWKS cache facade: key lookup, token key resolution, and lifecycle.

use std::sync::{Arc, Mutex};

use jsonwebtoken::{DecodingKey, decode_header};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::config::JwksConfig;
use crate::error::JwksError;
use crate::key::KeyRecord;
use crate::refresh::RefreshEngine;
use crate::store::KeyStore;

/// A cached set of JWKS signing keys with scheduled and on-demand refresh.
///
/// An explicit owned object: construct one per endpoint and share it via
/// `Arc`. [`start`](Self::start) spawns the background refresh loop;
/// [`resolve`](Self::resolve) serves lookups from the current snapshot and
/// falls back to a single synchronous refresh on a miss.
pub struct JwksCache {
    config: JwksConfig,
    store: Arc<KeyStore>,
    engine: Arc<RefreshEngine>,
    trigger: mpsc::Sender<()>,
    /// Taken by `start`; `Some` means the loop has not been spawned yet.
    pending_loop: Mutex<Option<mpsc::Receiver<()>>>,
    shutdown: watch::Sender<bool>,
}

impl JwksCache {
    /// Create a new cache for the endpoint in `config`.
    ///
    /// No network activity happens until `start`, `refresh`, or a
    /// refresh-on-miss lookup.
    pub fn new(config: JwksConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .build()
            .expect("Failed to create HTTP client");
        let store = Arc::new(KeyStore::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let engine = Arc::new(RefreshEngine::new(
            config.clone(),
            client,
            store.clone(),
            shutdown_rx,
        ));
        // Single slot: a pending trigger already covers any further ones.
        let (trigger_tx, trigger_rx) = mpsc::channel(1);

        Self {
            config,
            store,
            engine,
            trigger: trigger_tx,
            pending_loop: Mutex::new(Some(trigger_rx)),
            shutdown: shutdown_tx,
        }
    }

    /// Start the background refresh loop.
    ///
    /// Performs one immediate refresh, then refreshes every configured
    /// interval and on [`trigger_refresh`](Self::trigger_refresh) signals,
    /// until [`shutdown`](Self::shutdown). Calling `start` again is a no-op.
    pub fn start(&self) -> Result<(), JwksError> {
        url::Url::parse(&self.config.url)
            .map_err(|e| JwksError::Fetch(format!("invalid JWKS URL '{}': {}", self.config.url, e)))?;

        let Some(trigger_rx) = self
            .pending_loop
            .lock()
            .expect("pending_loop lock poisoned")
            .take()
        else {
            warn!("JWKS refresh loop already started");
            return Ok(());
        };

        let engine = self.engine.clone();
        let shutdown_rx = self.shutdown.subscribe();
        tokio::spawn(engine.run_scheduler(trigger_rx, shutdown_rx));
        Ok(())
    }

    /// Resolve a key identifier to its record.
    ///
    /// Fast path: the current snapshot. On a miss, if refresh-on-miss is
    /// enabled, waits for one refresh (coalesced with any in-flight one) and
    /// re-checks once; a kid still absent afterwards is `UnknownKey`. This
    /// is how a freshly rotated remote key becomes resolvable before the
    /// next scheduled tick.
    pub async fn resolve(&self, kid: &str) -> Result<Arc<KeyRecord>, JwksError> {
        if let Some(record) = self.store.get(kid).await {
            return Ok(record);
        }

        if !self.config.refresh_on_miss {
            return Err(JwksError::UnknownKey(kid.to_string()));
        }

        debug!("Key '{}' not cached, refreshing JWKS", kid);
        if let Err(err) = self.engine.refresh().await {
            if self.config.propagate_refresh_errors {
                return Err(err);
            }
            warn!("{}: on-demand JWKS refresh failed", err);
        }

        self.store
            .get(kid)
            .await
            .ok_or_else(|| JwksError::UnknownKey(kid.to_string()))
    }

    /// Resolve the verification key for a JWT from its unverified header.
    ///
    /// Extracts the `kid` header, resolves it, and returns the derived
    /// public key. Compatible with the key-resolution callbacks common JWT
    /// libraries expect: call it once per token, then verify with the
    /// returned key.
    pub async fn decoding_key_for(&self, token: &str) -> Result<DecodingKey, JwksError> {
        let header = decode_header(token)
            .map_err(|e| JwksError::Decode(format!("invalid JWT header: {}", e)))?;
        let kid = header
            .kid
            .ok_or_else(|| JwksError::MalformedKey("JWT header has no kid".to_string()))?;
        let record = self.resolve(&kid).await?;
        Ok(record.decoding_key()?.clone())
    }

    /// Refresh now, waiting for completion.
    ///
    /// Concurrent calls coalesce into a single outbound fetch.
    pub async fn refresh(&self) -> Result<(), JwksError> {
        self.engine.refresh().await
    }

    /// Request an immediate refresh without waiting for it.
    ///
    /// Non-blocking; if a request is already pending the signal is dropped,
    /// since the pending refresh will satisfy it. Consumed by the loop
    /// spawned by [`start`](Self::start).
    pub fn trigger_refresh(&self) {
        let _ = self.trigger.try_send(());
    }

    /// Stop the background loop and cancel any in-flight fetch.
    ///
    /// Safe to call more than once; lookups keep serving the last installed
    /// snapshot.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Whether any keys are currently cached.
    pub async fn has_keys(&self) -> bool {
        !self.store.is_empty().await
    }

    /// Number of keys in the current snapshot.
    pub async fn key_count(&self) -> usize {
        self.store.len().await
    }

    /// The underlying key store.
    pub fn store(&self) -> &Arc<KeyStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_start_rejects_invalid_url() {
        let cache = JwksCache::new(JwksConfig::new("not a url"));
        let err = cache.start().expect_err("expected invalid URL error");
        assert!(matches!(err, JwksError::Fetch(_)));
    }

    #[tokio::test]
    async fn test_start_twice_is_noop() {
        let cache = JwksCache::new(JwksConfig::new("http://127.0.0.1:1/jwks"));
        cache.start().expect("first start");
        cache.start().expect("second start is a no-op");
        cache.shutdown();
    }

    #[tokio::test]
    async fn test_resolve_miss_without_refresh_on_miss() {
        let config = JwksConfig {
            url: "http://127.0.0.1:1/jwks".to_string(),
            refresh_on_miss: false,
            ..Default::default()
        };
        let cache = JwksCache::new(config);

        let err = cache.resolve("k1").await.expect_err("expected miss");
        assert!(matches!(err, JwksError::UnknownKey(kid) if kid == "k1"));
    }

    #[tokio::test]
    async fn test_decoding_key_for_garbage_token() {
        let cache = JwksCache::new(JwksConfig::new("http://127.0.0.1:1/jwks"));
        let err = cache
            .decoding_key_for("not-a-jwt")
            .await
            .expect_err("expected header decode failure");
        assert!(matches!(err, JwksError::Decode(_)));
    }

    #[tokio::test]
    async fn test_decoding_key_for_token_without_kid() {
        // RS256 header with no kid, base64url of {"typ":"JWT","alg":"RS256"}.
        let token = "eyJ0eXAiOiJKV1QiLCJhbGciOiJSUzI1NiJ9.e30.sig";
        let cache = JwksCache::new(JwksConfig::new("http://127.0.0.1:1/jwks"));
        let err = cache
            .decoding_key_for(token)
            .await
            .expect_err("expected missing kid error");
        assert!(matches!(err, JwksError::MalformedKey(_)));
    }
}
