//! Cached JWKS (JSON Web Key Set) client for JWT signature verification.
//!
//! Fetches the public signing keys published at a JWKS endpoint, caches them
//! in memory, and resolves `kid -> public key` without a network round-trip
//! per token. The cache refreshes itself:
//!
//! - **Scheduled**: a background task re-fetches every configured interval.
//! - **On demand**: a lookup miss triggers one synchronous refresh, so a
//!   freshly rotated key is usable before the next tick.
//! - **Single-flight**: concurrent refresh attempts coalesce into one
//!   outbound fetch; transient failures are retried a bounded number of
//!   times, and on exhaustion the previous key set keeps serving.
//!
//! ## Usage
//!
//! ```ignore
//! let cache = Arc::new(JwksCache::new(JwksConfig::new(
//!     "https://issuer.example.com/.well-known/jwks.json",
//! )));
//! cache.start()?;
//!
//! // Per incoming token:
//! let key = cache.decoding_key_for(&token).await?;
//! let claims = jsonwebtoken::decode::<Claims>(&token, &key, &validation)?;
//!
//! // On shutdown:
//! cache.shutdown();
//! ```
//!
//! Logging goes through the `tracing` facade; install whichever subscriber
//! fits the host application. Token issuance, claim validation policy, and
//! private key handling are out of scope.

mod cache;
mod config;
mod error;
mod key;
mod refresh;
mod store;

pub use cache::JwksCache;
pub use config::{
    DEFAULT_HTTP_TIMEOUT_SECONDS, DEFAULT_MAX_RETRIES, DEFAULT_REFRESH_INTERVAL_SECONDS,
    DEFAULT_RETRY_DELAY_MS, JwksConfig,
};
pub use error::JwksError;
pub use key::{Jwk, JwksDocument, KeyRecord, KeySet};
pub use store::KeyStore;
