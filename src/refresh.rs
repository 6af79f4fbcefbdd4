//! Refresh engine: fetches the JWKS document and installs new key sets.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::JwksConfig;
use crate::error::JwksError;
use crate::key::{JwksDocument, KeySet};
use crate::store::KeyStore;

/// Fetches the JWKS endpoint and installs the parsed key set into the store.
///
/// At most one fetch is in flight at a time: the first caller through
/// [`refresh`](Self::refresh) runs the fetch, concurrent callers coalesce
/// onto it and wake when it completes. The engine is the only writer to the
/// store, so installs are totally ordered.
pub(crate) struct RefreshEngine {
    config: JwksConfig,
    client: reqwest::Client,
    store: Arc<KeyStore>,
    in_flight: AtomicBool,
    /// Completion epoch plus the outcome of the attempt that bumped it.
    completed: watch::Sender<(u64, Option<JwksError>)>,
    shutdown: watch::Receiver<bool>,
}

impl RefreshEngine {
    pub(crate) fn new(
        config: JwksConfig,
        client: reqwest::Client,
        store: Arc<KeyStore>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (completed, _) = watch::channel((0, None));
        Self {
            config,
            client,
            store,
            in_flight: AtomicBool::new(false),
            completed,
            shutdown,
        }
    }

    /// Refresh the key set, deduplicating concurrent attempts.
    ///
    /// The caller that wins the in-flight flag performs the fetch; everyone
    /// else waits for that attempt to complete and shares its outcome. A
    /// caller that arrives just as an attempt finishes starts a fresh one,
    /// so no waiter is ever left behind an already-completed fetch.
    ///
    /// The leader's future may be dropped mid-fetch (a caller-side timeout,
    /// a disconnected request handler); the in-flight flag is released and
    /// the epoch bumped from the guard's `Drop` in that case, so waiters
    /// wake and the next refresh can run.
    pub(crate) async fn refresh(&self) -> Result<(), JwksError> {
        let mut completions = self.completed.subscribe();
        let seen = completions.borrow_and_update().0;

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let guard = InFlightGuard {
                in_flight: &self.in_flight,
                completed: &self.completed,
                published: false,
            };
            let result = self.fetch_and_install().await;
            guard.publish(&result);
            result
        } else {
            // Coalesce onto the in-flight attempt.
            loop {
                {
                    let slot = completions.borrow_and_update();
                    if slot.0 != seen {
                        return match &slot.1 {
                            Some(err) => Err(err.clone()),
                            None => Ok(()),
                        };
                    }
                }
                if completions.changed().await.is_err() {
                    return Ok(());
                }
            }
        }
    }

    /// Fetch with bounded retry, installing the parsed set on success.
    ///
    /// `max_retries` bounds the total number of attempts. On exhaustion the
    /// previously installed set keeps serving and the error is returned to
    /// the caller; the scheduled loop logs and absorbs it.
    async fn fetch_and_install(&self) -> Result<(), JwksError> {
        let mut shutdown = self.shutdown.clone();
        let max_attempts = self.config.max_retries.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match self.fetch_once(&mut shutdown).await {
                Ok(set) => {
                    debug!("Fetched {} keys from {}", set.len(), self.config.url);
                    self.store.install(set).await;
                    return Ok(());
                }
                Err(err) => {
                    if *shutdown.borrow() {
                        return Err(err);
                    }
                    if attempt >= max_attempts {
                        warn!(
                            "{}: giving up after {} attempts, serving previous key set",
                            err, attempt
                        );
                        return Err(err);
                    }
                    warn!("{}: retrying JWKS fetch (attempt {})", err, attempt);
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.retry_delay()) => {}
                        _ = shutdown.changed() => {
                            return Err(JwksError::Fetch("shut down during refresh".to_string()));
                        }
                    }
                }
            }
        }
    }

    /// One GET against the endpoint, parsed into a key set.
    async fn fetch_once(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<KeySet, JwksError> {
        debug!("Fetching JWKS from {}", self.config.url);

        let response = tokio::select! {
            resp = self.client.get(&self.config.url).send() => {
                resp.map_err(|e| JwksError::Fetch(e.to_string()))?
            }
            _ = shutdown.changed() => {
                return Err(JwksError::Fetch("shut down during refresh".to_string()));
            }
        };

        if !response.status().is_success() {
            return Err(JwksError::Fetch(format!(
                "HTTP {} from JWKS endpoint",
                response.status()
            )));
        }

        let doc: JwksDocument = response
            .json()
            .await
            .map_err(|e| JwksError::Decode(e.to_string()))?;

        Ok(KeySet::from_document(doc, &self.config.url))
    }

    /// Background loop: one immediate refresh, then scheduled ticks and
    /// on-demand triggers until shutdown.
    pub(crate) async fn run_scheduler(
        self: Arc<Self>,
        mut trigger: mpsc::Receiver<()>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("JWKS refresh loop started for {}", self.config.url);

        if let Err(err) = self.refresh().await {
            warn!("{}: initial JWKS refresh failed", err);
        }

        let mut ticker = tokio::time::interval(self.config.refresh_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; the refresh above covers it.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    debug!("Scheduled JWKS refresh");
                    if let Err(err) = self.refresh().await {
                        warn!("{}: scheduled JWKS refresh failed", err);
                    }
                }
                Some(()) = trigger.recv() => {
                    debug!("Requested JWKS refresh");
                    if let Err(err) = self.refresh().await {
                        warn!("{}: requested JWKS refresh failed", err);
                    }
                }
                _ = shutdown.changed() => {
                    info!("JWKS refresh loop stopped");
                    return;
                }
            }
        }
    }
}

/// Releases the single-flight gate and publishes an outcome exactly once.
///
/// Held by the refresh leader for the duration of a fetch. If the leader
/// completes normally it calls [`InFlightGuard::publish`] with the real
/// result; if its future is dropped first, `Drop` releases the flag and
/// publishes a cancellation error so waiters wake instead of hanging.
struct InFlightGuard<'a> {
    in_flight: &'a AtomicBool,
    completed: &'a watch::Sender<(u64, Option<JwksError>)>,
    published: bool,
}

impl InFlightGuard<'_> {
    fn publish(mut self, result: &Result<(), JwksError>) {
        self.published = true;
        self.release(result.clone().err());
    }

    fn release(&self, outcome: Option<JwksError>) {
        self.in_flight.store(false, Ordering::Release);
        self.completed.send_modify(|slot| {
            slot.0 += 1;
            slot.1 = outcome;
        });
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if !self.published {
            self.release(Some(JwksError::Fetch(
                "refresh cancelled before completion".to_string(),
            )));
        }
    }
}
