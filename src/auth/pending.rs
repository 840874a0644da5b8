//! Pending login store: anti-forgery `state` → PKCE code verifier.
//!
//! An entry is created when the gate redirects a browser to the identity
//! provider and consumed when the provider redirects back. Consumption is a
//! single remove under the lock, so two concurrent callbacks carrying the same
//! state cannot both succeed. Entries older than [`PENDING_LOGIN_TTL`] are
//! rejected on consume whether or not the sweeper has removed them yet.
//!
//! Every unauthenticated request to a gated route creates an entry, so the
//! map is capped at [`MAX_PENDING_LOGINS`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::AuthError;
use super::clock::SharedClock;
use super::pkce;

/// How long a login may stay at the identity provider before its state lapses.
pub const PENDING_LOGIN_TTL: TimeDelta = TimeDelta::minutes(10);

/// Upper bound on logins awaiting a callback. Past it, lapsed entries are
/// dropped first, then the oldest live one.
pub const MAX_PENDING_LOGINS: usize = 10_000;

#[derive(Debug)]
struct PendingLogin {
    proof_verifier: String,
    created_at: DateTime<Utc>,
}

/// Single-use, time-bounded map of in-flight logins.
pub struct PendingLoginStore {
    entries: Mutex<HashMap<String, PendingLogin>>,
    clock: SharedClock,
    max_entries: usize,
}

impl PendingLoginStore {
    /// Create an empty store reading time from `clock`, bounded by
    /// [`MAX_PENDING_LOGINS`].
    #[must_use]
    pub fn new(clock: SharedClock) -> Self {
        Self::with_max_entries(clock, MAX_PENDING_LOGINS)
    }

    /// Create an empty store holding at most `max_entries` logins.
    #[must_use]
    pub fn with_max_entries(clock: SharedClock, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
            max_entries: max_entries.max(1),
        }
    }

    /// Start a login: returns `(state, proof_verifier)`.
    pub fn create(&self) -> (String, String) {
        let state = pkce::generate_state();
        let proof_verifier = pkce::generate_verifier();
        let now = self.clock.now();

        let mut entries = self.entries.lock();
        if entries.len() >= self.max_entries {
            entries.retain(|_, login| now - login.created_at <= PENDING_LOGIN_TTL);
        }
        if entries.len() >= self.max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, login)| login.created_at)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
                warn!(max = self.max_entries, "Pending login limit reached, evicted the oldest");
            }
        }
        entries.insert(
            state.clone(),
            PendingLogin {
                proof_verifier: proof_verifier.clone(),
                created_at: now,
            },
        );
        (state, proof_verifier)
    }

    /// Take the verifier for `state`, removing the entry.
    ///
    /// # Errors
    ///
    /// [`AuthError::StateInvalidOrExpired`] if the state is unknown, was
    /// already consumed, or is older than [`PENDING_LOGIN_TTL`].
    pub fn consume(&self, state: &str) -> Result<String, AuthError> {
        let entry = self
            .entries
            .lock()
            .remove(state)
            .ok_or(AuthError::StateInvalidOrExpired)?;

        if self.clock.now() - entry.created_at > PENDING_LOGIN_TTL {
            return Err(AuthError::StateInvalidOrExpired);
        }
        Ok(entry.proof_verifier)
    }

    /// Physically remove lapsed entries. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, login| now - login.created_at <= PENDING_LOGIN_TTL);
        before - entries.len()
    }

    /// Number of logins awaiting a callback.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// `true` if no login is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Spawn the one periodic sweep task for `store`.
///
/// The task exits when the `shutdown` receiver fires.
pub fn spawn_sweeper(
    store: Arc<PendingLoginStore>,
    interval: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let swept = store.sweep_expired();
                    if swept > 0 {
                        debug!(count = swept, "Swept expired pending logins");
                    }
                }
                _ = shutdown.recv() => {
                    debug!("Pending login sweeper shutting down");
                    break;
                }
            }
        }
    })
}
