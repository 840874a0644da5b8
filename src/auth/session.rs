//! Server-side session store.
//!
//! Sessions are keyed by 32 random bytes, hex-encoded (256 bits). The browser
//! only ever holds that id; tokens stay here.
//!
//! # Lifetimes
//!
//! Two clocks run per session:
//!
//! - `expires_at`: the access token's expiry. Passing it does not end the
//!   session; the gate tries a refresh first. Only [`SessionStore::update_tokens`]
//!   moves it, and only forward.
//! - `created_at` + [`SESSION_MAX_LIFETIME`]: an absolute cap. Once past it
//!   the session is gone no matter how often it was refreshed. [`SessionStore::get`]
//!   enforces this on read and evicts the record.
//!
//! # Locking
//!
//! One store-wide `RwLock`. Lookups take the read lock; create, update, delete
//! and sweep take the write lock. Each session also carries an async refresh
//! gate so that concurrent requests spend a refresh token at most once.
//! Session volume is a handful of administrators, so contention is not a
//! concern.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use tracing::debug;

use super::Identity;
use super::clock::SharedClock;

/// Absolute session lifetime, refresh or not.
pub const SESSION_MAX_LIFETIME: TimeDelta = TimeDelta::hours(24);

/// Access expiry used when the provider gives none (or zero).
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(5 * 60);

/// Number of random bytes in a session id.
const SESSION_ID_BYTES: usize = 32;

/// A live, authenticated session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Who this session belongs to. Shared, never mutated.
    pub identity: Arc<Identity>,
    /// Current access token.
    pub access_token: String,
    /// Refresh token, if the provider issued one.
    pub refresh_token: Option<String>,
    /// When the access token lapses.
    pub expires_at: DateTime<Utc>,
    /// When the session was created. Never changes.
    pub created_at: DateTime<Utc>,
    /// Serializes refreshes of this session. Shared by every clone.
    refresh_gate: Arc<tokio::sync::Mutex<()>>,
}

impl Session {
    /// `true` once the access token has lapsed.
    #[must_use]
    pub fn is_access_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// `true` once the absolute lifetime cap has been exceeded.
    #[must_use]
    pub fn is_past_lifetime(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at > SESSION_MAX_LIFETIME
    }

    /// Lock held while this session's refresh token is being spent.
    #[must_use]
    pub fn refresh_gate(&self) -> &tokio::sync::Mutex<()> {
        &self.refresh_gate
    }
}

/// Map of session id → [`Session`].
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    clock: SharedClock,
}

impl SessionStore {
    /// Create an empty store reading time from `clock`.
    #[must_use]
    pub fn new(clock: SharedClock) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Create a session and return its id.
    ///
    /// A zero `ttl` means the provider did not say; [`DEFAULT_TOKEN_TTL`] applies.
    pub fn create(
        &self,
        identity: Identity,
        access_token: String,
        refresh_token: Option<String>,
        ttl: Duration,
    ) -> String {
        let id = generate_session_id();
        let now = self.clock.now();
        let session = Session {
            identity: Arc::new(identity),
            access_token,
            refresh_token,
            expires_at: now + ttl_delta(ttl),
            created_at: now,
            refresh_gate: Arc::new(tokio::sync::Mutex::new(())),
        };
        debug!(username = %session.identity.username, "Session created");
        self.sessions.write().insert(id.clone(), session);
        id
    }

    /// Look up a session. Sessions past the lifetime cap are evicted and
    /// reported as absent. An access-expired session is still returned so the
    /// caller can attempt a refresh.
    pub fn get(&self, id: &str) -> Option<Session> {
        let now = self.clock.now();
        let session = self.sessions.read().get(id).cloned()?;
        if session.is_past_lifetime(now) {
            self.sessions.write().remove(id);
            debug!(username = %session.identity.username, "Session exceeded lifetime cap, evicted");
            return None;
        }
        Some(session)
    }

    /// Store refreshed tokens. Returns `false` if the session no longer exists.
    ///
    /// `refresh_token = None` keeps the existing refresh token (providers that
    /// do not rotate omit it). `expires_at` never moves backwards.
    pub fn update_tokens(
        &self,
        id: &str,
        access_token: String,
        refresh_token: Option<String>,
        ttl: Duration,
    ) -> bool {
        let now = self.clock.now();
        let mut sessions = self.sessions.write();
        let Some(session) = sessions.get_mut(id) else {
            return false;
        };
        session.access_token = access_token;
        if refresh_token.is_some() {
            session.refresh_token = refresh_token;
        }
        session.expires_at = session.expires_at.max(now + ttl_delta(ttl));
        true
    }

    /// Remove a session. Returns whether it existed.
    pub fn delete(&self, id: &str) -> bool {
        self.sessions.write().remove(id).is_some()
    }

    /// Remove sessions that can no longer be used: past the lifetime cap, or
    /// access-expired with nothing to refresh with.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, s| {
            !(s.is_past_lifetime(now) || (s.is_access_expired(now) && s.refresh_token.is_none()))
        });
        before - sessions.len()
    }

    /// Number of stored sessions, including ones not yet swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// `true` if there are no sessions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

fn ttl_delta(ttl: Duration) -> TimeDelta {
    let ttl = if ttl.is_zero() { DEFAULT_TOKEN_TTL } else { ttl };
    TimeDelta::from_std(ttl).unwrap_or(SESSION_MAX_LIFETIME)
}

fn generate_session_id() -> String {
    let bytes: [u8; SESSION_ID_BYTES] = rand::random();
    hex::encode(bytes)
}

/// Spawn the one periodic sweep task for `store`.
///
/// The task exits when the `shutdown` receiver fires.
pub fn spawn_sweeper(
    store: Arc<SessionStore>,
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
                        debug!(count = swept, remaining = store.len(), "Swept expired sessions");
                    }
                }
                _ = shutdown.recv() => {
                    debug!("Session sweeper shutting down");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::auth::clock::{Clock, ManualClock};

    fn alice() -> Identity {
        Identity {
            username: "alice".to_string(),
            roles: BTreeSet::from(["admin".to_string()]),
            groups: BTreeSet::new(),
        }
    }

    fn store_with_clock() -> (SessionStore, Arc<ManualClock>) {
        let clock = ManualClock::starting_now();
        (SessionStore::new(clock.clone()), clock)
    }

    #[test]
    fn session_id_is_256_bits_hex() {
        let id = generate_session_id();
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, generate_session_id());
    }

    #[test]
    fn create_then_get_returns_session() {
        let (store, _clock) = store_with_clock();
        let id = store.create(alice(), "at".into(), Some("rt".into()), Duration::from_secs(300));

        let session = store.get(&id).unwrap();
        assert_eq!(session.identity.username, "alice");
        assert_eq!(session.access_token, "at");
        assert_eq!(session.refresh_token.as_deref(), Some("rt"));
    }

    #[test]
    fn zero_ttl_defaults_to_five_minutes() {
        // GIVEN/WHEN: a session created with ttl = 0
        let (store, _clock) = store_with_clock();
        let id = store.create(alice(), "at".into(), None, Duration::ZERO);

        // THEN: expires_at == created_at + 5m
        let session = store.get(&id).unwrap();
        assert_eq!(session.expires_at - session.created_at, TimeDelta::minutes(5));
    }

    #[test]
    fn lifetime_cap_beats_refreshed_expiry() {
        // GIVEN: a session whose expiry a refresh pushed 48h out
        let (store, clock) = store_with_clock();
        let id = store.create(alice(), "at".into(), Some("rt".into()), Duration::from_secs(300));
        assert!(store.update_tokens(&id, "at2".into(), None, Duration::from_secs(48 * 3600)));

        // WHEN: the clock passes the 24h cap
        clock.advance(TimeDelta::hours(24) + TimeDelta::seconds(1));

        // THEN: the session is absent and evicted
        assert!(store.get(&id).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn session_within_cap_is_returned_even_if_access_expired() {
        let (store, clock) = store_with_clock();
        let id = store.create(alice(), "at".into(), Some("rt".into()), Duration::from_secs(60));
        clock.advance(TimeDelta::minutes(2));

        let session = store.get(&id).unwrap();
        assert!(session.is_access_expired(clock.now()));
    }

    #[tokio::test]
    async fn refresh_gate_is_shared_across_lookups_and_updates() {
        // GIVEN: one lookup holding the session's refresh gate
        let (store, _clock) = store_with_clock();
        let id = store.create(alice(), "at".into(), Some("rt".into()), Duration::from_secs(60));
        let first = store.get(&id).unwrap();
        let _held = first.refresh_gate().lock().await;

        // WHEN: the tokens are updated and the session looked up again
        store.update_tokens(&id, "at2".into(), None, Duration::from_secs(60));
        let second = store.get(&id).unwrap();

        // THEN: the second copy sees the same gate, already taken
        assert!(second.refresh_gate().try_lock().is_err());
    }

    #[test]
    fn update_keeps_refresh_token_when_none_given() {
        let (store, _clock) = store_with_clock();
        let id = store.create(alice(), "at".into(), Some("rt".into()), Duration::from_secs(60));

        store.update_tokens(&id, "at2".into(), None, Duration::from_secs(60));

        let session = store.get(&id).unwrap();
        assert_eq!(session.access_token, "at2");
        assert_eq!(session.refresh_token.as_deref(), Some("rt"));
    }

    #[test]
    fn update_rotates_refresh_token_when_given() {
        let (store, _clock) = store_with_clock();
        let id = store.create(alice(), "at".into(), Some("rt".into()), Duration::from_secs(60));

        store.update_tokens(&id, "at2".into(), Some("rt2".into()), Duration::from_secs(60));

        assert_eq!(store.get(&id).unwrap().refresh_token.as_deref(), Some("rt2"));
    }

    #[test]
    fn update_never_moves_expiry_backwards() {
        let (store, _clock) = store_with_clock();
        let id = store.create(alice(), "at".into(), None, Duration::from_secs(3600));
        let before = store.get(&id).unwrap().expires_at;

        store.update_tokens(&id, "at2".into(), None, Duration::from_secs(60));

        assert_eq!(store.get(&id).unwrap().expires_at, before);
    }

    #[test]
    fn update_on_missing_session_reports_false() {
        let (store, _clock) = store_with_clock();
        assert!(!store.update_tokens("nope", "at".into(), None, Duration::ZERO));
    }

    #[test]
    fn delete_removes_session() {
        let (store, _clock) = store_with_clock();
        let id = store.create(alice(), "at".into(), None, Duration::ZERO);
        assert!(store.delete(&id));
        assert!(store.get(&id).is_none());
        assert!(!store.delete(&id));
    }

    #[test]
    fn sweep_removes_unusable_sessions_only() {
        // GIVEN: three sessions
        let (store, clock) = store_with_clock();
        let refreshable = store.create(alice(), "a".into(), Some("r".into()), Duration::from_secs(60));
        let dead = store.create(alice(), "b".into(), None, Duration::from_secs(60));
        let live = store.create(alice(), "c".into(), None, Duration::from_secs(3600));

        // WHEN: two minutes pass and the sweeper runs
        clock.advance(TimeDelta::minutes(2));
        let swept = store.sweep_expired();

        // THEN: only the access-expired session without a refresh token is gone
        assert_eq!(swept, 1);
        assert!(store.get(&refreshable).is_some());
        assert!(store.get(&dead).is_none());
        assert!(store.get(&live).is_some());
    }

    #[test]
    fn sweep_removes_sessions_past_cap() {
        let (store, clock) = store_with_clock();
        store.create(alice(), "a".into(), Some("r".into()), Duration::from_secs(60));
        clock.advance(TimeDelta::hours(25));
        assert_eq!(store.sweep_expired(), 1);
        assert!(store.is_empty());
    }
}
