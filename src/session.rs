//! Cookie-bound, in-memory session store.
//!
//! A session holds the signed-in principal and, while a sign-in or consent
//! redirect is in flight, the values the callback has to match. Tokens are
//! not kept here; they belong to the token provider.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::auth::claims::Principal;
use crate::auth::oauth::PkceChallenge;

/// Opaque session identifier carried in the session cookie.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Accept only well-formed identifiers from a cookie.
    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value).ok().map(|id| Self(id.to_string()))
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// State of an authorize redirect waiting for its callback.
#[derive(Debug, Clone)]
pub struct PendingSignIn {
    pub state: String,
    pub nonce: String,
    pub pkce: PkceChallenge,
    /// Local path to return to once signed in.
    pub return_to: String,
}

#[derive(Debug, Clone, Default)]
pub struct Session {
    pub principal: Option<Principal>,
    pub pending: Option<PendingSignIn>,
    last_seen: Option<DateTime<Utc>>,
}

/// Sessions keyed by id, expiring after a period of inactivity.
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
    idle_timeout: Duration,
}

impl SessionStore {
    pub fn new(idle_minutes: i64) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            idle_timeout: Duration::minutes(idle_minutes),
        }
    }

    /// Look up a live session and mark it as used.
    pub async fn touch(&self, id: &SessionId) -> Option<Session> {
        let mut sessions = self.sessions.write().await;
        let now = Utc::now();
        let session = sessions.get_mut(id)?;
        if self.is_idle(session, now) {
            debug!("Session {} expired", id);
            sessions.remove(id);
            return None;
        }
        session.last_seen = Some(now);
        Some(session.clone())
    }

    /// Record a pending sign-in, creating the session if needed.
    pub async fn begin_sign_in(&self, id: &SessionId, pending: PendingSignIn) {
        let mut sessions = self.sessions.write().await;
        let session = sessions.entry(id.clone()).or_default();
        session.pending = Some(pending);
        session.last_seen = Some(Utc::now());
    }

    /// Remove and return the pending sign-in for `id`.
    pub async fn take_pending(&self, id: &SessionId) -> Option<PendingSignIn> {
        let mut sessions = self.sessions.write().await;
        sessions.get_mut(id).and_then(|s| s.pending.take())
    }

    /// Attach the signed-in principal to the session.
    pub async fn complete_sign_in(&self, id: &SessionId, principal: Principal) {
        let mut sessions = self.sessions.write().await;
        let session = sessions.entry(id.clone()).or_default();
        session.principal = Some(principal);
        session.pending = None;
        session.last_seen = Some(Utc::now());
    }

    /// Move the session to a fresh id and return it. The old id stops working.
    pub async fn rotate(&self, id: &SessionId) -> SessionId {
        let mut sessions = self.sessions.write().await;
        let session = sessions.remove(id).unwrap_or_default();
        let fresh = SessionId::generate();
        sessions.insert(fresh.clone(), session);
        fresh
    }

    pub async fn remove(&self, id: &SessionId) {
        self.sessions.write().await.remove(id);
    }

    /// Drop idle sessions and return their ids.
    pub async fn purge_idle(&self) -> Vec<SessionId> {
        let mut sessions = self.sessions.write().await;
        let now = Utc::now();
        let expired: Vec<SessionId> = sessions
            .iter()
            .filter(|(_, s)| self.is_idle(s, now))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            sessions.remove(id);
        }
        expired
    }

    fn is_idle(&self, session: &Session, now: DateTime<Utc>) -> bool {
        session
            .last_seen
            .is_some_and(|seen| now - seen > self.idle_timeout)
    }
}
