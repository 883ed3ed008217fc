//! Visitor sessions.
//!
//! # Responsibility
//! - Carry per-visitor state: cart, signed-in customer, sign-in challenge
//!   and currency choice.
//! - Persist sessions behind the `SessionStore` seam.
//!
//! # Invariants
//! - A session id is a random v4 UUID and never changes.
//! - Stores hand out copies; mutations are visible only after `save`.

use crate::cart::CartSession;
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

pub type SessionId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    #[serde(default)]
    pub cart: CartSession,
    /// Set once the visitor proved ownership of the address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_login: Option<PendingLogin>,
    /// Currency chosen by the visitor; falls back to the shop default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            cart: CartSession::new(),
            customer_email: None,
            pending_login: None,
            currency: None,
        }
    }
}

/// Sign-in code mailed to a customer and not yet confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingLogin {
    pub email: String,
    pub code: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub failed_attempts: u32,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

pub trait SessionStore {
    fn load(&self, id: SessionId) -> Option<Session>;
    fn save(&self, session: &Session);
    /// Returns `true` when a session was removed.
    fn remove(&self, id: SessionId) -> bool;
}

/// Process-local session store.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<SessionId, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Loads the session for `id`, or starts a fresh one when absent.
    pub fn load_or_create(&self, id: Option<SessionId>) -> Session {
        id.and_then(|id| self.load(id)).unwrap_or_default()
    }

    fn guard(&self) -> MutexGuard<'_, HashMap<SessionId, Session>> {
        self.sessions.lock().unwrap_or_else(|poisoned| {
            warn!("event=session_lock module=session status=error error_code=poisoned");
            poisoned.into_inner()
        })
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self, id: SessionId) -> Option<Session> {
        self.guard().get(&id).cloned()
    }

    fn save(&self, session: &Session) {
        self.guard().insert(session.id, session.clone());
    }

    fn remove(&self, id: SessionId) -> bool {
        self.guard().remove(&id).is_some()
    }
}
