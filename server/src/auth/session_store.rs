use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::email::normalized_message::NormalizedMessage;

pub const DEFAULT_SESSION_TTL: i64 = 15 * 60;

#[derive(Debug, Clone)]
pub struct GmailCredentials {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AuthSession {
    pub expires_at: i64,
    pub oauth_state: Option<String>,
    pub credentials: Option<GmailCredentials>,
    pub user_email: Option<String>,
    /// Last fetched inbox, reused by categorization and chat.
    pub email_list: Option<Arc<Vec<NormalizedMessage>>>,
}

impl AuthSession {
    fn new(expires_at: i64) -> Self {
        Self {
            expires_at,
            oauth_state: None,
            credentials: None,
            user_email: None,
            email_list: None,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now().timestamp()
    }

    pub fn is_authenticated(&self) -> bool {
        self.credentials.is_some()
    }

    pub fn user_email(&self) -> &str {
        self.user_email.as_deref().unwrap_or("Unknown")
    }
}

#[derive(Debug, Clone)]
pub struct AuthSessionStore {
    inner: Arc<RwLock<HashMap<Uuid, AuthSession>>>,
    ttl: i64,
}

impl AuthSessionStore {
    pub fn new(ttl: i64) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    pub fn load_session(&self, session_id: Uuid) -> Option<AuthSession> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&session_id)
            .and_then(|s| if s.is_expired() { None } else { Some(s.clone()) })
    }

    pub fn create_session(&self) -> Uuid {
        let session_id = Uuid::new_v4();
        let session = AuthSession::new(Utc::now().timestamp() + self.ttl);
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id, session);
        session_id
    }

    pub fn destroy_session(&self, session_id: Uuid) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&session_id);
    }

    fn modify(&self, session_id: Uuid, f: impl FnOnce(&mut AuthSession)) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(session_id)
            .and_modify(|session| {
                if !session.is_expired() {
                    f(session);
                }
            });
    }

    /// Pushes the expiry out by another ttl.
    pub fn touch(&self, session_id: Uuid) {
        let expires_at = Utc::now().timestamp() + self.ttl;
        self.modify(session_id, |session| session.expires_at = expires_at);
    }

    pub fn set_oauth_state(&self, session_id: Uuid, state: String) {
        self.modify(session_id, |session| session.oauth_state = Some(state));
    }

    /// Consumes the pending OAuth state; it can only be checked once.
    pub fn take_oauth_state(&self, session_id: Uuid) -> Option<String> {
        let mut state = None;
        self.modify(session_id, |session| state = session.oauth_state.take());
        state
    }

    pub fn login(&self, session_id: Uuid, credentials: GmailCredentials, user_email: String) {
        self.modify(session_id, |session| {
            session.credentials = Some(credentials);
            session.user_email = Some(user_email);
            session.email_list = None;
        });
    }

    pub fn update_credentials(&self, session_id: Uuid, credentials: GmailCredentials) {
        self.modify(session_id, |session| session.credentials = Some(credentials));
    }

    pub fn cache_emails(&self, session_id: Uuid, emails: Arc<Vec<NormalizedMessage>>) {
        self.modify(session_id, |session| session.email_list = Some(emails));
    }

    pub fn clean_store(&self) {
        let now = Utc::now().timestamp();
        let mut sessions = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let before = sessions.len();
        sessions.retain(|_, session| session.expires_at > now);
        tracing::debug!("Cleaned {} expired sessions", before - sessions.len());
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}
