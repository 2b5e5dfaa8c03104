use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
    RequestPartsExt,
};
use tower_cookies::{cookie::SameSite, Cookie, Cookies};
use uuid::Uuid;

use crate::{
    auth::session_store::{AuthSession, AuthSessionStore},
    error::AppError,
};

pub const SESSION_COOKIE: &str = "session";

pub fn session_cookie(session_id: Uuid, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, session_id.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .build()
}

pub fn session_id_from_cookies(cookies: &Cookies) -> Option<Uuid> {
    cookies
        .get(SESSION_COOKIE)
        .and_then(|c| Uuid::parse_str(c.value()).ok())
}

/// A live session holding Gmail credentials. Rejects with 401 otherwise.
#[derive(Debug, Clone)]
pub struct UserSession {
    pub id: Uuid,
    pub session: AuthSession,
}

impl UserSession {
    pub fn user_email(&self) -> &str {
        self.session.user_email()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for UserSession
where
    AuthSessionStore: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let unauthorized = || AppError::Unauthorized("Not authenticated".to_string());

        let cookies = parts.extract::<Cookies>().await.map_err(|(_, msg)| {
            tracing::error!("Cookie layer missing: {}", msg);
            unauthorized()
        })?;
        let id = session_id_from_cookies(&cookies).ok_or_else(unauthorized)?;

        let store = AuthSessionStore::from_ref(state);
        let session = store
            .load_session(id)
            .filter(AuthSession::is_authenticated)
            .ok_or_else(unauthorized)?;
        store.touch(id);

        Ok(UserSession { id, session })
    }
}
