use axum::{extract::State, Json};
use serde::Serialize;
use tower_cookies::Cookies;

use crate::{
    auth::{session::session_id_from_cookies, session_store::AuthSessionStore},
    rate_limiters::RateLimiters,
};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub authenticated: bool,
    pub prompt_quota: String,
}

pub async fn health_check(
    State(session_store): State<AuthSessionStore>,
    State(rate_limiters): State<RateLimiters>,
    cookies: Cookies,
) -> Json<HealthResponse> {
    let authenticated = session_id_from_cookies(&cookies)
        .and_then(|id| session_store.load_session(id))
        .is_some_and(|session| session.is_authenticated());

    Json(HealthResponse {
        status: "healthy",
        message: "Mailsort server is running",
        authenticated,
        prompt_quota: rate_limiters.get_status(),
    })
}
