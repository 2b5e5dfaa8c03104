use axum::{
    extract::{Query, State},
    response::{IntoResponse, Redirect},
    Json,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{Duration, Utc};
use derive_more::derive::Display;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_cookies::{Cookie, Cookies};
use url::Url;
use uuid::Uuid;

use crate::{
    auth::{
        session::{session_cookie, session_id_from_cookies, SESSION_COOKIE},
        session_store::{AuthSessionStore, GmailCredentials},
    },
    email::client::EmailClient,
    error::{AppError, AppResult},
    model::response::{GmailApiRefreshTokenResponse, GmailApiTokenResponse, RefreshTokenResponseOrError},
    server_config::{cfg, GmailConfig},
    HttpClient, ServerState,
};

fn _get_auth_uri(oauth_state: &OAuthState) -> AppResult<String> {
    let GmailConfig {
        auth_uri,
        client_id,
        scopes,
        ..
    } = &cfg.gmail_config;

    let mut url = Url::parse(auth_uri.as_str())
        .map_err(|e| anyhow::anyhow!("Invalid auth_uri {auth_uri}: {e}"))?;
    url.query_pairs_mut().extend_pairs(&[
        ("client_id", client_id.as_str()),
        ("redirect_uri", cfg.gmail_config.redirect_uri()),
        ("response_type", "code"),
        ("scope", scopes.join(" ").as_str()),
        ("access_type", "offline"),
        ("include_granted_scopes", "true"),
        ("prompt", "consent"),
        ("state", &oauth_state.encode()),
    ]);

    Ok(url.to_string())
}

/// Round-tripped through Google so the callback can find the session even without its cookie.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthState {
    pub session_id: Uuid,
    pub nonce: String,
}

impl OAuthState {
    pub fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            nonce: Uuid::new_v4().simple().to_string(),
        }
    }

    pub fn encode(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json.as_bytes())
    }

    pub fn decode(encoded: &str) -> Option<Self> {
        let bytes = URL_SAFE_NO_PAD.decode(encoded).ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

pub async fn handler_login(
    State(session_store): State<AuthSessionStore>,
    cookies: Cookies,
) -> AppResult<impl IntoResponse> {
    if let Some(old_session) = session_id_from_cookies(&cookies) {
        session_store.destroy_session(old_session);
    }

    let session_id = session_store.create_session();
    let oauth_state = OAuthState::new(session_id);
    session_store.set_oauth_state(session_id, oauth_state.nonce.clone());
    cookies.add(session_cookie(session_id, cfg.session.cookie_secure));

    Ok(Redirect::to(&_get_auth_uri(&oauth_state)?))
}

#[derive(Deserialize, Debug)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub error: Option<String>,
    pub scope: Option<String>,
    pub state: Option<String>,
}

pub async fn handler_auth_callback(
    State(state): State<ServerState>,
    cookies: Cookies,
    Query(query): Query<CallbackQuery>,
) -> OauthResult<impl IntoResponse> {
    if let Some(err) = query.error {
        tracing::error!("Error in oauth2 callback: {}", err);
        return Err(AuthCallbackError::Unexpected(err));
    }
    let (Some(code), Some(raw_state)) = (query.code, query.state) else {
        return Err(AuthCallbackError::MissingCode);
    };

    let oauth_state = OAuthState::decode(&raw_state).ok_or(AuthCallbackError::InvalidState)?;
    let session_id = oauth_state.session_id;
    let expected_nonce = state
        .session_store
        .take_oauth_state(session_id)
        .ok_or(AuthCallbackError::InvalidState)?;
    if expected_nonce != oauth_state.nonce {
        return Err(AuthCallbackError::InvalidState);
    }

    let GmailConfig {
        token_uri,
        client_id,
        client_secret,
        ..
    } = &cfg.gmail_config;

    let resp = state
        .http_client
        .post(token_uri)
        .form(&[
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
            ("code", code.as_str()),
            ("redirect_uri", cfg.gmail_config.redirect_uri()),
            ("grant_type", "authorization_code"),
        ])
        .send()
        .await
        .map_err(|e| {
            tracing::error!("Error getting token: {:?}", e);
            AuthCallbackError::Unexpected(e.to_string())
        })?;

    let resp: serde_json::Value = resp
        .json()
        .await
        .map_err(|_| AuthCallbackError::BadOauthResponse)?;
    let resp: GmailApiTokenResponse = serde_json::from_value(resp.clone()).map_err(|_| {
        tracing::error!("Failed to parse response: {:?}", resp);
        AuthCallbackError::BadOauthResponse
    })?;

    let email_client = EmailClient::new(state.http_client.clone(), resp.access_token.clone())
        .with_retry_policies(state.retry);
    let profile = email_client.get_profile().await.map_err(|e| {
        tracing::error!("Error getting profile: {:?}", e);
        AuthCallbackError::Unexpected(e.to_string())
    })?;
    let email = profile
        .email_address
        .ok_or(AuthCallbackError::NoEmailAddress)?;

    state.session_store.login(
        session_id,
        GmailCredentials {
            access_token: resp.access_token,
            refresh_token: resp.refresh_token,
            expires_at: Utc::now() + Duration::seconds(resp.expires_in as i64),
        },
        email.clone(),
    );
    cookies.add(session_cookie(session_id, cfg.session.cookie_secure));
    tracing::info!("{} signed in", email);

    Ok(Redirect::to(&cfg.settings.post_login_redirect))
}

pub async fn handler_logout(
    State(session_store): State<AuthSessionStore>,
    cookies: Cookies,
) -> Json<serde_json::Value> {
    if let Some(session_id) = session_id_from_cookies(&cookies) {
        session_store.destroy_session(session_id);
    }
    cookies.remove(Cookie::build(SESSION_COOKIE).path("/").build());

    Json(json!({ "success": true, "message": "Logged out" }))
}

pub async fn exchange_refresh_token(
    http_client: &HttpClient,
    refresh_token: &str,
) -> OauthResult<GmailApiRefreshTokenResponse> {
    let GmailConfig {
        token_uri,
        client_id,
        client_secret,
        ..
    } = &cfg.gmail_config;

    let resp = http_client
        .post(token_uri)
        .form(&[
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ])
        .send()
        .await
        .map_err(|e| {
            tracing::error!("Error refreshing token: {:?}", e);
            AuthCallbackError::BadOauthResponse
        })?;

    let resp = resp.json::<serde_json::Value>().await.map_err(|e| {
        tracing::error!("Unexpected serde error: {:?}", e);
        AuthCallbackError::Unexpected(e.to_string())
    })?;

    match serde_json::from_value::<RefreshTokenResponseOrError>(resp.clone()) {
        Ok(RefreshTokenResponseOrError::Response(resp)) => Ok(resp),
        Ok(RefreshTokenResponseOrError::Error(err)) => match err.error_description.as_deref() {
            Some("Token has been expired or revoked.") => Err(AuthCallbackError::ExpiredOrRevoked),
            Some(desc) => {
                tracing::error!("Unexpected error refreshing token: {:?}", desc);
                Err(AuthCallbackError::Unexpected(desc.to_string()))
            }
            None => Err(AuthCallbackError::Unexpected(err.error)),
        },
        Err(_) => {
            tracing::error!("Unexpected gmail oauth2 response: {:?}", resp);
            Err(AuthCallbackError::BadOauthResponse)
        }
    }
}

#[derive(Debug, Display)]
pub enum AuthCallbackError {
    InvalidState,
    MissingCode,
    Unexpected(String),
    BadOauthResponse,
    NoEmailAddress,
    ExpiredOrRevoked,
}

impl AuthCallbackError {
    fn code(&self) -> &'static str {
        match self {
            AuthCallbackError::InvalidState => "state_mismatch",
            AuthCallbackError::MissingCode => "missing_code",
            AuthCallbackError::NoEmailAddress => "no_email",
            AuthCallbackError::ExpiredOrRevoked => "expired_or_revoked",
            AuthCallbackError::Unexpected(_) | AuthCallbackError::BadOauthResponse => "unexpected",
        }
    }
}

pub type OauthResult<T> = Result<T, AuthCallbackError>;

impl IntoResponse for AuthCallbackError {
    fn into_response(self) -> axum::response::Response {
        tracing::error!("OAuth callback failed: {}", self);
        let url = format!("{}?error={}", cfg.settings.post_login_redirect, self.code());
        Redirect::to(&url).into_response()
    }
}

impl From<AuthCallbackError> for AppError {
    fn from(error: AuthCallbackError) -> Self {
        match error {
            AuthCallbackError::ExpiredOrRevoked => {
                AppError::Unauthorized("Gmail access expired, please log in again".to_string())
            }
            error => AppError::Oauth2(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oauth_state_round_trip() {
        let state = OAuthState::new(Uuid::new_v4());
        let encoded = state.encode();
        assert!(!encoded.contains('='));
        assert_eq!(OAuthState::decode(&encoded), Some(state));
    }

    #[test]
    fn test_oauth_state_rejects_garbage() {
        assert_eq!(OAuthState::decode("not base64!"), None);
        assert_eq!(OAuthState::decode(&URL_SAFE_NO_PAD.encode(b"{\"nope\":1}")), None);
    }
}
