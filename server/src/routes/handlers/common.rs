use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::{
    auth::{session::UserSession, session_store::GmailCredentials},
    email::{client::EmailClient, normalized_message::NormalizedMessage},
    error::{AppError, AppResult},
    util::check_expired,
    ServerState,
};

use super::auth::exchange_refresh_token;

/// Builds a Gmail client for the session, refreshing the access token when it is about to expire.
pub(super) async fn fetch_email_client(
    state: &ServerState,
    user: &UserSession,
) -> AppResult<EmailClient> {
    let credentials = user
        .session
        .credentials
        .as_ref()
        .ok_or_else(|| AppError::Unauthorized("Not authenticated".to_string()))?;

    let access_token = if check_expired(credentials.expires_at) {
        let refresh_token = credentials.refresh_token.as_deref().ok_or_else(|| {
            AppError::Unauthorized("Gmail access expired, please log in again".to_string())
        })?;

        tracing::info!("Refreshing Gmail token for {}", user.user_email());
        let resp = exchange_refresh_token(&state.http_client, refresh_token).await?;
        state.session_store.update_credentials(
            user.id,
            GmailCredentials {
                access_token: resp.access_token.clone(),
                refresh_token: Some(refresh_token.to_string()),
                expires_at: Utc::now() + Duration::seconds(resp.expires_in as i64),
            },
        );
        resp.access_token
    } else {
        credentials.access_token.clone()
    };

    Ok(EmailClient::new(state.http_client.clone(), access_token)
        .with_rate_limiter(state.gmail_quotas.limiter_for(user.user_email()))
        .with_retry_policies(state.retry))
}

/// The inbox cached on the session, or a fresh fetch of `max_results` messages.
pub(super) async fn load_emails(
    state: &ServerState,
    user: &UserSession,
    max_results: u32,
) -> AppResult<Arc<Vec<NormalizedMessage>>> {
    if let Some(emails) = &user.session.email_list {
        return Ok(emails.clone());
    }

    let client = fetch_email_client(state, user).await?;
    let emails = Arc::new(client.get_messages(max_results, "").await?);
    state.session_store.cache_emails(user.id, emails.clone());

    Ok(emails)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::common::{login_with_inbox, test_state, StubGenerator};

    fn user_session(state: &ServerState, id: uuid::Uuid) -> UserSession {
        UserSession {
            id,
            session: state.session_store.load_session(id).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_sessions_of_one_user_share_gmail_quota() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(Arc::new(StubGenerator::failing()), dir.path());
        let first = login_with_inbox(&state.session_store, "jane@example.com", vec![]);
        let second = login_with_inbox(&state.session_store, "jane@example.com", vec![]);
        let other = login_with_inbox(&state.session_store, "bob@example.com", vec![]);

        let a = fetch_email_client(&state, &user_session(&state, first)).await.unwrap();
        let b = fetch_email_client(&state, &user_session(&state, first)).await.unwrap();
        let c = fetch_email_client(&state, &user_session(&state, second)).await.unwrap();
        let d = fetch_email_client(&state, &user_session(&state, other)).await.unwrap();

        assert!(Arc::ptr_eq(a.rate_limiter(), b.rate_limiter()));
        assert!(Arc::ptr_eq(a.rate_limiter(), c.rate_limiter()));
        assert!(!Arc::ptr_eq(a.rate_limiter(), d.rate_limiter()));
        assert_eq!(state.gmail_quotas.len(), 2);
    }
}
