use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::{
    auth::session::UserSession,
    email::normalized_message::NormalizedMessage,
    error::AppJsonResult,
    ServerState,
};

use super::super::common::{fetch_email_client, load_emails};

const DEFAULT_MAX_RESULTS: u32 = 100;

fn default_max_results() -> u32 {
    DEFAULT_MAX_RESULTS
}

#[derive(Debug, Deserialize)]
pub struct GetEmailsQuery {
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    #[serde(default)]
    pub q: String,
}

#[derive(Debug, Serialize)]
pub struct GetEmailsResponse {
    pub emails: Vec<NormalizedMessage>,
    pub total: usize,
    pub user_email: String,
}

pub async fn get_emails(
    State(state): State<ServerState>,
    user: UserSession,
    Query(params): Query<GetEmailsQuery>,
) -> AppJsonResult<GetEmailsResponse> {
    let client = fetch_email_client(&state, &user).await?;
    let emails = client.get_messages(params.max_results, &params.q).await?;
    state
        .session_store
        .cache_emails(user.id, std::sync::Arc::new(emails.clone()));

    tracing::info!("Fetched {} emails for {}", emails.len(), user.user_email());
    Ok(Json(GetEmailsResponse {
        total: emails.len(),
        emails,
        user_email: user.user_email().to_string(),
    }))
}

#[derive(Debug, Serialize)]
pub struct LoadInboxResponse {
    pub success: bool,
    pub user_email: String,
    pub emails: Vec<NormalizedMessage>,
    pub total_emails: usize,
}

pub async fn load_inbox(
    State(state): State<ServerState>,
    user: UserSession,
) -> AppJsonResult<LoadInboxResponse> {
    let emails = load_emails(&state, &user, state.settings.inbox_page_size).await?;

    Ok(Json(LoadInboxResponse {
        success: true,
        user_email: user.user_email().to_string(),
        total_emails: emails.len(),
        emails: emails.as_ref().clone(),
    }))
}

/// Returns the message and marks it read. A failed mark leaves `is_unread` set.
pub async fn get_email(
    State(state): State<ServerState>,
    user: UserSession,
    Path(email_id): Path<String>,
) -> AppJsonResult<NormalizedMessage> {
    let client = fetch_email_client(&state, &user).await?;
    let msg = client.get_message(&email_id).await?;
    let mut email = NormalizedMessage::from_gmail_message(&msg);

    if msg.has_label("UNREAD") {
        match client.mark_as_read(&email_id).await {
            Ok(_) => email.is_unread = false,
            Err(e) => tracing::warn!("Failed to mark {} as read: {}", email_id, e),
        }
    }

    Ok(Json(email))
}

#[derive(Debug, Serialize)]
pub struct EmailDetails {
    #[serde(flatten)]
    pub email: NormalizedMessage,
    pub thread_id: Option<String>,
    pub label_ids: Vec<String>,
    pub size_estimate: Option<i64>,
    pub is_important: bool,
    pub is_starred: bool,
}

#[derive(Debug, Serialize)]
pub struct EmailDetailsResponse {
    pub success: bool,
    pub email: EmailDetails,
}

pub async fn get_email_details(
    State(state): State<ServerState>,
    user: UserSession,
    Path(email_id): Path<String>,
) -> AppJsonResult<EmailDetailsResponse> {
    let client = fetch_email_client(&state, &user).await?;
    let msg = client.get_message(&email_id).await?;

    let email = EmailDetails {
        email: NormalizedMessage::from_gmail_message(&msg),
        thread_id: msg.thread_id.clone(),
        label_ids: msg.label_ids.clone(),
        size_estimate: msg.size_estimate,
        is_important: msg.has_label("IMPORTANT"),
        is_starred: msg.has_label("STARRED"),
    };

    Ok(Json(EmailDetailsResponse {
        success: true,
        email,
    }))
}
