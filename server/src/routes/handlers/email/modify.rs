use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::{auth::session::UserSession, error::AppJsonResult, ServerState};

use super::super::common::fetch_email_client;

#[derive(Debug, Serialize)]
pub struct LabelChangeResponse {
    pub success: bool,
    pub message: &'static str,
    pub email_id: String,
    pub label_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct TrashResponse {
    pub success: bool,
    pub message: &'static str,
    pub email_id: String,
    pub thread_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StarResponse {
    pub success: bool,
    pub message: &'static str,
    pub email_id: String,
    pub is_starred: bool,
    pub label_ids: Vec<String>,
}

pub async fn mark_read(
    State(state): State<ServerState>,
    user: UserSession,
    Path(email_id): Path<String>,
) -> AppJsonResult<LabelChangeResponse> {
    let client = fetch_email_client(&state, &user).await?;
    let label_ids = client.mark_as_read(&email_id).await?;

    Ok(Json(LabelChangeResponse {
        success: true,
        message: "Email marked as read",
        email_id,
        label_ids,
    }))
}

pub async fn mark_unread(
    State(state): State<ServerState>,
    user: UserSession,
    Path(email_id): Path<String>,
) -> AppJsonResult<LabelChangeResponse> {
    let client = fetch_email_client(&state, &user).await?;
    let label_ids = client.mark_as_unread(&email_id).await?;

    Ok(Json(LabelChangeResponse {
        success: true,
        message: "Email marked as unread",
        email_id,
        label_ids,
    }))
}

pub async fn trash(
    State(state): State<ServerState>,
    user: UserSession,
    Path(email_id): Path<String>,
) -> AppJsonResult<TrashResponse> {
    let client = fetch_email_client(&state, &user).await?;
    let thread_id = client.trash(&email_id).await?;
    tracing::info!("Moved {} to trash for {}", email_id, user.user_email());

    Ok(Json(TrashResponse {
        success: true,
        message: "Email moved to trash",
        email_id,
        thread_id,
    }))
}

pub async fn restore(
    State(state): State<ServerState>,
    user: UserSession,
    Path(email_id): Path<String>,
) -> AppJsonResult<TrashResponse> {
    let client = fetch_email_client(&state, &user).await?;
    let thread_id = client.untrash(&email_id).await?;

    Ok(Json(TrashResponse {
        success: true,
        message: "Email restored from trash",
        email_id,
        thread_id,
    }))
}

pub async fn toggle_star(
    State(state): State<ServerState>,
    user: UserSession,
    Path(email_id): Path<String>,
) -> AppJsonResult<StarResponse> {
    let client = fetch_email_client(&state, &user).await?;
    let was_starred = client.get_message(&email_id).await?.has_label("STARRED");

    let (label_ids, message) = if was_starred {
        (
            client.modify_labels(&email_id, &[], &["STARRED"]).await?,
            "Email unstarred",
        )
    } else {
        (
            client.modify_labels(&email_id, &["STARRED"], &[]).await?,
            "Email starred",
        )
    };

    Ok(Json(StarResponse {
        success: true,
        message,
        email_id,
        is_starred: !was_starred,
        label_ids,
    }))
}
