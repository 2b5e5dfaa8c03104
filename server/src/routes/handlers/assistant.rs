use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::{
    auth::session::UserSession,
    error::{AppError, AppJson, AppJsonResult},
    prompt::assistant::{self, display_name_from_email, RelevantEmail},
    ServerState, SharedTextGenerator,
};

use super::common::load_emails;

fn default_tone() -> String {
    "professional".to_string()
}

#[derive(Debug, Deserialize)]
pub struct GenerateReplyRequest {
    #[serde(default)]
    pub email_id: Option<String>,
    #[serde(default = "default_tone")]
    pub tone: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Serialize)]
pub struct GenerateReplyResponse {
    pub success: bool,
    pub reply: String,
    pub tone: String,
}

pub async fn generate_reply(
    State(generator): State<SharedTextGenerator>,
    user: UserSession,
    AppJson(req): AppJson<GenerateReplyRequest>,
) -> AppJsonResult<GenerateReplyResponse> {
    tracing::info!(
        "Generating {} reply for email {:?}",
        req.tone,
        req.email_id.as_deref().unwrap_or("-")
    );

    let signer = display_name_from_email(user.user_email());
    let reply = assistant::generate_reply(
        generator.as_ref(),
        &req.tone,
        &req.sender,
        &req.subject,
        &req.body,
        signer.as_deref(),
    )
    .await?;

    Ok(Json(GenerateReplyResponse {
        success: true,
        reply,
        tone: req.tone,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub query: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub success: bool,
    pub response: String,
    pub relevant_emails: Vec<RelevantEmail>,
    pub total_emails_analyzed: usize,
}

pub async fn chat_with_mail(
    State(state): State<ServerState>,
    user: UserSession,
    AppJson(req): AppJson<ChatRequest>,
) -> AppJsonResult<ChatResponse> {
    if req.query.trim().is_empty() {
        return Err(AppError::BadRequest("No query provided".to_string()));
    }

    let emails = load_emails(&state, &user, state.settings.analysis_page_size).await?;
    let answer = assistant::chat_with_mail(
        state.text_generator.as_ref(),
        user.user_email(),
        &emails,
        &req.query,
    )
    .await?;

    Ok(Json(ChatResponse {
        success: true,
        response: answer.response,
        relevant_emails: answer.relevant_emails,
        total_emails_analyzed: answer.total_emails_analyzed,
    }))
}
