use axum::{
    extract::{Path, Query, State},
    Json,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::session::UserSession,
    email::normalized_message::NormalizedMessage,
    error::{AppError, AppJsonResult},
    prompt::categorize::{categorize, group_by_category, CategorizeMethod},
    state::{
        categorization_job::run_categorization_job,
        categorization_store::{CategorizationStore, JobStatusView},
    },
    ServerState,
};

use super::common::load_emails;

#[derive(Debug, Default, Deserialize)]
pub struct CategorizeQuery {
    #[serde(default)]
    pub query: String,
}

#[derive(Debug, Serialize)]
pub struct CategorizeResponse {
    pub success: bool,
    pub categories: IndexMap<String, Vec<NormalizedMessage>>,
    pub user_email: String,
    pub total_emails: usize,
    pub query: String,
    pub method: CategorizeMethod,
}

pub async fn categorize_emails(
    State(state): State<ServerState>,
    user: UserSession,
    Query(params): Query<CategorizeQuery>,
) -> AppJsonResult<CategorizeResponse> {
    let emails = load_emails(&state, &user, state.settings.analysis_page_size).await?;
    if emails.is_empty() {
        return Err(AppError::NotFound("No emails found".to_string()));
    }

    let subjects: Vec<String> = emails.iter().map(|e| e.subject.clone()).collect();
    let outcome = categorize(state.text_generator.as_ref(), &subjects, &params.query).await;

    Ok(Json(CategorizeResponse {
        success: true,
        categories: group_by_category(&emails, &outcome.categories),
        user_email: user.user_email().to_string(),
        total_emails: emails.len(),
        query: params.query,
        method: outcome.method,
    }))
}

#[derive(Debug, Serialize)]
pub struct StartCategorizationResponse {
    pub success: bool,
    pub session_id: Uuid,
    pub status_url: String,
    pub results_url: String,
}

pub async fn start_categorization(
    State(state): State<ServerState>,
    user: UserSession,
    Query(params): Query<CategorizeQuery>,
) -> AppJsonResult<StartCategorizationResponse> {
    let emails = load_emails(&state, &user, state.settings.analysis_page_size).await?;
    let id = state.categorization_store.start(user.user_email());

    tokio::spawn(run_categorization_job(
        state.categorization_store.clone(),
        state.text_generator.clone(),
        id,
        emails,
        user.user_email().to_string(),
        params.query,
    ));

    Ok(Json(StartCategorizationResponse {
        success: true,
        session_id: id,
        status_url: format!("/categorize_status/{id}"),
        results_url: format!("/categorize_results/{id}"),
    }))
}

pub async fn categorize_status(
    State(store): State<CategorizationStore>,
    user: UserSession,
    Path(job_id): Path<String>,
) -> Json<JobStatusView> {
    let status = match Uuid::parse_str(&job_id) {
        Ok(id) => store.status(id, user.user_email()),
        Err(_) => JobStatusView::not_found(),
    };
    Json(status)
}

#[derive(Debug, Serialize)]
pub struct CategorizeResultsResponse {
    pub categories: IndexMap<String, Vec<NormalizedMessage>>,
    pub user_email: String,
    pub total_emails: usize,
    pub query: String,
    pub method: CategorizeMethod,
    pub is_saved: bool,
}

pub async fn categorize_results(
    State(store): State<CategorizationStore>,
    user: UserSession,
    Path(job_id): Path<String>,
) -> AppJsonResult<CategorizeResultsResponse> {
    let result = Uuid::parse_str(&job_id)
        .ok()
        .and_then(|id| store.result(id, user.user_email()))
        .ok_or_else(|| AppError::NotFound("Session not found or expired".to_string()))?;

    Ok(Json(CategorizeResultsResponse {
        categories: result.categories.clone(),
        user_email: result.user_email.clone(),
        total_emails: result.total_emails,
        query: result.query.clone(),
        method: result.method,
        is_saved: false,
    }))
}
