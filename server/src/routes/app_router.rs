use axum::{
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use http::{HeaderValue, Method};
use tower_cookies::CookieManagerLayer;
use tower_http::cors::CorsLayer;

use crate::{request_tracing, ServerState};

use super::handlers::{assistant, auth, categories, email, health, saved};

pub struct AppRouter;

impl AppRouter {
    pub fn create(state: ServerState) -> Router {
        let origins = state
            .settings
            .allowed_origins
            .iter()
            .filter_map(|origin| match origin.parse::<HeaderValue>() {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!("Ignoring invalid CORS origin {:?}", origin);
                    None
                }
            })
            .collect::<Vec<_>>();

        let cors_layer = CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::DELETE])
            .allow_headers([http::header::CONTENT_TYPE])
            .allow_credentials(true);

        Router::new()
            .route("/api/health", get(health::health_check))
            .route("/auth/login", get(auth::handler_login))
            .route("/login/google/authorized", get(auth::handler_auth_callback))
            .route("/logout", get(auth::handler_logout).post(auth::handler_logout))
            .route("/api/emails", get(email::get_emails))
            .route("/api/load-inbox", get(email::load_inbox))
            .route("/api/email/:id", get(email::get_email).delete(email::trash))
            .route("/api/email/:id/details", get(email::get_email_details))
            .route("/api/email/:id/mark-read", post(email::mark_read))
            .route("/api/email/:id/mark-unread", post(email::mark_unread))
            .route("/api/email/:id/restore", post(email::restore))
            .route("/api/email/:id/star", post(email::toggle_star))
            .route("/api/categorize", get(categories::categorize_emails))
            .route("/api/categorize/start", post(categories::start_categorization))
            .route("/categorize_status/:id", get(categories::categorize_status))
            .route("/categorize_results/:id", get(categories::categorize_results))
            .route("/api/save-categories", post(saved::save_categories))
            .route("/api/save-folders", post(saved::save_folders))
            .route("/api/load-saved-categories", get(saved::load_saved_categories))
            .route("/api/load-saved-folders", get(saved::load_saved_folders))
            .route("/api/has-saved-data", get(saved::has_saved_data))
            .route("/api/generate-reply", post(assistant::generate_reply))
            .route("/api/chat-with-mail", post(assistant::chat_with_mail))
            .layer(CookieManagerLayer::new())
            .layer(request_tracing::trace_with_request_id_layer())
            .layer(cors_layer)
            .with_state(state)
            .fallback(handler_404)
    }
}

pub async fn handler_404() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Route does not exist")
}
