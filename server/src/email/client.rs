use std::{sync::Arc, time::Duration};

use derive_more::Display;
use futures::{stream, StreamExt, TryStreamExt};
use google_gmail1::api::{ListMessagesResponse, Message, Profile};
use leaky_bucket::RateLimiter;
use lib_utils::retry::RetryPolicy;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::{
    email::{gmail_message::GmailMessage, normalized_message::NormalizedMessage},
    HttpClient,
};

pub const GMAIL_ENDPOINT: &str = "https://www.googleapis.com/gmail/v1/users/me";

/// Per-user quota units Gmail grants each second.
pub const GMAIL_QUOTA_PER_SECOND: usize = 250;

pub struct GmailApiQuota {
    pub messages_list: usize,
    pub messages_get: usize,
    pub messages_modify: usize,
    pub messages_trash: usize,
    pub get_profile: usize,
}

pub const GMAIL_API_QUOTA: GmailApiQuota = GmailApiQuota {
    messages_list: 5,
    messages_get: 5,
    messages_modify: 5,
    messages_trash: 5,
    get_profile: 1,
};

pub const MAX_MESSAGES_PER_PAGE: u32 = 500;
const CONCURRENT_MESSAGE_FETCHES: usize = 8;

macro_rules! gmail_url {
    ($base:expr; $($params:expr),*) => {
        {
            let list_params: Vec<&str> = vec![$($params),*];
            let path = list_params.join("/");
            format!("{}/{}", $base, path)
        }
    };
    ($($params:expr),*) => {
        gmail_url!(GMAIL_ENDPOINT; $($params),*)
    };
}

/// Gmail API error response structure
#[derive(Debug, Clone, serde::Deserialize)]
pub struct GmailApiError {
    pub error: GmailApiErrorDetail,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct GmailApiErrorDetail {
    pub code: u16,
    pub message: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Display)]
pub enum EmailClientError {
    #[display("Gmail request timed out: {_0}")]
    Timeout(String),
    #[display("Could not reach Gmail: {_0}")]
    Connect(String),
    #[display("Gmail returned {status}: {message}")]
    Http { status: u16, message: String },
    #[display("Unexpected Gmail response: {_0}")]
    Decode(String),
}

impl std::error::Error for EmailClientError {}

impl EmailClientError {
    /// Timeouts, dropped connections, 408, 429 and 5xx may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            EmailClientError::Timeout(_) | EmailClientError::Connect(_) => true,
            EmailClientError::Http { status, .. } => {
                matches!(*status, 408 | 429) || (500..600).contains(status)
            }
            EmailClientError::Decode(_) => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            EmailClientError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for EmailClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            EmailClientError::Timeout(e.to_string())
        } else if e.is_decode() {
            EmailClientError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            EmailClientError::Http {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            EmailClientError::Connect(e.to_string())
        }
    }
}

pub type EmailClientResult<T> = Result<T, EmailClientError>;

/// Retry budgets per call family.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicies {
    /// Listing and fetching messages.
    pub fetch: RetryPolicy,
    /// Profile lookups and label changes.
    pub modify: RetryPolicy,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            fetch: RetryPolicy::new(3, Duration::from_secs(1)),
            modify: RetryPolicy::new(2, Duration::from_millis(500)),
        }
    }
}

/// Token bucket sized to Gmail's per-user quota.
pub fn gmail_rate_limiter() -> RateLimiter {
    RateLimiter::builder()
        .initial(GMAIL_QUOTA_PER_SECOND)
        .interval(Duration::from_secs(1))
        .refill(GMAIL_QUOTA_PER_SECOND)
        .max(GMAIL_QUOTA_PER_SECOND)
        .build()
}

#[derive(Debug, Clone)]
pub struct EmailClient {
    http_client: HttpClient,
    access_token: String,
    rate_limiter: Arc<RateLimiter>,
    retry: RetryPolicies,
    endpoint: String,
}

impl EmailClient {
    /// A client with its own quota bucket. Use [`EmailClient::with_rate_limiter`]
    /// to share a user's bucket across requests.
    pub fn new(http_client: HttpClient, access_token: String) -> EmailClient {
        EmailClient {
            http_client,
            access_token,
            rate_limiter: Arc::new(gmail_rate_limiter()),
            retry: RetryPolicies::default(),
            endpoint: GMAIL_ENDPOINT.to_string(),
        }
    }

    pub fn with_rate_limiter(mut self, rate_limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    pub fn with_retry_policies(mut self, retry: RetryPolicies) -> Self {
        self.retry = retry;
        self
    }

    #[cfg(test)]
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    #[cfg(test)]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub async fn get_profile(&self) -> EmailClientResult<Profile> {
        self.retry
            .modify
            .run("get_profile", EmailClientError::is_transient, move || async move {
                self.rate_limiter.acquire(GMAIL_API_QUOTA.get_profile).await;
                let resp = self
                    .http_client
                    .get(gmail_url!(self.endpoint; "profile"))
                    .bearer_auth(&self.access_token)
                    .send()
                    .await?;

                parse_response::<Profile>(resp).await
            })
            .await
    }

    pub async fn list_message_ids(&self, max_results: u32, query: &str) -> EmailClientResult<Vec<String>> {
        let max_results = max_results.clamp(1, MAX_MESSAGES_PER_PAGE);

        let list = self
            .retry
            .fetch
            .run("list_messages", EmailClientError::is_transient, move || async move {
                self.rate_limiter
                    .acquire(GMAIL_API_QUOTA.messages_list)
                    .await;
                let resp = self
                    .http_client
                    .get(gmail_url!(self.endpoint; "messages"))
                    .query(&[("maxResults", max_results.to_string()), ("q", query.to_string())])
                    .bearer_auth(&self.access_token)
                    .send()
                    .await?;

                parse_response::<ListMessagesResponse>(resp).await
            })
            .await?;

        Ok(list
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| m.id)
            .collect())
    }

    pub async fn get_message(&self, message_id: &str) -> EmailClientResult<GmailMessage> {
        self.retry
            .fetch
            .run("get_message", EmailClientError::is_transient, move || async move {
                self.rate_limiter
                    .acquire(GMAIL_API_QUOTA.messages_get)
                    .await;
                let resp = self
                    .http_client
                    .get(gmail_url!(self.endpoint; "messages", message_id))
                    .query(&[("format", "full")])
                    .bearer_auth(&self.access_token)
                    .send()
                    .await?;

                parse_response::<GmailMessage>(resp).await
            })
            .await
    }

    /// Lists messages matching `query` and fetches each in full, keeping list order.
    /// Messages deleted between the list and the fetch are skipped.
    pub async fn get_messages(
        &self,
        max_results: u32,
        query: &str,
    ) -> EmailClientResult<Vec<NormalizedMessage>> {
        let ids = self.list_message_ids(max_results, query).await?;
        tracing::info!("Fetching {} messages for query {:?}", ids.len(), query);

        let messages: Vec<Option<NormalizedMessage>> = stream::iter(ids)
            .map(move |id| async move {
                match self.get_message(&id).await {
                    Ok(msg) => Ok(Some(NormalizedMessage::from_gmail_message(&msg))),
                    Err(EmailClientError::Http { status: 404, .. }) => {
                        tracing::warn!("Message {id} disappeared before it could be fetched");
                        Ok(None)
                    }
                    Err(e) => Err(e),
                }
            })
            .buffered(CONCURRENT_MESSAGE_FETCHES)
            .try_collect()
            .await?;

        Ok(messages.into_iter().flatten().collect())
    }

    /// Returns the label ids the message carries after the change.
    pub async fn modify_labels(
        &self,
        message_id: &str,
        add: &[&str],
        remove: &[&str],
    ) -> EmailClientResult<Vec<String>> {
        let body = &json!({
            "addLabelIds": add,
            "removeLabelIds": remove,
        });

        let msg = self
            .retry
            .modify
            .run("modify_labels", EmailClientError::is_transient, move || async move {
                self.rate_limiter
                    .acquire(GMAIL_API_QUOTA.messages_modify)
                    .await;
                let resp = self
                    .http_client
                    .post(gmail_url!(self.endpoint; "messages", message_id, "modify"))
                    .bearer_auth(&self.access_token)
                    .json(body)
                    .send()
                    .await?;

                parse_response::<Message>(resp).await
            })
            .await?;

        Ok(msg.label_ids.unwrap_or_default())
    }

    pub async fn mark_as_read(&self, message_id: &str) -> EmailClientResult<Vec<String>> {
        self.modify_labels(message_id, &[], &["UNREAD"]).await
    }

    pub async fn mark_as_unread(&self, message_id: &str) -> EmailClientResult<Vec<String>> {
        self.modify_labels(message_id, &["UNREAD"], &[]).await
    }

    /// Moves the message to the trash and returns its thread id.
    pub async fn trash(&self, message_id: &str) -> EmailClientResult<Option<String>> {
        self.trash_action(message_id, "trash").await
    }

    pub async fn untrash(&self, message_id: &str) -> EmailClientResult<Option<String>> {
        self.trash_action(message_id, "untrash").await
    }

    async fn trash_action(&self, message_id: &str, action: &str) -> EmailClientResult<Option<String>> {
        let msg = self
            .retry
            .modify
            .run(action, EmailClientError::is_transient, move || async move {
                self.rate_limiter
                    .acquire(GMAIL_API_QUOTA.messages_trash)
                    .await;
                let resp = self
                    .http_client
                    .post(gmail_url!(self.endpoint; "messages", message_id, action))
                    .bearer_auth(&self.access_token)
                    .send()
                    .await?;

                parse_response::<Message>(resp).await
            })
            .await?;

        Ok(msg.thread_id)
    }
}

async fn parse_response<T: DeserializeOwned>(resp: reqwest::Response) -> EmailClientResult<T> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<GmailApiError>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);
        return Err(EmailClientError::Http {
            status: status.as_u16(),
            message,
        });
    }

    let bytes = resp.bytes().await?;
    serde_json::from_slice::<T>(&bytes).map_err(|e| EmailClientError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use axum::{
        extract::{Path, State},
        http::StatusCode,
        response::IntoResponse,
        routing::{get, post},
        Json, Router,
    };

    use super::*;

    fn instant_retries() -> RetryPolicies {
        let policy = RetryPolicy::new(2, Duration::ZERO).with_jitter(0.0, 0.0);
        RetryPolicies {
            fetch: policy,
            modify: policy,
        }
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn test_client(endpoint: String) -> EmailClient {
        EmailClient::new(reqwest::Client::new(), "token".to_string())
            .with_retry_policies(instant_retries())
            .with_endpoint(endpoint)
    }

    fn message_json(id: &str, subject: &str) -> serde_json::Value {
        json!({
            "id": id,
            "threadId": format!("t-{id}"),
            "labelIds": ["INBOX"],
            "snippet": subject,
            "payload": {
                "mimeType": "text/plain",
                "headers": [{ "name": "Subject", "value": subject }],
                "body": { "data": "aGk" }
            }
        })
    }

    #[test]
    fn test_gmail_url() {
        let url = gmail_url!("messages");
        assert_eq!(url, "https://www.googleapis.com/gmail/v1/users/me/messages");
        let url = gmail_url!("messages", "123", "modify");
        assert_eq!(
            url,
            "https://www.googleapis.com/gmail/v1/users/me/messages/123/modify"
        );
    }

    #[test]
    fn test_transient_classification() {
        let http = |status| EmailClientError::Http {
            status,
            message: String::new(),
        };
        assert!(http(429).is_transient());
        assert!(http(408).is_transient());
        assert!(http(500).is_transient());
        assert!(http(503).is_transient());
        assert!(!http(400).is_transient());
        assert!(!http(401).is_transient());
        assert!(!http(404).is_transient());
        assert!(EmailClientError::Timeout("t".into()).is_transient());
        assert!(EmailClientError::Connect("c".into()).is_transient());
        assert!(!EmailClientError::Decode("d".into()).is_transient());
    }

    #[tokio::test]
    async fn test_get_messages_retries_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));

        let router = Router::new()
            .route(
                "/messages",
                get(|| async {
                    Json(json!({
                        "messages": [{ "id": "a", "threadId": "ta" }, { "id": "b", "threadId": "tb" }],
                        "resultSizeEstimate": 2
                    }))
                }),
            )
            .route(
                "/messages/:id",
                get(
                    |State(calls): State<Arc<AtomicU32>>, Path(id): Path<String>| async move {
                        if id == "a" && calls.fetch_add(1, Ordering::SeqCst) < 2 {
                            return (
                                StatusCode::SERVICE_UNAVAILABLE,
                                Json(json!({ "error": { "code": 503, "message": "Backend Error" } })),
                            )
                                .into_response();
                        }
                        Json(message_json(&id, &format!("Subject {id}"))).into_response()
                    },
                ),
            )
            .with_state(calls.clone());

        let client = test_client(serve(router).await);
        let messages = client.get_messages(10, "").await.unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, "a");
        assert_eq!(messages[0].subject, "Subject a");
        assert_eq!(messages[0].body, "hi");
        assert_eq!(messages[1].id, "b");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));

        let router = Router::new()
            .route(
                "/messages/:id",
                get(|State(calls): State<Arc<AtomicU32>>| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    (
                        StatusCode::BAD_REQUEST,
                        Json(json!({ "error": { "code": 400, "message": "Invalid id value" } })),
                    )
                }),
            )
            .with_state(calls.clone());

        let client = test_client(serve(router).await);
        let err = client.get_message("nope").await.unwrap_err();

        assert_eq!(err.status(), Some(400));
        assert_eq!(err.to_string(), "Gmail returned 400: Invalid id value");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_persistent_outage_exhausts_retries() {
        let calls = Arc::new(AtomicU32::new(0));

        let router = Router::new()
            .route(
                "/profile",
                get(|State(calls): State<Arc<AtomicU32>>| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    (StatusCode::BAD_GATEWAY, "upstream down")
                }),
            )
            .with_state(calls.clone());

        let client = test_client(serve(router).await);
        let err = client.get_profile().await.unwrap_err();

        assert_eq!(err.status(), Some(502));
        assert!(err.is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_modify_labels_and_trash() {
        let router = Router::new()
            .route(
                "/messages/:id/modify",
                post(|Json(body): Json<serde_json::Value>| async move {
                    assert_eq!(body["removeLabelIds"], json!(["UNREAD"]));
                    Json(json!({ "id": "m1", "threadId": "t1", "labelIds": ["INBOX"] }))
                }),
            )
            .route(
                "/messages/:id/trash",
                post(|| async { Json(json!({ "id": "m1", "threadId": "t1", "labelIds": ["TRASH"] })) }),
            );

        let client = test_client(serve(router).await);

        let labels = client.mark_as_read("m1").await.unwrap();
        assert_eq!(labels, vec!["INBOX"]);

        let thread_id = client.trash("m1").await.unwrap();
        assert_eq!(thread_id.as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn test_vanished_messages_are_skipped() {
        let router = Router::new()
            .route(
                "/messages",
                get(|| async { Json(json!({ "messages": [{ "id": "gone" }, { "id": "here" }] })) }),
            )
            .route(
                "/messages/:id",
                get(|Path(id): Path<String>| async move {
                    if id == "gone" {
                        return (
                            StatusCode::NOT_FOUND,
                            Json(json!({ "error": { "code": 404, "message": "Not Found" } })),
                        )
                            .into_response();
                    }
                    Json(message_json(&id, "still here")).into_response()
                }),
            );

        let client = test_client(serve(router).await);
        let messages = client.get_messages(10, "is:unread").await.unwrap();

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, "here");
    }
}
