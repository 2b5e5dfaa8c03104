use std::{
    fs,
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::{
    auth::session_store::{AuthSessionStore, GmailCredentials},
    email::{client::RetryPolicies, gmail_message::GmailMessage, normalized_message::NormalizedMessage},
    error::AppResult,
    prompt::TextGenerator,
    rate_limiters::RateLimiters,
    server_config::Settings,
    state::{CategorizationStore, GmailQuotaMap},
    ServerState, StorageDir,
};

/// Canned model that records how often it was asked.
pub struct StubGenerator {
    reply: Option<String>,
    calls: AtomicUsize,
}

impl StubGenerator {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenerator for StubGenerator {
    async fn generate(&self, _prompt: &str) -> AppResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.reply {
            Some(reply) => Ok(reply.clone()),
            None => Err(anyhow!("model unavailable").into()),
        }
    }
}

pub fn load_fixture(name: &str) -> String {
    let root = env!("CARGO_MANIFEST_DIR");
    let path = format!("{root}/src/testing/data/{name}");
    fs::read_to_string(&path).unwrap_or_else(|e| panic!("Could not read {path}: {e}"))
}

pub fn load_gmail_message(name: &str) -> GmailMessage {
    serde_json::from_str(&load_fixture(name)).unwrap()
}

fn test_settings() -> Settings {
    Settings {
        inbox_page_size: 50,
        analysis_page_size: 100,
        post_login_redirect: "/loading".to_string(),
        allowed_origins: vec!["http://localhost:3000".to_string()],
    }
}

/// Server state with no network dependencies. Saved snapshots land in `storage_dir`.
pub fn test_state(generator: Arc<dyn TextGenerator>, storage_dir: &Path) -> ServerState {
    ServerState {
        http_client: reqwest::Client::new(),
        rate_limiters: RateLimiters::new(100, 1000, 100),
        session_store: AuthSessionStore::new(900),
        categorization_store: CategorizationStore::new(),
        gmail_quotas: GmailQuotaMap::new(),
        text_generator: generator,
        storage_dir: StorageDir(Arc::new(storage_dir.to_path_buf())),
        settings: Arc::new(test_settings()),
        retry: RetryPolicies::default(),
    }
}

/// Logs `user_email` into a fresh session whose inbox is already cached.
pub fn login_with_inbox(
    store: &AuthSessionStore,
    user_email: &str,
    emails: Vec<NormalizedMessage>,
) -> Uuid {
    let id = store.create_session();
    store.login(
        id,
        GmailCredentials {
            access_token: "test-token".to_string(),
            refresh_token: None,
            expires_at: Utc::now() + Duration::hours(1),
        },
        user_email.to_string(),
    );
    store.cache_emails(id, Arc::new(emails));
    id
}

pub fn message(id: &str, subject: &str, sender: &str) -> NormalizedMessage {
    NormalizedMessage {
        id: id.to_string(),
        subject: subject.to_string(),
        sender: sender.to_string(),
        snippet: format!("About {subject}"),
        ..Default::default()
    }
}
