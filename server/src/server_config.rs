use config::{Config, ConfigError};
use lazy_static::lazy_static;
use lib_utils::retry::RetryPolicy;
use serde::Deserialize;
use std::{env, path::Path, result::Result, time::Duration};

use crate::email::client::RetryPolicies;

#[derive(Debug, Deserialize)]
pub struct GmailConfig {
    pub client_id: String,
    pub project_id: String,
    pub auth_uri: String,
    pub token_uri: String,
    pub client_secret: String,
    pub redirect_uris: Vec<String>,
    pub scopes: Vec<String>,
}

impl GmailConfig {
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        builder.try_deserialize()
    }

    pub fn redirect_uri(&self) -> &str {
        self.redirect_uris.first().map(String::as_str).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Emails fetched when the inbox is first loaded.
    pub inbox_page_size: u32,
    /// Emails fetched for categorization and chat.
    pub analysis_page_size: u32,
    /// Where the browser lands after a successful login.
    pub post_login_redirect: String,
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PromptLimits {
    pub rate_limit_per_sec: usize,
    pub refill_interval_ms: usize,
    pub refill_amount: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AiConfig {
    #[serde(default)]
    pub key: String,
    pub endpoint: String,
    pub model: String,
    pub temperature: f64,
    pub timeout_secs: u64,
    pub prompt_limits: PromptLimits,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl From<RetrySettings> for RetryPolicy {
    fn from(s: RetrySettings) -> Self {
        RetryPolicy::new(s.max_retries, Duration::from_millis(s.base_delay_ms))
            .with_max_delay(Duration::from_millis(s.max_delay_ms))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    pub fetch: RetrySettings,
    pub modify: RetrySettings,
}

impl RetryConfig {
    pub fn policies(&self) -> RetryPolicies {
        RetryPolicies {
            fetch: self.fetch.into(),
            modify: self.modify.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub ttl_secs: i64,
    pub cookie_secure: bool,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategorizationConfig {
    pub job_max_age_secs: i64,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    settings: Settings,
    ai: AiConfig,
    retry: RetryConfig,
    storage: StorageConfig,
    session: SessionConfig,
    categorization: CategorizationConfig,
}

#[derive(Debug)]
pub struct ServerConfig {
    pub settings: Settings,
    pub ai: AiConfig,
    pub retry: RetryConfig,
    pub storage: StorageConfig,
    pub session: SessionConfig,
    pub categorization: CategorizationConfig,
    pub gmail_config: GmailConfig,
}

impl std::fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let AiConfig {
            endpoint,
            model,
            temperature,
            timeout_secs,
            prompt_limits,
            key,
        } = &self.ai;
        write!(
            f,
            "Server Config:\n{:?}\n\nAI: endpoint={} model={} temperature={} timeout={}s key_set={} limits={:?}\n\nRetry: {:?}\n\nStorage: {:?}\n\nSession: {:?}\n\nCategorization: {:?}\n\nGmail Config: client_id={} redirect_uri={} scopes={:?}",
            self.settings,
            endpoint,
            model,
            temperature,
            timeout_secs,
            !key.is_empty(),
            prompt_limits,
            self.retry,
            self.storage,
            self.session,
            self.categorization,
            self.gmail_config.client_id,
            self.gmail_config.redirect_uri(),
            self.gmail_config.scopes,
        )
    }
}

fn config_dir() -> String {
    env::var("APP_DIR").unwrap_or_else(|_| {
        let dir = env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR or APP_DIR is required");
        let dir = Path::new(&dir).parent().expect("Failed to get parent dir").display().to_string();
        format!("{}/config", dir)
    })
}

lazy_static! {
    pub static ref cfg: ServerConfig = {
        let root = config_dir();
        let path = format!("{root}/client_secret.toml");
        let mut gmail_config =
            GmailConfig::from_file(&path).expect("client_secret.toml is required");
        if let Ok(redirect_uri) = env::var("GMAIL_REDIRECT_URI") {
            gmail_config.redirect_uris = vec![redirect_uri];
        }

        let path = format!("{root}/config.toml");
        let cfg_file: ConfigFile = Config::builder()
            .add_source(config::File::with_name(&path))
            .build()
            .expect("config.toml is required")
            .try_deserialize()
            .expect("config.toml is invalid");

        let ConfigFile {
            settings,
            mut ai,
            retry,
            storage,
            session,
            categorization,
        } = cfg_file;

        if let Ok(key) = env::var("GEMINI_API_KEY") {
            ai.key = key;
        }

        ServerConfig {
            settings,
            ai,
            retry,
            storage,
            session,
            categorization,
            gmail_config,
        }
    };
}
