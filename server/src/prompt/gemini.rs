use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    error::{AppError, AppResult},
    prompt::TextGenerator,
    rate_limiters::RateLimiters,
    server_config::AiConfig,
    HttpClient,
};

#[derive(Clone)]
pub struct GeminiClient {
    http_client: HttpClient,
    rate_limiters: RateLimiters,
    endpoint: String,
    model: String,
    api_key: String,
    temperature: f64,
    timeout: Duration,
}

impl GeminiClient {
    pub fn new(http_client: HttpClient, rate_limiters: RateLimiters, config: &AiConfig) -> Self {
        Self {
            http_client,
            rate_limiters,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.key.clone(),
            temperature: config.temperature,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    fn url(&self) -> String {
        format!("{}/{}:generateContent", self.endpoint, self.model)
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, prompt: &str) -> AppResult<String> {
        if self.api_key.is_empty() {
            return Err(anyhow!("GEMINI_API_KEY is not configured").into());
        }

        self.rate_limiters.acquire_one().await;

        let resp = self
            .http_client
            .post(self.url())
            .query(&[("key", self.api_key.as_str())])
            .timeout(self.timeout)
            .json(&json!({
                "contents": [
                    {
                        "role": "user",
                        "parts": [{ "text": prompt }]
                    }
                ],
                "generationConfig": { "temperature": self.temperature }
            }))
            .send()
            .await?
            .json::<serde_json::Value>()
            .await?;

        let parsed = serde_json::from_value::<GenerateResponseOrError>(resp.clone())
            .context(format!("Could not parse Gemini response: {}", resp))?;

        let parsed = match parsed {
            GenerateResponseOrError::Error { error } => {
                if error.code == 429 || error.status == "RESOURCE_EXHAUSTED" {
                    self.rate_limiters.trigger_backoff();
                    return Err(AppError::TooManyRequests);
                }
                return Err(anyhow!("Gemini API error: {:?}", error).into());
            }
            GenerateResponseOrError::Response(parsed) => parsed,
        };

        let text = parsed.text().context("No candidates in Gemini response")?;
        if text.trim().is_empty() {
            return Err(anyhow!("Empty response from Gemini").into());
        }

        Ok(text)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Part {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default)]
    pub prompt_token_count: i64,
    #[serde(default)]
    pub candidates_token_count: i64,
    #[serde(default)]
    pub total_token_count: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub usage_metadata: Option<UsageMetadata>,
}

impl GenerateContentResponse {
    /// Text of the first candidate, parts joined.
    pub fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        Some(
            content
                .parts
                .iter()
                .filter_map(|p| p.text.as_deref())
                .collect::<String>(),
        )
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GeminiApiError {
    pub code: u16,
    pub message: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GenerateResponseOrError {
    Error { error: GeminiApiError },
    Response(GenerateContentResponse),
}
