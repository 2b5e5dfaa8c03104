pub mod assistant;
pub mod categorize;
pub mod gemini;

use async_trait::async_trait;

use crate::error::AppResult;

pub use gemini::GeminiClient;

/// A model that turns a prompt into free-form text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> AppResult<String>;
}
