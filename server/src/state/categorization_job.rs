use std::sync::Arc;

use indexmap::IndexMap;
use uuid::Uuid;

use crate::{
    email::normalized_message::NormalizedMessage,
    prompt::{
        categorize::{categorize, group_by_category, CategorizeMethod},
        TextGenerator,
    },
    state::categorization_store::{CategorizationResult, CategorizationStore, Clock, JobStatus},
};

const SINGLE_GROUP: &str = "All Emails";

/// Runs one categorization job to completion, recording progress in `store`.
pub async fn run_categorization_job<C: Clock>(
    store: CategorizationStore<C>,
    generator: Arc<dyn TextGenerator>,
    id: Uuid,
    emails: Arc<Vec<NormalizedMessage>>,
    user_email: String,
    query: String,
) {
    if emails.is_empty() {
        store.fail(id, "No emails found to categorize");
        return;
    }

    tracing::info!(
        "Categorization job {} started: {} emails, query {:?}",
        id,
        emails.len(),
        query
    );

    let subjects: Vec<String> = emails.iter().map(|e| e.subject.clone()).collect();
    let task = {
        let query = query.clone();
        tokio::spawn(async move { categorize(generator.as_ref(), &subjects, &query).await })
    };

    let outcome = match task.await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!("Categorization job {} crashed: {}", id, e);
            let mut categories = IndexMap::new();
            categories.insert(SINGLE_GROUP.to_string(), emails.as_ref().clone());
            store.recover(
                id,
                CategorizationResult {
                    categories,
                    user_email,
                    total_emails: emails.len(),
                    query,
                    method: CategorizeMethod::Fallback,
                },
            );
            return;
        }
    };

    store.set_status(id, JobStatus::Processing, 70, "Organizing emails into categories...");
    let categories = group_by_category(&emails, &outcome.categories);
    tracing::info!(
        "Categorization job {} finished with {} categories ({:?})",
        id,
        categories.len(),
        outcome.method
    );

    store.complete(
        id,
        CategorizationResult {
            categories,
            user_email,
            total_emails: emails.len(),
            query,
            method: outcome.method,
        },
    );
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::{error::AppResult, testing::common::StubGenerator};

    fn inbox() -> Arc<Vec<NormalizedMessage>> {
        Arc::new(
            ["Team meeting", "Invoice #42", "Weekend plans"]
                .iter()
                .enumerate()
                .map(|(i, subject)| NormalizedMessage {
                    id: i.to_string(),
                    subject: subject.to_string(),
                    ..Default::default()
                })
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_job_completes_with_ai_labels() {
        let store = CategorizationStore::new();
        let id = store.start("me@example.com");
        let generator = Arc::new(StubGenerator::replying(
            "Team meeting --- Work\nInvoice #42 --- Bills\nWeekend plans --- Work",
        ));

        run_categorization_job(store.clone(), generator, id, inbox(), "me@example.com".into(), String::new()).await;

        let status = store.status(id, "me@example.com");
        assert_eq!(status.status, JobStatus::Completed);
        assert_eq!(status.progress, 100);

        let result = store.result(id, "me@example.com").unwrap();
        assert_eq!(result.total_emails, 3);
        assert_eq!(result.categories.keys().collect::<Vec<_>>(), vec!["Work", "Bills"]);
        assert_eq!(result.categories["Work"].len(), 2);
    }

    #[tokio::test]
    async fn test_job_uses_fallback_when_model_fails() {
        let store = CategorizationStore::new();
        let id = store.start("me@example.com");

        run_categorization_job(
            store.clone(),
            Arc::new(StubGenerator::failing()),
            id,
            inbox(),
            "me@example.com".into(),
            String::new(),
        )
        .await;

        let status = store.status(id, "me@example.com");
        assert_eq!(status.message, "Categorization completed with fallback method");
        let result = store.result(id, "me@example.com").unwrap();
        assert_eq!(result.method, CategorizeMethod::Fallback);
        assert_eq!(result.categories.keys().collect::<Vec<_>>(), vec!["Meetings", "Finance", "Others"]);
    }

    #[tokio::test]
    async fn test_empty_mailbox_fails() {
        let store = CategorizationStore::new();
        let id = store.start("me@example.com");

        run_categorization_job(
            store.clone(),
            Arc::new(StubGenerator::failing()),
            id,
            Arc::new(vec![]),
            "me@example.com".into(),
            String::new(),
        )
        .await;

        assert_eq!(store.status(id, "me@example.com").status, JobStatus::Error);
    }

    struct PanickingGenerator;

    #[async_trait]
    impl TextGenerator for PanickingGenerator {
        async fn generate(&self, _prompt: &str) -> AppResult<String> {
            panic!("index out of range");
        }
    }

    #[tokio::test]
    async fn test_crash_recovers_with_single_group() {
        let store = CategorizationStore::new();
        let id = store.start("me@example.com");

        run_categorization_job(
            store.clone(),
            Arc::new(PanickingGenerator),
            id,
            inbox(),
            "me@example.com".into(),
            "urgent".into(),
        )
        .await;

        let status = store.status(id, "me@example.com");
        assert_eq!(status.status, JobStatus::IndexError);
        assert_eq!(status.redirect, Some(true));
        let result = store.result(id, "me@example.com").unwrap();
        assert_eq!(result.categories["All Emails"].len(), 3);
        assert_eq!(result.query, "urgent");
    }
}
