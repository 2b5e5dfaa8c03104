use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{email::normalized_message::NormalizedMessage, prompt::categorize::CategorizeMethod};

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Processing,
    Completed,
    /// Categorization crashed; every message was put in a single group.
    IndexError,
    Error,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatusView {
    pub status: JobStatus,
    pub progress: u8,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<bool>,
}

impl JobStatusView {
    pub fn not_found() -> Self {
        Self {
            status: JobStatus::NotFound,
            progress: 0,
            message: "Session not found".to_string(),
            redirect: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategorizationResult {
    pub categories: IndexMap<String, Vec<NormalizedMessage>>,
    pub user_email: String,
    pub total_emails: usize,
    pub query: String,
    pub method: CategorizeMethod,
}

#[derive(Debug, Clone)]
pub struct CategorizationJob {
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub status: JobStatusView,
    pub result: Option<Arc<CategorizationResult>>,
}

/// Background categorization jobs keyed by id. Entries live until `sweep` evicts them.
#[derive(Clone)]
pub struct CategorizationStore<C: Clock = SystemClock> {
    inner: Arc<RwLock<HashMap<Uuid, CategorizationJob>>>,
    clock: Arc<C>,
}

impl CategorizationStore<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl<C: Clock> CategorizationStore<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            clock: Arc::new(clock),
        }
    }

    pub fn start(&self, owner: &str) -> Uuid {
        let id = Uuid::new_v4();
        let job = CategorizationJob {
            owner: owner.to_string(),
            created_at: self.clock.now(),
            status: JobStatusView {
                status: JobStatus::Processing,
                progress: 10,
                message: "Starting email categorization...".to_string(),
                redirect: None,
            },
            result: None,
        };
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, job);
        id
    }

    fn update(&self, id: Uuid, f: impl FnOnce(&mut CategorizationJob)) {
        let mut jobs = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        match jobs.get_mut(&id) {
            Some(job) => f(job),
            None => tracing::warn!("Categorization job {id} was evicted before it finished"),
        }
    }

    pub fn set_status(&self, id: Uuid, status: JobStatus, progress: u8, message: &str) {
        self.update(id, |job| {
            job.status = JobStatusView {
                status,
                progress,
                message: message.to_string(),
                redirect: None,
            };
        });
    }

    pub fn complete(&self, id: Uuid, result: CategorizationResult) {
        let message = match result.method {
            CategorizeMethod::Ai => "Categorization completed successfully!",
            CategorizeMethod::Fallback => "Categorization completed with fallback method",
        };
        self.update(id, |job| {
            job.status = JobStatusView {
                status: JobStatus::Completed,
                progress: 100,
                message: message.to_string(),
                redirect: None,
            };
            job.result = Some(Arc::new(result));
        });
    }

    /// Stores a single-group result after the categorizer crashed.
    pub fn recover(&self, id: Uuid, result: CategorizationResult) {
        self.update(id, |job| {
            job.status = JobStatusView {
                status: JobStatus::IndexError,
                progress: 100,
                message: "Index error detected - proceeding with fallback categorization".to_string(),
                redirect: Some(true),
            };
            job.result = Some(Arc::new(result));
        });
    }

    pub fn fail(&self, id: Uuid, error: &str) {
        self.set_status(id, JobStatus::Error, 0, &format!("Error: {error}"));
    }

    pub fn status(&self, id: Uuid, owner: &str) -> JobStatusView {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .filter(|job| job.owner == owner)
            .map(|job| job.status.clone())
            .unwrap_or_else(JobStatusView::not_found)
    }

    pub fn result(&self, id: Uuid, owner: &str) -> Option<Arc<CategorizationResult>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .filter(|job| job.owner == owner)
            .and_then(|job| job.result.clone())
    }

    /// Drops jobs older than `max_age`, returning how many were removed.
    pub fn sweep(&self, max_age: Duration) -> usize {
        let cutoff = self.clock.now() - max_age;
        let mut jobs = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let before = jobs.len();
        jobs.retain(|_, job| job.created_at > cutoff);
        let removed = before - jobs.len();
        if removed > 0 {
            tracing::info!("Swept {removed} categorization jobs");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}
