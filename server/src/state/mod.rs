pub mod categorization_job;
pub mod categorization_store;
pub mod gmail_quota_map;

pub use categorization_store::CategorizationStore;
pub use gmail_quota_map::GmailQuotaMap;
