use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Local};
use indexmap::IndexMap;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strum::{AsRefStr, Display};
use tokio::fs;
use uuid::Uuid;

const SAVED_AT_FORMAT: &str = "%Y-%m-%d %I:%M %p";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum SnapshotKind {
    Categories,
    Folders,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedCategorySnapshot {
    pub user_email: String,
    pub categories: IndexMap<String, Vec<serde_json::Value>>,
    #[serde(default)]
    pub query: String,
    pub saved_at: String,
    pub saved_at_iso: String,
    pub email_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedFolderSnapshot {
    pub user_email: String,
    pub folders: serde_json::Value,
    pub saved_at: String,
    pub saved_at_iso: String,
}

fn timestamps(now: DateTime<Local>) -> (String, String) {
    (now.format(SAVED_AT_FORMAT).to_string(), now.to_rfc3339())
}

/// Per-user JSON snapshots of categories and folders, named by a hash of the owner's address.
#[derive(Debug, Clone)]
pub struct CategoryStorage {
    dir: PathBuf,
    user_email: String,
}

impl CategoryStorage {
    pub fn new(dir: impl Into<PathBuf>, user_email: &str) -> Self {
        Self {
            dir: dir.into(),
            user_email: user_email.to_string(),
        }
    }

    pub fn file_path(&self, kind: SnapshotKind) -> PathBuf {
        let hash = hex::encode(Sha256::digest(self.user_email.as_bytes()));
        self.dir.join(format!("{}_{}.json", hash, kind))
    }

    async fn write_atomic<T: Serialize>(&self, kind: SnapshotKind, data: &T) -> anyhow::Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Could not create storage dir {}", self.dir.display()))?;

        let path = self.file_path(kind);
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", kind, Uuid::new_v4().simple()));
        let json = serde_json::to_vec_pretty(data)?;

        fs::write(&tmp, json)
            .await
            .with_context(|| format!("Could not write {}", tmp.display()))?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e).with_context(|| format!("Could not replace {}", path.display()));
        }

        tracing::info!("Saved {} for {} to {}", kind, self.user_email, path.display());
        Ok(())
    }

    async fn read<T: DeserializeOwned>(&self, kind: SnapshotKind) -> anyhow::Result<Option<T>> {
        let path = self.file_path(kind);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("Could not read {}", path.display())),
        };

        let data = serde_json::from_slice(&bytes)
            .with_context(|| format!("Corrupt snapshot {}", path.display()))?;
        Ok(Some(data))
    }

    pub async fn save_categories(
        &self,
        categories: IndexMap<String, Vec<serde_json::Value>>,
        query: &str,
    ) -> anyhow::Result<SavedCategorySnapshot> {
        let (saved_at, saved_at_iso) = timestamps(Local::now());
        let snapshot = SavedCategorySnapshot {
            user_email: self.user_email.clone(),
            email_count: categories.values().map(Vec::len).sum(),
            categories,
            query: query.to_string(),
            saved_at,
            saved_at_iso,
        };

        self.write_atomic(SnapshotKind::Categories, &snapshot).await?;
        Ok(snapshot)
    }

    pub async fn load_categories(&self) -> anyhow::Result<Option<SavedCategorySnapshot>> {
        self.read(SnapshotKind::Categories).await
    }

    pub async fn has_saved_categories(&self) -> bool {
        self.exists(SnapshotKind::Categories).await
    }

    pub async fn save_folders(&self, folders: serde_json::Value) -> anyhow::Result<SavedFolderSnapshot> {
        let (saved_at, saved_at_iso) = timestamps(Local::now());
        let snapshot = SavedFolderSnapshot {
            user_email: self.user_email.clone(),
            folders,
            saved_at,
            saved_at_iso,
        };

        self.write_atomic(SnapshotKind::Folders, &snapshot).await?;
        Ok(snapshot)
    }

    pub async fn load_folders(&self) -> anyhow::Result<Option<SavedFolderSnapshot>> {
        self.read(SnapshotKind::Folders).await
    }

    pub async fn has_saved_folders(&self) -> bool {
        self.exists(SnapshotKind::Folders).await
    }

    async fn exists(&self, kind: SnapshotKind) -> bool {
        fs::try_exists(self.file_path(kind)).await.unwrap_or(false)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    fn categories() -> IndexMap<String, Vec<serde_json::Value>> {
        let mut categories = IndexMap::new();
        categories.insert(
            "Work".to_string(),
            vec![json!({ "id": "1", "subject": "Standup" }), json!({ "id": "2" })],
        );
        categories.insert("Finance".to_string(), vec![json!({ "id": "3" })]);
        categories
    }

    #[tokio::test]
    async fn test_save_then_load_categories() {
        let dir = TempDir::new().unwrap();
        let storage = CategoryStorage::new(dir.path(), "me@example.com");
        assert!(!storage.has_saved_categories().await);
        assert!(storage.load_categories().await.unwrap().is_none());

        storage.save_categories(categories(), "by sender").await.unwrap();
        assert!(storage.has_saved_categories().await);
        assert!(!storage.has_saved_folders().await);

        let loaded = storage.load_categories().await.unwrap().unwrap();
        assert_eq!(loaded.user_email, "me@example.com");
        assert_eq!(loaded.categories, categories());
        assert_eq!(loaded.query, "by sender");
        assert_eq!(loaded.email_count, 3);
        assert_eq!(loaded.categories.keys().collect::<Vec<_>>(), vec!["Work", "Finance"]);
        assert!(DateTime::parse_from_rfc3339(&loaded.saved_at_iso).is_ok());
    }

    #[tokio::test]
    async fn test_file_names_are_hashed_per_owner() {
        let dir = TempDir::new().unwrap();
        let mine = CategoryStorage::new(dir.path(), "me@example.com");
        let theirs = CategoryStorage::new(dir.path(), "them@example.com");

        let path = mine.file_path(SnapshotKind::Folders);
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.ends_with("_folders.json"));
        assert_eq!(name.len(), 64 + "_folders.json".len());
        assert!(!name.contains("example"));

        mine.save_folders(json!({ "Inbox": ["1"] })).await.unwrap();
        assert!(mine.has_saved_folders().await);
        assert!(!theirs.has_saved_folders().await);
    }

    #[tokio::test]
    async fn test_save_overwrites_and_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let storage = CategoryStorage::new(dir.path().join("nested"), "me@example.com");

        storage.save_folders(json!({ "A": [] })).await.unwrap();
        storage.save_folders(json!({ "B": [] })).await.unwrap();

        let loaded = storage.load_folders().await.unwrap().unwrap();
        assert_eq!(loaded.folders, json!({ "B": [] }));

        let entries = std::fs::read_dir(storage.dir()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_an_error() {
        let dir = TempDir::new().unwrap();
        let storage = CategoryStorage::new(dir.path(), "me@example.com");
        std::fs::write(storage.file_path(SnapshotKind::Categories), "{not json").unwrap();
        assert!(storage.load_categories().await.is_err());
    }
}
