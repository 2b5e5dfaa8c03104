use axum::{extract::State, Json};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    auth::session::UserSession,
    error::{AppError, AppJson, AppJsonResult},
    storage::{CategoryStorage, SavedCategorySnapshot, SavedFolderSnapshot},
    StorageDir,
};

fn storage_for(dir: &StorageDir, user: &UserSession) -> CategoryStorage {
    CategoryStorage::new(dir.0.as_path(), user.user_email())
}

#[derive(Debug, Serialize)]
pub struct SavedResponse {
    pub success: bool,
    pub message: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct SaveCategoriesRequest {
    #[serde(default)]
    pub categories: IndexMap<String, Vec<serde_json::Value>>,
    #[serde(default)]
    pub query: String,
}

pub async fn save_categories(
    State(dir): State<StorageDir>,
    user: UserSession,
    AppJson(body): AppJson<SaveCategoriesRequest>,
) -> AppJsonResult<SavedResponse> {
    storage_for(&dir, &user)
        .save_categories(body.categories, &body.query)
        .await?;

    Ok(Json(SavedResponse {
        success: true,
        message: "Categories saved successfully",
    }))
}

#[derive(Debug, Deserialize)]
pub struct SaveFoldersRequest {
    #[serde(default = "empty_object")]
    pub folders: serde_json::Value,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

pub async fn save_folders(
    State(dir): State<StorageDir>,
    user: UserSession,
    AppJson(body): AppJson<SaveFoldersRequest>,
) -> AppJsonResult<SavedResponse> {
    storage_for(&dir, &user).save_folders(body.folders).await?;

    Ok(Json(SavedResponse {
        success: true,
        message: "Folders saved successfully",
    }))
}

#[derive(Debug, Serialize)]
pub struct LoadedResponse<T> {
    pub success: bool,
    pub data: T,
}

pub async fn load_saved_categories(
    State(dir): State<StorageDir>,
    user: UserSession,
) -> AppJsonResult<LoadedResponse<SavedCategorySnapshot>> {
    let data = storage_for(&dir, &user)
        .load_categories()
        .await?
        .ok_or_else(|| AppError::NotFound("No saved categories found".to_string()))?;

    Ok(Json(LoadedResponse {
        success: true,
        data,
    }))
}

pub async fn load_saved_folders(
    State(dir): State<StorageDir>,
    user: UserSession,
) -> AppJsonResult<LoadedResponse<SavedFolderSnapshot>> {
    let data = storage_for(&dir, &user)
        .load_folders()
        .await?
        .ok_or_else(|| AppError::NotFound("No saved folders found".to_string()))?;

    Ok(Json(LoadedResponse {
        success: true,
        data,
    }))
}

#[derive(Debug, Serialize)]
pub struct HasSavedDataResponse {
    pub success: bool,
    pub has_categories: bool,
    pub has_folders: bool,
}

pub async fn has_saved_data(
    State(dir): State<StorageDir>,
    user: UserSession,
) -> AppJsonResult<HasSavedDataResponse> {
    let storage = storage_for(&dir, &user);

    Ok(Json(HasSavedDataResponse {
        success: true,
        has_categories: storage.has_saved_categories().await,
        has_folders: storage.has_saved_folders().await,
    }))
}
