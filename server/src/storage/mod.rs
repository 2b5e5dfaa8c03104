pub mod category_storage;

pub use category_storage::{CategoryStorage, SavedCategorySnapshot, SavedFolderSnapshot};
