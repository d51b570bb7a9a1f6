pub mod metadata;
pub mod safe_name;
pub mod store;
pub mod watcher;

pub use metadata::FileMetadata;
pub use safe_name::safe_name as sanitize_name;
pub use store::ContentStore;
pub use watcher::FolderWatcher;
