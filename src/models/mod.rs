//! Core data models for the bucket store.
//!
//! These entities map to database tables via `sqlx::FromRow` and serialize
//! as JSON via `serde`.

pub mod activity;
pub mod bucket;
pub mod file;
pub mod folder;
pub mod status;

pub use activity::{Action, Activity, ObjectType};
pub use bucket::Bucket;
pub use file::{File, NewFile};
pub use folder::{Folder, NewFolder};
pub use status::{FileStatus, FolderStatus};
