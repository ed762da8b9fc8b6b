//! User-facing operations. They run synchronously and leave the
//! long-running work to the cascades.

pub mod bucket_service;
pub mod trash_service;

pub use bucket_service::BucketService;
pub use trash_service::{TrashEntry, TrashService};
