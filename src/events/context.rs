//! Shared dependencies handed to every event handler.

use std::sync::Arc;

use crate::activity::{self, ActivityLogger};
use crate::db::Database;
use crate::messaging::Publisher;
use crate::models::Activity;
use crate::notify::Notifier;
use crate::storage::ObjectStorage;

pub const DEFAULT_BATCH_LIMIT: usize = 100;
pub const DEFAULT_TRASH_RETENTION_DAYS: u32 = 30;

#[derive(Clone)]
pub struct HandlerContext {
    pub db: Database,
    pub storage: Arc<dyn ObjectStorage>,
    pub publisher: Arc<dyn Publisher>,
    pub notifier: Arc<dyn Notifier>,
    pub activity: Arc<dyn ActivityLogger>,
    pub trash_retention_days: u32,

    /// Maximum rows a handler touches per phase and delivery.
    pub batch_limit: usize,
}

impl HandlerContext {
    pub async fn record(&self, activity: Activity) {
        activity::record(self.activity.as_ref(), activity).await;
    }
}
