pub mod health_handlers;
pub mod object_handlers;

use std::sync::Arc;

use crate::db::Database;
use crate::storage::ObjectStorage;
use crate::storage::signing::UrlSigner;

/// Handles shared by every route.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub storage: Arc<dyn ObjectStorage>,
    pub signer: UrlSigner,
}
