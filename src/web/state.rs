use std::sync::Arc;

use crate::engine::resolver::HybridResolver;
use crate::schema::manager::SchemaManager;

/// Shared application state for the web server
pub struct AppState {
    pub resolver: Arc<HybridResolver>,
    /// Absent when the schema is supplied statically.
    pub schema_manager: Option<Arc<SchemaManager>>,
    pub startup_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(resolver: Arc<HybridResolver>, schema_manager: Option<Arc<SchemaManager>>) -> Self {
        Self {
            resolver,
            schema_manager,
            startup_time: chrono::Utc::now(),
        }
    }
}
