use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Config;
use crate::store::TheatreStore;

/// Shared handler state. Cloned per request.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TheatreStore>,
    pub media_root: Arc<PathBuf>,
    pub max_upload_bytes: usize,
    pub token_ttl: chrono::Duration,
}

impl AppState {
    pub fn new(store: Arc<dyn TheatreStore>, config: &Config) -> Self {
        Self {
            store,
            media_root: Arc::new(config.media_root.clone()),
            max_upload_bytes: config.max_upload_bytes,
            token_ttl: config.token_ttl(),
        }
    }
}
