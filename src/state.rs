use std::sync::Arc;

use crate::config::AppConfig;
use crate::storage::{ObjectStorage, S3Storage};
use crate::store::{self, Store};

/// Shared application state. Both handles are built once at startup
/// and passed into request handlers; nothing here is request-mutable.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub storage: Arc<dyn ObjectStorage>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);
        let store = store::connect(&config).await?;
        let storage = Arc::new(S3Storage::new(&config.s3).await?) as Arc<dyn ObjectStorage>;
        Ok(Self {
            store,
            storage,
            config,
        })
    }
}
