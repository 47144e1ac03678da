//! PM Console Library
//!
//! Session handling and API access for the project management backend.

pub mod auth;
pub mod commands;
pub mod config;
pub mod guard;
pub mod logging;
pub mod resources;
pub mod storage;
pub mod sync;

use std::sync::Arc;

use auth::SessionController;
use config::AppConfig;
use storage::{MemoryTokenStore, SecureStorage, TokenStore};
use sync::{ApiClient, ApiError};

/// Application state shared across commands
pub struct AppState {
    pub session: SessionController,
    pub api: Arc<ApiClient>,
    pub store: Arc<dyn TokenStore>,
}

impl AppState {
    pub fn new(api: Arc<ApiClient>, store: Arc<dyn TokenStore>) -> Self {
        Self {
            session: SessionController::new(api.clone(), store.clone()),
            api,
            store,
        }
    }

    /// State backed by the on-disk token record under the data directory
    pub fn from_config(config: &AppConfig) -> Result<Self, ApiError> {
        let api = ApiClient::with_timeout(&config.api_base_url, config.request_timeout)?;
        let store = SecureStorage::new(&config.data_dir);
        Ok(Self::new(Arc::new(api), Arc::new(store)))
    }

    /// State whose token lives only for this process
    pub fn ephemeral(config: &AppConfig) -> Result<Self, ApiError> {
        let api = ApiClient::with_timeout(&config.api_base_url, config.request_timeout)?;
        Ok(Self::new(Arc::new(api), Arc::new(MemoryTokenStore::new())))
    }
}
