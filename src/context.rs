//! Handles a background job needs: configuration and the record store.
use crate::config::Config;
use crate::db::{self, EntryStore, SqliteStore};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub store: Arc<dyn EntryStore>,
}

impl AppContext {
    pub fn new(config: Config, store: Arc<dyn EntryStore>) -> Self {
        Self {
            config: Arc::new(config),
            store,
        }
    }

    /// Open the configured database, apply migrations and wrap it.
    pub async fn connect(config: Config) -> anyhow::Result<Self> {
        let pool = db::init_pool(&config.database_url()).await?;
        db::run_migrations(&pool).await?;
        Ok(Self::new(config, Arc::new(SqliteStore::new(pool))))
    }
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("site", &self.config.site.url)
            .finish_non_exhaustive()
    }
}
