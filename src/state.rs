use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::storage::{LocalStorage, StorageClient};
use crate::users::{
    memory::MemoryUserRepo,
    repo::{PgUserRepo, UserRepo},
};

#[derive(Clone)]
pub struct AppState {
    pub users: Arc<dyn UserRepo>,
    pub storage: Arc<dyn StorageClient>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let users: Arc<dyn UserRepo> = match &config.database_url {
            Some(url) => {
                let db = PgPoolOptions::new()
                    .max_connections(10)
                    .connect(url)
                    .await
                    .context("connect to database")?;
                sqlx::migrate!("./migrations")
                    .run(&db)
                    .await
                    .context("run migrations")?;
                info!("using postgres user store");
                Arc::new(PgUserRepo::new(db))
            }
            None => {
                warn!("DATABASE_URL not set; accounts live in memory and vanish on restart");
                Arc::new(MemoryUserRepo::new())
            }
        };
        Self::with_users(config, users).await
    }

    /// State backed by the in-memory store regardless of `database_url`.
    pub async fn in_memory(config: AppConfig) -> anyhow::Result<Self> {
        Self::with_users(config, Arc::new(MemoryUserRepo::new())).await
    }

    async fn with_users(config: AppConfig, users: Arc<dyn UserRepo>) -> anyhow::Result<Self> {
        let storage = Arc::new(
            LocalStorage::new(config.uploads.dir.clone(), &config.uploads.public_prefix).await?,
        ) as Arc<dyn StorageClient>;
        Ok(Self {
            users,
            storage,
            config: Arc::new(config),
        })
    }

    /// In-memory state with uploads going to a fresh temp dir, which is
    /// removed when the returned guard drops.
    #[cfg(test)]
    pub async fn fake() -> (Self, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("temp upload dir");
        let config = AppConfig::for_tests(dir.path().to_path_buf());
        let state = Self::in_memory(config).await.expect("fake state");
        (state, dir)
    }
}
