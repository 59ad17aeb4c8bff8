use std::sync::Arc;

use anyhow::Context;
use axum::extract::FromRef;
use sqlx::PgPool;

use crate::auth::jwt::TokenIssuer;
use crate::auth::session::SessionService;
use crate::config::AppConfig;
use crate::storage::{S3Storage, StorageClient};
use crate::users::repo::{CredentialStore, PgUserStore};
use crate::users::services::AccountService;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn CredentialStore>,
    pub storage: Arc<dyn StorageClient>,
    pub tokens: TokenIssuer,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let db = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .context("connect to database")?;
        migrate(&db).await?;

        let storage = Arc::new(S3Storage::new(&config.media).await?) as Arc<dyn StorageClient>;
        let users = Arc::new(PgUserStore::new(db)) as Arc<dyn CredentialStore>;

        Ok(Self::from_parts(config, users, storage))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        users: Arc<dyn CredentialStore>,
        storage: Arc<dyn StorageClient>,
    ) -> Self {
        let tokens = TokenIssuer::new(&config.tokens);
        Self {
            config,
            users,
            storage,
            tokens,
        }
    }
}

async fn migrate(db: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(db)
        .await
        .context("run migrations")?;
    Ok(())
}

impl FromRef<AppState> for SessionService {
    fn from_ref(state: &AppState) -> Self {
        SessionService::new(
            state.users.clone(),
            state.tokens.clone(),
            state.config.revoke_sessions_on_password_change,
        )
    }
}

impl FromRef<AppState> for AccountService {
    fn from_ref(state: &AppState) -> Self {
        AccountService::new(state.users.clone(), state.storage.clone())
    }
}

#[cfg(test)]
pub use fake::FakeStorage;


#[cfg(test)]
pub use fake::test_config;
