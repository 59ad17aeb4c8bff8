use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use super::repo_types::{User, UserPatch};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Copy)]
pub struct SaveOptions {
    pub validate: bool,
}

/// Persisted user records.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn insert(&self, user: &User) -> StoreResult<User>;

    /// First user whose username or email matches; `None` identifiers are ignored.
    async fn find_by_username_or_email(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> StoreResult<Option<User>>;

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>>;

    /// Writes every mutable column of `user`. The password must already be hashed.
    async fn save(&self, user: &User, opts: SaveOptions) -> StoreResult<()>;

    async fn update_fields(&self, id: Uuid, patch: &UserPatch) -> StoreResult<Option<User>>;

    /// Replaces the refresh token only if the stored one equals `expected`.
    async fn rotate_refresh_token(&self, id: Uuid, expected: &str, new: &str) -> StoreResult<bool>;
}

pub(crate) fn check_before_save(user: &User, opts: SaveOptions) -> StoreResult<()> {
    if user.has_pending_password() {
        return Err(StoreError::Backend(anyhow::anyhow!(
            "refusing to persist unhashed password for user {}",
            user.id
        )));
    }
    if opts.validate {
        user.validate().map_err(StoreError::Invalid)?;
    }
    Ok(())
}

const USER_COLUMNS: &str = "id, username, email, full_name, password_hash, refresh_token, \
                            avatar_url, cover_image_url, created_at, updated_at";

pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn map_write_err(e: sqlx::Error, what: &'static str) -> StoreError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.is_unique_violation() {
            return StoreError::Conflict("username or email already exists".into());
        }
    }
    StoreError::Backend(anyhow::Error::new(e).context(what))
}

#[async_trait]
impl CredentialStore for PgUserStore {
    async fn insert(&self, user: &User) -> StoreResult<User> {
        check_before_save(user, SaveOptions { validate: true })?;
        let sql = format!(
            r#"
            INSERT INTO users (id, username, email, full_name, password_hash, refresh_token,
                               avatar_url, cover_image_url)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {USER_COLUMNS}
            "#
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(user.id)
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.full_name)
            .bind(&user.password_hash)
            .bind(&user.refresh_token)
            .bind(&user.avatar_url)
            .bind(&user.cover_image_url)
            .fetch_one(&self.db)
            .await
            .map_err(|e| map_write_err(e, "insert user"))
    }

    async fn find_by_username_or_email(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> StoreResult<Option<User>> {
        if username.is_none() && email.is_none() {
            return Ok(None);
        }
        let sql = format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE username = $1 OR email = $2
            ORDER BY created_at ASC
            LIMIT 1
            "#
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(username)
            .bind(email)
            .fetch_optional(&self.db)
            .await
            .context("find user by username or email")?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .context("find user by id")?;
        Ok(user)
    }

    async fn save(&self, user: &User, opts: SaveOptions) -> StoreResult<()> {
        check_before_save(user, opts)?;
        sqlx::query(
            r#"
            UPDATE users
               SET username = $2, email = $3, full_name = $4, password_hash = $5,
                   refresh_token = $6, avatar_url = $7, cover_image_url = $8,
                   updated_at = now()
             WHERE id = $1
            "#,
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.full_name)
        .bind(&user.password_hash)
        .bind(&user.refresh_token)
        .bind(&user.avatar_url)
        .bind(&user.cover_image_url)
        .execute(&self.db)
        .await
        .map_err(|e| map_write_err(e, "save user"))?;
        Ok(())
    }

    async fn update_fields(&self, id: Uuid, patch: &UserPatch) -> StoreResult<Option<User>> {
        let sql = format!(
            r#"
            UPDATE users
               SET full_name = COALESCE($2, full_name),
                   email = COALESCE($3, email),
                   avatar_url = COALESCE($4, avatar_url),
                   cover_image_url = COALESCE($5, cover_image_url),
                   refresh_token = CASE WHEN $6 THEN $7 ELSE refresh_token END,
                   password_hash = COALESCE($8, password_hash),
                   updated_at = now()
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        );
        let (touch_token, token) = match &patch.refresh_token {
            Some(v) => (true, v.clone()),
            None => (false, None),
        };
        sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(&patch.full_name)
            .bind(&patch.email)
            .bind(&patch.avatar_url)
            .bind(&patch.cover_image_url)
            .bind(touch_token)
            .bind(token)
            .bind(&patch.password_hash)
            .fetch_optional(&self.db)
            .await
            .map_err(|e| map_write_err(e, "update user fields"))
    }

    async fn rotate_refresh_token(&self, id: Uuid, expected: &str, new: &str) -> StoreResult<bool> {
        let res = sqlx::query(
            r#"
            UPDATE users
               SET refresh_token = $3, updated_at = now()
             WHERE id = $1 AND refresh_token = $2
            "#,
        )
        .bind(id)
        .bind(expected)
        .bind(new)
        .execute(&self.db)
        .await
        .context("rotate refresh token")?;
        Ok(res.rows_affected() == 1)
    }
}
