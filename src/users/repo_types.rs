use std::fmt;

use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database.
#[derive(Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub password_hash: String,
    pub refresh_token: Option<String>,
    pub avatar_url: String,
    pub cover_image_url: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    /// Plaintext waiting to be hashed by `prepare_for_persist`.
    #[sqlx(skip)]
    pending_password: Option<String>,
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("email", &self.email)
            .field("full_name", &self.full_name)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("password_pending", &self.pending_password.is_some())
            .finish_non_exhaustive()
    }
}

pub struct NewUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub avatar_url: String,
    pub cover_image_url: Option<String>,
}

impl User {
    /// Builds an unsaved record. The password stays pending until hashed.
    pub fn new(new: NewUser, password: &str) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: new.id,
            username: normalize_identifier(&new.username),
            email: normalize_identifier(&new.email),
            full_name: new.full_name.trim().to_string(),
            password_hash: String::new(),
            refresh_token: None,
            avatar_url: new.avatar_url,
            cover_image_url: new.cover_image_url,
            created_at: now,
            updated_at: now,
            pending_password: Some(password.to_string()),
        }
    }

    pub fn set_password(&mut self, plain: &str) {
        self.pending_password = Some(plain.to_string());
    }

    pub(crate) fn take_pending_password(&mut self) -> Option<String> {
        self.pending_password.take()
    }

    pub fn has_pending_password(&self) -> bool {
        self.pending_password.is_some()
    }

    /// Field checks applied by `save` when validation is requested.
    pub fn validate(&self) -> Result<(), String> {
        if self.username.is_empty() {
            return Err("username is required".into());
        }
        if self.email.is_empty() {
            return Err("email is required".into());
        }
        if self.full_name.is_empty() {
            return Err("full name is required".into());
        }
        if self.avatar_url.is_empty() {
            return Err("avatar is required".into());
        }
        if self.password_hash.is_empty() {
            return Err("password is required".into());
        }
        Ok(())
    }
}

/// Username and email are stored trimmed and lowercased.
pub fn normalize_identifier(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Partial update applied by `CredentialStore::update_fields`.
#[derive(Debug, Default, Clone)]
pub struct UserPatch {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
    pub cover_image_url: Option<String>,
    /// Already hashed; see `prepare_for_persist`.
    pub password_hash: Option<String>,
    /// `Some(None)` clears the stored token.
    pub refresh_token: Option<Option<String>>,
}

impl UserPatch {
    pub fn clear_refresh_token() -> Self {
        Self {
            refresh_token: Some(None),
            ..Self::default()
        }
    }

    pub(crate) fn apply(&self, user: &mut User) {
        if let Some(v) = &self.full_name {
            user.full_name = v.clone();
        }
        if let Some(v) = &self.email {
            user.email = v.clone();
        }
        if let Some(v) = &self.avatar_url {
            user.avatar_url = v.clone();
        }
        if let Some(v) = &self.cover_image_url {
            user.cover_image_url = Some(v.clone());
        }
        if let Some(v) = &self.password_hash {
            user.password_hash = v.clone();
        }
        if let Some(v) = &self.refresh_token {
            user.refresh_token = v.clone();
        }
        user.updated_at = OffsetDateTime::now_utc();
    }
}
