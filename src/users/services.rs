use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::dto::PublicUser;
use super::repo::CredentialStore;
use super::repo_types::{normalize_identifier, NewUser, User, UserPatch};
use crate::auth::password::prepare_for_persist;
use crate::error::{AppError, AppResult};
use crate::media::{remove_replaced, upload_image, ImageKind, UploadItem};
use crate::storage::StorageClient;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

#[derive(Debug, Default)]
pub struct RegisterInput {
    pub full_name: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub avatar: Option<UploadItem>,
    pub cover_image: Option<UploadItem>,
}

/// Registration and profile maintenance.
#[derive(Clone)]
pub struct AccountService {
    users: Arc<dyn CredentialStore>,
    storage: Arc<dyn StorageClient>,
}

impl AccountService {
    pub fn new(users: Arc<dyn CredentialStore>, storage: Arc<dyn StorageClient>) -> Self {
        Self { users, storage }
    }

    #[instrument(skip(self, input), fields(username = %input.username))]
    pub async fn register(&self, input: RegisterInput) -> AppResult<PublicUser> {
        let RegisterInput {
            full_name,
            username,
            email,
            password,
            avatar,
            cover_image,
        } = input;

        if [&full_name, &username, &email, &password]
            .iter()
            .any(|f| f.trim().is_empty())
        {
            return Err(AppError::validation("all fields are required"));
        }

        let username = normalize_identifier(&username);
        let email = normalize_identifier(&email);
        if !is_valid_email(&email) {
            warn!(%email, "invalid email");
            return Err(AppError::validation("invalid email"));
        }

        if self
            .users
            .find_by_username_or_email(Some(&username), Some(&email))
            .await?
            .is_some()
        {
            warn!(%username, %email, "username or email already registered");
            return Err(AppError::Conflict("username or email already exists".into()));
        }

        let avatar = avatar.ok_or_else(|| AppError::validation("avatar image is required"))?;

        let id = Uuid::new_v4();
        let avatar_url = upload_image(self.storage.as_ref(), id, ImageKind::Avatar, avatar)
            .await
            .map_err(|e| {
                warn!(error = %e, "avatar upload failed");
                AppError::validation("avatar upload failed")
            })?;

        let cover_image_url = match cover_image {
            Some(item) => {
                match upload_image(self.storage.as_ref(), id, ImageKind::Cover, item).await {
                    Ok(url) => Some(url),
                    Err(e) => {
                        warn!(error = %e, "cover image upload failed");
                        remove_replaced(self.storage.as_ref(), Some(&avatar_url)).await;
                        return Err(AppError::validation("cover image upload failed"));
                    }
                }
            }
            None => None,
        };

        let mut user = User::new(
            NewUser {
                id,
                username,
                email,
                full_name,
                avatar_url,
                cover_image_url,
            },
            &password,
        );
        prepare_for_persist(&mut user)?;

        let user = match self.users.insert(&user).await {
            Ok(u) => u,
            Err(e) => {
                remove_replaced(self.storage.as_ref(), Some(&user.avatar_url)).await;
                remove_replaced(self.storage.as_ref(), user.cover_image_url.as_deref()).await;
                return Err(e.into());
            }
        };

        info!(user_id = %user.id, "user registered");
        Ok(PublicUser::from(&user))
    }

    pub async fn current_user(&self, user_id: Uuid) -> AppResult<PublicUser> {
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::not_found("user does not exist"))?;
        Ok(PublicUser::from(&user))
    }

    #[instrument(skip(self, full_name, email))]
    pub async fn update_account(
        &self,
        user_id: Uuid,
        full_name: &str,
        email: &str,
    ) -> AppResult<PublicUser> {
        let full_name = full_name.trim();
        let email = normalize_identifier(email);
        if full_name.is_empty() || email.is_empty() {
            return Err(AppError::validation("fullName and email are required"));
        }
        if !is_valid_email(&email) {
            return Err(AppError::validation("invalid email"));
        }

        let patch = UserPatch {
            full_name: Some(full_name.to_string()),
            email: Some(email),
            ..UserPatch::default()
        };
        let user = self.apply_patch(user_id, &patch).await?;
        info!(%user_id, "account details updated");
        Ok(PublicUser::from(&user))
    }

    pub async fn update_avatar(&self, user_id: Uuid, file: Option<UploadItem>) -> AppResult<PublicUser> {
        self.replace_image(user_id, ImageKind::Avatar, file).await
    }

    pub async fn update_cover_image(
        &self,
        user_id: Uuid,
        file: Option<UploadItem>,
    ) -> AppResult<PublicUser> {
        self.replace_image(user_id, ImageKind::Cover, file).await
    }

    #[instrument(skip(self, file))]
    async fn replace_image(
        &self,
        user_id: Uuid,
        kind: ImageKind,
        file: Option<UploadItem>,
    ) -> AppResult<PublicUser> {
        let (missing, failed) = match kind {
            ImageKind::Avatar => ("avatar file is missing", "avatar upload failed"),
            ImageKind::Cover => ("cover image file is missing", "cover image upload failed"),
        };
        let file = file.ok_or_else(|| AppError::validation(missing))?;

        let current = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::not_found("user does not exist"))?;

        let url = upload_image(self.storage.as_ref(), user_id, kind, file)
            .await
            .map_err(|e| {
                warn!(error = %e, ?kind, "image upload failed");
                AppError::validation(failed)
            })?;

        let (patch, previous) = match kind {
            ImageKind::Avatar => (
                UserPatch {
                    avatar_url: Some(url.clone()),
                    ..UserPatch::default()
                },
                Some(current.avatar_url),
            ),
            ImageKind::Cover => (
                UserPatch {
                    cover_image_url: Some(url.clone()),
                    ..UserPatch::default()
                },
                current.cover_image_url,
            ),
        };
        let user = match self.apply_patch(user_id, &patch).await {
            Ok(u) => u,
            Err(e) => {
                remove_replaced(self.storage.as_ref(), Some(&url)).await;
                return Err(e);
            }
        };
        remove_replaced(self.storage.as_ref(), previous.as_deref()).await;

        info!(%user_id, ?kind, "image replaced");
        Ok(PublicUser::from(&user))
    }

    async fn apply_patch(&self, user_id: Uuid, patch: &UserPatch) -> AppResult<User> {
        self.users
            .update_fields(user_id, patch)
            .await?
            .ok_or_else(|| AppError::not_found("user does not exist"))
    }
}
