//! Login session lifecycle: Anonymous → Authenticated → Revoked.
//!
//! A session is the single refresh token stored on the user record. Login
//! overwrites it, refresh rotates it with a compare-and-swap, logout clears it.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::jwt::TokenIssuer;
use super::password::{prepare_for_persist, verify_password};
use crate::error::{AppError, AppResult};
use crate::users::dto::PublicUser;
use crate::users::repo::CredentialStore;
use crate::users::repo_types::{normalize_identifier, User, UserPatch};

const EXPIRED_OR_USED: &str = "refresh token is expired or used";

#[derive(Debug, Default)]
pub struct LoginInput {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginOutcome {
    pub user: PublicUser,
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Clone)]
pub struct SessionService {
    users: Arc<dyn CredentialStore>,
    tokens: TokenIssuer,
    revoke_on_password_change: bool,
}

impl SessionService {
    pub fn new(
        users: Arc<dyn CredentialStore>,
        tokens: TokenIssuer,
        revoke_on_password_change: bool,
    ) -> Self {
        Self {
            users,
            tokens,
            revoke_on_password_change,
        }
    }

    /// Issues a fresh pair and stores only the refresh token on the record,
    /// so columns written by other requests since `user` was loaded survive.
    async fn generate_access_and_refresh_tokens(
        &self,
        user: &User,
    ) -> anyhow::Result<(User, TokenPair)> {
        let access_token = self.tokens.issue_access_token(user)?;
        let refresh_token = self.tokens.issue_refresh_token(user)?;

        let patch = UserPatch {
            refresh_token: Some(Some(refresh_token.clone())),
            ..UserPatch::default()
        };
        let stored = self
            .users
            .update_fields(user.id, &patch)
            .await?
            .ok_or_else(|| anyhow::anyhow!("user {} disappeared during login", user.id))?;

        Ok((
            stored,
            TokenPair {
                access_token,
                refresh_token,
            },
        ))
    }

    #[instrument(skip(self, input), fields(username = ?input.username, email = ?input.email))]
    pub async fn login(&self, input: LoginInput) -> AppResult<LoginOutcome> {
        let username = clean_identifier(input.username.as_deref());
        let email = clean_identifier(input.email.as_deref());
        if username.is_none() && email.is_none() {
            return Err(AppError::validation("username or email is required"));
        }

        let user = self
            .users
            .find_by_username_or_email(username.as_deref(), email.as_deref())
            .await?
            .ok_or_else(|| {
                warn!("login for unknown user");
                AppError::not_found("user does not exist")
            })?;

        if !verify_password(&input.password, &user.password_hash)? {
            warn!(user_id = %user.id, "login invalid password");
            return Err(AppError::unauthorized("invalid user credentials"));
        }

        let (user, pair) = self
            .generate_access_and_refresh_tokens(&user)
            .await
            .map_err(token_generation_failed)?;

        info!(user_id = %user.id, "user logged in");
        Ok(LoginOutcome {
            user: PublicUser::from(&user),
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
        })
    }

    #[instrument(skip_all)]
    pub async fn refresh(&self, incoming: Option<&str>) -> AppResult<TokenPair> {
        let incoming = incoming
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::unauthorized("unauthorized request"))?;

        let claims = self.tokens.verify_refresh_token(incoming).map_err(|e| {
            warn!(error = %e, "refresh token rejected");
            AppError::unauthorized(e.to_string())
        })?;

        let user = self
            .users
            .find_by_id(claims.sub)
            .await?
            .ok_or_else(|| AppError::unauthorized("invalid refresh token"))?;

        if user.refresh_token.as_deref() != Some(incoming) {
            warn!(user_id = %user.id, "stale refresh token presented");
            return Err(AppError::unauthorized(EXPIRED_OR_USED));
        }

        let issue = || -> anyhow::Result<TokenPair> {
            Ok(TokenPair {
                access_token: self.tokens.issue_access_token(&user)?,
                refresh_token: self.tokens.issue_refresh_token(&user)?,
            })
        };
        let pair = issue().map_err(token_generation_failed)?;

        let swapped = self
            .users
            .rotate_refresh_token(user.id, incoming, &pair.refresh_token)
            .await
            .map_err(token_generation_failed)?;
        if !swapped {
            warn!(user_id = %user.id, "refresh token rotated concurrently");
            return Err(AppError::unauthorized(EXPIRED_OR_USED));
        }

        info!(user_id = %user.id, "refresh token rotated");
        Ok(pair)
    }

    /// Clears the stored refresh token. Unknown users are not an error.
    #[instrument(skip(self))]
    pub async fn logout(&self, user_id: Uuid) -> AppResult<()> {
        self.users
            .update_fields(user_id, &UserPatch::clear_refresh_token())
            .await?;
        info!(%user_id, "user logged out");
        Ok(())
    }

    #[instrument(skip(self, old_password, new_password))]
    pub async fn change_password(
        &self,
        user_id: Uuid,
        old_password: &str,
        new_password: &str,
    ) -> AppResult<()> {
        if old_password.is_empty() || new_password.trim().is_empty() {
            return Err(AppError::validation("old and new password are required"));
        }

        let mut user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::not_found("user does not exist"))?;

        if !verify_password(old_password, &user.password_hash)? {
            warn!(%user_id, "change password with invalid old password");
            return Err(AppError::unauthorized("invalid old password"));
        }

        user.set_password(new_password);
        prepare_for_persist(&mut user)?;

        let mut patch = UserPatch {
            password_hash: Some(user.password_hash.clone()),
            ..UserPatch::default()
        };
        if self.revoke_on_password_change {
            patch.refresh_token = Some(None);
        }
        self.users.update_fields(user_id, &patch).await?;

        info!(%user_id, revoked = self.revoke_on_password_change, "password changed");
        Ok(())
    }
}

fn token_generation_failed(e: impl std::fmt::Display) -> AppError {
    error!(error = %e, "token generation failed");
    AppError::Internal("token generation failed".into())
}

fn clean_identifier(raw: Option<&str>) -> Option<String> {
    raw.map(normalize_identifier).filter(|s| !s.is_empty())
}
