use axum::{
    extract::{multipart::Field, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use tracing::{instrument, warn};

use super::dto::{PublicUser, UpdateAccountRequest};
use super::services::{AccountService, RegisterInput};
use crate::auth::extractors::AuthUser;
use crate::error::{AppError, AppResult};
use crate::media::UploadItem;
use crate::response::ApiResponse;
use crate::state::AppState;

const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

pub fn account_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/current-user", get(current_user))
        .route("/update-account", patch(update_account))
        .route("/avatar", patch(update_avatar))
        .route("/cover-image", patch(update_cover_image))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}

fn bad_multipart(e: impl std::fmt::Display) -> AppError {
    warn!(error = %e, "malformed multipart body");
    AppError::validation("malformed multipart body")
}

async fn read_file(field: Field<'_>) -> AppResult<Option<UploadItem>> {
    let content_type = field
        .content_type()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "application/octet-stream".into());
    let body = field.bytes().await.map_err(bad_multipart)?;
    if body.is_empty() {
        return Ok(None);
    }
    Ok(Some(UploadItem { body, content_type }))
}

/// Pulls the single file field called `name`, ignoring everything else.
async fn single_file(mut mp: Multipart, name: &str) -> AppResult<Option<UploadItem>> {
    let mut file = None;
    while let Some(field) = mp.next_field().await.map_err(bad_multipart)? {
        if field.name() == Some(name) {
            file = read_file(field).await?;
        }
    }
    Ok(file)
}

#[instrument(skip_all)]
pub async fn register(
    State(accounts): State<AccountService>,
    mut mp: Multipart,
) -> AppResult<ApiResponse<PublicUser>> {
    let mut input = RegisterInput::default();
    while let Some(field) = mp.next_field().await.map_err(bad_multipart)? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        match name.as_str() {
            "avatar" => input.avatar = read_file(field).await?,
            "coverImage" => input.cover_image = read_file(field).await?,
            "fullName" | "username" | "email" | "password" => {
                let value = field.text().await.map_err(bad_multipart)?;
                match name.as_str() {
                    "fullName" => input.full_name = value,
                    "username" => input.username = value,
                    "email" => input.email = value,
                    _ => input.password = value,
                }
            }
            _ => {}
        }
    }

    let user = accounts.register(input).await?;
    Ok(ApiResponse::new(
        StatusCode::CREATED,
        user,
        "User registered successfully",
    ))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn current_user(
    State(accounts): State<AccountService>,
    AuthUser(user): AuthUser,
) -> AppResult<ApiResponse<PublicUser>> {
    let user = accounts.current_user(user.id).await?;
    Ok(ApiResponse::ok(user, "Current user fetched successfully"))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn update_account(
    State(accounts): State<AccountService>,
    AuthUser(user): AuthUser,
    Json(payload): Json<UpdateAccountRequest>,
) -> AppResult<ApiResponse<PublicUser>> {
    let user = accounts
        .update_account(user.id, &payload.full_name, &payload.email)
        .await?;
    Ok(ApiResponse::ok(user, "Account details updated successfully"))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn update_avatar(
    State(accounts): State<AccountService>,
    AuthUser(user): AuthUser,
    mp: Multipart,
) -> AppResult<ApiResponse<PublicUser>> {
    let file = single_file(mp, "avatar").await?;
    let user = accounts.update_avatar(user.id, file).await?;
    Ok(ApiResponse::ok(user, "Avatar updated successfully"))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn update_cover_image(
    State(accounts): State<AccountService>,
    AuthUser(user): AuthUser,
    mp: Multipart,
) -> AppResult<ApiResponse<PublicUser>> {
    let file = single_file(mp, "coverImage").await?;
    let user = accounts.update_cover_image(user.id, file).await?;
    Ok(ApiResponse::ok(user, "Cover image updated successfully"))
}
