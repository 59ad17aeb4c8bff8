use axum::{
    extract::State,
    routing::post,
    Json, Router,
};
use axum_extra::extract::{cookie::Cookie, CookieJar};
use tracing::instrument;

use super::dto::{ChangePasswordRequest, LoginRequest, RefreshRequest};
use super::extractors::AuthUser;
use super::session::{LoginInput, LoginOutcome, SessionService, TokenPair};
use super::{ACCESS_COOKIE, REFRESH_COOKIE};
use crate::error::AppResult;
use crate::response::{ApiResponse, Empty};
use crate::state::AppState;

pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/refresh-token", post(refresh_token))
        .route("/change-password", post(change_password))
}

fn session_cookie(name: &'static str, value: String, secure: bool) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .secure(secure)
        .build()
}

fn clear_cookie(name: &'static str, secure: bool) -> Cookie<'static> {
    let mut cookie = session_cookie(name, String::new(), secure);
    cookie.make_removal();
    cookie
}

fn with_token_cookies(jar: CookieJar, pair: &TokenPair, secure: bool) -> CookieJar {
    jar.add(session_cookie(ACCESS_COOKIE, pair.access_token.clone(), secure))
        .add(session_cookie(REFRESH_COOKIE, pair.refresh_token.clone(), secure))
}

#[instrument(skip(state, sessions, jar, payload))]
pub async fn login(
    State(state): State<AppState>,
    State(sessions): State<SessionService>,
    jar: CookieJar,
    Json(payload): Json<LoginRequest>,
) -> AppResult<(CookieJar, ApiResponse<LoginOutcome>)> {
    let outcome = sessions
        .login(LoginInput {
            username: payload.username,
            email: payload.email,
            password: payload.password,
        })
        .await?;

    let pair = TokenPair {
        access_token: outcome.access_token.clone(),
        refresh_token: outcome.refresh_token.clone(),
    };
    let jar = with_token_cookies(jar, &pair, state.config.cookie_secure);
    Ok((jar, ApiResponse::ok(outcome, "User logged in successfully")))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn logout(
    State(state): State<AppState>,
    State(sessions): State<SessionService>,
    AuthUser(user): AuthUser,
    jar: CookieJar,
) -> AppResult<(CookieJar, ApiResponse<Empty>)> {
    sessions.logout(user.id).await?;

    let secure = state.config.cookie_secure;
    let jar = jar
        .add(clear_cookie(ACCESS_COOKIE, secure))
        .add(clear_cookie(REFRESH_COOKIE, secure));
    Ok((jar, ApiResponse::ok(Empty {}, "User logged out")))
}

#[instrument(skip_all)]
pub async fn refresh_token(
    State(state): State<AppState>,
    State(sessions): State<SessionService>,
    jar: CookieJar,
    payload: Option<Json<RefreshRequest>>,
) -> AppResult<(CookieJar, ApiResponse<TokenPair>)> {
    let incoming = jar
        .get(REFRESH_COOKIE)
        .map(|c| c.value().to_owned())
        .filter(|v| !v.is_empty())
        .or_else(|| payload.and_then(|Json(body)| body.refresh_token));

    let pair = sessions.refresh(incoming.as_deref()).await?;
    let jar = with_token_cookies(jar, &pair, state.config.cookie_secure);
    Ok((jar, ApiResponse::ok(pair, "Access token refreshed")))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn change_password(
    State(sessions): State<SessionService>,
    AuthUser(user): AuthUser,
    Json(payload): Json<ChangePasswordRequest>,
) -> AppResult<ApiResponse<Empty>> {
    sessions
        .change_password(user.id, &payload.old_password, &payload.new_password)
        .await?;
    Ok(ApiResponse::ok(Empty {}, "Password changed successfully"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_cookie_is_http_only_on_root_path() {
        let c = session_cookie(ACCESS_COOKIE, "tok".into(), true);
        assert_eq!(c.name(), "accessToken");
        assert_eq!(c.path(), Some("/"));
        assert_eq!(c.http_only(), Some(true));
        assert_eq!(c.secure(), Some(true));
    }

    #[test]
    fn cleared_cookie_is_empty_and_expired() {
        let c = clear_cookie(REFRESH_COOKIE, false);
        assert_eq!(c.value(), "");
        assert!(c.max_age().is_some_and(|d| d.is_zero()));
    }
}
