use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use axum_extra::extract::CookieJar;
use tracing::debug;

use super::ACCESS_COOKIE;
use crate::error::AppError;
use crate::state::AppState;
use crate::users::repo_types::User;

/// The user behind a verified access token.
pub struct AuthUser(pub User);

/// Access token from the `accessToken` cookie, else from `Authorization: Bearer`.
fn access_token_from_headers(headers: &HeaderMap) -> Option<String> {
    CookieJar::from_headers(headers)
        .get(ACCESS_COOKIE)
        .map(|c| c.value().to_owned())
        .filter(|v| !v.is_empty())
        .or_else(|| {
            headers
                .get(AUTHORIZATION)
                .and_then(|h| h.to_str().ok())
                .and_then(|h| h.strip_prefix("Bearer ").or_else(|| h.strip_prefix("bearer ")))
                .map(|t| t.trim().to_owned())
                .filter(|t| !t.is_empty())
        })
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = access_token_from_headers(&parts.headers)
            .ok_or_else(|| AppError::unauthorized("unauthorized request"))?;

        let claims = state.tokens.verify_access_token(&token).map_err(|e| {
            debug!(error = %e, "access token rejected");
            AppError::unauthorized(e.to_string())
        })?;

        let user = state
            .users
            .find_by_id(claims.sub)
            .await?
            .ok_or_else(|| AppError::unauthorized("invalid access token"))?;

        Ok(AuthUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header::COOKIE, HeaderValue};

    #[test]
    fn cookie_wins_over_header() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("accessToken=from-cookie; other=1"));
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        assert_eq!(access_token_from_headers(&headers).as_deref(), Some("from-cookie"));
    }

    #[test]
    fn bearer_header_is_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(access_token_from_headers(&headers).as_deref(), Some("abc.def"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(access_token_from_headers(&headers), None);
        assert_eq!(access_token_from_headers(&HeaderMap::new()), None);
    }
}
