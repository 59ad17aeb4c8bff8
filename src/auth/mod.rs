use crate::state::AppState;
use axum::Router;

pub mod claims;
pub mod dto;
pub mod extractors;
pub mod handlers;
pub mod jwt;
pub mod password;
pub mod session;

pub(crate) const ACCESS_COOKIE: &str = "accessToken";
pub(crate) const REFRESH_COOKIE: &str = "refreshToken";

pub fn router() -> Router<AppState> {
    Router::new().merge(handlers::session_routes())
}
