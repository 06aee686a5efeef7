use std::sync::Arc;

use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use axum_extra::extract::cookie::{Cookie, Key, PrivateCookieJar, SameSite};

use crate::{error::AppError, services::sessions::DriverSession, state::AppState};

pub const SESSION_COOKIE: &str = "rumbo_session";

/// Extractor for routes that require a logged-in driver. Resolves the private
/// session cookie against the registry; anything missing or unknown is a 401.
pub struct CurrentDriver(pub Arc<DriverSession>);

#[async_trait]
impl FromRequestParts<AppState> for CurrentDriver {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        let jar = PrivateCookieJar::<Key>::from_request_parts(parts, state)
            .await
            .map_err(|err| -> AppError { match err {} })?;
        let id = jar
            .get(SESSION_COOKIE)
            .map(|cookie| cookie.value().to_string())
            .ok_or(AppError::Unauthorized)?;
        let session = state.sessions.get(&id).ok_or(AppError::Unauthorized)?;
        Ok(Self(session))
    }
}

pub fn session_cookie(id: String) -> Cookie<'static> {
    let mut cookie = Cookie::new(SESSION_COOKIE, id);
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);
    cookie
}

/// Matching name and path so the browser actually drops the cookie.
pub fn removal_cookie() -> Cookie<'static> {
    let mut cookie = Cookie::new(SESSION_COOKIE, "");
    cookie.set_path("/");
    cookie
}
