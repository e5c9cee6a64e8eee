//! Caller identity extractors, plus body, path and query extractors that
//! reject with the JSON error body instead of axum's plain-text one.

use axum::extract::{FromRequest, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use crate::error::AppError;
use crate::services::auth::Claims;
use crate::services::orders::Caller;
use crate::state::AppState;

#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct AppJson<T>(pub T);

#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(AppError))]
pub struct AppPath<T>(pub T);

#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AppError))]
pub struct AppQuery<T>(pub T);

fn bearer(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ").or_else(|| value.strip_prefix("bearer "))?.trim();
    (!token.is_empty()).then_some(token)
}

fn claims(parts: &Parts, state: &AppState) -> Result<Option<Claims>, AppError> {
    match bearer(parts) {
        Some(token) => state.tokens.verify(token).map(Some),
        None if parts.headers.contains_key(AUTHORIZATION) => {
            Err(AppError::Unauthorized("Invalid authorization header".into()))
        }
        None => Ok(None),
    }
}

/// A signed-in user. Rejects with 401.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Claims);

impl AuthUser {
    pub fn id(&self) -> i64 { self.0.user_id }

    pub fn caller(&self) -> Caller {
        if self.0.is_admin() { Caller::admin(self.0.user_id) } else { Caller::user(self.0.user_id) }
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        claims(parts, state)?
            .map(AuthUser)
            .ok_or_else(|| AppError::Unauthorized("No token provided".into()))
    }
}

/// A signed-in admin. 401 without a token, 403 for other roles.
#[derive(Debug, Clone)]
pub struct AdminUser(pub Claims);

impl AdminUser {
    pub fn caller(&self) -> Caller { Caller::admin(self.0.user_id) }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let AuthUser(claims) = AuthUser::from_request_parts(parts, state).await?;
        if !claims.is_admin() {
            return Err(AppError::Forbidden("Admin access required".into()));
        }
        Ok(AdminUser(claims))
    }
}

/// Anonymous callers pass through; a token that is present must still be valid.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<Claims>);

impl MaybeUser {
    pub fn user_id(&self) -> Option<i64> { self.0.as_ref().map(|c| c.user_id) }

    pub fn caller(&self) -> Caller {
        match &self.0 {
            Some(c) if c.is_admin() => Caller::admin(c.user_id),
            Some(c) => Caller::user(c.user_id),
            None => Caller::guest(),
        }
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        claims(parts, state).map(MaybeUser)
    }
}
