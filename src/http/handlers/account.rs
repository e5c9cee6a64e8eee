//! Registration, sessions, profile, saved addresses and newsletter sign-up.

use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::PgPool;
use tracing::{info, warn};
use validator::Validate;
use super::{is_unique_violation, message};
use crate::domain::aggregates::{Address, User};
use crate::error::{AppError, Result};
use crate::http::extract::{AppJson, AppPath, AuthUser};
use crate::services::auth::{hash_password, verify_password};
use crate::state::AppState;
use crate::validation::sanitize;

const USER_COLUMNS: &str = "id, email, password_hash, name, phone, role, created_at, updated_at";
const ADDRESS_COLUMNS: &str = "id, user_id, kind, is_default, name, phone, address_line1, address_line2, city, state, \
    postal_code, country, landmark, created_at, updated_at";

async fn blocking<T: Send + 'static>(f: impl FnOnce() -> Result<T> + Send + 'static) -> Result<T> {
    tokio::task::spawn_blocking(f).await.map_err(|e| AppError::Internal(format!("blocking task failed: {e}")))?
}

async fn find_user(db: &PgPool, id: i64) -> Result<User> {
    sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
        .bind(id).fetch_optional(db).await?.ok_or_else(|| AppError::not_found("User"))
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(custom = "crate::validation::email")]
    pub email: String,
    #[validate(length(min = 8, max = 72, message = "password must be 8 to 72 characters"))]
    pub password: String,
    #[serde(default)]
    #[validate(custom = "crate::validation::phone")]
    pub phone: String,
}

pub async fn register(State(s): State<AppState>, AppJson(r): AppJson<RegisterRequest>) -> Result<(StatusCode, Json<Value>)> {
    r.validate()?;
    let email = r.email.trim().to_ascii_lowercase();
    let password = r.password;
    let hash = blocking(move || hash_password(&password)).await?;
    let user = sqlx::query_as::<_, User>(&format!(
        "INSERT INTO users (email, password_hash, name, phone, role) VALUES ($1, $2, $3, $4, 'user') RETURNING {USER_COLUMNS}"
    ))
        .bind(&email).bind(&hash).bind(sanitize(&r.name, 100)).bind(r.phone.trim())
        .fetch_one(&s.db).await
        .map_err(|e| if is_unique_violation(&e) { AppError::Conflict("Email already registered".into()) } else { e.into() })?;
    let token = s.tokens.issue(&user)?;
    info!(user_id = user.id, "user registered");
    Ok((StatusCode::CREATED, Json(json!({ "user": user, "token": token }))))
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1))]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

pub async fn login(State(s): State<AppState>, AppJson(r): AppJson<LoginRequest>) -> Result<Json<Value>> {
    r.validate()?;
    let invalid = || AppError::Unauthorized("Invalid credentials".into());
    let user = sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1"))
        .bind(r.email.trim().to_ascii_lowercase()).fetch_optional(&s.db).await?
        .ok_or_else(invalid)?;
    let stored = user.password_hash.clone();
    let password = r.password;
    if !blocking(move || verify_password(&stored, &password)).await? {
        warn!(user_id = user.id, "login rejected");
        return Err(invalid());
    }
    let token = s.tokens.issue(&user)?;
    info!(user_id = user.id, "user logged in");
    Ok(Json(json!({ "user": user, "token": token })))
}

/// Tokens are stateless; the client drops its copy.
pub async fn logout() -> Json<Value> { Json(message("Logged out successfully")) }

pub async fn refresh(State(s): State<AppState>, user: AuthUser) -> Result<Json<Value>> {
    Ok(Json(json!({ "token": s.tokens.refresh(&user.0)? })))
}

pub async fn me(State(s): State<AppState>, user: AuthUser) -> Result<Json<User>> {
    find_user(&s.db, user.id()).await.map(Json)
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProfileRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    #[validate(custom = "crate::validation::phone")]
    pub phone: Option<String>,
}

pub async fn update_me(State(s): State<AppState>, user: AuthUser, AppJson(r): AppJson<UpdateProfileRequest>) -> Result<Json<User>> {
    r.validate()?;
    sqlx::query_as::<_, User>(&format!(
        "UPDATE users SET name = COALESCE($2, name), phone = COALESCE($3, phone), updated_at = NOW() WHERE id = $1 RETURNING {USER_COLUMNS}"
    ))
        .bind(user.id()).bind(r.name.as_deref().map(|n| sanitize(n, 100))).bind(r.phone.as_deref().map(str::trim))
        .fetch_optional(&s.db).await?.map(Json).ok_or_else(|| AppError::not_found("User"))
}

pub async fn list_addresses(State(s): State<AppState>, user: AuthUser) -> Result<Json<Vec<Address>>> {
    let addresses = sqlx::query_as::<_, Address>(&format!(
        "SELECT {ADDRESS_COLUMNS} FROM addresses WHERE user_id = $1 AND deleted_at IS NULL ORDER BY is_default DESC, created_at DESC"
    )).bind(user.id()).fetch_all(&s.db).await?;
    Ok(Json(addresses))
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddressRequest {
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    #[validate(length(max = 255))]
    pub name: String,
    #[serde(default)]
    #[validate(custom = "crate::validation::phone")]
    pub phone: String,
    #[validate(length(min = 5, max = 500))]
    pub address_line1: String,
    #[serde(default)]
    #[validate(length(max = 500))]
    pub address_line2: String,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    #[validate(length(min = 1, max = 100))]
    pub state: String,
    #[validate(custom = "crate::validation::postal_code")]
    pub postal_code: String,
    #[validate(length(min = 1, max = 100))]
    pub country: String,
    #[serde(default)]
    #[validate(length(max = 255))]
    pub landmark: String,
}

fn default_kind() -> String { "shipping".into() }

pub async fn create_address(State(s): State<AppState>, user: AuthUser, AppJson(r): AppJson<AddressRequest>) -> Result<(StatusCode, Json<Address>)> {
    r.validate()?;
    let mut tx = s.db.begin().await?;
    if r.is_default {
        sqlx::query("UPDATE addresses SET is_default = FALSE WHERE user_id = $1").bind(user.id()).execute(&mut *tx).await?;
    }
    let address = sqlx::query_as::<_, Address>(&format!(
        "INSERT INTO addresses (user_id, kind, is_default, name, phone, address_line1, address_line2, city, state, postal_code, country, landmark) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) RETURNING {ADDRESS_COLUMNS}"
    ))
        .bind(user.id()).bind(&r.kind).bind(r.is_default).bind(&r.name).bind(&r.phone).bind(&r.address_line1)
        .bind(&r.address_line2).bind(&r.city).bind(&r.state).bind(&r.postal_code).bind(&r.country).bind(&r.landmark)
        .fetch_one(&mut *tx).await?;
    tx.commit().await?;
    Ok((StatusCode::CREATED, Json(address)))
}

pub async fn update_address(State(s): State<AppState>, user: AuthUser, AppPath(id): AppPath<i64>, AppJson(r): AppJson<AddressRequest>) -> Result<Json<Address>> {
    r.validate()?;
    let mut tx = s.db.begin().await?;
    if r.is_default {
        sqlx::query("UPDATE addresses SET is_default = FALSE WHERE user_id = $1 AND id <> $2")
            .bind(user.id()).bind(id).execute(&mut *tx).await?;
    }
    let address = sqlx::query_as::<_, Address>(&format!(
        "UPDATE addresses SET kind = $3, is_default = $4, name = $5, phone = $6, address_line1 = $7, address_line2 = $8, \
         city = $9, state = $10, postal_code = $11, country = $12, landmark = $13, updated_at = NOW() \
         WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL RETURNING {ADDRESS_COLUMNS}"
    ))
        .bind(id).bind(user.id()).bind(&r.kind).bind(r.is_default).bind(&r.name).bind(&r.phone).bind(&r.address_line1)
        .bind(&r.address_line2).bind(&r.city).bind(&r.state).bind(&r.postal_code).bind(&r.country).bind(&r.landmark)
        .fetch_optional(&mut *tx).await?
        .ok_or_else(|| AppError::not_found("Address"))?;
    tx.commit().await?;
    Ok(Json(address))
}

pub async fn delete_address(State(s): State<AppState>, user: AuthUser, AppPath(id): AppPath<i64>) -> Result<Json<Value>> {
    let done = sqlx::query("UPDATE addresses SET deleted_at = NOW(), is_default = FALSE WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL")
        .bind(id).bind(user.id()).execute(&s.db).await?;
    if done.rows_affected() == 0 { return Err(AppError::not_found("Address")); }
    Ok(Json(message("Address deleted")))
}

#[derive(Debug, Deserialize, Validate)]
pub struct NewsletterRequest {
    #[validate(custom = "crate::validation::email")]
    pub email: String,
}

/// 201 for a new address, 200 when already subscribed or resubscribed.
pub async fn subscribe_newsletter(State(s): State<AppState>, AppJson(r): AppJson<NewsletterRequest>) -> Result<(StatusCode, Json<Value>)> {
    r.validate()?;
    let email = r.email.trim().to_ascii_lowercase();
    let existing: Option<bool> = sqlx::query_scalar("SELECT subscribed FROM newsletter_subscriptions WHERE email = $1")
        .bind(&email).fetch_optional(&s.db).await?;
    match existing {
        Some(true) => Ok((StatusCode::OK, Json(message("Already subscribed")))),
        Some(false) => {
            sqlx::query("UPDATE newsletter_subscriptions SET subscribed = TRUE WHERE email = $1").bind(&email).execute(&s.db).await?;
            Ok((StatusCode::OK, Json(message("Resubscribed successfully"))))
        }
        None => {
            sqlx::query("INSERT INTO newsletter_subscriptions (email) VALUES ($1) ON CONFLICT (email) DO UPDATE SET subscribed = TRUE")
                .bind(&email).execute(&s.db).await?;
            info!("newsletter subscription added");
            Ok((StatusCode::CREATED, Json(message("Subscribed successfully"))))
        }
    }
}
