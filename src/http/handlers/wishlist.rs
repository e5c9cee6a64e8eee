//! Saved products.

use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use serde_json::Value;
use super::message;
use crate::domain::aggregates::WishlistItem;
use crate::error::{AppError, Result};
use crate::http::extract::{AppJson, AppPath, AuthUser};
use crate::state::AppState;

pub async fn list(State(s): State<AppState>, user: AuthUser) -> Result<Json<Vec<WishlistItem>>> {
    let items = sqlx::query_as::<_, WishlistItem>(
        "SELECT w.id, w.user_id, w.product_id, p.name AS product_name, p.price AS product_price, p.image AS product_image, w.created_at \
         FROM wishlists w JOIN products p ON p.id = w.product_id \
         WHERE w.user_id = $1 AND p.deleted_at IS NULL ORDER BY w.created_at DESC"
    ).bind(user.id()).fetch_all(&s.db).await?;
    Ok(Json(items))
}

#[derive(Debug, Deserialize)]
pub struct AddRequest {
    pub product_id: i64,
}

/// Adding a product twice is not an error.
pub async fn add(State(s): State<AppState>, user: AuthUser, AppJson(r): AppJson<AddRequest>) -> Result<(StatusCode, Json<Value>)> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM products WHERE id = $1 AND deleted_at IS NULL)")
        .bind(r.product_id).fetch_one(&s.db).await?;
    if !exists { return Err(AppError::not_found("Product")); }
    let done = sqlx::query("INSERT INTO wishlists (user_id, product_id) VALUES ($1, $2) ON CONFLICT (user_id, product_id) DO NOTHING")
        .bind(user.id()).bind(r.product_id).execute(&s.db).await?;
    if done.rows_affected() == 0 {
        return Ok((StatusCode::OK, Json(message("Already in wishlist"))));
    }
    Ok((StatusCode::CREATED, Json(message("Added to wishlist"))))
}

pub async fn remove(State(s): State<AppState>, user: AuthUser, AppPath(product_id): AppPath<i64>) -> Result<Json<Value>> {
    let done = sqlx::query("DELETE FROM wishlists WHERE user_id = $1 AND product_id = $2")
        .bind(user.id()).bind(product_id).execute(&s.db).await?;
    if done.rows_affected() == 0 { return Err(AppError::NotFound("Item not found in wishlist".into())); }
    Ok(Json(message("Removed from wishlist")))
}
