//! Product reviews and moderation.

use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use serde_json::Value;
use sqlx::{Postgres, QueryBuilder};
use tracing::info;
use validator::Validate;
use super::{is_unique_violation, message};
use crate::domain::aggregates::Review;
use crate::error::{AppError, Result};
use crate::http::extract::{AdminUser, AppJson, AppPath, AppQuery, AuthUser};
use crate::state::AppState;
use crate::validation::sanitize;

const REVIEW_COLUMNS: &str = "id, product_id, user_id, rating, title, comment, is_verified, is_approved, helpful_count, created_at, updated_at";

pub async fn product_reviews(State(s): State<AppState>, AppPath(product_id): AppPath<i64>) -> Result<Json<Vec<Review>>> {
    let reviews = sqlx::query_as::<_, Review>(&format!(
        "SELECT {REVIEW_COLUMNS} FROM reviews WHERE product_id = $1 AND is_approved AND deleted_at IS NULL ORDER BY created_at DESC"
    )).bind(product_id).fetch_all(&s.db).await?;
    Ok(Json(reviews))
}

pub async fn my_reviews(State(s): State<AppState>, user: AuthUser) -> Result<Json<Vec<Review>>> {
    let reviews = sqlx::query_as::<_, Review>(&format!(
        "SELECT {REVIEW_COLUMNS} FROM reviews WHERE user_id = $1 AND deleted_at IS NULL ORDER BY created_at DESC"
    )).bind(user.id()).fetch_all(&s.db).await?;
    Ok(Json(reviews))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateReviewRequest {
    pub product_id: i64,
    #[validate(range(min = 1, max = 5, message = "rating must be between 1 and 5"))]
    pub rating: i32,
    #[serde(default)]
    #[validate(length(max = 255))]
    pub title: String,
    #[serde(default)]
    #[validate(length(max = 5000))]
    pub comment: String,
}

/// Reviews from customers with a paid order for the product are marked verified.
pub async fn create_review(State(s): State<AppState>, user: AuthUser, AppJson(r): AppJson<CreateReviewRequest>) -> Result<(StatusCode, Json<Review>)> {
    r.validate()?;
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM products WHERE id = $1 AND deleted_at IS NULL)")
        .bind(r.product_id).fetch_one(&s.db).await?;
    if !exists { return Err(AppError::not_found("Product")); }
    let verified: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM orders o JOIN order_items i ON i.order_id = o.id \
         WHERE o.user_id = $1 AND i.product_id = $2 AND o.payment_status = 'paid')"
    ).bind(user.id()).bind(r.product_id).fetch_one(&s.db).await?;
    let review = sqlx::query_as::<_, Review>(&format!(
        "INSERT INTO reviews (product_id, user_id, rating, title, comment, is_verified) VALUES ($1, $2, $3, $4, $5, $6) RETURNING {REVIEW_COLUMNS}"
    ))
        .bind(r.product_id).bind(user.id()).bind(r.rating).bind(sanitize(&r.title, 255)).bind(sanitize(&r.comment, 5000)).bind(verified)
        .fetch_one(&s.db).await
        .map_err(|e| if is_unique_violation(&e) { AppError::Conflict("You have already reviewed this product".into()) } else { e.into() })?;
    info!(review_id = review.id, product_id = r.product_id, user_id = user.id(), "review created");
    Ok((StatusCode::CREATED, Json(review)))
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateReviewRequest {
    #[validate(range(min = 1, max = 5, message = "rating must be between 1 and 5"))]
    pub rating: Option<i32>,
    #[validate(length(max = 255))]
    pub title: Option<String>,
    #[validate(length(max = 5000))]
    pub comment: Option<String>,
}

pub async fn update_review(State(s): State<AppState>, user: AuthUser, AppPath(id): AppPath<i64>, AppJson(r): AppJson<UpdateReviewRequest>) -> Result<Json<Review>> {
    r.validate()?;
    sqlx::query_as::<_, Review>(&format!(
        "UPDATE reviews SET rating = COALESCE($3, rating), title = COALESCE($4, title), comment = COALESCE($5, comment), updated_at = NOW() \
         WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL RETURNING {REVIEW_COLUMNS}"
    ))
        .bind(id).bind(user.id()).bind(r.rating)
        .bind(r.title.as_deref().map(|t| sanitize(t, 255))).bind(r.comment.as_deref().map(|c| sanitize(c, 5000)))
        .fetch_optional(&s.db).await?.map(Json).ok_or_else(|| AppError::not_found("Review"))
}

pub async fn delete_review(State(s): State<AppState>, user: AuthUser, AppPath(id): AppPath<i64>) -> Result<Json<Value>> {
    let done = sqlx::query("UPDATE reviews SET deleted_at = NOW() WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL")
        .bind(id).bind(user.id()).execute(&s.db).await?;
    if done.rows_affected() == 0 { return Err(AppError::not_found("Review")); }
    Ok(Json(message("Review deleted")))
}

#[derive(Debug, Default, Deserialize)]
pub struct AdminReviewParams {
    pub approved: Option<bool>,
}

pub async fn admin_list_reviews(State(s): State<AppState>, _admin: AdminUser, AppQuery(p): AppQuery<AdminReviewParams>) -> Result<Json<Vec<Review>>> {
    let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {REVIEW_COLUMNS} FROM reviews WHERE deleted_at IS NULL"));
    if let Some(approved) = p.approved { qb.push(" AND is_approved = ").push_bind(approved); }
    qb.push(" ORDER BY created_at DESC");
    Ok(Json(qb.build_query_as::<Review>().fetch_all(&s.db).await?))
}

pub async fn approve_review(State(s): State<AppState>, _admin: AdminUser, AppPath(id): AppPath<i64>) -> Result<Json<Value>> {
    let done = sqlx::query("UPDATE reviews SET is_approved = TRUE, updated_at = NOW() WHERE id = $1 AND deleted_at IS NULL")
        .bind(id).execute(&s.db).await?;
    if done.rows_affected() == 0 { return Err(AppError::not_found("Review")); }
    Ok(Json(message("Review approved")))
}
