//! Notification preferences and the in-app inbox.

use axum::{extract::State, Json};
use serde::Deserialize;
use sqlx::PgPool;
use crate::domain::aggregates::{Notification, NotificationPreference};
use crate::error::{AppError, Result};
use crate::http::extract::{AppJson, AppPath, AppQuery, AuthUser};
use crate::state::AppState;
use crate::validation::Pagination;

const PREFERENCE_COLUMNS: &str = "user_id, order_created, order_shipped, order_delivered, order_status, low_stock, \
    product_updates, newsletter, marketing, email_enabled, sms_enabled, push_enabled, updated_at";
const NOTIFICATION_COLUMNS: &str = "id, user_id, kind, channel, title, message, data, status, read_at, created_at";

/// Creates the row with column defaults on first access.
async fn ensure_preferences(db: &PgPool, user_id: i64) -> Result<()> {
    sqlx::query("INSERT INTO notification_preferences (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
        .bind(user_id).execute(db).await?;
    Ok(())
}

pub async fn get_preferences(State(s): State<AppState>, user: AuthUser) -> Result<Json<NotificationPreference>> {
    ensure_preferences(&s.db, user.id()).await?;
    let prefs = sqlx::query_as::<_, NotificationPreference>(&format!(
        "SELECT {PREFERENCE_COLUMNS} FROM notification_preferences WHERE user_id = $1"
    )).bind(user.id()).fetch_one(&s.db).await?;
    Ok(Json(prefs))
}

#[derive(Debug, Default, Deserialize)]
pub struct PreferenceUpdate {
    pub order_created: Option<bool>,
    pub order_shipped: Option<bool>,
    pub order_delivered: Option<bool>,
    pub order_status: Option<bool>,
    pub low_stock: Option<bool>,
    pub product_updates: Option<bool>,
    pub newsletter: Option<bool>,
    pub marketing: Option<bool>,
    pub email_enabled: Option<bool>,
    pub sms_enabled: Option<bool>,
    pub push_enabled: Option<bool>,
}

pub async fn update_preferences(State(s): State<AppState>, user: AuthUser, AppJson(r): AppJson<PreferenceUpdate>) -> Result<Json<NotificationPreference>> {
    ensure_preferences(&s.db, user.id()).await?;
    let prefs = sqlx::query_as::<_, NotificationPreference>(&format!(
        "UPDATE notification_preferences SET order_created = COALESCE($2, order_created), order_shipped = COALESCE($3, order_shipped), \
         order_delivered = COALESCE($4, order_delivered), order_status = COALESCE($5, order_status), low_stock = COALESCE($6, low_stock), \
         product_updates = COALESCE($7, product_updates), newsletter = COALESCE($8, newsletter), marketing = COALESCE($9, marketing), \
         email_enabled = COALESCE($10, email_enabled), sms_enabled = COALESCE($11, sms_enabled), push_enabled = COALESCE($12, push_enabled), \
         updated_at = NOW() WHERE user_id = $1 RETURNING {PREFERENCE_COLUMNS}"
    ))
        .bind(user.id()).bind(r.order_created).bind(r.order_shipped).bind(r.order_delivered).bind(r.order_status)
        .bind(r.low_stock).bind(r.product_updates).bind(r.newsletter).bind(r.marketing)
        .bind(r.email_enabled).bind(r.sms_enabled).bind(r.push_enabled)
        .fetch_one(&s.db).await?;
    Ok(Json(prefs))
}

#[derive(Debug, Default, Deserialize)]
pub struct InboxParams {
    #[serde(default)]
    pub unread: bool,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

pub async fn inbox(State(s): State<AppState>, user: AuthUser, AppQuery(p): AppQuery<InboxParams>) -> Result<Json<Vec<Notification>>> {
    let page = Pagination::new(p.page, p.limit);
    let items = sqlx::query_as::<_, Notification>(&format!(
        "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE user_id = $1 AND (NOT $2 OR read_at IS NULL) \
         ORDER BY created_at DESC LIMIT $3 OFFSET $4"
    ))
        .bind(user.id()).bind(p.unread).bind(page.limit).bind(page.offset())
        .fetch_all(&s.db).await?;
    Ok(Json(items))
}

pub async fn mark_read(State(s): State<AppState>, user: AuthUser, AppPath(id): AppPath<i64>) -> Result<Json<Notification>> {
    sqlx::query_as::<_, Notification>(&format!(
        "UPDATE notifications SET read_at = COALESCE(read_at, NOW()), status = 'read' WHERE id = $1 AND user_id = $2 RETURNING {NOTIFICATION_COLUMNS}"
    ))
        .bind(id).bind(user.id())
        .fetch_optional(&s.db).await?.map(Json).ok_or_else(|| AppError::not_found("Notification"))
}
