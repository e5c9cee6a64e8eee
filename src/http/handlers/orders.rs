//! Checkout, order history and the admin order desk.

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use crate::domain::aggregates::{Order, OrderWithItems};
use crate::domain::value_objects::{OrderStatus, PaymentStatus, UnknownVariant};
use crate::error::{AppError, Result};
use crate::http::extract::{AdminUser, AppJson, AppPath, AppQuery, AuthUser, MaybeUser};
use crate::services::orders::{CreateOrderRequest, ShippingLabel};
use crate::state::AppState;
use crate::store::OrderFilter;
use crate::validation::Pagination;

fn parse_status(value: Option<&str>) -> Result<Option<OrderStatus>> {
    value.filter(|v| !v.is_empty())
        .map(|v| v.parse().map_err(|e: UnknownVariant| AppError::Validation(e.to_string())))
        .transpose()
}

/// Guests may check out; signed-in callers get the order attached to their account.
pub async fn create_order(State(s): State<AppState>, user: MaybeUser, AppJson(r): AppJson<CreateOrderRequest>) -> Result<(StatusCode, Json<OrderWithItems>)> {
    let placed = s.orders.create(user.user_id(), r).await?;
    Ok((StatusCode::CREATED, Json(placed)))
}

#[derive(Debug, Default, Deserialize)]
pub struct MyOrdersParams {
    pub status: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

pub async fn list_my_orders(State(s): State<AppState>, user: AuthUser, AppQuery(p): AppQuery<MyOrdersParams>) -> Result<Json<Vec<Order>>> {
    let filter = OrderFilter {
        status: parse_status(p.status.as_deref())?,
        page: Some(Pagination::new(p.page, p.limit)),
        ..OrderFilter::for_user(user.id())
    };
    Ok(Json(s.orders.list(&filter).await?))
}

pub async fn get_order(State(s): State<AppState>, user: AuthUser, AppPath(id): AppPath<i64>) -> Result<Json<OrderWithItems>> {
    Ok(Json(s.orders.get(id, user.caller()).await?))
}

pub async fn cancel_order(State(s): State<AppState>, user: AuthUser, AppPath(id): AppPath<i64>) -> Result<Json<Order>> {
    Ok(Json(s.orders.cancel(id, user.caller()).await?))
}

pub async fn order_tracking(State(s): State<AppState>, user: AuthUser, AppPath(id): AppPath<i64>) -> Result<Json<Value>> {
    Ok(Json(s.orders.tracking(id, user.caller()).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct AdminOrdersParams {
    pub status: Option<String>,
    pub payment_status: Option<String>,
    pub search: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

pub async fn admin_list_orders(State(s): State<AppState>, _admin: AdminUser, AppQuery(p): AppQuery<AdminOrdersParams>) -> Result<Json<Vec<Order>>> {
    let payment_status = p.payment_status.as_deref().filter(|v| !v.is_empty())
        .map(|v| v.parse::<PaymentStatus>().map_err(|e| AppError::Validation(e.to_string())))
        .transpose()?;
    let filter = OrderFilter {
        user_id: None,
        status: parse_status(p.status.as_deref())?,
        payment_status,
        search: p.search.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()),
        from: p.from,
        to: p.to,
        page: Some(Pagination::new(p.page, p.limit)),
    };
    Ok(Json(s.orders.list(&filter).await?))
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: String,
}

pub async fn admin_update_status(State(s): State<AppState>, admin: AdminUser, AppPath(id): AppPath<i64>, AppJson(r): AppJson<StatusUpdate>) -> Result<Json<Order>> {
    Ok(Json(s.orders.update_status(id, &r.status, admin.caller()).await?))
}

#[derive(Debug, Deserialize)]
pub struct ShipRequest {
    pub courier_id: i64,
}

pub async fn admin_ship_order(State(s): State<AppState>, _admin: AdminUser, AppPath(id): AppPath<i64>, AppJson(r): AppJson<ShipRequest>) -> Result<Json<ShippingLabel>> {
    Ok(Json(s.orders.generate_label(id, r.courier_id).await?))
}
