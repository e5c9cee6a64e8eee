//! Coupon lookup for shoppers and coupon management for admins.

use axum::{extract::State, http::StatusCode, response::{IntoResponse, Response}, Json};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use validator::Validate;
use super::{is_unique_violation, message};
use crate::domain::aggregates::{Coupon, CouponRejection};
use crate::domain::value_objects::DiscountType;
use crate::error::{AppError, Result};
use crate::http::extract::{AdminUser, AppJson, AppPath, AppQuery};
use crate::services::orders::normalize_coupon_code;
use crate::state::AppState;

const COUPON_COLUMNS: &str = "id, code, description, discount_type, discount_value, min_order_amount, max_discount_amount, \
    valid_from, valid_until, usage_limit, used_count, is_active, applicable_countries, created_at, updated_at";

#[derive(Debug, Default, Deserialize)]
pub struct ValidateParams {
    pub code: Option<String>,
    pub amount: Option<Decimal>,
}

/// Read-only check; redeeming happens when the order is placed.
pub async fn validate(State(s): State<AppState>, AppQuery(p): AppQuery<ValidateParams>) -> Result<Response> {
    let code = p.code.as_deref().map(normalize_coupon_code).filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::Validation("Coupon code required".into()))?;
    let Some(coupon) = s.store.coupon_by_code(&code).await? else {
        return Ok((StatusCode::NOT_FOUND, Json(json!({ "valid": false, "error": "Invalid coupon code" }))).into_response());
    };
    Ok(Json(coupon_check(&coupon, p.amount, Utc::now())).into_response())
}

fn coupon_check(coupon: &Coupon, amount: Option<Decimal>, now: DateTime<Utc>) -> Value {
    if let Err(rejection) = coupon.check_at(now) {
        return json!({ "valid": false, "error": rejection.to_string() });
    }
    let amount = amount.filter(|a| *a > Decimal::ZERO);
    if let Some(amount) = amount {
        if amount < coupon.min_order_amount {
            return json!({
                "valid": false,
                "error": CouponRejection::BelowMinimum.to_string(),
                "min_order_amount": coupon.min_order_amount,
            });
        }
    }
    let discount = match (amount, coupon.discount_type) {
        (Some(amount), _) => coupon.discount_for(amount),
        (None, DiscountType::Fixed) => coupon.discount_value,
        (None, DiscountType::Percentage) => Decimal::ZERO,
    };
    json!({
        "valid": true,
        "code": coupon.code,
        "discount_type": coupon.discount_type,
        "discount_value": coupon.discount_value,
        "discount_amount": discount,
    })
}

pub async fn list(State(s): State<AppState>, _admin: AdminUser) -> Result<Json<Vec<Coupon>>> {
    let coupons = sqlx::query_as::<_, Coupon>(&format!("SELECT {COUPON_COLUMNS} FROM coupons ORDER BY created_at DESC"))
        .fetch_all(&s.db).await?;
    Ok(Json(coupons))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateCouponRequest {
    #[validate(custom = "crate::validation::coupon_code")]
    pub code: String,
    #[serde(default)]
    pub description: String,
    pub discount_type: DiscountType,
    #[validate(custom = "crate::validation::price")]
    pub discount_value: Decimal,
    #[serde(default)]
    #[validate(custom = "crate::validation::non_negative")]
    pub min_order_amount: Decimal,
    #[serde(default)]
    #[validate(custom = "crate::validation::non_negative")]
    pub max_discount_amount: Decimal,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: DateTime<Utc>,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub usage_limit: i32,
    pub is_active: Option<bool>,
    #[serde(default)]
    pub applicable_countries: Vec<String>,
}

pub async fn create(State(s): State<AppState>, _admin: AdminUser, AppJson(r): AppJson<CreateCouponRequest>) -> Result<(StatusCode, Json<Coupon>)> {
    r.validate()?;
    let valid_from = r.valid_from.unwrap_or_else(Utc::now);
    if r.valid_until <= valid_from {
        return Err(AppError::Validation("valid_until must be after valid_from".into()));
    }
    let coupon = sqlx::query_as::<_, Coupon>(&format!(
        "INSERT INTO coupons (code, description, discount_type, discount_value, min_order_amount, max_discount_amount, \
         valid_from, valid_until, usage_limit, is_active, applicable_countries) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) RETURNING {COUPON_COLUMNS}"
    ))
        .bind(&r.code).bind(&r.description).bind(r.discount_type.as_str()).bind(r.discount_value).bind(r.min_order_amount)
        .bind(r.max_discount_amount).bind(valid_from).bind(r.valid_until).bind(r.usage_limit).bind(r.is_active.unwrap_or(true))
        .bind(&r.applicable_countries)
        .fetch_one(&s.db).await
        .map_err(|e| if is_unique_violation(&e) { AppError::Conflict("Coupon code already exists".into()) } else { e.into() })?;
    info!(coupon_id = coupon.id, code = %coupon.code, "coupon created");
    Ok((StatusCode::CREATED, Json(coupon)))
}

/// The code itself cannot change.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateCouponRequest {
    pub description: Option<String>,
    pub discount_type: Option<DiscountType>,
    #[validate(custom = "crate::validation::price")]
    pub discount_value: Option<Decimal>,
    #[validate(custom = "crate::validation::non_negative")]
    pub min_order_amount: Option<Decimal>,
    #[validate(custom = "crate::validation::non_negative")]
    pub max_discount_amount: Option<Decimal>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    #[validate(range(min = 0))]
    pub usage_limit: Option<i32>,
    pub is_active: Option<bool>,
    pub applicable_countries: Option<Vec<String>>,
}

pub async fn update(State(s): State<AppState>, _admin: AdminUser, AppPath(id): AppPath<i64>, AppJson(r): AppJson<UpdateCouponRequest>) -> Result<Json<Coupon>> {
    r.validate()?;
    sqlx::query_as::<_, Coupon>(&format!(
        "UPDATE coupons SET description = COALESCE($2, description), discount_type = COALESCE($3, discount_type), \
         discount_value = COALESCE($4, discount_value), min_order_amount = COALESCE($5, min_order_amount), \
         max_discount_amount = COALESCE($6, max_discount_amount), valid_from = COALESCE($7, valid_from), \
         valid_until = COALESCE($8, valid_until), usage_limit = COALESCE($9, usage_limit), is_active = COALESCE($10, is_active), \
         applicable_countries = COALESCE($11, applicable_countries), updated_at = NOW() WHERE id = $1 RETURNING {COUPON_COLUMNS}"
    ))
        .bind(id).bind(&r.description).bind(r.discount_type.map(|d| d.as_str())).bind(r.discount_value)
        .bind(r.min_order_amount).bind(r.max_discount_amount).bind(r.valid_from).bind(r.valid_until)
        .bind(r.usage_limit).bind(r.is_active).bind(&r.applicable_countries)
        .fetch_optional(&s.db).await?.map(Json).ok_or_else(|| AppError::not_found("Coupon"))
}

pub async fn delete(State(s): State<AppState>, _admin: AdminUser, AppPath(id): AppPath<i64>) -> Result<Json<Value>> {
    let done = sqlx::query("DELETE FROM coupons WHERE id = $1").bind(id).execute(&s.db).await?;
    if done.rows_affected() == 0 { return Err(AppError::not_found("Coupon")); }
    Ok(Json(message("Coupon deleted")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn coupon(discount_type: DiscountType, value: i64) -> Coupon {
        let now = Utc::now();
        Coupon {
            id: 1, code: "SAVE10".into(), description: String::new(), discount_type, discount_value: Decimal::from(value),
            min_order_amount: Decimal::from(500), max_discount_amount: Decimal::from(50),
            valid_from: now - Duration::days(1), valid_until: now + Duration::days(1),
            usage_limit: 10, used_count: 0, is_active: true, applicable_countries: vec![], created_at: now, updated_at: now,
        }
    }

    #[test]
    fn test_coupon_check() {
        let now = Utc::now();
        let pct = coupon(DiscountType::Percentage, 10);
        let body = coupon_check(&pct, Some(Decimal::from(1000)), now);
        assert_eq!(body["valid"], true);
        assert_eq!(body["discount_amount"], json!(Decimal::from(50)));

        let below = coupon_check(&pct, Some(Decimal::from(100)), now);
        assert_eq!(below["valid"], false);
        assert!(below.get("min_order_amount").is_some());

        let mut spent = coupon(DiscountType::Fixed, 75);
        spent.used_count = 10;
        assert_eq!(coupon_check(&spent, None, now)["valid"], false);

        let fixed = coupon(DiscountType::Fixed, 75);
        assert_eq!(coupon_check(&fixed, None, now)["discount_amount"], json!(Decimal::from(75)));
    }
}
