//! Shipping quotes and shipment tracking.

use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use crate::error::{AppError, Result};
use crate::services::shipping::{default_rates, weight_to_grams};
use crate::http::extract::{AppPath, AppQuery};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct RateParams {
    pub pickup_pin: Option<String>,
    pub delivery_pin: Option<String>,
    /// Kilograms.
    pub weight: Option<f64>,
    pub cod: Option<u8>,
}

pub async fn calculate_rates(State(s): State<AppState>, AppQuery(p): AppQuery<RateParams>) -> Result<Json<Value>> {
    let Some(carrier) = s.shipping.as_option() else {
        return Ok(Json(json!({ "rates": default_rates() })));
    };
    let pin = |v: &Option<String>| v.as_deref().map(str::trim).filter(|v| !v.is_empty()).map(str::to_string);
    let (Some(pickup), Some(delivery)) = (pin(&p.pickup_pin), pin(&p.delivery_pin)) else {
        return Err(AppError::Validation("Pickup and delivery PIN codes required".into()));
    };
    let rates = carrier
        .serviceability(&pickup, &delivery, weight_to_grams(p.weight), p.cod.unwrap_or(0) != 0)
        .await?;
    Ok(Json(json!({ "rates": rates })))
}

pub async fn track_shipment(State(s): State<AppState>, AppPath(awb): AppPath<String>) -> Result<Json<Value>> {
    if awb.trim().is_empty() {
        return Err(AppError::Validation("AWB number required".into()));
    }
    Ok(Json(s.shipping.get()?.track(awb.trim()).await?))
}
