//! Coupon Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use crate::domain::value_objects::DiscountType;

#[derive(Clone, Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct Coupon {
    pub id: i64,
    pub code: String,
    pub description: String,
    #[sqlx(try_from = "String")]
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub min_order_amount: Decimal,
    pub max_discount_amount: Decimal,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub usage_limit: i32,
    pub used_count: i32,
    pub is_active: bool,
    pub applicable_countries: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CouponRejection {
    #[error("Coupon is inactive")]
    Inactive,
    #[error("Coupon is not yet valid")]
    NotYetValid,
    #[error("Coupon has expired")]
    Expired,
    #[error("Coupon usage limit reached")]
    Exhausted,
    #[error("Order amount is below the coupon minimum")]
    BelowMinimum,
}

impl Coupon {
    pub fn check_at(&self, now: DateTime<Utc>) -> Result<(), CouponRejection> {
        if !self.is_active { return Err(CouponRejection::Inactive); }
        if self.valid_from > now { return Err(CouponRejection::NotYetValid); }
        if self.valid_until < now { return Err(CouponRejection::Expired); }
        if self.usage_limit > 0 && self.used_count >= self.usage_limit { return Err(CouponRejection::Exhausted); }
        Ok(())
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool { self.check_at(now).is_ok() }

    /// Discount for `amount`; percentage discounts are capped by a positive max.
    pub fn discount_for(&self, amount: Decimal) -> Decimal {
        let discount = match self.discount_type {
            DiscountType::Fixed => self.discount_value,
            DiscountType::Percentage => {
                let raw = amount * self.discount_value / Decimal::ONE_HUNDRED;
                if self.max_discount_amount > Decimal::ZERO { raw.min(self.max_discount_amount) } else { raw }
            }
        };
        discount.min(amount).max(Decimal::ZERO).round_dp(2)
    }

    /// Full checkout check: validity, minimum order amount, then the discount.
    pub fn redeem_for(&self, amount: Decimal, now: DateTime<Utc>) -> Result<Decimal, CouponRejection> {
        self.check_at(now)?;
        if amount < self.min_order_amount { return Err(CouponRejection::BelowMinimum); }
        Ok(self.discount_for(amount))
    }
}

#[cfg(test)]
pub(crate) fn sample_coupon(code: &str, discount_type: DiscountType, value: Decimal) -> Coupon {
    let now = Utc::now();
    Coupon {
        id: 1, code: code.into(), description: String::new(), discount_type, discount_value: value,
        min_order_amount: Decimal::ZERO, max_discount_amount: Decimal::ZERO,
        valid_from: now - chrono::Duration::days(1), valid_until: now + chrono::Duration::days(30),
        usage_limit: 0, used_count: 0, is_active: true, applicable_countries: vec![], created_at: now, updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_percentage_discount_is_capped() {
        let mut c = sample_coupon("SAVE10", DiscountType::Percentage, Decimal::new(10, 0));
        c.max_discount_amount = Decimal::new(50, 0);
        assert_eq!(c.discount_for(Decimal::new(1000, 0)), Decimal::new(50, 0));
        assert_eq!(c.discount_for(Decimal::new(300, 0)), Decimal::new(30, 0));
    }

    #[test]
    fn test_uncapped_percentage_and_fixed() {
        let c = sample_coupon("SAVE10", DiscountType::Percentage, Decimal::new(10, 0));
        assert_eq!(c.discount_for(Decimal::new(1000, 0)), Decimal::new(100, 0));
        let f = sample_coupon("FLAT200", DiscountType::Fixed, Decimal::new(200, 0));
        assert_eq!(f.discount_for(Decimal::new(1000, 0)), Decimal::new(200, 0));
        assert_eq!(f.discount_for(Decimal::new(150, 0)), Decimal::new(150, 0));
    }

    #[test]
    fn test_validity_window() {
        let c = sample_coupon("WINDOW", DiscountType::Fixed, Decimal::new(10, 0));
        let now = Utc::now();
        assert!(c.is_valid_at(now));
        assert_eq!(c.check_at(now - Duration::days(2)), Err(CouponRejection::NotYetValid));
        assert_eq!(c.check_at(now + Duration::days(31)), Err(CouponRejection::Expired));
    }

    #[test]
    fn test_usage_limit_and_inactive() {
        let mut c = sample_coupon("LIMITED", DiscountType::Fixed, Decimal::new(10, 0));
        c.usage_limit = 2;
        c.used_count = 1;
        assert!(c.is_valid_at(Utc::now()));
        c.used_count = 2;
        assert_eq!(c.check_at(Utc::now()), Err(CouponRejection::Exhausted));
        c.usage_limit = 0;
        c.is_active = false;
        assert_eq!(c.check_at(Utc::now()), Err(CouponRejection::Inactive));
    }

    #[test]
    fn test_minimum_order_amount() {
        let mut c = sample_coupon("MIN500", DiscountType::Fixed, Decimal::new(50, 0));
        c.min_order_amount = Decimal::new(500, 0);
        assert_eq!(c.redeem_for(Decimal::new(499, 0), Utc::now()), Err(CouponRejection::BelowMinimum));
        assert_eq!(c.redeem_for(Decimal::new(500, 0), Utc::now()), Ok(Decimal::new(50, 0)));
    }
}
