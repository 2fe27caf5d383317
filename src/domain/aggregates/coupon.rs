//! Coupon Aggregate
//!
//! A discount policy with eligibility rules. Eligibility is advisory: the
//! checkout flow composes `is_active` + `can_be_used` + `is_valid_for_amount`
//! before applying, and the store performs the transactional
//! check-and-increment at redemption time.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{CheckoutError, Result};

/// The discount a coupon carries. Values are validated at construction, so a
/// negative discount cannot exist.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Discount {
    FixedAmount(Decimal),
    Percentage(Decimal),
}

impl Discount {
    pub fn fixed(value: Decimal) -> Result<Self> {
        if value < Decimal::ZERO { return Err(CheckoutError::InvalidDiscount); }
        Ok(Self::FixedAmount(value))
    }

    /// Percentages above 100 are accepted; the discount cap keeps the result
    /// within the order total.
    pub fn percentage(value: Decimal) -> Result<Self> {
        if value < Decimal::ZERO { return Err(CheckoutError::InvalidDiscount); }
        Ok(Self::Percentage(value))
    }

    pub fn from_parts(kind: &str, value: Decimal) -> Result<Self> {
        match kind {
            "fixed" => Self::fixed(value),
            "percentage" => Self::percentage(value),
            _ => Err(CheckoutError::InvalidDiscount),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::FixedAmount(_) => "fixed",
            Self::Percentage(_) => "percentage",
        }
    }

    pub fn value(&self) -> Decimal {
        match self {
            Self::FixedAmount(v) | Self::Percentage(v) => *v,
        }
    }

    /// Discount amount for a given order total, capped at that total.
    pub fn amount_off(&self, order_total: Decimal) -> Decimal {
        let raw = match self {
            Self::Percentage(v) => order_total * *v / Decimal::ONE_HUNDRED,
            Self::FixedAmount(v) => *v,
        };
        raw.min(order_total)
    }
}

#[derive(Clone, Debug)]
pub struct Coupon {
    pub(crate) id: Uuid,
    pub(crate) code: String,
    pub(crate) discount: Discount,
    pub(crate) minimum_order_amount: Decimal,
    pub(crate) expiry_date: Option<DateTime<Utc>>,
    pub(crate) max_uses: Option<i32>,
    pub(crate) current_uses: i32,
}

impl Coupon {
    pub fn new(code: impl Into<String>, discount: Discount) -> Self {
        Self {
            id: Uuid::new_v4(), code: code.into(), discount,
            minimum_order_amount: Decimal::ZERO, expiry_date: None,
            max_uses: None, current_uses: 0,
        }
    }

    pub fn with_minimum(mut self, minimum_order_amount: Decimal) -> Self {
        self.minimum_order_amount = minimum_order_amount;
        self
    }

    pub fn with_expiry(mut self, expiry_date: DateTime<Utc>) -> Self {
        self.expiry_date = Some(expiry_date);
        self
    }

    pub fn with_max_uses(mut self, max_uses: i32) -> Self {
        self.max_uses = Some(max_uses);
        self
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn code(&self) -> &str { &self.code }
    pub fn discount(&self) -> &Discount { &self.discount }
    pub fn minimum_order_amount(&self) -> Decimal { self.minimum_order_amount }
    pub fn expiry_date(&self) -> Option<DateTime<Utc>> { self.expiry_date }
    pub fn max_uses(&self) -> Option<i32> { self.max_uses }
    pub fn current_uses(&self) -> i32 { self.current_uses }

    /// Discount for an order total, in decimal arithmetic, capped at the
    /// total so it can never discount more than it applies to.
    pub fn calculate_discount(&self, order_total: Decimal) -> Decimal {
        self.discount.amount_off(order_total)
    }

    pub fn is_valid_for_amount(&self, amount: Decimal) -> bool {
        amount >= self.minimum_order_amount
    }

    pub fn is_active(&self) -> bool {
        match self.expiry_date {
            None => true,
            Some(expiry) => Utc::now() <= expiry,
        }
    }

    pub fn can_be_used(&self) -> bool {
        match self.max_uses {
            None => true,
            Some(max) => self.current_uses < max,
        }
    }

    /// Bump the usage counter. Callers validate `can_be_used` first.
    pub fn increment_usage(&mut self) {
        self.current_uses += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_fixed_discount_calculation() {
        let coupon = Coupon::new("SAVE10", Discount::fixed(Decimal::new(10, 0)).unwrap());
        let discount = coupon.calculate_discount(Decimal::new(10000, 2));
        assert_eq!(discount, Decimal::new(10, 0));
    }

    #[test]
    fn test_percentage_discount_calculation() {
        let coupon = Coupon::new("SAVE20", Discount::percentage(Decimal::new(20, 0)).unwrap());
        let discount = coupon.calculate_discount(Decimal::new(10000, 2));
        assert_eq!(discount, Decimal::new(2000, 2));
    }

    #[test]
    fn test_discount_capped_at_order_total() {
        let coupon = Coupon::new("BIG", Discount::fixed(Decimal::new(10, 0)).unwrap());
        let discount = coupon.calculate_discount(Decimal::new(500, 2));
        assert_eq!(discount, Decimal::new(500, 2));

        let over = Coupon::new("OVER", Discount::percentage(Decimal::new(150, 0)).unwrap());
        assert_eq!(over.calculate_discount(Decimal::new(40, 0)), Decimal::new(40, 0));
    }

    #[test]
    fn test_negative_discount_rejected() {
        assert!(Discount::fixed(Decimal::new(-5, 0)).is_err());
        assert!(Discount::percentage(Decimal::new(-10, 0)).is_err());
        assert!(Discount::from_parts("mystery", Decimal::ONE).is_err());
    }

    #[test]
    fn test_minimum_order_requirement() {
        let coupon = Coupon::new("MIN50", Discount::fixed(Decimal::TEN).unwrap())
            .with_minimum(Decimal::new(50, 0));
        assert!(coupon.is_valid_for_amount(Decimal::new(50, 0)));
        assert!(coupon.is_valid_for_amount(Decimal::new(80, 0)));
        assert!(!coupon.is_valid_for_amount(Decimal::new(49, 0)));
    }

    #[test]
    fn test_expiry() {
        let fresh = Coupon::new("FRESH", Discount::fixed(Decimal::ONE).unwrap());
        assert!(fresh.is_active());

        let live = fresh.clone().with_expiry(Utc::now() + Duration::days(1));
        assert!(live.is_active());

        let stale = fresh.with_expiry(Utc::now() - Duration::days(1));
        assert!(!stale.is_active());
    }

    #[test]
    fn test_usage_tracking_and_limits() {
        let mut coupon = Coupon::new("3USES", Discount::fixed(Decimal::ONE).unwrap()).with_max_uses(3);
        for _ in 0..3 {
            assert!(coupon.can_be_used());
            coupon.increment_usage();
        }
        assert_eq!(coupon.current_uses(), 3);
        assert!(!coupon.can_be_used());
    }

    #[test]
    fn test_unlimited_without_cap() {
        let mut coupon = Coupon::new("FOREVER", Discount::fixed(Decimal::ONE).unwrap());
        for _ in 0..100 { coupon.increment_usage(); }
        assert!(coupon.can_be_used());
    }
}
