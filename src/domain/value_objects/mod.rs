//! Value Objects for the checkout domain

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// URL-safe catalog slug value object
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Slug(String);

impl Slug {
    pub fn new(value: impl Into<String>) -> Result<Self, SlugError> {
        let value = value.into().trim().to_lowercase();
        if value.is_empty() { return Err(SlugError::Empty); }
        if value.len() > 100 { return Err(SlugError::TooLong); }
        if !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(SlugError::InvalidChar);
        }
        Ok(Self(value))
    }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for Slug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

#[derive(Debug, Clone)] pub enum SlugError { Empty, TooLong, InvalidChar }
impl std::error::Error for SlugError {}
impl fmt::Display for SlugError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "slug empty"),
            Self::TooLong => write!(f, "slug too long"),
            Self::InvalidChar => write!(f, "slug may only contain lowercase alphanumerics and dashes"),
        }
    }
}

/// Unit pricing value object: a list price plus an optional discounted price.
///
/// Invariants: the list price is never negative, and a discount price, when
/// present, is strictly below the list price.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pricing { price: Decimal, discount_price: Option<Decimal> }

impl Pricing {
    pub fn new(price: Decimal, discount_price: Option<Decimal>) -> Result<Self, PricingError> {
        if price < Decimal::ZERO { return Err(PricingError::NegativePrice); }
        if let Some(dp) = discount_price {
            if dp < Decimal::ZERO { return Err(PricingError::NegativePrice); }
            if dp >= price { return Err(PricingError::DiscountNotBelowPrice); }
        }
        Ok(Self { price, discount_price })
    }
    pub fn price(&self) -> Decimal { self.price }
    pub fn discount_price(&self) -> Option<Decimal> { self.discount_price }
    /// The price a unit actually sells for.
    pub fn effective(&self) -> Decimal { self.discount_price.unwrap_or(self.price) }
    pub fn unit_saving(&self) -> Decimal {
        self.discount_price.map_or(Decimal::ZERO, |dp| self.price - dp)
    }
}

#[derive(Debug, Clone)] pub enum PricingError { NegativePrice, DiscountNotBelowPrice }
impl std::error::Error for PricingError {}
impl fmt::Display for PricingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NegativePrice => write!(f, "price must not be negative"),
            Self::DiscountNotBelowPrice => write!(f, "discount price must be below the list price"),
        }
    }
}

/// Human-readable order reference code
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefCode(String);

impl RefCode {
    pub fn generate() -> Self { Self(format!("ORD-{:08}", rand::random::<u32>())) }
    pub fn from_stored(value: impl Into<String>) -> Self { Self(value.into()) }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for RefCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug() {
        let slug = Slug::new("Awesome-Shirt").unwrap();
        assert_eq!(slug.as_str(), "awesome-shirt");
        assert!(Slug::new("no spaces allowed").is_err());
        assert!(Slug::new("").is_err());
    }

    #[test]
    fn test_pricing_effective() {
        let full = Pricing::new(Decimal::new(5000, 2), None).unwrap();
        assert_eq!(full.effective(), Decimal::new(5000, 2));
        let cut = Pricing::new(Decimal::new(5000, 2), Some(Decimal::new(3999, 2))).unwrap();
        assert_eq!(cut.effective(), Decimal::new(3999, 2));
        assert_eq!(cut.unit_saving(), Decimal::new(1001, 2));
    }

    #[test]
    fn test_pricing_rejects_bad_values() {
        assert!(Pricing::new(Decimal::new(-1, 0), None).is_err());
        // discount must be strictly below the list price
        assert!(Pricing::new(Decimal::new(10, 0), Some(Decimal::new(10, 0))).is_err());
        assert!(Pricing::new(Decimal::new(10, 0), Some(Decimal::new(-5, 0))).is_err());
    }

    #[test]
    fn test_ref_code_shape() {
        let code = RefCode::generate();
        assert!(code.as_str().starts_with("ORD-"));
    }
}
