//! Cartwright E-commerce Checkout Service
//!
//! Self-hosted checkout backend: product catalog, per-user shopping cart,
//! coupon discounts, stock tracking, and order finalization against an
//! external payment gateway.
//!
//! ## Features
//! - Catalog items with validated stock operations
//! - Cart as an unfinalized order with line-item merging
//! - Fixed and percentage coupon discounts with eligibility rules
//! - Decimal order totals (subtotal, discount, payable total)
//! - Atomic persistence primitives for stock and coupon redemption

use rust_decimal::Decimal;
use thiserror::Error;

pub mod domain;
pub mod service;
pub mod store;

pub use domain::aggregates::{Coupon, Discount, Item, Order, OrderItem, StockStatus};
pub use domain::value_objects::{Pricing, RefCode, Slug};

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum CheckoutError {
    #[error("quantity must be positive")]
    InvalidQuantity,

    #[error("insufficient stock, only {available} in stock")]
    InsufficientStock { available: i32 },

    #[error("coupon not found")]
    CouponNotFound,

    #[error("coupon has expired")]
    CouponExpired,

    #[error("coupon usage limit reached")]
    CouponExhausted,

    #[error("order total is below the coupon minimum of {minimum}")]
    MinimumNotMet { minimum: Decimal },

    #[error("discount value must not be negative")]
    InvalidDiscount,

    #[error("invalid pricing: {0}")]
    InvalidPricing(#[from] domain::value_objects::PricingError),

    #[error("item not found")]
    ItemNotFound,

    #[error("order not found")]
    OrderNotFound,

    #[error("cart is empty")]
    EmptyOrder,

    #[error("order already finalized")]
    AlreadyFinalized,

    #[error("order is not finalized")]
    NotFinalized,

    #[error("payment failed: {0}")]
    PaymentFailed(String),

    #[error("storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, CheckoutError>;
