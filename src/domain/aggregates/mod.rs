//! Aggregates module
pub mod coupon;
pub mod item;
pub mod order;

pub use coupon::{Coupon, Discount};
pub use item::{Category, Item, ItemVariation, Label, StockStatus, Variation};
pub use order::{Address, AddressKind, Order, OrderItem, Payment, Refund, UserProfile};
