//! Persistence interface.
//!
//! The trait deliberately exposes atomic read-modify-write primitives
//! (add-or-increment a cart line, compare-and-decrement stock,
//! check-and-increment coupon usage) instead of separate read and write
//! calls, so concurrent requests on the same cart, item, or coupon cannot
//! lose updates.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::aggregates::{Address, Coupon, Item, Order, OrderItem, Payment, Refund, UserProfile};
use crate::Result;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait CheckoutStore: Send + Sync {
    // -- catalog -------------------------------------------------------------
    async fn item_by_id(&self, id: Uuid) -> Result<Option<Item>>;
    async fn item_by_slug(&self, slug: &str) -> Result<Option<Item>>;
    async fn list_items(&self) -> Result<Vec<Item>>;
    async fn save_item(&self, item: &Item) -> Result<()>;

    /// Conditional decrement in a single step. Returns the remaining stock,
    /// or `InsufficientStock` (reporting what is available) without changing
    /// anything.
    async fn try_reduce_stock(&self, item_id: Uuid, quantity: i32) -> Result<i32>;

    /// Unconditional increment (restocking, or compensation when a
    /// multi-line checkout fails partway).
    async fn restock(&self, item_id: Uuid, quantity: i32) -> Result<()>;

    // -- orders --------------------------------------------------------------
    /// The user's single unordered order, created on first use.
    async fn cart_for_user(&self, user_id: Uuid) -> Result<Order>;
    async fn order_by_ref(&self, user_id: Uuid, ref_code: &str) -> Result<Option<Order>>;
    async fn save_order(&self, order: &Order) -> Result<()>;

    /// Upsert a cart line in a single step: insert it, or increment the
    /// existing unordered line for the same item by `quantity`.
    async fn add_or_increment_line(&self, order_id: Uuid, line: &OrderItem, quantity: i32) -> Result<()>;

    // -- coupons -------------------------------------------------------------
    async fn coupon_by_code(&self, code: &str) -> Result<Option<Coupon>>;
    async fn save_coupon(&self, coupon: &Coupon) -> Result<()>;

    /// Transactional check-and-increment of the usage counter. Returns false
    /// (and leaves the counter alone) when the coupon is exhausted.
    async fn try_redeem_coupon(&self, coupon_id: Uuid) -> Result<bool>;

    // -- users, addresses, payments, refunds ---------------------------------
    async fn get_or_create_profile(&self, user_id: Uuid) -> Result<UserProfile>;
    async fn addresses_for_user(&self, user_id: Uuid) -> Result<Vec<Address>>;
    async fn save_address(&self, address: &Address) -> Result<()>;
    async fn save_payment(&self, payment: &Payment) -> Result<()>;
    async fn save_refund(&self, refund: &Refund) -> Result<()>;
}
