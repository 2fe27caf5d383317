//! In-memory store.
//!
//! Honors the same contract as the Postgres store, with the atomic
//! primitives executed under one lock. Used by the service tests and by
//! local demos that run without a database.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::aggregates::{Address, Coupon, Item, Order, OrderItem, Payment, Refund, UserProfile};
use crate::store::CheckoutStore;
use crate::{CheckoutError, Result};

#[derive(Default)]
struct Inner {
    items: HashMap<Uuid, Item>,
    orders: HashMap<Uuid, Order>,
    coupons: HashMap<Uuid, Coupon>,
    profiles: HashMap<Uuid, UserProfile>,
    addresses: HashMap<Uuid, Address>,
    payments: HashMap<Uuid, Payment>,
    refunds: HashMap<Uuid, Refund>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| CheckoutError::Storage("store lock poisoned".into()))
    }
}

#[async_trait]
impl CheckoutStore for MemoryStore {
    async fn item_by_id(&self, id: Uuid) -> Result<Option<Item>> {
        Ok(self.lock()?.items.get(&id).cloned())
    }

    async fn item_by_slug(&self, slug: &str) -> Result<Option<Item>> {
        Ok(self.lock()?.items.values().find(|i| i.slug().as_str() == slug).cloned())
    }

    async fn list_items(&self) -> Result<Vec<Item>> {
        Ok(self.lock()?.items.values().cloned().collect())
    }

    async fn save_item(&self, item: &Item) -> Result<()> {
        self.lock()?.items.insert(item.id(), item.clone());
        Ok(())
    }

    async fn try_reduce_stock(&self, item_id: Uuid, quantity: i32) -> Result<i32> {
        let mut inner = self.lock()?;
        let item = inner.items.get_mut(&item_id).ok_or(CheckoutError::ItemNotFound)?;
        item.reduce_stock(quantity)?;
        Ok(item.stock_quantity())
    }

    async fn restock(&self, item_id: Uuid, quantity: i32) -> Result<()> {
        let mut inner = self.lock()?;
        let item = inner.items.get_mut(&item_id).ok_or(CheckoutError::ItemNotFound)?;
        item.increase_stock(quantity);
        Ok(())
    }

    async fn cart_for_user(&self, user_id: Uuid) -> Result<Order> {
        let mut inner = self.lock()?;
        if let Some(order) = inner.orders.values().find(|o| o.user_id() == user_id && !o.is_ordered()) {
            return Ok(order.clone());
        }
        let fresh = Order::for_user(user_id);
        inner.orders.insert(fresh.id(), fresh.clone());
        Ok(fresh)
    }

    async fn order_by_ref(&self, user_id: Uuid, ref_code: &str) -> Result<Option<Order>> {
        Ok(self
            .lock()?
            .orders
            .values()
            .find(|o| o.user_id() == user_id && o.ref_code().as_str() == ref_code)
            .cloned())
    }

    async fn save_order(&self, order: &Order) -> Result<()> {
        self.lock()?.orders.insert(order.id(), order.clone());
        Ok(())
    }

    async fn add_or_increment_line(&self, order_id: Uuid, line: &OrderItem, quantity: i32) -> Result<()> {
        let mut inner = self.lock()?;
        let order = inner.orders.get_mut(&order_id).ok_or(CheckoutError::OrderNotFound)?;
        if let Some(existing) = order.items.iter_mut().find(|l| l.item_id == line.item_id && !l.ordered) {
            existing.quantity += quantity;
        } else {
            let mut fresh = line.clone();
            fresh.quantity = quantity;
            order.items.push(fresh);
        }
        Ok(())
    }

    async fn coupon_by_code(&self, code: &str) -> Result<Option<Coupon>> {
        Ok(self.lock()?.coupons.values().find(|c| c.code() == code).cloned())
    }

    async fn save_coupon(&self, coupon: &Coupon) -> Result<()> {
        self.lock()?.coupons.insert(coupon.id(), coupon.clone());
        Ok(())
    }

    async fn try_redeem_coupon(&self, coupon_id: Uuid) -> Result<bool> {
        let mut inner = self.lock()?;
        let coupon = inner.coupons.get_mut(&coupon_id).ok_or(CheckoutError::CouponNotFound)?;
        if !coupon.can_be_used() {
            return Ok(false);
        }
        coupon.increment_usage();
        Ok(true)
    }

    async fn get_or_create_profile(&self, user_id: Uuid) -> Result<UserProfile> {
        let mut inner = self.lock()?;
        let profile = inner.profiles.entry(user_id).or_insert_with(|| UserProfile {
            user_id,
            gateway_customer_id: None,
            one_click_purchasing: false,
        });
        Ok(profile.clone())
    }

    async fn addresses_for_user(&self, user_id: Uuid) -> Result<Vec<Address>> {
        Ok(self.lock()?.addresses.values().filter(|a| a.user_id == user_id).cloned().collect())
    }

    async fn save_address(&self, address: &Address) -> Result<()> {
        self.lock()?.addresses.insert(address.id, address.clone());
        Ok(())
    }

    async fn save_payment(&self, payment: &Payment) -> Result<()> {
        self.lock()?.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn save_refund(&self, refund: &Refund) -> Result<()> {
        self.lock()?.refunds.insert(refund.id, refund.clone());
        Ok(())
    }
}
