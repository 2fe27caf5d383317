//! Order Aggregate
//!
//! While `ordered` is false the order is the user's cart: a mutable set of
//! line items. Finalization flips the order and every line to ordered in one
//! step; after that only fulfillment and refund flags may change.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::aggregates::coupon::Coupon;
use crate::domain::aggregates::item::Item;
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::domain::value_objects::{Pricing, RefCode, Slug};
use crate::{CheckoutError, Result};

/// One (item, quantity) line within an order. Pricing is frozen at the time
/// the item enters the cart.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: Uuid,
    pub user_id: Uuid,
    pub item_id: Uuid,
    pub slug: Slug,
    pub title: String,
    pub pricing: Pricing,
    pub quantity: i32,
    pub variations: Vec<String>,
    pub ordered: bool,
}

impl OrderItem {
    pub fn total_price(&self) -> Decimal {
        Decimal::from(self.quantity) * self.pricing.price()
    }

    pub fn total_discount_price(&self) -> Option<Decimal> {
        self.pricing.discount_price().map(|dp| Decimal::from(self.quantity) * dp)
    }

    pub fn amount_saved(&self) -> Decimal {
        Decimal::from(self.quantity) * self.pricing.unit_saving()
    }

    /// What the line actually costs: quantity times the effective unit price.
    pub fn final_price(&self) -> Decimal {
        Decimal::from(self.quantity) * self.pricing.effective()
    }
}

#[derive(Clone, Debug)]
pub struct Order {
    pub(crate) id: Uuid,
    pub(crate) user_id: Uuid,
    pub(crate) ref_code: RefCode,
    pub(crate) items: Vec<OrderItem>,
    pub(crate) coupon: Option<Coupon>,
    pub(crate) ordered: bool,
    pub(crate) ordered_at: Option<DateTime<Utc>>,
    pub(crate) shipping_address_id: Option<Uuid>,
    pub(crate) billing_address_id: Option<Uuid>,
    pub(crate) payment_id: Option<Uuid>,
    pub(crate) being_delivered: bool,
    pub(crate) received: bool,
    pub(crate) refund_requested: bool,
    pub(crate) refund_granted: bool,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
    pub(crate) events: Vec<DomainEvent>,
}

impl Order {
    /// A fresh cart for a user.
    pub fn for_user(user_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(), user_id, ref_code: RefCode::generate(),
            items: vec![], coupon: None, ordered: false, ordered_at: None,
            shipping_address_id: None, billing_address_id: None, payment_id: None,
            being_delivered: false, received: false, refund_requested: false, refund_granted: false,
            created_at: now, updated_at: now, events: vec![],
        }
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn user_id(&self) -> Uuid { self.user_id }
    pub fn ref_code(&self) -> &RefCode { &self.ref_code }
    pub fn items(&self) -> &[OrderItem] { &self.items }
    pub fn coupon(&self) -> Option<&Coupon> { self.coupon.as_ref() }
    pub fn is_ordered(&self) -> bool { self.ordered }
    pub fn ordered_at(&self) -> Option<DateTime<Utc>> { self.ordered_at }
    pub fn payment_id(&self) -> Option<Uuid> { self.payment_id }
    pub fn shipping_address_id(&self) -> Option<Uuid> { self.shipping_address_id }
    pub fn billing_address_id(&self) -> Option<Uuid> { self.billing_address_id }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
    pub fn is_being_delivered(&self) -> bool { self.being_delivered }
    pub fn is_received(&self) -> bool { self.received }
    pub fn is_refund_requested(&self) -> bool { self.refund_requested }
    pub fn is_refund_granted(&self) -> bool { self.refund_granted }

    /// Add an item to the cart, merging into an existing unordered line for
    /// the same item. Stock is validated against the requested quantity; on
    /// the merge path the combined line quantity is not re-checked, which
    /// matches storefront behavior (finalization re-validates the full line).
    pub fn add_to_cart(&mut self, item: &Item, quantity: i32) -> Result<()> {
        if self.ordered {
            return Err(CheckoutError::AlreadyFinalized);
        }
        if quantity <= 0 {
            return Err(CheckoutError::InvalidQuantity);
        }
        if !item.can_fulfill(quantity) {
            return Err(CheckoutError::InsufficientStock { available: item.stock_quantity() });
        }

        if let Some(line) = self.items.iter_mut().find(|l| l.item_id == item.id() && !l.ordered) {
            line.quantity += quantity;
        } else {
            self.items.push(OrderItem {
                id: Uuid::new_v4(),
                user_id: self.user_id,
                item_id: item.id(),
                slug: item.slug().clone(),
                title: item.title().to_string(),
                pricing: item.pricing().clone(),
                quantity,
                variations: vec![],
                ordered: false,
            });
        }
        let item_id = item.id();
        let order_id = self.id;
        self.touch();
        self.raise_event(DomainEvent::Order(OrderEvent::ItemAdded { order_id, item_id, quantity }));
        Ok(())
    }

    /// Drop the unordered line for an item. Silently does nothing when the
    /// item is not in the cart.
    pub fn remove_from_cart(&mut self, item_id: Uuid) {
        let before = self.items.len();
        self.items.retain(|l| l.ordered || l.item_id != item_id);
        if self.items.len() != before {
            let order_id = self.id;
            self.touch();
            self.raise_event(DomainEvent::Order(OrderEvent::ItemRemoved { order_id, item_id }));
        }
    }

    /// Drop every unordered line. No-op on an empty cart.
    pub fn clear_cart(&mut self) {
        let before = self.items.len();
        self.items.retain(|l| l.ordered);
        if self.items.len() != before {
            let order_id = self.id;
            self.touch();
            self.raise_event(DomainEvent::Order(OrderEvent::Cleared { order_id }));
        }
    }

    /// Sum of line totals before any discount. Zero for an empty cart.
    pub fn subtotal(&self) -> Decimal {
        self.items.iter().fold(Decimal::ZERO, |acc, line| acc + line.final_price())
    }

    /// Payable total: subtotal minus the attached coupon's discount, never
    /// below zero.
    pub fn total(&self) -> Decimal {
        let subtotal = self.subtotal();
        let discount = self.coupon.as_ref().map_or(Decimal::ZERO, |c| c.calculate_discount(subtotal));
        (subtotal - discount).max(Decimal::ZERO)
    }

    pub fn attach_coupon(&mut self, coupon: Coupon) -> Result<()> {
        if self.ordered {
            return Err(CheckoutError::AlreadyFinalized);
        }
        let order_id = self.id;
        let code = coupon.code().to_string();
        self.coupon = Some(coupon);
        self.touch();
        self.raise_event(DomainEvent::Order(OrderEvent::CouponAttached { order_id, code }));
        Ok(())
    }

    pub fn detach_coupon(&mut self) {
        if self.coupon.take().is_some() {
            self.touch();
        }
    }

    /// Flip the order and all of its lines to ordered, recording the payment
    /// and address references handed over by the checkout flow.
    pub fn finalize(&mut self, payment_id: Uuid, shipping_address_id: Option<Uuid>, billing_address_id: Option<Uuid>) -> Result<()> {
        if self.ordered {
            return Err(CheckoutError::AlreadyFinalized);
        }
        if self.items.is_empty() {
            return Err(CheckoutError::EmptyOrder);
        }
        for line in &mut self.items {
            line.ordered = true;
        }
        self.ordered = true;
        self.ordered_at = Some(Utc::now());
        self.payment_id = Some(payment_id);
        self.shipping_address_id = shipping_address_id;
        self.billing_address_id = billing_address_id;
        let order_id = self.id;
        let total = self.total();
        self.touch();
        self.raise_event(DomainEvent::Order(OrderEvent::Finalized { order_id, total }));
        Ok(())
    }

    pub fn mark_delivered(&mut self) { self.being_delivered = true; self.touch(); }
    pub fn mark_received(&mut self) { self.being_delivered = false; self.received = true; self.touch(); }

    /// Open a refund request against a finalized order.
    pub fn request_refund(&mut self, reason: impl Into<String>, email: impl Into<String>) -> Result<Refund> {
        if !self.ordered {
            return Err(CheckoutError::NotFinalized);
        }
        self.refund_requested = true;
        let order_id = self.id;
        self.touch();
        self.raise_event(DomainEvent::Order(OrderEvent::RefundRequested { order_id }));
        Ok(Refund {
            id: Uuid::new_v4(),
            order_id,
            reason: reason.into(),
            email: email.into(),
            accepted: false,
        })
    }

    pub fn grant_refund(&mut self) { self.refund_granted = true; self.touch(); }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

// =============================================================================
// External collaborator records
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "address_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AddressKind {
    Billing,
    Shipping,
}

#[derive(Clone, Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct Address {
    pub id: Uuid,
    pub user_id: Uuid,
    pub street_address: String,
    pub apartment_address: String,
    pub country: String,
    pub zip: String,
    pub kind: AddressKind,
    pub default_address: bool,
}

/// A successful gateway charge, recorded after the external call returns.
#[derive(Clone, Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub txn_ref: String,
    pub amount: Decimal,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct Refund {
    pub id: Uuid,
    pub order_id: Uuid,
    pub reason: String,
    pub email: String,
    pub accepted: bool,
}

/// Per-user commerce profile, provisioned explicitly at registration.
#[derive(Clone, Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub gateway_customer_id: Option<String>,
    pub one_click_purchasing: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::coupon::Discount;
    use crate::domain::aggregates::item::{Category, Label};

    fn item(stock: i32, price: Decimal, discount_price: Option<Decimal>) -> Item {
        let mut item = Item::create(
            Slug::new("widget").unwrap(),
            "Widget",
            Category::Shirt,
            Label::Primary,
            Pricing::new(price, discount_price).unwrap(),
        );
        item.increase_stock(stock);
        item
    }

    fn cart() -> Order {
        Order::for_user(Uuid::new_v4())
    }

    #[test]
    fn test_adding_same_item_merges_quantities() {
        let mut order = cart();
        let widget = item(100, Decimal::new(10, 0), None);
        order.add_to_cart(&widget, 2).unwrap();
        order.add_to_cart(&widget, 3).unwrap();
        assert_eq!(order.items().len(), 1);
        assert_eq!(order.items()[0].quantity, 5);
    }

    #[test]
    fn test_non_positive_quantities_rejected() {
        let mut order = cart();
        let widget = item(10, Decimal::new(10, 0), None);
        assert!(matches!(order.add_to_cart(&widget, 0), Err(CheckoutError::InvalidQuantity)));
        assert!(matches!(order.add_to_cart(&widget, -1), Err(CheckoutError::InvalidQuantity)));
        assert!(order.is_empty());
    }

    #[test]
    fn test_add_beyond_stock_rejected() {
        let mut order = cart();
        let widget = item(3, Decimal::new(10, 0), None);
        let err = order.add_to_cart(&widget, 4).unwrap_err();
        assert!(matches!(err, CheckoutError::InsufficientStock { available: 3 }));
        assert!(order.is_empty());
        assert_eq!(widget.stock_quantity(), 3); // adding never touches stock
    }

    #[test]
    fn test_remove_from_cart() {
        let mut order = cart();
        let widget = item(10, Decimal::new(10, 0), None);
        order.add_to_cart(&widget, 2).unwrap();
        order.remove_from_cart(widget.id());
        assert!(order.is_empty());

        // removing an absent item is a no-op
        order.remove_from_cart(Uuid::new_v4());
        assert!(order.is_empty());
    }

    #[test]
    fn test_clear_cart() {
        let mut order = cart();
        let a = item(10, Decimal::new(10, 0), None);
        let mut b = item(10, Decimal::new(20, 0), None);
        b.slug = Slug::new("other").unwrap();
        order.add_to_cart(&a, 1).unwrap();
        order.add_to_cart(&b, 2).unwrap();
        order.clear_cart();
        assert!(order.is_empty());
        assert_eq!(order.subtotal(), Decimal::ZERO);
        order.clear_cart(); // no-op when already empty
    }

    #[test]
    fn test_subtotal_uses_discount_price_when_set() {
        let mut order = cart();
        let widget = item(10, Decimal::new(5000, 2), Some(Decimal::new(3999, 2)));
        order.add_to_cart(&widget, 2).unwrap();
        assert_eq!(order.subtotal(), Decimal::new(7998, 2));
        assert_eq!(order.items()[0].amount_saved(), Decimal::new(2002, 2));
    }

    #[test]
    fn test_total_with_fixed_coupon() {
        let mut order = cart();
        order.add_to_cart(&item(10, Decimal::new(10000, 2), None), 1).unwrap();
        order.attach_coupon(Coupon::new("SAVE10", Discount::fixed(Decimal::new(10, 0)).unwrap())).unwrap();
        assert_eq!(order.total(), Decimal::new(9000, 2));
    }

    #[test]
    fn test_total_with_percentage_coupon() {
        let mut order = cart();
        order.add_to_cart(&item(10, Decimal::new(10000, 2), None), 1).unwrap();
        order.attach_coupon(Coupon::new("SAVE20", Discount::percentage(Decimal::new(20, 0)).unwrap())).unwrap();
        assert_eq!(order.total(), Decimal::new(8000, 2));
    }

    #[test]
    fn test_total_never_negative() {
        let mut order = cart();
        order.add_to_cart(&item(10, Decimal::new(500, 2), None), 1).unwrap();
        order.attach_coupon(Coupon::new("BIG", Discount::fixed(Decimal::new(10, 0)).unwrap())).unwrap();
        assert_eq!(order.total(), Decimal::ZERO);
    }

    #[test]
    fn test_empty_cart_totals_are_zero() {
        let order = cart();
        assert_eq!(order.subtotal(), Decimal::ZERO);
        assert_eq!(order.total(), Decimal::ZERO);

        let mut with_coupon = cart();
        with_coupon.attach_coupon(Coupon::new("X", Discount::percentage(Decimal::TEN).unwrap())).unwrap();
        assert_eq!(with_coupon.total(), Decimal::ZERO);
    }

    #[test]
    fn test_finalize_flips_order_and_lines() {
        let mut order = cart();
        order.add_to_cart(&item(10, Decimal::new(10, 0), None), 2).unwrap();
        order.finalize(Uuid::new_v4(), None, None).unwrap();
        assert!(order.is_ordered());
        assert!(order.items().iter().all(|l| l.ordered));
        assert!(order.ordered_at().is_some());

        // finalized orders refuse further cart mutation
        let widget = item(10, Decimal::new(10, 0), None);
        assert!(matches!(order.add_to_cart(&widget, 1), Err(CheckoutError::AlreadyFinalized)));
        assert!(matches!(order.finalize(Uuid::new_v4(), None, None), Err(CheckoutError::AlreadyFinalized)));
    }

    #[test]
    fn test_finalize_empty_cart_rejected() {
        let mut order = cart();
        assert!(matches!(order.finalize(Uuid::new_v4(), None, None), Err(CheckoutError::EmptyOrder)));
    }

    #[test]
    fn test_refund_flow() {
        let mut order = cart();
        assert!(order.request_refund("damaged", "a@b.com").is_err());

        order.add_to_cart(&item(10, Decimal::new(10, 0), None), 1).unwrap();
        order.finalize(Uuid::new_v4(), None, None).unwrap();
        order.mark_delivered();
        assert!(order.is_being_delivered());
        order.mark_received();
        assert!(order.is_received());

        let refund = order.request_refund("damaged", "a@b.com").unwrap();
        assert_eq!(refund.order_id, order.id());
        assert!(order.is_refund_requested());
        order.grant_refund();
        assert!(order.is_refund_granted());
    }
}
