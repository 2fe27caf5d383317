//! Checkout flows.
//!
//! These functions compose the domain aggregates with the store's atomic
//! primitives. Every failure leaves the order, the stock counts, and the
//! coupon exactly as they were: stock reserved for a checkout that aborts
//! partway is released before the error propagates.

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::aggregates::{Order, Payment, Refund, UserProfile};
use crate::service::gateway::PaymentGateway;
use crate::store::CheckoutStore;
use crate::{CheckoutError, Result};

/// Explicit profile provisioning, called at registration time. Idempotent.
pub async fn provision_user<S: CheckoutStore>(store: &S, user_id: Uuid) -> Result<UserProfile> {
    let profile = store.get_or_create_profile(user_id).await?;
    info!(user = %user_id, "provisioned user profile");
    Ok(profile)
}

/// Add an item to the user's cart, merging with any existing line. The line
/// is persisted through the store's single-step add-or-increment primitive.
pub async fn add_item_to_cart<S: CheckoutStore>(store: &S, user_id: Uuid, slug: &str, quantity: i32) -> Result<Order> {
    let item = store.item_by_slug(slug).await?.ok_or(CheckoutError::ItemNotFound)?;
    let mut order = store.cart_for_user(user_id).await?;
    order.add_to_cart(&item, quantity)?;
    let line = order
        .items()
        .iter()
        .find(|l| l.item_id == item.id() && !l.ordered)
        .cloned()
        .ok_or_else(|| CheckoutError::Storage("cart line missing after add".into()))?;
    store.add_or_increment_line(order.id(), &line, quantity).await?;
    info!(user = %user_id, item = %slug, quantity, "added item to cart");
    Ok(order)
}

pub async fn remove_item_from_cart<S: CheckoutStore>(store: &S, user_id: Uuid, slug: &str) -> Result<Order> {
    let item = store.item_by_slug(slug).await?.ok_or(CheckoutError::ItemNotFound)?;
    let mut order = store.cart_for_user(user_id).await?;
    order.remove_from_cart(item.id());
    store.save_order(&order).await?;
    Ok(order)
}

pub async fn clear_cart<S: CheckoutStore>(store: &S, user_id: Uuid) -> Result<Order> {
    let mut order = store.cart_for_user(user_id).await?;
    order.clear_cart();
    store.save_order(&order).await?;
    Ok(order)
}

/// The coupon application entry point: resolve the code, run the eligibility
/// sequence, and attach on success. A rejected coupon never touches the
/// order.
pub async fn apply_coupon<S: CheckoutStore>(store: &S, user_id: Uuid, code: &str) -> Result<Order> {
    let coupon = store.coupon_by_code(code).await?.ok_or(CheckoutError::CouponNotFound)?;
    if !coupon.is_active() {
        return Err(CheckoutError::CouponExpired);
    }
    if !coupon.can_be_used() {
        return Err(CheckoutError::CouponExhausted);
    }
    let mut order = store.cart_for_user(user_id).await?;
    if !coupon.is_valid_for_amount(order.subtotal()) {
        return Err(CheckoutError::MinimumNotMet { minimum: coupon.minimum_order_amount() });
    }
    info!(user = %user_id, code = %coupon.code(), "applying coupon");
    order.attach_coupon(coupon)?;
    store.save_order(&order).await?;
    Ok(order)
}

#[derive(Clone, Debug)]
pub struct FinalizeRequest {
    pub user_id: Uuid,
    pub payment_token: String,
    pub shipping_address_id: Option<Uuid>,
    pub billing_address_id: Option<Uuid>,
}

/// Turn the cart into a finalized order: reserve stock per line, charge the
/// gateway, redeem the coupon once, record the payment, and flip the order.
pub async fn finalize_order<S, G>(store: &S, gateway: &G, req: FinalizeRequest) -> Result<Order>
where
    S: CheckoutStore,
    G: PaymentGateway,
{
    let mut order = store.cart_for_user(req.user_id).await?;
    if order.is_empty() {
        return Err(CheckoutError::EmptyOrder);
    }
    if let Some(coupon) = order.coupon() {
        if !coupon.is_active() {
            return Err(CheckoutError::CouponExpired);
        }
    }

    // reserve stock; the full line quantity is validated here even when the
    // cart merged several smaller adds
    let mut reserved: Vec<(Uuid, i32)> = Vec::new();
    for line in order.items() {
        match store.try_reduce_stock(line.item_id, line.quantity).await {
            Ok(_) => reserved.push((line.item_id, line.quantity)),
            Err(e) => {
                release(store, &reserved).await;
                return Err(e);
            }
        }
    }

    let total = order.total();
    let txn_ref = match gateway.charge(req.user_id, total, &req.payment_token).await {
        Ok(txn_ref) => txn_ref,
        Err(e) => {
            release(store, &reserved).await;
            return Err(e);
        }
    };

    if let Some(coupon) = order.coupon() {
        match store.try_redeem_coupon(coupon.id()).await {
            Ok(true) => {}
            Ok(false) => {
                release(store, &reserved).await;
                return Err(CheckoutError::CouponExhausted);
            }
            Err(e) => {
                release(store, &reserved).await;
                return Err(e);
            }
        }
    }

    let payment = Payment {
        id: Uuid::new_v4(),
        user_id: req.user_id,
        txn_ref,
        amount: total,
        timestamp: Utc::now(),
    };
    store.save_payment(&payment).await?;
    order.finalize(payment.id, req.shipping_address_id, req.billing_address_id)?;
    store.save_order(&order).await?;
    info!(user = %req.user_id, order = %order.ref_code(), %total, "order finalized");
    Ok(order)
}

pub async fn request_refund<S: CheckoutStore>(
    store: &S,
    user_id: Uuid,
    ref_code: &str,
    reason: impl Into<String>,
    email: impl Into<String>,
) -> Result<Refund> {
    let mut order = store.order_by_ref(user_id, ref_code).await?.ok_or(CheckoutError::OrderNotFound)?;
    let refund = order.request_refund(reason, email)?;
    store.save_refund(&refund).await?;
    store.save_order(&order).await?;
    info!(user = %user_id, order = %ref_code, "refund requested");
    Ok(refund)
}

async fn release<S: CheckoutStore>(store: &S, reserved: &[(Uuid, i32)]) {
    for (item_id, quantity) in reserved {
        if let Err(e) = store.restock(*item_id, *quantity).await {
            warn!(item = %item_id, quantity, error = %e, "failed to release stock after aborted checkout");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::item::{Category, Label};
    use crate::domain::aggregates::{Coupon, Discount, Item};
    use crate::domain::value_objects::{Pricing, Slug};
    use crate::service::gateway::OfflineGateway;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::Duration;
    use rust_decimal::Decimal;

    struct DecliningGateway;

    #[async_trait]
    impl PaymentGateway for DecliningGateway {
        async fn charge(&self, _user_id: Uuid, _amount: Decimal, _token: &str) -> Result<String> {
            Err(CheckoutError::PaymentFailed("card declined".into()))
        }
    }

    async fn seed_item(store: &MemoryStore, slug: &str, price: Decimal, stock: i32) -> Item {
        let mut item = Item::create(
            Slug::new(slug).unwrap(),
            slug.to_uppercase(),
            Category::Shirt,
            Label::Primary,
            Pricing::new(price, None).unwrap(),
        );
        item.increase_stock(stock);
        store.save_item(&item).await.unwrap();
        item
    }

    fn finalize_req(user_id: Uuid) -> FinalizeRequest {
        FinalizeRequest {
            user_id,
            payment_token: "tok_visa".into(),
            shipping_address_id: None,
            billing_address_id: None,
        }
    }

    #[tokio::test]
    async fn test_add_twice_merges_into_one_line() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        seed_item(&store, "widget", Decimal::new(10, 0), 100).await;

        add_item_to_cart(&store, user, "widget", 2).await.unwrap();
        add_item_to_cart(&store, user, "widget", 3).await.unwrap();

        let cart = store.cart_for_user(user).await.unwrap();
        assert_eq!(cart.items().len(), 1);
        assert_eq!(cart.items()[0].quantity, 5);
    }

    #[tokio::test]
    async fn test_add_unknown_item() {
        let store = MemoryStore::new();
        let err = add_item_to_cart(&store, Uuid::new_v4(), "ghost", 1).await.unwrap_err();
        assert!(matches!(err, CheckoutError::ItemNotFound));
    }

    #[tokio::test]
    async fn test_apply_coupon_success() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        seed_item(&store, "widget", Decimal::new(100, 0), 10).await;
        store
            .save_coupon(&Coupon::new("SAVE20", Discount::percentage(Decimal::new(20, 0)).unwrap()))
            .await
            .unwrap();

        add_item_to_cart(&store, user, "widget", 1).await.unwrap();
        let order = apply_coupon(&store, user, "SAVE20").await.unwrap();
        assert_eq!(order.total(), Decimal::new(80, 0));
    }

    #[tokio::test]
    async fn test_apply_coupon_rejections_leave_order_untouched() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        seed_item(&store, "widget", Decimal::new(10, 0), 10).await;
        add_item_to_cart(&store, user, "widget", 1).await.unwrap();

        let err = apply_coupon(&store, user, "NOPE").await.unwrap_err();
        assert!(matches!(err, CheckoutError::CouponNotFound));

        let expired = Coupon::new("OLD", Discount::fixed(Decimal::ONE).unwrap())
            .with_expiry(Utc::now() - Duration::days(1));
        store.save_coupon(&expired).await.unwrap();
        let err = apply_coupon(&store, user, "OLD").await.unwrap_err();
        assert!(matches!(err, CheckoutError::CouponExpired));

        let mut spent = Coupon::new("SPENT", Discount::fixed(Decimal::ONE).unwrap()).with_max_uses(1);
        spent.increment_usage();
        store.save_coupon(&spent).await.unwrap();
        let err = apply_coupon(&store, user, "SPENT").await.unwrap_err();
        assert!(matches!(err, CheckoutError::CouponExhausted));

        let picky = Coupon::new("MIN50", Discount::fixed(Decimal::ONE).unwrap())
            .with_minimum(Decimal::new(50, 0));
        store.save_coupon(&picky).await.unwrap();
        let err = apply_coupon(&store, user, "MIN50").await.unwrap_err();
        assert!(matches!(err, CheckoutError::MinimumNotMet { .. }));

        let cart = store.cart_for_user(user).await.unwrap();
        assert!(cart.coupon().is_none());
        assert_eq!(cart.total(), Decimal::new(10, 0));
    }

    #[tokio::test]
    async fn test_finalize_decrements_stock_and_redeems_coupon_once() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let item = seed_item(&store, "widget", Decimal::new(100, 0), 10).await;
        let coupon = Coupon::new("SAVE10", Discount::fixed(Decimal::TEN).unwrap()).with_max_uses(3);
        store.save_coupon(&coupon).await.unwrap();

        add_item_to_cart(&store, user, "widget", 4).await.unwrap();
        apply_coupon(&store, user, "SAVE10").await.unwrap();
        let order = finalize_order(&store, &OfflineGateway, finalize_req(user)).await.unwrap();

        assert!(order.is_ordered());
        assert_eq!(order.total(), Decimal::new(390, 0));
        let stocked = store.item_by_id(item.id()).await.unwrap().unwrap();
        assert_eq!(stocked.stock_quantity(), 6);
        let redeemed = store.coupon_by_code("SAVE10").await.unwrap().unwrap();
        assert_eq!(redeemed.current_uses(), 1);

        // the user gets a fresh empty cart afterwards
        let cart = store.cart_for_user(user).await.unwrap();
        assert!(cart.is_empty());
    }

    #[tokio::test]
    async fn test_finalize_empty_cart_rejected() {
        let store = MemoryStore::new();
        let err = finalize_order(&store, &OfflineGateway, finalize_req(Uuid::new_v4())).await.unwrap_err();
        assert!(matches!(err, CheckoutError::EmptyOrder));
    }

    #[tokio::test]
    async fn test_finalize_releases_reserved_stock_on_partial_failure() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let plenty = seed_item(&store, "plenty", Decimal::new(10, 0), 5).await;
        let scarce = seed_item(&store, "scarce", Decimal::new(10, 0), 1).await;

        add_item_to_cart(&store, user, "plenty", 2).await.unwrap();
        add_item_to_cart(&store, user, "scarce", 1).await.unwrap();
        // someone else takes the last scarce unit between add and checkout
        store.try_reduce_stock(scarce.id(), 1).await.unwrap();

        let err = finalize_order(&store, &OfflineGateway, finalize_req(user)).await.unwrap_err();
        assert!(matches!(err, CheckoutError::InsufficientStock { available: 0 }));

        let restored = store.item_by_id(plenty.id()).await.unwrap().unwrap();
        assert_eq!(restored.stock_quantity(), 5);
        let cart = store.cart_for_user(user).await.unwrap();
        assert!(!cart.is_ordered());
    }

    #[tokio::test]
    async fn test_finalize_releases_stock_when_charge_declined() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let item = seed_item(&store, "widget", Decimal::new(10, 0), 8).await;
        add_item_to_cart(&store, user, "widget", 3).await.unwrap();

        let err = finalize_order(&store, &DecliningGateway, finalize_req(user)).await.unwrap_err();
        assert!(matches!(err, CheckoutError::PaymentFailed(_)));
        let restored = store.item_by_id(item.id()).await.unwrap().unwrap();
        assert_eq!(restored.stock_quantity(), 8);
    }

    #[tokio::test]
    async fn test_finalize_rejects_exhausted_coupon_at_redemption() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let item = seed_item(&store, "widget", Decimal::new(10, 0), 8).await;
        let coupon = Coupon::new("LAST", Discount::fixed(Decimal::ONE).unwrap()).with_max_uses(1);
        store.save_coupon(&coupon).await.unwrap();

        add_item_to_cart(&store, user, "widget", 1).await.unwrap();
        apply_coupon(&store, user, "LAST").await.unwrap();
        // the final use is burned elsewhere before this checkout lands
        store.try_redeem_coupon(coupon.id()).await.unwrap();

        let err = finalize_order(&store, &OfflineGateway, finalize_req(user)).await.unwrap_err();
        assert!(matches!(err, CheckoutError::CouponExhausted));
        let restored = store.item_by_id(item.id()).await.unwrap().unwrap();
        assert_eq!(restored.stock_quantity(), 8);
    }

    #[tokio::test]
    async fn test_provision_user_idempotent() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let first = provision_user(&store, user).await.unwrap();
        let second = provision_user(&store, user).await.unwrap();
        assert_eq!(first.user_id, second.user_id);
        assert!(!second.one_click_purchasing);
    }

    #[tokio::test]
    async fn test_refund_flow() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        seed_item(&store, "widget", Decimal::new(10, 0), 8).await;
        add_item_to_cart(&store, user, "widget", 1).await.unwrap();
        let order = finalize_order(&store, &OfflineGateway, finalize_req(user)).await.unwrap();

        let refund = request_refund(&store, user, order.ref_code().as_str(), "damaged", "a@b.com")
            .await
            .unwrap();
        assert_eq!(refund.order_id, order.id());
        let stored = store.order_by_ref(user, order.ref_code().as_str()).await.unwrap().unwrap();
        assert!(stored.is_refund_requested());
    }
}
