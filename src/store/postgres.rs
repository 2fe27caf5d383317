//! Postgres-backed store.
//!
//! Each read-modify-write primitive is a single conditional SQL statement, so
//! the database serializes concurrent carts, stock changes, and coupon
//! redemptions without application-side locking.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::aggregates::{
    Address, Coupon, Discount, Item, Order, OrderItem, Payment, Refund, UserProfile,
};
use crate::domain::aggregates::item::{Category, Label};
use crate::domain::value_objects::{Pricing, RefCode, Slug};
use crate::store::CheckoutStore;
use crate::{CheckoutError, Result};

fn db_err(e: sqlx::Error) -> CheckoutError {
    CheckoutError::Storage(e.to_string())
}

fn data_err(e: impl std::fmt::Display) -> CheckoutError {
    CheckoutError::Storage(e.to_string())
}

#[derive(Clone)]
pub struct PgStore {
    pool: sqlx::PgPool,
}

impl PgStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_unordered(&self, user_id: Uuid) -> Result<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE user_id = $1 AND NOT ordered")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        match row {
            Some(row) => Ok(Some(self.assemble_order(row).await?)),
            None => Ok(None),
        }
    }

    async fn assemble_order(&self, row: OrderRow) -> Result<Order> {
        let lines = sqlx::query_as::<_, OrderItemRow>("SELECT * FROM order_items WHERE order_id = $1")
            .bind(row.id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        let coupon = match row.coupon_id {
            Some(coupon_id) => {
                let coupon_row = sqlx::query_as::<_, CouponRow>("SELECT * FROM coupons WHERE id = $1")
                    .bind(coupon_id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(db_err)?;
                coupon_row.map(CouponRow::into_coupon).transpose()?
            }
            None => None,
        };
        let items = lines.into_iter().map(OrderItemRow::into_line).collect::<Result<Vec<_>>>()?;
        Ok(Order {
            id: row.id,
            user_id: row.user_id,
            ref_code: RefCode::from_stored(row.ref_code),
            items,
            coupon,
            ordered: row.ordered,
            ordered_at: row.ordered_at,
            shipping_address_id: row.shipping_address_id,
            billing_address_id: row.billing_address_id,
            payment_id: row.payment_id,
            being_delivered: row.being_delivered,
            received: row.received,
            refund_requested: row.refund_requested,
            refund_granted: row.refund_granted,
            created_at: row.created_at,
            updated_at: row.updated_at,
            events: vec![],
        })
    }
}

#[async_trait]
impl CheckoutStore for PgStore {
    async fn item_by_id(&self, id: Uuid) -> Result<Option<Item>> {
        sqlx::query_as::<_, ItemRow>("SELECT * FROM items WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .map(ItemRow::into_item)
            .transpose()
    }

    async fn item_by_slug(&self, slug: &str) -> Result<Option<Item>> {
        sqlx::query_as::<_, ItemRow>("SELECT * FROM items WHERE slug = $1")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .map(ItemRow::into_item)
            .transpose()
    }

    async fn list_items(&self) -> Result<Vec<Item>> {
        sqlx::query_as::<_, ItemRow>("SELECT * FROM items ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?
            .into_iter()
            .map(ItemRow::into_item)
            .collect()
    }

    async fn save_item(&self, item: &Item) -> Result<()> {
        let variations = serde_json::to_value(&item.variations).map_err(data_err)?;
        sqlx::query(
            "INSERT INTO items (id, slug, title, description, category, label, image_url, price, discount_price, stock_quantity, variations, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
             ON CONFLICT (id) DO UPDATE SET
               slug = $2, title = $3, description = $4, category = $5, label = $6,
               image_url = $7, price = $8, discount_price = $9, stock_quantity = $10,
               variations = $11, updated_at = $13",
        )
        .bind(item.id)
        .bind(item.slug.as_str())
        .bind(&item.title)
        .bind(&item.description)
        .bind(item.category.code())
        .bind(item.label.code())
        .bind(&item.image_url)
        .bind(item.pricing.price())
        .bind(item.pricing.discount_price())
        .bind(item.stock_quantity)
        .bind(variations)
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn try_reduce_stock(&self, item_id: Uuid, quantity: i32) -> Result<i32> {
        let row: Option<(i32,)> = sqlx::query_as(
            "UPDATE items SET stock_quantity = stock_quantity - $2, updated_at = NOW()
             WHERE id = $1 AND stock_quantity >= $2
             RETURNING stock_quantity",
        )
        .bind(item_id)
        .bind(quantity)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        if let Some((remaining,)) = row {
            return Ok(remaining);
        }
        let available: Option<(i32,)> = sqlx::query_as("SELECT stock_quantity FROM items WHERE id = $1")
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        match available {
            Some((available,)) => Err(CheckoutError::InsufficientStock { available }),
            None => Err(CheckoutError::ItemNotFound),
        }
    }

    async fn restock(&self, item_id: Uuid, quantity: i32) -> Result<()> {
        let done = sqlx::query("UPDATE items SET stock_quantity = stock_quantity + $2, updated_at = NOW() WHERE id = $1")
            .bind(item_id)
            .bind(quantity)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if done.rows_affected() == 0 {
            return Err(CheckoutError::ItemNotFound);
        }
        Ok(())
    }

    async fn cart_for_user(&self, user_id: Uuid) -> Result<Order> {
        if let Some(order) = self.fetch_unordered(user_id).await? {
            return Ok(order);
        }
        let fresh = Order::for_user(user_id);
        sqlx::query(
            "INSERT INTO orders (id, user_id, ref_code, ordered, created_at, updated_at)
             VALUES ($1, $2, $3, FALSE, $4, $5)
             ON CONFLICT (user_id) WHERE NOT ordered DO NOTHING",
        )
        .bind(fresh.id)
        .bind(fresh.user_id)
        .bind(fresh.ref_code.as_str())
        .bind(fresh.created_at)
        .bind(fresh.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        // re-read: a concurrent request may have won the insert
        self.fetch_unordered(user_id)
            .await?
            .ok_or_else(|| CheckoutError::Storage("cart vanished after create".into()))
    }

    async fn order_by_ref(&self, user_id: Uuid, ref_code: &str) -> Result<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE user_id = $1 AND ref_code = $2")
            .bind(user_id)
            .bind(ref_code)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        match row {
            Some(row) => Ok(Some(self.assemble_order(row).await?)),
            None => Ok(None),
        }
    }

    async fn save_order(&self, order: &Order) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        sqlx::query(
            "INSERT INTO orders (id, user_id, ref_code, ordered, ordered_at, coupon_id, shipping_address_id, billing_address_id, payment_id, being_delivered, received, refund_requested, refund_granted, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
             ON CONFLICT (id) DO UPDATE SET
               ordered = $4, ordered_at = $5, coupon_id = $6, shipping_address_id = $7,
               billing_address_id = $8, payment_id = $9, being_delivered = $10,
               received = $11, refund_requested = $12, refund_granted = $13, updated_at = $15",
        )
        .bind(order.id)
        .bind(order.user_id)
        .bind(order.ref_code.as_str())
        .bind(order.ordered)
        .bind(order.ordered_at)
        .bind(order.coupon.as_ref().map(|c| c.id()))
        .bind(order.shipping_address_id)
        .bind(order.billing_address_id)
        .bind(order.payment_id)
        .bind(order.being_delivered)
        .bind(order.received)
        .bind(order.refund_requested)
        .bind(order.refund_granted)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let keep: Vec<Uuid> = order.items.iter().map(|l| l.id).collect();
        sqlx::query("DELETE FROM order_items WHERE order_id = $1 AND id <> ALL($2)")
            .bind(order.id)
            .bind(&keep)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        for line in &order.items {
            let variations = serde_json::to_value(&line.variations).map_err(data_err)?;
            sqlx::query(
                "INSERT INTO order_items (id, order_id, user_id, item_id, slug, title, price, discount_price, quantity, variations, ordered)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                 ON CONFLICT (id) DO UPDATE SET quantity = $9, ordered = $11",
            )
            .bind(line.id)
            .bind(order.id)
            .bind(line.user_id)
            .bind(line.item_id)
            .bind(line.slug.as_str())
            .bind(&line.title)
            .bind(line.pricing.price())
            .bind(line.pricing.discount_price())
            .bind(line.quantity)
            .bind(variations)
            .bind(line.ordered)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn add_or_increment_line(&self, order_id: Uuid, line: &OrderItem, quantity: i32) -> Result<()> {
        let variations = serde_json::to_value(&line.variations).map_err(data_err)?;
        sqlx::query(
            "INSERT INTO order_items (id, order_id, user_id, item_id, slug, title, price, discount_price, quantity, variations, ordered)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, FALSE)
             ON CONFLICT (order_id, item_id) WHERE NOT ordered
             DO UPDATE SET quantity = order_items.quantity + $9",
        )
        .bind(line.id)
        .bind(order_id)
        .bind(line.user_id)
        .bind(line.item_id)
        .bind(line.slug.as_str())
        .bind(&line.title)
        .bind(line.pricing.price())
        .bind(line.pricing.discount_price())
        .bind(quantity)
        .bind(variations)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn coupon_by_code(&self, code: &str) -> Result<Option<Coupon>> {
        sqlx::query_as::<_, CouponRow>("SELECT * FROM coupons WHERE code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .map(CouponRow::into_coupon)
            .transpose()
    }

    async fn save_coupon(&self, coupon: &Coupon) -> Result<()> {
        sqlx::query(
            "INSERT INTO coupons (id, code, discount_kind, discount_value, minimum_order_amount, expiry_date, max_uses, current_uses)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (id) DO UPDATE SET
               code = $2, discount_kind = $3, discount_value = $4,
               minimum_order_amount = $5, expiry_date = $6, max_uses = $7, current_uses = $8",
        )
        .bind(coupon.id())
        .bind(coupon.code())
        .bind(coupon.discount().kind())
        .bind(coupon.discount().value())
        .bind(coupon.minimum_order_amount())
        .bind(coupon.expiry_date())
        .bind(coupon.max_uses())
        .bind(coupon.current_uses())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn try_redeem_coupon(&self, coupon_id: Uuid) -> Result<bool> {
        let row: Option<(i32,)> = sqlx::query_as(
            "UPDATE coupons SET current_uses = current_uses + 1
             WHERE id = $1 AND (max_uses IS NULL OR current_uses < max_uses)
             RETURNING current_uses",
        )
        .bind(coupon_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        if row.is_some() {
            return Ok(true);
        }
        let exists: Option<(i32,)> = sqlx::query_as("SELECT current_uses FROM coupons WHERE id = $1")
            .bind(coupon_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        match exists {
            Some(_) => Ok(false),
            None => Err(CheckoutError::CouponNotFound),
        }
    }

    async fn get_or_create_profile(&self, user_id: Uuid) -> Result<UserProfile> {
        sqlx::query("INSERT INTO user_profiles (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        sqlx::query_as::<_, UserProfile>("SELECT * FROM user_profiles WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn addresses_for_user(&self, user_id: Uuid) -> Result<Vec<Address>> {
        sqlx::query_as::<_, Address>("SELECT * FROM addresses WHERE user_id = $1 ORDER BY default_address DESC")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn save_address(&self, address: &Address) -> Result<()> {
        sqlx::query(
            "INSERT INTO addresses (id, user_id, street_address, apartment_address, country, zip, kind, default_address)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (id) DO UPDATE SET
               street_address = $3, apartment_address = $4, country = $5,
               zip = $6, kind = $7, default_address = $8",
        )
        .bind(address.id)
        .bind(address.user_id)
        .bind(&address.street_address)
        .bind(&address.apartment_address)
        .bind(&address.country)
        .bind(&address.zip)
        .bind(address.kind)
        .bind(address.default_address)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn save_payment(&self, payment: &Payment) -> Result<()> {
        sqlx::query("INSERT INTO payments (id, user_id, txn_ref, amount, timestamp) VALUES ($1, $2, $3, $4, $5)")
            .bind(payment.id)
            .bind(payment.user_id)
            .bind(&payment.txn_ref)
            .bind(payment.amount)
            .bind(payment.timestamp)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn save_refund(&self, refund: &Refund) -> Result<()> {
        sqlx::query(
            "INSERT INTO refunds (id, order_id, reason, email, accepted)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (id) DO UPDATE SET accepted = $5",
        )
        .bind(refund.id)
        .bind(refund.order_id)
        .bind(&refund.reason)
        .bind(&refund.email)
        .bind(refund.accepted)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}

// =============================================================================
// Row types
// =============================================================================

#[derive(sqlx::FromRow)]
struct ItemRow {
    id: Uuid,
    slug: String,
    title: String,
    description: String,
    category: String,
    label: String,
    image_url: Option<String>,
    price: Decimal,
    discount_price: Option<Decimal>,
    stock_quantity: i32,
    variations: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ItemRow {
    fn into_item(self) -> Result<Item> {
        Ok(Item {
            id: self.id,
            slug: Slug::new(self.slug).map_err(data_err)?,
            title: self.title,
            description: self.description,
            category: Category::from_code(&self.category)
                .ok_or_else(|| CheckoutError::Storage(format!("unknown category code {}", self.category)))?,
            label: Label::from_code(&self.label)
                .ok_or_else(|| CheckoutError::Storage(format!("unknown label code {}", self.label)))?,
            image_url: self.image_url,
            pricing: Pricing::new(self.price, self.discount_price)?,
            stock_quantity: self.stock_quantity,
            variations: serde_json::from_value(self.variations).map_err(data_err)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
            events: vec![],
        })
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    user_id: Uuid,
    ref_code: String,
    ordered: bool,
    ordered_at: Option<DateTime<Utc>>,
    coupon_id: Option<Uuid>,
    shipping_address_id: Option<Uuid>,
    billing_address_id: Option<Uuid>,
    payment_id: Option<Uuid>,
    being_delivered: bool,
    received: bool,
    refund_requested: bool,
    refund_granted: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct OrderItemRow {
    id: Uuid,
    user_id: Uuid,
    item_id: Uuid,
    slug: String,
    title: String,
    price: Decimal,
    discount_price: Option<Decimal>,
    quantity: i32,
    variations: serde_json::Value,
    ordered: bool,
}

impl OrderItemRow {
    fn into_line(self) -> Result<OrderItem> {
        Ok(OrderItem {
            id: self.id,
            user_id: self.user_id,
            item_id: self.item_id,
            slug: Slug::new(self.slug).map_err(data_err)?,
            title: self.title,
            pricing: Pricing::new(self.price, self.discount_price)?,
            quantity: self.quantity,
            variations: serde_json::from_value(self.variations).map_err(data_err)?,
            ordered: self.ordered,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CouponRow {
    id: Uuid,
    code: String,
    discount_kind: String,
    discount_value: Decimal,
    minimum_order_amount: Decimal,
    expiry_date: Option<DateTime<Utc>>,
    max_uses: Option<i32>,
    current_uses: i32,
}

impl CouponRow {
    fn into_coupon(self) -> Result<Coupon> {
        Ok(Coupon {
            id: self.id,
            code: self.code,
            discount: Discount::from_parts(&self.discount_kind, self.discount_value)?,
            minimum_order_amount: self.minimum_order_amount,
            expiry_date: self.expiry_date,
            max_uses: self.max_uses,
            current_uses: self.current_uses,
        })
    }
}
