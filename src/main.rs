//! Cartwright - Self-hosted E-commerce Checkout Service

use anyhow::Result;
use axum::{extract::{Path, State}, http::StatusCode, routing::{delete, get, post}, Json, Router};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;
use validator::Validate;

use cartwright::domain::aggregates::{Address, AddressKind, Category, Item, Label, Order, Refund, StockStatus, UserProfile};
use cartwright::service::checkout as flows;
use cartwright::service::checkout::FinalizeRequest;
use cartwright::service::gateway::OfflineGateway;
use cartwright::store::{CheckoutStore, PgStore};
use cartwright::{CheckoutError, Pricing, Slug};

#[derive(Clone)]
pub struct AppState {
    pub store: PgStore,
    pub nats: Option<async_nats::Client>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    let db = PgPoolOptions::new().max_connections(10).connect(&std::env::var("DATABASE_URL")?).await?;
    sqlx::migrate!("./migrations").run(&db).await?;
    let nats = match std::env::var("NATS_URL") {
        Ok(url) => async_nats::connect(&url).await.ok(),
        Err(_) => None,
    };
    let state = AppState { store: PgStore::new(db), nats };

    let app = Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "cartwright"})) }))
        .route("/api/v1/items", get(list_items).post(create_item))
        .route("/api/v1/items/:slug", get(get_item))
        .route("/api/v1/items/:slug/restock", post(restock_item))
        .route("/api/v1/cart/:user_id", get(get_cart).post(add_to_cart).delete(clear_cart))
        .route("/api/v1/cart/:user_id/items/:slug", delete(remove_from_cart))
        .route("/api/v1/cart/:user_id/coupon", post(apply_coupon))
        .route("/api/v1/checkout", post(checkout))
        .route("/api/v1/users/:user_id/provision", post(provision_user))
        .route("/api/v1/addresses/:user_id", get(list_addresses).post(create_address))
        .route("/api/v1/refunds", post(request_refund))
        .layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive()).with_state(state);

    let port = std::env::var("PORT").unwrap_or_else(|_| "8083".to_string());
    tracing::info!("cartwright listening on 0.0.0.0:{}", port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?, app).await?;
    Ok(())
}

fn error_response(e: CheckoutError) -> (StatusCode, String) {
    use CheckoutError::*;
    let status = match &e {
        InvalidQuantity | InvalidDiscount | InvalidPricing(_) | EmptyOrder | MinimumNotMet { .. } | NotFinalized => StatusCode::BAD_REQUEST,
        InsufficientStock { .. } | CouponExpired | CouponExhausted | AlreadyFinalized => StatusCode::CONFLICT,
        CouponNotFound | ItemNotFound | OrderNotFound => StatusCode::NOT_FOUND,
        PaymentFailed(_) => StatusCode::PAYMENT_REQUIRED,
        Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

fn bad_request(e: impl std::fmt::Display) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, e.to_string())
}

// =============================================================================
// Views
// =============================================================================

#[derive(Debug, Serialize)]
pub struct ItemView {
    pub id: Uuid,
    pub slug: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub label: String,
    pub image_url: Option<String>,
    pub price: Decimal,
    pub discount_price: Option<Decimal>,
    pub stock_quantity: i32,
    pub stock_status: StockStatus,
}

impl From<&Item> for ItemView {
    fn from(item: &Item) -> Self {
        Self {
            id: item.id(),
            slug: item.slug().to_string(),
            title: item.title().to_string(),
            description: item.description().to_string(),
            category: item.category().code().to_string(),
            label: item.label().code().to_string(),
            image_url: item.image_url().map(str::to_string),
            price: item.pricing().price(),
            discount_price: item.pricing().discount_price(),
            stock_quantity: item.stock_quantity(),
            stock_status: item.stock_status(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LineView {
    pub slug: String,
    pub title: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    pub amount_saved: Decimal,
}

#[derive(Debug, Serialize)]
pub struct CartView {
    pub ref_code: String,
    pub items: Vec<LineView>,
    pub coupon: Option<String>,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
    pub ordered: bool,
}

impl From<&Order> for CartView {
    fn from(order: &Order) -> Self {
        let subtotal = order.subtotal();
        let total = order.total();
        Self {
            ref_code: order.ref_code().to_string(),
            items: order
                .items()
                .iter()
                .map(|l| LineView {
                    slug: l.slug.to_string(),
                    title: l.title.clone(),
                    quantity: l.quantity,
                    unit_price: l.pricing.effective(),
                    line_total: l.final_price(),
                    amount_saved: l.amount_saved(),
                })
                .collect(),
            coupon: order.coupon().map(|c| c.code().to_string()),
            subtotal,
            discount: subtotal - total,
            total,
            ordered: order.is_ordered(),
        }
    }
}

// =============================================================================
// Catalog
// =============================================================================

async fn list_items(State(s): State<AppState>) -> Result<Json<Vec<ItemView>>, (StatusCode, String)> {
    let items = s.store.list_items().await.map_err(error_response)?;
    Ok(Json(items.iter().map(ItemView::from).collect()))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateItemRequest {
    #[validate(length(min = 1, max = 100))]
    pub title: String,
    #[validate(length(min = 1, max = 100))]
    pub slug: String,
    pub category: String,
    pub label: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub price: Decimal,
    pub discount_price: Option<Decimal>,
    #[validate(range(min = 0))]
    pub stock_quantity: Option<i32>,
}

async fn create_item(State(s): State<AppState>, Json(r): Json<CreateItemRequest>) -> Result<(StatusCode, Json<ItemView>), (StatusCode, String)> {
    r.validate().map_err(bad_request)?;
    let slug = Slug::new(&r.slug).map_err(bad_request)?;
    let category = Category::from_code(&r.category).ok_or_else(|| bad_request("unknown category code"))?;
    let label = Label::from_code(&r.label).ok_or_else(|| bad_request("unknown label code"))?;
    let pricing = Pricing::new(r.price, r.discount_price).map_err(bad_request)?;
    let mut item = Item::create(slug, r.title, category, label, pricing);
    if let Some(description) = r.description {
        item.set_description(description);
    }
    if let Some(url) = r.image_url {
        item.set_image_url(url);
    }
    if let Some(quantity) = r.stock_quantity {
        item.increase_stock(quantity);
    }
    s.store.save_item(&item).await.map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(ItemView::from(&item))))
}

async fn get_item(State(s): State<AppState>, Path(slug): Path<String>) -> Result<Json<ItemView>, (StatusCode, String)> {
    let item = s.store.item_by_slug(&slug).await.map_err(error_response)?;
    item.as_ref().map(ItemView::from).map(Json).ok_or_else(|| error_response(CheckoutError::ItemNotFound))
}

#[derive(Debug, Deserialize)]
pub struct RestockRequest {
    pub quantity: i32,
}

async fn restock_item(State(s): State<AppState>, Path(slug): Path<String>, Json(r): Json<RestockRequest>) -> Result<Json<ItemView>, (StatusCode, String)> {
    let item = s.store.item_by_slug(&slug).await.map_err(error_response)?.ok_or_else(|| error_response(CheckoutError::ItemNotFound))?;
    s.store.restock(item.id(), r.quantity).await.map_err(error_response)?;
    let item = s.store.item_by_id(item.id()).await.map_err(error_response)?.ok_or_else(|| error_response(CheckoutError::ItemNotFound))?;
    Ok(Json(ItemView::from(&item)))
}

// =============================================================================
// Cart
// =============================================================================

async fn get_cart(State(s): State<AppState>, Path(user_id): Path<Uuid>) -> Result<Json<CartView>, (StatusCode, String)> {
    let order = s.store.cart_for_user(user_id).await.map_err(error_response)?;
    Ok(Json(CartView::from(&order)))
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddToCartRequest {
    #[validate(length(min = 1))]
    pub slug: String,
    pub quantity: Option<i32>,
}

async fn add_to_cart(State(s): State<AppState>, Path(user_id): Path<Uuid>, Json(r): Json<AddToCartRequest>) -> Result<(StatusCode, Json<CartView>), (StatusCode, String)> {
    r.validate().map_err(bad_request)?;
    let order = flows::add_item_to_cart(&s.store, user_id, &r.slug, r.quantity.unwrap_or(1)).await.map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(CartView::from(&order))))
}

async fn remove_from_cart(State(s): State<AppState>, Path((user_id, slug)): Path<(Uuid, String)>) -> Result<Json<CartView>, (StatusCode, String)> {
    let order = flows::remove_item_from_cart(&s.store, user_id, &slug).await.map_err(error_response)?;
    Ok(Json(CartView::from(&order)))
}

async fn clear_cart(State(s): State<AppState>, Path(user_id): Path<Uuid>) -> Result<Json<CartView>, (StatusCode, String)> {
    let order = flows::clear_cart(&s.store, user_id).await.map_err(error_response)?;
    Ok(Json(CartView::from(&order)))
}

#[derive(Debug, Deserialize, Validate)]
pub struct ApplyCouponRequest {
    #[validate(length(min = 1, max = 15))]
    pub code: String,
}

async fn apply_coupon(State(s): State<AppState>, Path(user_id): Path<Uuid>, Json(r): Json<ApplyCouponRequest>) -> Result<Json<CartView>, (StatusCode, String)> {
    r.validate().map_err(bad_request)?;
    let order = flows::apply_coupon(&s.store, user_id, &r.code).await.map_err(error_response)?;
    Ok(Json(CartView::from(&order)))
}

// =============================================================================
// Checkout, users, addresses, refunds
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct CheckoutRequest {
    pub user_id: Uuid,
    #[validate(length(min = 1))]
    pub payment_token: String,
    pub shipping_address_id: Option<Uuid>,
    pub billing_address_id: Option<Uuid>,
}

async fn checkout(State(s): State<AppState>, Json(r): Json<CheckoutRequest>) -> Result<Json<CartView>, (StatusCode, String)> {
    r.validate().map_err(bad_request)?;
    let order = flows::finalize_order(
        &s.store,
        &OfflineGateway,
        FinalizeRequest {
            user_id: r.user_id,
            payment_token: r.payment_token,
            shipping_address_id: r.shipping_address_id,
            billing_address_id: r.billing_address_id,
        },
    )
    .await
    .map_err(error_response)?;

    if let Some(nats) = &s.nats {
        let event = serde_json::json!({
            "order_id": order.id(),
            "ref_code": order.ref_code().as_str(),
            "user_id": order.user_id(),
            "total": order.total(),
        });
        if let Err(e) = nats.publish("orders.finalized".to_string(), event.to_string().into()).await {
            tracing::warn!(error = %e, "failed to publish order event");
        }
    }
    Ok(Json(CartView::from(&order)))
}

async fn provision_user(State(s): State<AppState>, Path(user_id): Path<Uuid>) -> Result<(StatusCode, Json<UserProfile>), (StatusCode, String)> {
    let profile = flows::provision_user(&s.store, user_id).await.map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(profile)))
}

async fn list_addresses(State(s): State<AppState>, Path(user_id): Path<Uuid>) -> Result<Json<Vec<Address>>, (StatusCode, String)> {
    let addresses = s.store.addresses_for_user(user_id).await.map_err(error_response)?;
    Ok(Json(addresses))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateAddressRequest {
    #[validate(length(min = 1, max = 100))]
    pub street_address: String,
    pub apartment_address: Option<String>,
    #[validate(length(min = 2, max = 2))]
    pub country: String,
    #[validate(length(min = 1, max = 100))]
    pub zip: String,
    pub kind: AddressKind,
    pub default_address: Option<bool>,
}

async fn create_address(State(s): State<AppState>, Path(user_id): Path<Uuid>, Json(r): Json<CreateAddressRequest>) -> Result<(StatusCode, Json<Address>), (StatusCode, String)> {
    r.validate().map_err(bad_request)?;
    let address = Address {
        id: Uuid::now_v7(),
        user_id,
        street_address: r.street_address,
        apartment_address: r.apartment_address.unwrap_or_default(),
        country: r.country,
        zip: r.zip,
        kind: r.kind,
        default_address: r.default_address.unwrap_or(false),
    };
    s.store.save_address(&address).await.map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(address)))
}

#[derive(Debug, Deserialize, Validate)]
pub struct RefundRequestBody {
    pub user_id: Uuid,
    #[validate(length(min = 1, max = 20))]
    pub ref_code: String,
    #[validate(length(min = 1))]
    pub reason: String,
    #[validate(email)]
    pub email: String,
}

async fn request_refund(State(s): State<AppState>, Json(r): Json<RefundRequestBody>) -> Result<(StatusCode, Json<Refund>), (StatusCode, String)> {
    r.validate().map_err(bad_request)?;
    let refund = flows::request_refund(&s.store, r.user_id, &r.ref_code, r.reason, r.email).await.map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(refund)))
}
