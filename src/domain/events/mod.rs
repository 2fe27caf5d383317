//! Domain events
use rust_decimal::Decimal;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub enum DomainEvent {
    Stock(StockEvent),
    Order(OrderEvent),
}

#[derive(Clone, Debug)]
pub enum StockEvent {
    Reduced { item_id: Uuid, quantity: i32, remaining: i32 },
    Restocked { item_id: Uuid, quantity: i32 },
}

#[derive(Clone, Debug)]
pub enum OrderEvent {
    ItemAdded { order_id: Uuid, item_id: Uuid, quantity: i32 },
    ItemRemoved { order_id: Uuid, item_id: Uuid },
    Cleared { order_id: Uuid },
    CouponAttached { order_id: Uuid, code: String },
    Finalized { order_id: Uuid, total: Decimal },
    RefundRequested { order_id: Uuid },
}
