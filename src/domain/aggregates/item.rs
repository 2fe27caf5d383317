//! Catalog Item Aggregate
//!
//! Owns the stock controller: every change to `stock_quantity` goes through a
//! validated operation so the count never drops below zero.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::events::{DomainEvent, StockEvent};
use crate::domain::value_objects::{Pricing, Slug};
use crate::{CheckoutError, Result};

/// Items with stock at or below this count report [`StockStatus::LowStock`].
pub const LOW_STOCK_MAX: i32 = 5;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StockStatus {
    OutOfStock,
    LowStock,
    InStock,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    Shirt,
    SportWear,
    Outwear,
}

impl Category {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Shirt => "S",
            Self::SportWear => "SW",
            Self::Outwear => "OW",
        }
    }
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "S" => Some(Self::Shirt),
            "SW" => Some(Self::SportWear),
            "OW" => Some(Self::Outwear),
            _ => None,
        }
    }
}

/// Storefront display label.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Label {
    Primary,
    Secondary,
    Danger,
}

impl Label {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Primary => "P",
            Self::Secondary => "S",
            Self::Danger => "D",
        }
    }
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "P" => Some(Self::Primary),
            "S" => Some(Self::Secondary),
            "D" => Some(Self::Danger),
            _ => None,
        }
    }
}

/// A product option axis, e.g. "size". Names are unique per item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variation {
    pub name: String,
    pub options: Vec<ItemVariation>,
}

/// A concrete option value, e.g. "M". Values are unique per variation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemVariation {
    pub value: String,
    pub attachment: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Item {
    pub(crate) id: Uuid,
    pub(crate) slug: Slug,
    pub(crate) title: String,
    pub(crate) description: String,
    pub(crate) category: Category,
    pub(crate) label: Label,
    pub(crate) image_url: Option<String>,
    pub(crate) pricing: Pricing,
    pub(crate) stock_quantity: i32,
    pub(crate) variations: Vec<Variation>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
    pub(crate) events: Vec<DomainEvent>,
}

impl Item {
    pub fn create(slug: Slug, title: impl Into<String>, category: Category, label: Label, pricing: Pricing) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(), slug, title: title.into(), description: String::new(),
            category, label, image_url: None, pricing, stock_quantity: 0,
            variations: vec![], created_at: now, updated_at: now, events: vec![],
        }
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn slug(&self) -> &Slug { &self.slug }
    pub fn title(&self) -> &str { &self.title }
    pub fn description(&self) -> &str { &self.description }
    pub fn category(&self) -> Category { self.category }
    pub fn label(&self) -> Label { self.label }
    pub fn image_url(&self) -> Option<&str> { self.image_url.as_deref() }
    pub fn pricing(&self) -> &Pricing { &self.pricing }
    pub fn stock_quantity(&self) -> i32 { self.stock_quantity }
    pub fn variations(&self) -> &[Variation] { &self.variations }

    pub fn set_description(&mut self, text: impl Into<String>) { self.description = text.into(); self.touch(); }
    pub fn set_image_url(&mut self, url: impl Into<String>) { self.image_url = Some(url.into()); self.touch(); }
    pub fn update_pricing(&mut self, pricing: Pricing) { self.pricing = pricing; self.touch(); }

    pub fn is_in_stock(&self) -> bool { self.stock_quantity > 0 }

    /// Whether the requested quantity can be served from current stock.
    /// Callers pass positive quantities; no validation happens here.
    pub fn can_fulfill(&self, quantity: i32) -> bool { self.stock_quantity >= quantity }

    /// Decrement stock. Fails without touching state when the request
    /// exceeds what is available.
    pub fn reduce_stock(&mut self, quantity: i32) -> Result<()> {
        if quantity > self.stock_quantity {
            return Err(CheckoutError::InsufficientStock { available: self.stock_quantity });
        }
        self.stock_quantity -= quantity;
        let remaining = self.stock_quantity;
        self.touch();
        self.raise_event(DomainEvent::Stock(StockEvent::Reduced { item_id: self.id, quantity, remaining }));
        Ok(())
    }

    /// Restocking. Unconditional; negative quantities are the caller's
    /// responsibility.
    pub fn increase_stock(&mut self, quantity: i32) {
        self.stock_quantity += quantity;
        self.touch();
        self.raise_event(DomainEvent::Stock(StockEvent::Restocked { item_id: self.id, quantity }));
    }

    pub fn stock_status(&self) -> StockStatus {
        if self.stock_quantity == 0 {
            StockStatus::OutOfStock
        } else if self.stock_quantity <= LOW_STOCK_MAX {
            StockStatus::LowStock
        } else {
            StockStatus::InStock
        }
    }

    /// Add an option axis; returns false when the name already exists.
    pub fn add_variation(&mut self, name: impl Into<String>) -> bool {
        let name = name.into();
        if self.variations.iter().any(|v| v.name == name) { return false; }
        self.variations.push(Variation { name, options: vec![] });
        self.touch();
        true
    }

    /// Add an option value to an existing axis; returns false when the axis
    /// is missing or the value already exists.
    pub fn add_variation_option(&mut self, name: &str, value: impl Into<String>) -> bool {
        let value = value.into();
        let Some(variation) = self.variations.iter_mut().find(|v| v.name == name) else { return false; };
        if variation.options.iter().any(|o| o.value == value) { return false; }
        variation.options.push(ItemVariation { value, attachment: None });
        self.touch();
        true
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn item_with_stock(stock: i32) -> Item {
        let mut item = Item::create(
            Slug::new("test-shirt").unwrap(),
            "Test Shirt",
            Category::Shirt,
            Label::Primary,
            Pricing::new(Decimal::new(2500, 2), None).unwrap(),
        );
        item.increase_stock(stock);
        item
    }

    #[test]
    fn test_in_stock() {
        assert!(item_with_stock(1).is_in_stock());
        assert!(!item_with_stock(0).is_in_stock());
    }

    #[test]
    fn test_can_fulfill() {
        let item = item_with_stock(10);
        assert!(item.can_fulfill(10));
        assert!(item.can_fulfill(3));
        assert!(!item.can_fulfill(11));
    }

    #[test]
    fn test_reduce_stock() {
        let mut item = item_with_stock(10);
        item.reduce_stock(3).unwrap();
        assert_eq!(item.stock_quantity(), 7);

        let err = item.reduce_stock(12).unwrap_err();
        assert!(matches!(err, CheckoutError::InsufficientStock { available: 7 }));
        assert_eq!(item.stock_quantity(), 7); // unchanged on failure
    }

    #[test]
    fn test_insufficient_stock_message_reports_remaining() {
        let mut item = item_with_stock(2);
        let err = item.reduce_stock(5).unwrap_err();
        assert!(err.to_string().contains('2'));
    }

    #[test]
    fn test_increase_stock_restocking() {
        let mut item = item_with_stock(0);
        item.increase_stock(4);
        assert_eq!(item.stock_quantity(), 4);
    }

    #[test]
    fn test_stock_status_categories() {
        assert_eq!(item_with_stock(0).stock_status(), StockStatus::OutOfStock);
        assert_eq!(item_with_stock(3).stock_status(), StockStatus::LowStock);
        assert_eq!(item_with_stock(5).stock_status(), StockStatus::LowStock);
        assert_eq!(item_with_stock(6).stock_status(), StockStatus::InStock);
        assert_eq!(item_with_stock(10).stock_status(), StockStatus::InStock);
    }

    #[test]
    fn test_stock_events() {
        let mut item = item_with_stock(10);
        item.take_events();
        item.reduce_stock(4).unwrap();
        let events = item.take_events();
        assert!(matches!(
            events.as_slice(),
            [DomainEvent::Stock(StockEvent::Reduced { quantity: 4, remaining: 6, .. })]
        ));
    }

    #[test]
    fn test_variations_unique() {
        let mut item = item_with_stock(1);
        assert!(item.add_variation("size"));
        assert!(!item.add_variation("size"));
        assert!(item.add_variation_option("size", "M"));
        assert!(!item.add_variation_option("size", "M"));
        assert!(!item.add_variation_option("color", "red"));
    }
}
