// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Platform-neutral order, product and inventory records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Supported marketplaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    AliExpress,
    Amazon,
    Lazada,
    TikTok,
    Temu,
    Wish,
    MercadoLibre,
    Jumia,
}

impl Platform {
    pub const ALL: [Platform; 8] = [
        Platform::AliExpress,
        Platform::Amazon,
        Platform::Lazada,
        Platform::TikTok,
        Platform::Temu,
        Platform::Wish,
        Platform::MercadoLibre,
        Platform::Jumia,
    ];

    /// Identifier used in store keys, config tables and metric labels.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AliExpress => "aliexpress",
            Self::Amazon => "amazon",
            Self::Lazada => "lazada",
            Self::TikTok => "tiktok",
            Self::Temu => "temu",
            Self::Wish => "wish",
            Self::MercadoLibre => "mercadolibre",
            Self::Jumia => "jumia",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Platform::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == wanted)
            .ok_or_else(|| format!("unknown platform: {s}"))
    }
}

/// Order lifecycle shared by every platform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    #[default]
    Pending,
    Paid,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 7] = [
        OrderStatus::Pending,
        OrderStatus::Paid,
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
        OrderStatus::Refunded,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .iter()
            .copied()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| format!("unknown order status: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProductStatus {
    #[serde(rename = "onsale")]
    OnSale,
    #[serde(rename = "offshelf")]
    OffShelf,
}

impl ProductStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OnSale => "onsale",
            Self::OffShelf => "offshelf",
        }
    }
}

impl fmt::Display for ProductStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub address: String,
    pub city: String,
    pub state: String,
    pub country: String,
    pub postal_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedOrderItem {
    pub sku: Option<String>,
    pub product_name: Option<String>,
    pub quantity: u32,
    pub unit_price: f64,
    pub product_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedOrder {
    pub order_id: String,
    pub status: OrderStatus,
    pub amount: f64,
    pub currency: String,
    pub buyer_email: Option<String>,
    pub buyer_name: Option<String>,
    pub buyer_phone: Option<String>,
    pub shipping_address: ShippingAddress,
    /// Creation time as reported by the platform, unparsed
    pub created_at: Option<String>,
    pub items: Vec<NormalizedOrderItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedProduct {
    pub id: String,
    pub sku: String,
    pub name: String,
    pub description: String,
    pub price: f64,
    pub currency: String,
    pub stock: u32,
    pub status: ProductStatus,
    pub images: Vec<String>,
}

/// At most this many images are carried on a normalized product.
pub const MAX_PRODUCT_IMAGES: usize = 6;

/// Create/update payload. Unset fields are left untouched on update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductDraft {
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub stock: Option<u32>,
    #[serde(default)]
    pub images: Vec<String>,
    /// Platform-specific variant payloads, passed through as-is
    #[serde(default)]
    pub skus: Vec<Value>,
}

impl ProductDraft {
    /// Stock used on create when none is given.
    pub const DEFAULT_STOCK: u32 = 100;

    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: Some(name.into()), ..Self::default() }
    }

    #[must_use]
    pub fn with_sku(mut self, sku: impl Into<String>) -> Self {
        self.sku = Some(sku.into());
        self
    }

    #[must_use]
    pub fn with_price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    #[must_use]
    pub fn with_stock(mut self, stock: u32) -> Self {
        self.stock = Some(stock);
        self
    }

    /// Identifier reported for this draft in batch results: the SKU, else
    /// the name, else its position in the input.
    #[must_use]
    pub fn batch_key(&self, position: usize) -> String {
        self.sku
            .clone()
            .or_else(|| self.name.clone())
            .unwrap_or_else(|| format!("#{position}"))
    }
}

/// One entry of a batch product update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductUpdate {
    pub product_id: String,
    #[serde(flatten)]
    pub draft: ProductDraft,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryUpdate {
    pub sku: String,
    pub quantity: u32,
}

impl InventoryUpdate {
    #[must_use]
    pub fn new(sku: impl Into<String>, quantity: u32) -> Self {
        Self { sku: sku.into(), quantity }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderFilter {
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    /// Platform-native status value
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default = "default_page_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

impl Default for OrderFilter {
    fn default() -> Self {
        Self { start_date: None, end_date: None, status: None, limit: default_page_limit(), offset: 0 }
    }
}

impl OrderFilter {
    #[must_use]
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start_date: Some(start), end_date: Some(end), ..Self::default() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductFilter {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default = "default_page_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

impl Default for ProductFilter {
    fn default() -> Self {
        Self { status: None, sku: None, limit: default_page_limit(), offset: 0 }
    }
}

fn default_page_limit() -> u32 {
    100
}

/// Outcome of one item of a batch call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItemResult {
    /// The input identifier (SKU, product id, or draft key)
    pub key: String,
    pub success: bool,
    /// Platform id assigned on create
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchItemResult {
    #[must_use]
    pub fn ok(key: impl Into<String>) -> Self {
        Self { key: key.into(), success: true, product_id: None, error: None }
    }

    #[must_use]
    pub fn failed(key: impl Into<String>, error: impl Into<String>) -> Self {
        Self { key: key.into(), success: false, product_id: None, error: Some(error.into()) }
    }

    #[must_use]
    pub fn with_product_id(mut self, id: impl Into<String>) -> Self {
        self.product_id = Some(id.into());
        self
    }
}
