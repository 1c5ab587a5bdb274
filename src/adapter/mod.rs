//! Uniform contract over the marketplace APIs.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Adapter Module                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │  types.rs     - Platform, normalized order/product DTOs      │
//! │  error.rs     - AdapterError (+ Classify for retries)        │
//! │  config.rs    - AdapterConfig, default endpoints             │
//! │  signing.rs   - HMAC / SHA-256 / MD5 / canonical params      │
//! │  http.rs      - HttpTransport over reqwest                   │
//! │  json.rs      - lenient JSON readers                         │
//! │  factory.rs   - AdapterFactory                               │
//! │  memory.rs    - in-process marketplace for tests             │
//! │  <platform>.rs - one adapter per marketplace                 │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Adapters only speak HTTP. They do not rate limit or retry; callers wrap
//! every network call with `RateLimiter::acquire` and
//! `RetryManager::execute_with_retry` (the batch optimizer and
//! `SyncContext::call_adapter` do both).

pub mod aliexpress;
pub mod amazon;
pub mod config;
pub mod error;
pub mod factory;
pub mod http;
pub mod jumia;
pub(crate) mod json;
pub mod lazada;
pub mod memory;
pub mod mercadolibre;
pub mod signing;
pub mod temu;
pub mod tiktok;
pub mod types;
pub mod wish;

pub use self::config::{default_base_url, AdapterConfig};
pub use self::error::AdapterError;
pub use self::factory::AdapterFactory;
pub use self::http::HttpTransport;
pub use self::memory::MemoryAdapter;
pub use self::types::{
    BatchItemResult, InventoryUpdate, NormalizedOrder, NormalizedOrderItem, NormalizedProduct, OrderFilter,
    OrderStatus, Platform, ProductDraft, ProductFilter, ProductStatus, ProductUpdate, ShippingAddress,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Operations that may have a native multi-item endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOperation {
    ProductCreate,
    ProductUpdate,
    InventoryUpdate,
}

impl BatchOperation {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProductCreate => "product_create",
            Self::ProductUpdate => "product_update",
            Self::InventoryUpdate => "inventory_update",
        }
    }

    /// Endpoint label used when recording API calls.
    #[must_use]
    pub fn endpoint(&self) -> &'static str {
        match self {
            Self::ProductCreate => "/products/batch_create",
            Self::ProductUpdate => "/products/batch_update",
            Self::InventoryUpdate => "/inventory/batch_update",
        }
    }
}

impl fmt::Display for BatchOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One marketplace account.
///
/// Operations the platform has no API for return
/// [`AdapterError::Unsupported`]; they never silently succeed. Status
/// updates the platform cannot express return `Ok(false)`.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    /// Cheap authenticated call; any failure (including transport) is `false`.
    async fn test_connection(&self) -> bool;

    async fn get_orders(&self, filter: &OrderFilter) -> Result<Vec<NormalizedOrder>, AdapterError>;

    async fn get_order(&self, order_id: &str) -> Result<NormalizedOrder, AdapterError>;

    async fn update_order_status(
        &self,
        order_id: &str,
        status: OrderStatus,
        tracking_number: Option<&str>,
    ) -> Result<bool, AdapterError>;

    async fn get_products(&self, filter: &ProductFilter) -> Result<Vec<NormalizedProduct>, AdapterError>;

    async fn get_product(&self, product_id: &str) -> Result<NormalizedProduct, AdapterError>;

    async fn create_product(&self, draft: &ProductDraft) -> Result<NormalizedProduct, AdapterError>;

    async fn update_product(&self, product_id: &str, draft: &ProductDraft) -> Result<NormalizedProduct, AdapterError>;

    async fn delete_product(&self, product_id: &str) -> Result<bool, AdapterError>;

    async fn update_inventory(&self, sku: &str, quantity: u32) -> Result<bool, AdapterError>;

    /// One result per update, in input order, from a single native call.
    ///
    /// Platforms without a multi-item inventory endpoint report
    /// `Unsupported`; the per-item fallback belongs to the caller, which
    /// rate limits and retries each call.
    async fn batch_update_inventory(&self, _updates: &[InventoryUpdate]) -> Result<Vec<BatchItemResult>, AdapterError> {
        Err(AdapterError::unsupported(self.platform(), "batch_update_inventory"))
    }

    /// Whether `operation` maps to a single multi-item platform call.
    fn supports_native_batch(&self, _operation: BatchOperation) -> bool {
        false
    }

    async fn batch_create_products(&self, _drafts: &[ProductDraft]) -> Result<Vec<BatchItemResult>, AdapterError> {
        Err(AdapterError::unsupported(self.platform(), "batch_create_products"))
    }

    async fn batch_update_products(&self, _updates: &[ProductUpdate]) -> Result<Vec<BatchItemResult>, AdapterError> {
        Err(AdapterError::unsupported(self.platform(), "batch_update_products"))
    }
}

/// Shared handling for platforms that can only report shipment: anything
/// but `shipped` with a tracking number is refused with `Ok(false)`.
pub(crate) fn shipment_tracking<'a>(
    platform: Platform,
    order_id: &str,
    status: OrderStatus,
    tracking_number: Option<&'a str>,
) -> Option<&'a str> {
    match (status, tracking_number) {
        (OrderStatus::Shipped, Some(tracking)) if !tracking.is_empty() => Some(tracking),
        _ => {
            warn!(
                platform = %platform,
                order_id,
                status = %status,
                "Only 'shipped' with a tracking number can be pushed to this platform"
            );
            None
        }
    }
}

/// JSON body for platforms that take the draft's fields by their own names.
/// Creates fill in the default stock and empty image/variant lists; updates
/// carry only the fields that are set.
pub(crate) fn product_body(draft: &ProductDraft, for_create: bool) -> serde_json::Map<String, serde_json::Value> {
    use serde_json::{json, Value};

    let mut body = serde_json::Map::new();
    if let Some(name) = &draft.name {
        body.insert("name".into(), json!(name));
    }
    if let Some(description) = &draft.description {
        body.insert("description".into(), json!(description));
    }
    if let Some(price) = draft.price {
        body.insert("price".into(), json!(price));
    }
    match draft.stock {
        Some(stock) => {
            body.insert("stock".into(), json!(stock));
        }
        None if for_create => {
            body.insert("stock".into(), json!(ProductDraft::DEFAULT_STOCK));
        }
        None => {}
    }
    if for_create || !draft.images.is_empty() {
        body.insert("images".into(), json!(draft.images));
    }
    if for_create || !draft.skus.is_empty() {
        body.insert("skus".into(), Value::Array(draft.skus.clone()));
    }
    body
}

/// Log-and-false wrapper for `test_connection` implementations.
pub(crate) fn connection_ok(platform: Platform, outcome: Result<bool, AdapterError>) -> bool {
    match outcome {
        Ok(ok) => ok,
        Err(err) => {
            warn!(platform = %platform, error = %err, "Connection test failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Adapter whose single-item inventory call fails for SKUs starting with "bad".
    struct Scripted {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PlatformAdapter for Scripted {
        fn platform(&self) -> Platform {
            Platform::Wish
        }
        async fn test_connection(&self) -> bool {
            true
        }
        async fn get_orders(&self, _: &OrderFilter) -> Result<Vec<NormalizedOrder>, AdapterError> {
            Ok(Vec::new())
        }
        async fn get_order(&self, id: &str) -> Result<NormalizedOrder, AdapterError> {
            Err(AdapterError::NotFound(id.to_string()))
        }
        async fn update_order_status(&self, _: &str, _: OrderStatus, _: Option<&str>) -> Result<bool, AdapterError> {
            Ok(false)
        }
        async fn get_products(&self, _: &ProductFilter) -> Result<Vec<NormalizedProduct>, AdapterError> {
            Ok(Vec::new())
        }
        async fn get_product(&self, id: &str) -> Result<NormalizedProduct, AdapterError> {
            Err(AdapterError::NotFound(id.to_string()))
        }
        async fn create_product(&self, _: &ProductDraft) -> Result<NormalizedProduct, AdapterError> {
            Err(AdapterError::unsupported(Platform::Wish, "create_product"))
        }
        async fn update_product(&self, _: &str, _: &ProductDraft) -> Result<NormalizedProduct, AdapterError> {
            Err(AdapterError::unsupported(Platform::Wish, "update_product"))
        }
        async fn delete_product(&self, _: &str) -> Result<bool, AdapterError> {
            Ok(false)
        }
        async fn update_inventory(&self, sku: &str, _: u32) -> Result<bool, AdapterError> {
            self.seen.lock().push(sku.to_string());
            if sku.starts_with("bad") {
                Err(AdapterError::Http { status: 400, body: "invalid sku".into() })
            } else {
                Ok(sku != "refused")
            }
        }
    }

    #[tokio::test]
    async fn test_default_batch_inventory_is_unsupported_without_calls() {
        let adapter = Scripted { seen: Mutex::new(Vec::new()) };
        let updates = vec![InventoryUpdate::new("a", 1), InventoryUpdate::new("b", 4)];

        let err = adapter.batch_update_inventory(&updates).await.unwrap_err();
        assert!(err.is_unsupported());
        assert!(err.to_string().contains("batch_update_inventory"));
        // no single-item requests went out on the caller's behalf
        assert!(adapter.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_batch_product_defaults_are_unsupported() {
        let adapter = Scripted { seen: Mutex::new(Vec::new()) };
        assert!(!adapter.supports_native_batch(BatchOperation::InventoryUpdate));
        let err = adapter.batch_create_products(&[ProductDraft::named("x")]).await.unwrap_err();
        assert!(err.is_unsupported());
        let err = adapter.batch_update_products(&[]).await.unwrap_err();
        assert!(err.is_unsupported());
    }

    #[test]
    fn test_product_body_create_vs_update() {
        let draft = ProductDraft::named("Lamp").with_price(12.5);
        let create = product_body(&draft, true);
        assert_eq!(create["stock"], 100);
        assert_eq!(create["images"], serde_json::json!([]));
        assert_eq!(create["price"], 12.5);

        let update = product_body(&draft, false);
        assert!(!update.contains_key("stock"));
        assert!(!update.contains_key("images"));
        assert_eq!(update["name"], "Lamp");
    }

    #[test]
    fn test_shipment_tracking_gate() {
        assert_eq!(shipment_tracking(Platform::Wish, "1", OrderStatus::Shipped, Some("TRK")), Some("TRK"));
        assert_eq!(shipment_tracking(Platform::Wish, "1", OrderStatus::Shipped, Some("")), None);
        assert_eq!(shipment_tracking(Platform::Wish, "1", OrderStatus::Shipped, None), None);
        assert_eq!(shipment_tracking(Platform::Wish, "1", OrderStatus::Delivered, Some("TRK")), None);
    }
}
