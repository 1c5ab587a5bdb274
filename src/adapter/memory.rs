// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process marketplace for tests and local runs.
//!
//! Orders, products and stock live in `DashMap`s. Keys can be scripted to
//! fail, either on every call (a non-retryable API rejection) or for the
//! next few calls (a retryable timeout), which is enough to drive the
//! retry and per-item isolation paths without a network.

use super::{
    AdapterError, BatchItemResult, BatchOperation, InventoryUpdate, NormalizedOrder, NormalizedProduct, OrderFilter,
    OrderStatus, Platform, PlatformAdapter, ProductDraft, ProductFilter, ProductStatus, ProductUpdate,
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[derive(Debug, Clone, Copy)]
enum Fault {
    Always,
    Times(u32),
}

pub struct MemoryAdapter {
    platform: Platform,
    orders: DashMap<String, NormalizedOrder>,
    products: DashMap<String, NormalizedProduct>,
    faults: DashMap<String, Fault>,
    native_batch: bool,
    online: AtomicBool,
    next_id: AtomicU64,
    calls: AtomicU64,
}

impl MemoryAdapter {
    #[must_use]
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            orders: DashMap::new(),
            products: DashMap::new(),
            faults: DashMap::new(),
            native_batch: false,
            online: AtomicBool::new(true),
            next_id: AtomicU64::new(1),
            calls: AtomicU64::new(0),
        }
    }

    /// Advertise native multi-item endpoints for product and inventory
    /// writes.
    #[must_use]
    pub fn with_native_batch(mut self, native: bool) -> Self {
        self.native_batch = native;
        self
    }

    pub fn insert_order(&self, order: NormalizedOrder) {
        self.orders.insert(order.order_id.clone(), order);
    }

    pub fn insert_product(&self, product: NormalizedProduct) {
        self.products.insert(product.id.clone(), product);
    }

    /// Every call touching `key` (order id, product id or SKU) fails with a
    /// non-retryable rejection.
    pub fn fail_always(&self, key: impl Into<String>) {
        self.faults.insert(key.into(), Fault::Always);
    }

    /// The next `times` calls touching `key` time out.
    pub fn fail_times(&self, key: impl Into<String>, times: u32) {
        self.faults.insert(key.into(), Fault::Times(times));
    }

    /// Simulate the platform being unreachable.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Calls made so far, batch calls counting once.
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn stock(&self, sku: &str) -> Option<u32> {
        self.products.iter().find(|p| p.sku == sku).map(|p| p.stock)
    }

    #[must_use]
    pub fn product_count(&self) -> usize {
        self.products.len()
    }

    fn enter(&self) -> Result<(), AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AdapterError::Transport(format!("{} unreachable", self.platform)))
        }
    }

    fn check(&self, key: &str) -> Result<(), AdapterError> {
        let Some(mut fault) = self.faults.get_mut(key) else {
            return Ok(());
        };
        match *fault {
            Fault::Always => Err(AdapterError::Api { code: "400".into(), message: format!("'{key}' rejected") }),
            Fault::Times(0) => Ok(()),
            Fault::Times(left) => {
                *fault = Fault::Times(left - 1);
                Err(AdapterError::Timeout(format!("'{key}' timed out")))
            }
        }
    }

    fn apply(&self, product: &mut NormalizedProduct, draft: &ProductDraft) {
        if let Some(sku) = &draft.sku {
            product.sku.clone_from(sku);
        }
        if let Some(name) = &draft.name {
            product.name.clone_from(name);
        }
        if let Some(description) = &draft.description {
            product.description.clone_from(description);
        }
        if let Some(price) = draft.price {
            product.price = price;
        }
        if let Some(currency) = &draft.currency {
            product.currency.clone_from(currency);
        }
        if let Some(stock) = draft.stock {
            product.stock = stock;
        }
        if !draft.images.is_empty() {
            product.images.clone_from(&draft.images);
        }
    }

    fn create(&self, draft: &ProductDraft) -> Result<NormalizedProduct, AdapterError> {
        let key = draft.batch_key(0);
        self.check(&key)?;
        let id = format!("{}-{}", self.platform.as_str(), self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut product = NormalizedProduct {
            id: id.clone(),
            sku: key,
            name: String::new(),
            description: String::new(),
            price: 0.0,
            currency: "USD".into(),
            stock: ProductDraft::DEFAULT_STOCK,
            status: ProductStatus::OnSale,
            images: Vec::new(),
        };
        self.apply(&mut product, draft);
        self.products.insert(id, product.clone());
        Ok(product)
    }

    fn update(&self, product_id: &str, draft: &ProductDraft) -> Result<NormalizedProduct, AdapterError> {
        self.check(product_id)?;
        let mut product = self
            .products
            .get_mut(product_id)
            .ok_or_else(|| AdapterError::NotFound(format!("product {product_id}")))?;
        self.apply(&mut product, draft);
        Ok(product.clone())
    }

    fn set_stock(&self, sku: &str, quantity: u32) -> Result<bool, AdapterError> {
        self.check(sku)?;
        let mut found = false;
        for mut product in self.products.iter_mut().filter(|p| p.sku == sku) {
            product.stock = quantity;
            found = true;
        }
        Ok(found)
    }
}

impl std::fmt::Debug for MemoryAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryAdapter")
            .field("platform", &self.platform)
            .field("orders", &self.orders.len())
            .field("products", &self.products.len())
            .field("native_batch", &self.native_batch)
            .finish()
    }
}

fn outcome(key: &str, result: Result<bool, AdapterError>) -> BatchItemResult {
    match result {
        Ok(true) => BatchItemResult::ok(key),
        Ok(false) => BatchItemResult::failed(key, "rejected by platform"),
        Err(e) => BatchItemResult::failed(key, e.to_string()),
    }
}

#[async_trait]
impl PlatformAdapter for MemoryAdapter {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn test_connection(&self) -> bool {
        self.enter().is_ok()
    }

    async fn get_orders(&self, filter: &OrderFilter) -> Result<Vec<NormalizedOrder>, AdapterError> {
        self.enter()?;
        let mut orders: Vec<NormalizedOrder> = self
            .orders
            .iter()
            .filter(|o| filter.status.as_deref().map_or(true, |s| o.status.as_str() == s))
            .map(|o| o.clone())
            .collect();
        orders.sort_by(|a, b| a.order_id.cmp(&b.order_id));
        Ok(orders.into_iter().skip(filter.offset as usize).take(filter.limit as usize).collect())
    }

    async fn get_order(&self, order_id: &str) -> Result<NormalizedOrder, AdapterError> {
        self.enter()?;
        self.check(order_id)?;
        self.orders
            .get(order_id)
            .map(|o| o.clone())
            .ok_or_else(|| AdapterError::NotFound(format!("order {order_id}")))
    }

    async fn update_order_status(
        &self,
        order_id: &str,
        status: OrderStatus,
        tracking_number: Option<&str>,
    ) -> Result<bool, AdapterError> {
        self.enter()?;
        self.check(order_id)?;
        if status == OrderStatus::Shipped && tracking_number.is_none() {
            return Ok(false);
        }
        match self.orders.get_mut(order_id) {
            Some(mut order) => {
                order.status = status;
                Ok(true)
            }
            None => Err(AdapterError::NotFound(format!("order {order_id}"))),
        }
    }

    async fn get_products(&self, filter: &ProductFilter) -> Result<Vec<NormalizedProduct>, AdapterError> {
        self.enter()?;
        let mut products: Vec<NormalizedProduct> = self
            .products
            .iter()
            .filter(|p| filter.sku.as_deref().map_or(true, |sku| p.sku == sku))
            .filter(|p| filter.status.as_deref().map_or(true, |s| p.status.as_str() == s))
            .map(|p| p.clone())
            .collect();
        products.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(products.into_iter().skip(filter.offset as usize).take(filter.limit as usize).collect())
    }

    async fn get_product(&self, product_id: &str) -> Result<NormalizedProduct, AdapterError> {
        self.enter()?;
        self.check(product_id)?;
        self.products
            .get(product_id)
            .map(|p| p.clone())
            .ok_or_else(|| AdapterError::NotFound(format!("product {product_id}")))
    }

    async fn create_product(&self, draft: &ProductDraft) -> Result<NormalizedProduct, AdapterError> {
        self.enter()?;
        self.create(draft)
    }

    async fn update_product(&self, product_id: &str, draft: &ProductDraft) -> Result<NormalizedProduct, AdapterError> {
        self.enter()?;
        self.update(product_id, draft)
    }

    async fn delete_product(&self, product_id: &str) -> Result<bool, AdapterError> {
        self.enter()?;
        self.check(product_id)?;
        Ok(self.products.remove(product_id).is_some())
    }

    async fn update_inventory(&self, sku: &str, quantity: u32) -> Result<bool, AdapterError> {
        self.enter()?;
        self.set_stock(sku, quantity)
    }

    async fn batch_update_inventory(&self, updates: &[InventoryUpdate]) -> Result<Vec<BatchItemResult>, AdapterError> {
        self.enter()?;
        Ok(updates
            .iter()
            .map(|u| outcome(&u.sku, self.set_stock(&u.sku, u.quantity)))
            .collect())
    }

    fn supports_native_batch(&self, _operation: BatchOperation) -> bool {
        self.native_batch
    }

    async fn batch_create_products(&self, drafts: &[ProductDraft]) -> Result<Vec<BatchItemResult>, AdapterError> {
        self.enter()?;
        Ok(drafts
            .iter()
            .enumerate()
            .map(|(i, draft)| {
                let key = draft.batch_key(i);
                match self.create(draft) {
                    Ok(product) => BatchItemResult::ok(key).with_product_id(product.id),
                    Err(e) => BatchItemResult::failed(key, e.to_string()),
                }
            })
            .collect())
    }

    async fn batch_update_products(&self, updates: &[ProductUpdate]) -> Result<Vec<BatchItemResult>, AdapterError> {
        self.enter()?;
        Ok(updates
            .iter()
            .map(|u| match self.update(&u.product_id, &u.draft) {
                Ok(_) => BatchItemResult::ok(&u.product_id).with_product_id(&u.product_id),
                Err(e) => BatchItemResult::failed(&u.product_id, e.to_string()),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_update_and_stock() {
        let adapter = MemoryAdapter::new(Platform::Wish);
        let created = adapter
            .create_product(&ProductDraft::named("Mug").with_sku("MUG-1").with_price(9.5))
            .await
            .unwrap();
        assert_eq!(created.stock, ProductDraft::DEFAULT_STOCK);

        assert!(adapter.update_inventory("MUG-1", 7).await.unwrap());
        assert_eq!(adapter.stock("MUG-1"), Some(7));
        assert!(!adapter.update_inventory("NOPE", 1).await.unwrap());

        let updated = adapter.update_product(&created.id, &ProductDraft::named("Big mug")).await.unwrap();
        assert_eq!(updated.name, "Big mug");
        assert_eq!(updated.sku, "MUG-1");
    }

    #[tokio::test]
    async fn test_scripted_faults() {
        let adapter = MemoryAdapter::new(Platform::Jumia);
        adapter.insert_order(NormalizedOrder { order_id: "O1".into(), ..NormalizedOrder::default() });
        adapter.fail_times("O1", 1);
        adapter.fail_always("O2");

        assert!(matches!(adapter.get_order("O1").await, Err(AdapterError::Timeout(_))));
        assert!(adapter.get_order("O1").await.is_ok());
        assert!(matches!(adapter.get_order("O2").await, Err(AdapterError::Api { .. })));
        assert!(matches!(adapter.get_order("O3").await, Err(AdapterError::NotFound(_))));

        adapter.set_online(false);
        assert!(!adapter.test_connection().await);
        assert_eq!(adapter.calls(), 5);
    }

    #[tokio::test]
    async fn test_shipping_needs_tracking() {
        let adapter = MemoryAdapter::new(Platform::Temu);
        adapter.insert_order(NormalizedOrder { order_id: "O1".into(), ..NormalizedOrder::default() });
        assert!(!adapter.update_order_status("O1", OrderStatus::Shipped, None).await.unwrap());
        assert!(adapter.update_order_status("O1", OrderStatus::Shipped, Some("TRK")).await.unwrap());
        let orders = adapter.get_orders(&OrderFilter { status: Some("shipped".into()), ..OrderFilter::default() }).await.unwrap();
        assert_eq!(orders.len(), 1);
    }

    #[tokio::test]
    async fn test_native_batch_reports_each_item() {
        let adapter = MemoryAdapter::new(Platform::TikTok).with_native_batch(true);
        adapter.fail_always("B");
        let results = adapter
            .batch_create_products(&[ProductDraft::named("A"), ProductDraft::named("B")])
            .await
            .unwrap();
        assert!(results[0].success && results[0].product_id.is_some());
        assert!(!results[1].success);
        assert_eq!(adapter.calls(), 1);
        assert!(adapter.supports_native_batch(BatchOperation::ProductCreate));
    }
}
