// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! TikTok Shop.
//!
//! Credentials: `app_key`, `app_secret`, `seller_id` (the shop id) and
//! `access_token` (sent as `x-tts-access-token`). Every request carries
//! `app_key`, `shop_id`, `timestamp` and `sign`, where `sign` is the hex
//! HMAC-SHA256 (keyed with the app secret) of
//! `app_key + path + sorted k=v&k=v + timestamp + sorted compact JSON body`.

use super::http::{ApiRequest, HttpTransport};
use super::json;
use super::signing::{canonical_json, hmac_sha256_hex, join_pairs, Params};
use super::{
    connection_ok, product_body, shipment_tracking, AdapterConfig, AdapterError, BatchItemResult, BatchOperation,
    InventoryUpdate, NormalizedOrder, NormalizedOrderItem, NormalizedProduct, OrderFilter, OrderStatus, Platform,
    PlatformAdapter, ProductDraft, ProductFilter, ProductStatus, ShippingAddress,
};
use crate::adapter::types::MAX_PRODUCT_IMAGES;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Value};

#[derive(Debug, Clone)]
pub struct TikTokAdapter {
    http: HttpTransport,
    app_key: String,
    app_secret: String,
    shop_id: String,
    access_token: String,
    logistics_provider: String,
}

impl TikTokAdapter {
    pub fn new(config: &AdapterConfig) -> Result<Self, AdapterError> {
        Ok(Self {
            http: HttpTransport::new(config)?,
            app_key: config.require(&config.app_key, "app_key")?.to_string(),
            app_secret: config.require(&config.app_secret, "app_secret")?.to_string(),
            shop_id: config.require(&config.seller_id, "seller_id (shop id)")?.to_string(),
            access_token: config.access_token.clone().unwrap_or_default(),
            logistics_provider: config.extra_or("logistics_provider", "OTHER").to_string(),
        })
    }

    fn sign(&self, path: &str, params: &Params, timestamp: &str, body: Option<&Value>) -> Result<String, AdapterError> {
        let body = body.map(canonical_json).unwrap_or_default();
        let message = format!("{}{}{}{}{}", self.app_key, path, join_pairs(params), timestamp, body);
        hmac_sha256_hex(&self.app_secret, &message)
    }

    async fn call(&self, method: Method, path: &str, extra: Params, body: Option<Value>) -> Result<Value, AdapterError> {
        let mut params = extra;
        params.insert("app_key".into(), self.app_key.clone());
        params.insert("shop_id".into(), self.shop_id.clone());

        let timestamp = Utc::now().timestamp().to_string();
        let sign = self.sign(path, &params, &timestamp, body.as_ref())?;
        params.insert("sign".into(), sign);
        params.insert("timestamp".into(), timestamp);

        let mut request = ApiRequest::new(method, path)
            .query(params)
            .header("x-tts-access-token", self.access_token.clone());
        if let Some(body) = body {
            request = request.json(body);
        }
        self.http.send(request).await
    }

    async fn write(&self, path: &str, body: Value) -> Result<bool, AdapterError> {
        let response = self.call(Method::POST, path, Params::new(), Some(body)).await?;
        Ok(json::code_is_zero(&response))
    }
}

fn ensure_ok(response: Value) -> Result<Value, AdapterError> {
    if response.get("code").is_none() || json::code_is_zero(&response) {
        Ok(response)
    } else {
        Err(AdapterError::Api {
            code: json::text_or(&response, &["code"], "unknown"),
            message: json::text_or(&response, &["message"], ""),
        })
    }
}

#[async_trait]
impl PlatformAdapter for TikTokAdapter {
    fn platform(&self) -> Platform {
        Platform::TikTok
    }

    async fn test_connection(&self) -> bool {
        let outcome = self
            .call(Method::GET, "/api/v1/orders/auth/test", Params::new(), None)
            .await
            .map(|r| json::code_is_zero(&r));
        connection_ok(Platform::TikTok, outcome)
    }

    async fn get_orders(&self, filter: &OrderFilter) -> Result<Vec<NormalizedOrder>, AdapterError> {
        let mut params = Params::new();
        params.insert("page_size".into(), filter.limit.to_string());
        params.insert("page_number".into(), (filter.offset + 1).to_string());
        params.insert("order_status".into(), filter.status.clone().unwrap_or_default());
        if let Some(start) = filter.start_date {
            params.insert("create_time_from".into(), start.timestamp().to_string());
        }
        if let Some(end) = filter.end_date {
            params.insert("create_time_to".into(), end.timestamp().to_string());
        }
        let response = ensure_ok(self.call(Method::GET, "/api/v1/orders/query", params, None).await?)?;
        Ok(json::list_at(&response, &["data", "order_list"]).into_iter().map(parse_order).collect())
    }

    async fn get_order(&self, order_id: &str) -> Result<NormalizedOrder, AdapterError> {
        let mut params = Params::new();
        params.insert("order_id".into(), order_id.to_string());
        let response = ensure_ok(self.call(Method::GET, "/api/v1/orders/query", params, None).await?)?;
        json::list_at(&response, &["data", "order_list"])
            .first()
            .map(|order| parse_order(order))
            .ok_or_else(|| AdapterError::NotFound(format!("order {order_id}")))
    }

    async fn update_order_status(
        &self,
        order_id: &str,
        status: OrderStatus,
        tracking_number: Option<&str>,
    ) -> Result<bool, AdapterError> {
        let Some(tracking) = shipment_tracking(Platform::TikTok, order_id, status, tracking_number) else {
            return Ok(false);
        };
        let body = json!({
            "order_id": order_id,
            "tracking_number": tracking,
            "provider_type": self.logistics_provider,
        });
        self.write("/api/v1/orders/ship", body).await
    }

    async fn get_products(&self, filter: &ProductFilter) -> Result<Vec<NormalizedProduct>, AdapterError> {
        let mut params = Params::new();
        params.insert("page_size".into(), filter.limit.to_string());
        params.insert("page_number".into(), (filter.offset + 1).to_string());
        params.insert("status".into(), filter.status.clone().unwrap_or_else(|| "ACTIVE".into()));
        let response = ensure_ok(self.call(Method::GET, "/api/v1/products/query", params, None).await?)?;
        Ok(json::list_at(&response, &["data", "products"]).into_iter().map(parse_product).collect())
    }

    async fn get_product(&self, product_id: &str) -> Result<NormalizedProduct, AdapterError> {
        let mut params = Params::new();
        params.insert("product_id".into(), product_id.to_string());
        let response = ensure_ok(self.call(Method::GET, "/api/v1/products/query", params, None).await?)?;
        json::list_at(&response, &["data", "products"])
            .first()
            .map(|product| parse_product(product))
            .ok_or_else(|| AdapterError::NotFound(format!("product {product_id}")))
    }

    async fn create_product(&self, draft: &ProductDraft) -> Result<NormalizedProduct, AdapterError> {
        let body = Value::Object(product_body(draft, true));
        let response = ensure_ok(self.call(Method::POST, "/api/v1/products/create", Params::new(), Some(body)).await?)?;
        Ok(parse_product(json::at(&response, &["data", "product"])))
    }

    async fn update_product(&self, product_id: &str, draft: &ProductDraft) -> Result<NormalizedProduct, AdapterError> {
        let mut body = product_body(draft, false);
        body.insert("product_id".into(), json!(product_id));
        let response =
            ensure_ok(self.call(Method::POST, "/api/v1/products/update", Params::new(), Some(Value::Object(body))).await?)?;
        Ok(parse_product(json::at(&response, &["data", "product"])))
    }

    async fn delete_product(&self, product_id: &str) -> Result<bool, AdapterError> {
        self.write("/api/v1/products/delete", json!({ "product_id": product_id })).await
    }

    async fn update_inventory(&self, sku: &str, quantity: u32) -> Result<bool, AdapterError> {
        self.write("/api/v1/products/stocks/update", json!({ "sku_id": sku, "stock": quantity })).await
    }

    /// One call for the whole slice; the platform accepts or rejects it as
    /// a unit, and a rejection is returned as an error.
    async fn batch_update_inventory(&self, updates: &[InventoryUpdate]) -> Result<Vec<BatchItemResult>, AdapterError> {
        let stocks: Vec<Value> = updates.iter().map(|u| json!({ "sku_id": u.sku, "stock": u.quantity })).collect();
        let body = json!({ "stocks": stocks });
        ensure_ok(self.call(Method::POST, "/api/v1/products/stocks/batch_update", Params::new(), Some(body)).await?)?;
        Ok(updates.iter().map(|u| BatchItemResult::ok(&u.sku)).collect())
    }

    fn supports_native_batch(&self, operation: BatchOperation) -> bool {
        operation == BatchOperation::InventoryUpdate
    }
}

#[must_use]
pub fn map_order_status(raw: &str) -> OrderStatus {
    match raw {
        "UNPAID" => OrderStatus::Pending,
        "AWAITING_SHIPMENT" => OrderStatus::Paid,
        "AWAITING_COLLECTION" => OrderStatus::Processing,
        "IN_TRANSIT" => OrderStatus::Shipped,
        "DELIVERED" | "COMPLETED" => OrderStatus::Delivered,
        "CANCELLED" => OrderStatus::Cancelled,
        "REFUNDED" => OrderStatus::Refunded,
        _ => OrderStatus::Pending,
    }
}

#[must_use]
pub fn map_product_status(raw: &str) -> ProductStatus {
    match raw {
        "ACTIVE" | "ON_SALE" | "NORMAL" => ProductStatus::OnSale,
        _ => ProductStatus::OffShelf,
    }
}

pub(crate) fn parse_order(order: &Value) -> NormalizedOrder {
    let address = json::at(order, &["recipient_address"]);
    NormalizedOrder {
        order_id: json::text_or(order, &["order_id"], ""),
        status: map_order_status(&json::text_or(order, &["order_status"], "")),
        amount: json::number_at(order, &["total_amount"]),
        currency: json::text_or(order, &["currency"], "USD"),
        buyer_email: json::text_at(order, &["buyer_email"]),
        buyer_name: json::text_at(order, &["buyer_name"]),
        buyer_phone: json::text_at(address, &["phone"]),
        shipping_address: ShippingAddress {
            address: json::text_or(address, &["address_line1"], ""),
            city: json::text_or(address, &["city"], ""),
            state: json::text_or(address, &["state"], ""),
            country: json::text_or(address, &["country"], ""),
            postal_code: json::text_or(address, &["zip"], ""),
        },
        created_at: json::text_at(order, &["created_time"]),
        items: json::list_at(order, &["items"])
            .into_iter()
            .map(|item| NormalizedOrderItem {
                sku: json::text_at(item, &["sku_id"]),
                product_name: json::text_at(item, &["product_name"]),
                quantity: json::count_at(item, &["quantity"]),
                unit_price: json::number_at(item, &["price"]),
                product_id: json::text_at(item, &["product_id"]),
            })
            .collect(),
    }
}

pub(crate) fn parse_product(product: &Value) -> NormalizedProduct {
    let id = json::text_or(product, &["product_id"], "");
    NormalizedProduct {
        sku: id.clone(),
        id,
        name: json::text_or(product, &["name"], ""),
        description: json::text_or(product, &["description"], ""),
        price: json::number_at(product, &["price"]),
        currency: json::text_or(product, &["currency"], "USD"),
        stock: json::count_at(product, &["stock"]),
        status: map_product_status(&json::text_or(product, &["status"], "")),
        images: json::strings_at(product, &["images"], MAX_PRODUCT_IMAGES),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> TikTokAdapter {
        let config = AdapterConfig::new(Platform::TikTok)
            .with_app_credentials("key", "secret")
            .with_seller_id("7");
        TikTokAdapter::new(&config).unwrap()
    }

    fn base_params() -> Params {
        let mut params = Params::new();
        params.insert("app_key".into(), "key".into());
        params.insert("shop_id".into(), "7".into());
        params
    }

    #[test]
    fn test_signature_covers_path_params_timestamp_and_body() {
        let adapter = adapter();
        let body = json!({"order_id": "O1", "tracking_number": "T1", "provider_type": "OTHER"});
        let sign = adapter.sign("/api/v1/orders/ship", &base_params(), "1700000000", Some(&body)).unwrap();
        assert_eq!(sign, "c8b129e3a359c5908ef9d093ca02eb832bb657966251903e6e7fad761fa54186");

        let sign = adapter.sign("/api/v1/orders/auth/test", &base_params(), "1700000000", None).unwrap();
        assert_eq!(sign, "5375c9e932393df7735258fed7b3adbf8cb44677f1daff5fc3a77c280affd91b");
    }

    #[test]
    fn test_requires_shop_credentials() {
        let config = AdapterConfig::new(Platform::TikTok).with_app_credentials("key", "secret");
        let err = TikTokAdapter::new(&config).unwrap_err();
        assert!(matches!(err, AdapterError::Config(msg) if msg.contains("seller_id")));
    }

    #[test]
    fn test_order_status_table() {
        assert_eq!(map_order_status("UNPAID"), OrderStatus::Pending);
        assert_eq!(map_order_status("AWAITING_SHIPMENT"), OrderStatus::Paid);
        assert_eq!(map_order_status("AWAITING_COLLECTION"), OrderStatus::Processing);
        assert_eq!(map_order_status("IN_TRANSIT"), OrderStatus::Shipped);
        assert_eq!(map_order_status("COMPLETED"), OrderStatus::Delivered);
        assert_eq!(map_order_status("CANCELLED"), OrderStatus::Cancelled);
        assert_eq!(map_order_status("REFUNDED"), OrderStatus::Refunded);
        assert_eq!(map_order_status("SOMETHING_NEW"), OrderStatus::Pending);
        assert_eq!(map_product_status("NORMAL"), ProductStatus::OnSale);
        assert_eq!(map_product_status("FROZEN"), ProductStatus::OffShelf);
    }

    #[test]
    fn test_parse_order() {
        let raw = json!({
            "order_id": "576461413038785752",
            "order_status": "AWAITING_SHIPMENT",
            "total_amount": "59.90",
            "buyer_email": "b@example.com",
            "recipient_address": {"phone": "555", "address_line1": "1 Main St", "city": "Austin", "zip": "78701"},
            "created_time": 1700000000,
            "items": [{"sku_id": "S1", "product_name": "Mug", "quantity": 2, "price": "29.95", "product_id": 42}]
        });
        let order = parse_order(&raw);
        assert_eq!(order.order_id, "576461413038785752");
        assert_eq!(order.status, OrderStatus::Paid);
        assert_eq!(order.amount, 59.9);
        assert_eq!(order.currency, "USD");
        assert_eq!(order.buyer_phone.as_deref(), Some("555"));
        assert_eq!(order.shipping_address.postal_code, "78701");
        assert_eq!(order.created_at.as_deref(), Some("1700000000"));
        assert_eq!(order.items[0].quantity, 2);
        assert_eq!(order.items[0].product_id.as_deref(), Some("42"));
    }

    #[test]
    fn test_parse_product_caps_images() {
        let raw = json!({
            "product_id": "P9", "name": "Lamp", "price": 10, "stock": 4, "status": "ACTIVE",
            "images": ["1", "2", "3", "4", "5", "6", "7"]
        });
        let product = parse_product(&raw);
        assert_eq!(product.sku, "P9");
        assert_eq!(product.status, ProductStatus::OnSale);
        assert_eq!(product.images.len(), MAX_PRODUCT_IMAGES);
    }

    #[test]
    fn test_api_error_surfaces_code() {
        let err = ensure_ok(json!({"code": 36009004, "message": "Invalid sign"})).unwrap_err();
        assert_eq!(err, AdapterError::Api { code: "36009004".into(), message: "Invalid sign".into() });
        assert!(ensure_ok(json!({"code": 0, "data": {}})).is_ok());
    }

    #[test]
    fn test_native_batch_only_for_inventory() {
        let adapter = adapter();
        assert!(adapter.supports_native_batch(BatchOperation::InventoryUpdate));
        assert!(!adapter.supports_native_batch(BatchOperation::ProductCreate));
    }
}
