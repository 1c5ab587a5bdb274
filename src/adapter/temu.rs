// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Temu seller API.
//!
//! Credentials: `app_key` (access key), `app_secret` (access secret),
//! `seller_id`, and an optional bearer `access_token`. `sign` is the hex
//! HMAC-SHA256 of `METHOD + path + sorted k=v&k=v + compact JSON body + timestamp`.
//! Responses report `success: bool`.

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
pub struct TemuAdapter {
    http: HttpTransport,
    access_key: String,
    access_secret: String,
    seller_id: String,
    access_token: String,
    default_carrier: String,
}

impl TemuAdapter {
    pub fn new(config: &AdapterConfig) -> Result<Self, AdapterError> {
        Ok(Self {
            http: HttpTransport::new(config)?,
            access_key: config.require(&config.app_key, "app_key (access key)")?.to_string(),
            access_secret: config.require(&config.app_secret, "app_secret (access secret)")?.to_string(),
            seller_id: config.require(&config.seller_id, "seller_id")?.to_string(),
            access_token: config.access_token.clone().unwrap_or_default(),
            default_carrier: config.extra_or("default_carrier", "Other").to_string(),
        })
    }

    fn sign(
        &self,
        method: &Method,
        path: &str,
        params: &Params,
        body: Option<&Value>,
        timestamp: &str,
    ) -> Result<String, AdapterError> {
        let body = body.map(canonical_json).unwrap_or_default();
        let message = format!("{}{}{}{}{}", method.as_str(), path, join_pairs(params), body, timestamp);
        hmac_sha256_hex(&self.access_secret, &message)
    }

    async fn call(&self, method: Method, path: &str, extra: Params, body: Option<Value>) -> Result<Value, AdapterError> {
        let mut params = extra;
        params.insert("seller_id".into(), self.seller_id.clone());

        let timestamp = Utc::now().timestamp().to_string();
        let sign = self.sign(&method, path, &params, body.as_ref(), &timestamp)?;
        params.insert("sign".into(), sign);
        params.insert("timestamp".into(), timestamp);
        params.insert("access_key".into(), self.access_key.clone());

        let mut request = ApiRequest::new(method, path)
            .query(params)
            .header("Authorization", format!("Bearer {}", self.access_token));
        if let Some(body) = body {
            request = request.json(body);
        }
        self.http.send(request).await
    }
}

fn succeeded(response: &Value) -> bool {
    json::truthy(json::at(response, &["success"]))
}

fn ensure_ok(response: Value) -> Result<Value, AdapterError> {
    match response.get("success") {
        Some(flag) if !json::truthy(flag) => Err(AdapterError::Api {
            code: json::text_or(&response, &["error_code"], "unknown"),
            message: json::text_or(&response, &["message"], ""),
        }),
        _ => Ok(response),
    }
}

fn paging(limit: u32, offset: u32) -> Params {
    let mut params = Params::new();
    params.insert("page_size".into(), limit.to_string());
    params.insert("page".into(), (offset + 1).to_string());
    params
}

#[async_trait]
impl PlatformAdapter for TemuAdapter {
    fn platform(&self) -> Platform {
        Platform::Temu
    }

    async fn test_connection(&self) -> bool {
        let outcome = self
            .call(Method::GET, "/v1/seller/ping", Params::new(), None)
            .await
            .map(|r| succeeded(&r));
        connection_ok(Platform::Temu, outcome)
    }

    async fn get_orders(&self, filter: &OrderFilter) -> Result<Vec<NormalizedOrder>, AdapterError> {
        let mut params = paging(filter.limit, filter.offset);
        params.insert("order_status".into(), filter.status.clone().unwrap_or_else(|| "ALL".into()));
        if let Some(start) = filter.start_date {
            params.insert("start_date".into(), start.format("%Y-%m-%d").to_string());
        }
        if let Some(end) = filter.end_date {
            params.insert("end_date".into(), end.format("%Y-%m-%d").to_string());
        }
        let response = ensure_ok(self.call(Method::GET, "/v1/orders", params, None).await?)?;
        Ok(json::list_at(&response, &["data", "orders"]).into_iter().map(parse_order).collect())
    }

    async fn get_order(&self, order_id: &str) -> Result<NormalizedOrder, AdapterError> {
        let mut params = Params::new();
        params.insert("order_id".into(), order_id.to_string());
        let path = format!("/v1/orders/{order_id}");
        let response = ensure_ok(self.call(Method::GET, &path, params, None).await?)?;
        let order = json::at(&response, &["data", "order"]);
        if order.is_null() {
            return Err(AdapterError::NotFound(format!("order {order_id}")));
        }
        Ok(parse_order(order))
    }

    async fn update_order_status(
        &self,
        order_id: &str,
        status: OrderStatus,
        tracking_number: Option<&str>,
    ) -> Result<bool, AdapterError> {
        let Some(tracking) = shipment_tracking(Platform::Temu, order_id, status, tracking_number) else {
            return Ok(false);
        };
        let body = json!({
            "order_id": order_id,
            "tracking_number": tracking,
            "carrier": self.default_carrier,
        });
        let path = format!("/v1/orders/{order_id}/ship");
        let response = self.call(Method::POST, &path, Params::new(), Some(body)).await?;
        Ok(succeeded(&response))
    }

    async fn get_products(&self, filter: &ProductFilter) -> Result<Vec<NormalizedProduct>, AdapterError> {
        let mut params = paging(filter.limit, filter.offset);
        params.insert("status".into(), filter.status.clone().unwrap_or_else(|| "ACTIVE".into()));
        let response = ensure_ok(self.call(Method::GET, "/v1/products", params, None).await?)?;
        Ok(json::list_at(&response, &["data", "products"]).into_iter().map(parse_product).collect())
    }

    async fn get_product(&self, product_id: &str) -> Result<NormalizedProduct, AdapterError> {
        let path = format!("/v1/products/{product_id}");
        let response = ensure_ok(self.call(Method::GET, &path, Params::new(), None).await?)?;
        let product = json::at(&response, &["data", "product"]);
        if product.is_null() {
            return Err(AdapterError::NotFound(format!("product {product_id}")));
        }
        Ok(parse_product(product))
    }

    async fn create_product(&self, draft: &ProductDraft) -> Result<NormalizedProduct, AdapterError> {
        let body = Value::Object(product_body(draft, true));
        let response = ensure_ok(self.call(Method::POST, "/v1/products", Params::new(), Some(body)).await?)?;
        Ok(parse_product(json::at(&response, &["data", "product"])))
    }

    async fn update_product(&self, product_id: &str, draft: &ProductDraft) -> Result<NormalizedProduct, AdapterError> {
        let mut body = product_body(draft, false);
        body.insert("product_id".into(), json!(product_id));
        let path = format!("/v1/products/{product_id}");
        let response = ensure_ok(self.call(Method::PUT, &path, Params::new(), Some(Value::Object(body))).await?)?;
        Ok(parse_product(json::at(&response, &["data", "product"])))
    }

    async fn delete_product(&self, product_id: &str) -> Result<bool, AdapterError> {
        let path = format!("/v1/products/{product_id}");
        let response = self.call(Method::DELETE, &path, Params::new(), None).await?;
        Ok(succeeded(&response))
    }

    async fn update_inventory(&self, sku: &str, quantity: u32) -> Result<bool, AdapterError> {
        let body = json!({ "sku": sku, "quantity": quantity });
        let response = self.call(Method::POST, "/v1/inventory", Params::new(), Some(body)).await?;
        Ok(succeeded(&response))
    }

    /// All-or-nothing; a rejected batch is an error so callers can fall
    /// back to single updates.
    async fn batch_update_inventory(&self, updates: &[InventoryUpdate]) -> Result<Vec<BatchItemResult>, AdapterError> {
        let body = json!({ "updates": updates });
        ensure_ok(self.call(Method::POST, "/v1/inventory/batch", Params::new(), Some(body)).await?)?;
        Ok(updates.iter().map(|u| BatchItemResult::ok(&u.sku)).collect())
    }

    fn supports_native_batch(&self, operation: BatchOperation) -> bool {
        operation == BatchOperation::InventoryUpdate
    }
}

#[must_use]
pub fn map_order_status(raw: &str) -> OrderStatus {
    match raw {
        "PENDING" => OrderStatus::Pending,
        "PAID" => OrderStatus::Paid,
        "PROCESSING" => OrderStatus::Processing,
        "SHIPPED" => OrderStatus::Shipped,
        "DELIVERED" => OrderStatus::Delivered,
        "CANCELLED" => OrderStatus::Cancelled,
        "REFUNDED" => OrderStatus::Refunded,
        _ => OrderStatus::Pending,
    }
}

#[must_use]
pub fn map_product_status(raw: &str) -> ProductStatus {
    match raw {
        "ACTIVE" | "ON_SALE" | "LISTED" => ProductStatus::OnSale,
        _ => ProductStatus::OffShelf,
    }
}

pub(crate) fn parse_order(order: &Value) -> NormalizedOrder {
    let shipping = json::at(order, &["shipping_address"]);
    NormalizedOrder {
        order_id: json::text_or(order, &["order_id"], ""),
        status: map_order_status(&json::text_or(order, &["status"], "")),
        amount: json::number_at(order, &["total_amount"]),
        currency: json::text_or(order, &["currency"], "USD"),
        buyer_email: json::text_at(order, &["buyer_email"]),
        buyer_name: json::text_at(shipping, &["name"]),
        buyer_phone: json::text_at(shipping, &["phone"]),
        shipping_address: ShippingAddress {
            address: json::text_or(shipping, &["address_line1"], ""),
            city: json::text_or(shipping, &["city"], ""),
            state: json::text_or(shipping, &["state"], ""),
            country: json::text_or(shipping, &["country"], ""),
            postal_code: json::text_or(shipping, &["zip"], ""),
        },
        created_at: json::text_at(order, &["created_at"]),
        items: json::list_at(order, &["items"])
            .into_iter()
            .map(|item| NormalizedOrderItem {
                sku: json::text_at(item, &["sku"]),
                product_name: json::text_at(item, &["product_name"]),
                quantity: json::count_at(item, &["quantity"]),
                unit_price: json::number_at(item, &["unit_price"]),
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

    fn adapter() -> TemuAdapter {
        let config = AdapterConfig::new(Platform::Temu)
            .with_app_credentials("ak", "shh")
            .with_seller_id("99");
        TemuAdapter::new(&config).unwrap()
    }

    #[test]
    fn test_signature_includes_method_and_body() {
        let adapter = adapter();
        let mut params = Params::new();
        params.insert("seller_id".into(), "99".into());
        let body = json!({"sku": "S1", "quantity": 5});
        let sign = adapter.sign(&Method::POST, "/v1/inventory", &params, Some(&body), "1700000000").unwrap();
        assert_eq!(sign, "abe246ec88b09ea446b5c96e4e6fcb9673fb9ff90a5d3d9e36003585b934e2a4");

        let mut params = paging(100, 0);
        params.insert("order_status".into(), "ALL".into());
        params.insert("seller_id".into(), "99".into());
        let sign = adapter.sign(&Method::GET, "/v1/orders", &params, None, "1700000000").unwrap();
        assert_eq!(sign, "1ef3579546ae108cb01ea9dbf0509a32d8fc987655a6824bc27b9317a9268f61");
    }

    #[test]
    fn test_status_tables() {
        let cases = [
            ("PENDING", OrderStatus::Pending),
            ("PAID", OrderStatus::Paid),
            ("PROCESSING", OrderStatus::Processing),
            ("SHIPPED", OrderStatus::Shipped),
            ("DELIVERED", OrderStatus::Delivered),
            ("CANCELLED", OrderStatus::Cancelled),
            ("REFUNDED", OrderStatus::Refunded),
            ("", OrderStatus::Pending),
        ];
        for (raw, expected) in cases {
            assert_eq!(map_order_status(raw), expected, "{raw}");
        }
        assert_eq!(map_product_status("LISTED"), ProductStatus::OnSale);
        assert_eq!(map_product_status("DELETED"), ProductStatus::OffShelf);
    }

    #[test]
    fn test_parse_order_reads_shipping_block() {
        let raw = json!({
            "order_id": "T-1", "status": "SHIPPED", "total_amount": 12, "currency": "EUR",
            "shipping_address": {"name": "Ana", "phone": "+34", "city": "Madrid", "zip": "28001"},
            "items": [{"sku": "A", "quantity": "3", "unit_price": "4.00"}]
        });
        let order = parse_order(&raw);
        assert_eq!(order.status, OrderStatus::Shipped);
        assert_eq!(order.currency, "EUR");
        assert_eq!(order.buyer_name.as_deref(), Some("Ana"));
        assert_eq!(order.shipping_address.city, "Madrid");
        assert_eq!(order.items[0].quantity, 3);
        assert_eq!(order.items[0].unit_price, 4.0);
    }

    #[test]
    fn test_failed_response_is_api_error() {
        let err = ensure_ok(json!({"success": false, "error_code": "E42", "message": "bad sku"})).unwrap_err();
        assert_eq!(err, AdapterError::Api { code: "E42".into(), message: "bad sku".into() });
        assert!(ensure_ok(json!({"success": true})).is_ok());
    }

    #[test]
    fn test_native_inventory_batch() {
        assert!(adapter().supports_native_batch(BatchOperation::InventoryUpdate));
        assert!(!adapter().supports_native_batch(BatchOperation::ProductUpdate));
    }
}
