// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Jumia seller center.
//!
//! Credentials: `seller_id`, `app_key` (API key) and `app_secret` (secret
//! key). Each call names an `action`; the parameters plus `seller_id`,
//! `api_key` and a UTC `timestamp` are signed as sorted `k=v&k=v` with
//! HMAC-SHA256, base64-encoded into `signature`. Reads send the parameters
//! as a query string, writes as a JSON body. Success is `success: true`.

use super::http::{ApiRequest, HttpTransport};
use super::json;
use super::signing::{hmac_sha256_base64, join_pairs, Params};
use super::{
    connection_ok, AdapterConfig, AdapterError, NormalizedOrder, NormalizedOrderItem, NormalizedProduct, OrderFilter,
    OrderStatus, Platform, PlatformAdapter, ProductDraft, ProductFilter, ProductStatus, ShippingAddress,
};
use crate::adapter::types::MAX_PRODUCT_IMAGES;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Value};

const API_VERSION: &str = "v1";

#[derive(Debug, Clone)]
pub struct JumiaAdapter {
    http: HttpTransport,
    seller_id: String,
    api_key: String,
    secret_key: String,
}

impl JumiaAdapter {
    pub fn new(config: &AdapterConfig) -> Result<Self, AdapterError> {
        Ok(Self {
            http: HttpTransport::new(config)?,
            seller_id: config.require(&config.seller_id, "seller_id")?.to_string(),
            api_key: config.require(&config.app_key, "app_key (API key)")?.to_string(),
            secret_key: config.require(&config.app_secret, "app_secret (secret key)")?.to_string(),
        })
    }

    fn sign(&self, mut params: Params, timestamp: &str) -> Result<Params, AdapterError> {
        params.insert("seller_id".into(), self.seller_id.clone());
        params.insert("api_key".into(), self.api_key.clone());
        params.insert("timestamp".into(), timestamp.to_string());
        let signature = hmac_sha256_base64(&self.secret_key, &join_pairs(&params))?;
        params.insert("signature".into(), signature);
        Ok(params)
    }

    async fn call(&self, method: Method, resource: &str, action: &str, mut params: Params) -> Result<Value, AdapterError> {
        params.insert("action".into(), action.to_string());
        let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let params = self.sign(params, &timestamp)?;

        let path = format!("/{API_VERSION}{resource}");
        let request = if method == Method::GET {
            ApiRequest::get(path).query(params)
        } else {
            let body: serde_json::Map<String, Value> = params.into_iter().map(|(k, v)| (k, Value::String(v))).collect();
            ApiRequest::new(method, path).json(Value::Object(body))
        };
        self.http.send(request).await
    }

    async fn write(&self, method: Method, resource: &str, action: &str, params: Params) -> Result<bool, AdapterError> {
        let response = self.call(method, resource, action, params).await?;
        Ok(succeeded(&response))
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

fn paging(limit: u32, offset: u32, status: Option<&String>) -> Params {
    let mut params = Params::new();
    params.insert("limit".into(), limit.to_string());
    params.insert("offset".into(), offset.to_string());
    if let Some(status) = status {
        params.insert("status".into(), status.clone());
    }
    params
}

fn draft_params(draft: &ProductDraft) -> Params {
    let mut params = Params::new();
    for (key, value) in super::product_body(draft, false) {
        let value = match value {
            Value::String(s) => s,
            other => other.to_string(),
        };
        params.insert(key, value);
    }
    if let Some(sku) = &draft.sku {
        params.insert("sku".into(), sku.clone());
    }
    if let Some(currency) = &draft.currency {
        params.insert("currency".into(), currency.clone());
    }
    params
}

#[async_trait]
impl PlatformAdapter for JumiaAdapter {
    fn platform(&self) -> Platform {
        Platform::Jumia
    }

    async fn test_connection(&self) -> bool {
        let outcome = self
            .call(Method::GET, "/system/ping", "Ping", Params::new())
            .await
            .map(|r| succeeded(&r));
        connection_ok(Platform::Jumia, outcome)
    }

    async fn get_orders(&self, filter: &OrderFilter) -> Result<Vec<NormalizedOrder>, AdapterError> {
        let mut params = paging(filter.limit, filter.offset, filter.status.as_ref());
        if let Some(start) = filter.start_date {
            params.insert("created_from".into(), start.format("%Y-%m-%d").to_string());
        }
        if let Some(end) = filter.end_date {
            params.insert("created_to".into(), end.format("%Y-%m-%d").to_string());
        }
        let response = ensure_ok(self.call(Method::GET, "/orders", "GetOrders", params).await?)?;
        Ok(json::list_at(&response, &["data", "orders"]).into_iter().map(parse_order).collect())
    }

    async fn get_order(&self, order_id: &str) -> Result<NormalizedOrder, AdapterError> {
        let mut params = Params::new();
        params.insert("order_id".into(), order_id.to_string());
        let resource = format!("/orders/{order_id}");
        let response = ensure_ok(self.call(Method::GET, &resource, "GetOrder", params).await?)?;
        let order = json::at(&response, &["data", "order"]);
        if order.is_null() {
            return Err(AdapterError::NotFound(format!("order {order_id}")));
        }
        Ok(parse_order(order))
    }

    /// Jumia accepts any normalized status, with an optional tracking number.
    async fn update_order_status(
        &self,
        order_id: &str,
        status: OrderStatus,
        tracking_number: Option<&str>,
    ) -> Result<bool, AdapterError> {
        let mut params = Params::new();
        params.insert("order_id".into(), order_id.to_string());
        params.insert("status".into(), status.as_str().to_string());
        if let Some(tracking) = tracking_number.filter(|t| !t.is_empty()) {
            params.insert("tracking_number".into(), tracking.to_string());
        }
        let resource = format!("/orders/{order_id}/status");
        self.write(Method::POST, &resource, "UpdateOrderStatus", params).await
    }

    async fn get_products(&self, filter: &ProductFilter) -> Result<Vec<NormalizedProduct>, AdapterError> {
        let params = paging(filter.limit, filter.offset, filter.status.as_ref());
        let response = ensure_ok(self.call(Method::GET, "/products", "GetProducts", params).await?)?;
        Ok(json::list_at(&response, &["data", "products"]).into_iter().map(parse_product).collect())
    }

    async fn get_product(&self, product_id: &str) -> Result<NormalizedProduct, AdapterError> {
        let resource = format!("/products/{product_id}");
        let response = ensure_ok(self.call(Method::GET, &resource, "GetProduct", Params::new()).await?)?;
        let product = json::at(&response, &["data", "product"]);
        if product.is_null() {
            return Err(AdapterError::NotFound(format!("product {product_id}")));
        }
        Ok(parse_product(product))
    }

    async fn create_product(&self, draft: &ProductDraft) -> Result<NormalizedProduct, AdapterError> {
        let response = ensure_ok(self.call(Method::POST, "/products", "CreateProduct", draft_params(draft)).await?)?;
        Ok(parse_product(json::at(&response, &["data", "product"])))
    }

    async fn update_product(&self, product_id: &str, draft: &ProductDraft) -> Result<NormalizedProduct, AdapterError> {
        let resource = format!("/products/{product_id}");
        let response = ensure_ok(self.call(Method::PUT, &resource, "UpdateProduct", draft_params(draft)).await?)?;
        Ok(parse_product(json::at(&response, &["data", "product"])))
    }

    async fn delete_product(&self, product_id: &str) -> Result<bool, AdapterError> {
        let resource = format!("/products/{product_id}");
        self.write(Method::DELETE, &resource, "DeleteProduct", Params::new()).await
    }

    async fn update_inventory(&self, sku: &str, quantity: u32) -> Result<bool, AdapterError> {
        let mut params = Params::new();
        params.insert("sku".into(), sku.to_string());
        params.insert("quantity".into(), quantity.to_string());
        self.write(Method::POST, "/inventory", "UpdateInventory", params).await
    }
}

#[must_use]
pub fn map_order_status(raw: &str) -> OrderStatus {
    match raw {
        "new" | "payment_pending" => OrderStatus::Pending,
        "paid" => OrderStatus::Paid,
        "processing" | "ready_to_ship" => OrderStatus::Processing,
        "shipped" => OrderStatus::Shipped,
        "delivered" => OrderStatus::Delivered,
        "cancelled" => OrderStatus::Cancelled,
        "refunded" => OrderStatus::Refunded,
        _ => OrderStatus::Pending,
    }
}

#[must_use]
pub fn map_product_status(raw: &str) -> ProductStatus {
    match raw {
        "active" | "enabled" | "published" => ProductStatus::OnSale,
        _ => ProductStatus::OffShelf,
    }
}

pub(crate) fn parse_order(order: &Value) -> NormalizedOrder {
    let address = json::at(order, &["shipping_address"]);
    NormalizedOrder {
        order_id: json::text_or(order, &["order_id"], ""),
        status: map_order_status(&json::text_or(order, &["status"], "")),
        amount: json::number_at(order, &["total_amount"]),
        currency: json::text_or(order, &["currency"], "USD"),
        buyer_email: json::text_at(order, &["buyer_email"]),
        buyer_name: json::text_at(order, &["buyer_name"]),
        buyer_phone: json::text_at(order, &["buyer_phone"]),
        shipping_address: ShippingAddress {
            address: json::text_or(address, &["address_line1"], ""),
            city: json::text_or(address, &["city"], ""),
            state: json::text_or(address, &["state"], ""),
            country: json::text_or(address, &["country_code"], ""),
            postal_code: json::text_or(address, &["postal_code"], ""),
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
    NormalizedProduct {
        id: json::text_or(product, &["product_id"], ""),
        sku: json::text_or(product, &["sku"], ""),
        name: json::text_or(product, &["name"], ""),
        description: json::text_or(product, &["description"], ""),
        price: json::number_at(product, &["price", "amount"]),
        currency: json::text_or(product, &["price", "currency"], "USD"),
        stock: json::count_at(product, &["stock"]),
        status: map_product_status(&json::text_or(product, &["status"], "")),
        images: json::strings_at(product, &["images"], MAX_PRODUCT_IMAGES),
    }
}
