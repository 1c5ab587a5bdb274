// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Lazada.
//!
//! Credentials: `app_key`, `app_secret`, `seller_id` (user id) and the
//! country in `region` (default `my`). Requests carry `app_key`, a
//! millisecond `timestamp` and `sign`, the hex SHA-256 of
//! `secret + sorted k1v1k2v2... + secret`.

use super::http::{ApiRequest, HttpTransport};
use super::json;
use super::signing::{concat_pairs, sha256_hex, Params};
use super::{
    connection_ok, shipment_tracking, AdapterConfig, AdapterError, NormalizedOrder, NormalizedOrderItem,
    NormalizedProduct, OrderFilter, OrderStatus, Platform, PlatformAdapter, ProductDraft, ProductFilter,
    ProductStatus, ShippingAddress,
};
use crate::adapter::types::MAX_PRODUCT_IMAGES;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use serde_json::Value;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Order states listed when the filter names none.
const DEFAULT_ORDER_STATES: [&str; 3] = ["pending", "paid", "ready_to_ship"];

#[derive(Debug, Clone)]
pub struct LazadaAdapter {
    http: HttpTransport,
    app_key: String,
    app_secret: String,
    user_id: String,
    country: String,
    access_token: Option<String>,
    delivery_type: String,
    shipping_provider: String,
}

impl LazadaAdapter {
    pub fn new(config: &AdapterConfig) -> Result<Self, AdapterError> {
        Ok(Self {
            http: HttpTransport::new(config)?,
            app_key: config.require(&config.app_key, "app_key")?.to_string(),
            app_secret: config.require(&config.app_secret, "app_secret")?.to_string(),
            user_id: config.seller_id.clone().unwrap_or_default(),
            country: config.region.clone().unwrap_or_else(|| "my".into()).to_ascii_lowercase(),
            access_token: config.access_token.clone(),
            delivery_type: config.extra_or("delivery_type", "dropship").to_string(),
            shipping_provider: config.extra_or("shipping_provider", "standard_express").to_string(),
        })
    }

    fn sign(&self, params: &Params) -> String {
        sha256_hex(&format!("{}{}{}", self.app_secret, concat_pairs(params), self.app_secret))
    }

    fn account_params(&self) -> Params {
        let mut params = Params::new();
        params.insert("userId".into(), self.user_id.clone());
        params.insert("countryCode".into(), self.country.clone());
        params
    }

    async fn call(&self, method: Method, path: &str, mut params: Params) -> Result<Value, AdapterError> {
        params.insert("app_key".into(), self.app_key.clone());
        params.insert("timestamp".into(), Utc::now().timestamp_millis().to_string());
        if let Some(token) = &self.access_token {
            params.insert("access_token".into(), token.clone());
        }
        let sign = self.sign(&params);
        params.insert("sign".into(), sign);

        let request = if method == Method::GET {
            ApiRequest::new(method, path).query(params)
        } else {
            ApiRequest::new(method, path).form(params)
        };
        self.http.send(request).await
    }
}

fn succeeded(response: &Value) -> bool {
    json::truthy(json::at(response, &["success"])) || json::code_is_zero(response)
}

#[async_trait]
impl PlatformAdapter for LazadaAdapter {
    fn platform(&self) -> Platform {
        Platform::Lazada
    }

    async fn test_connection(&self) -> bool {
        let mut params = self.account_params();
        params.insert("limit".into(), "1".into());
        let outcome = self
            .call(Method::GET, "/products/get", params)
            .await
            .map(|r| r.get("data").is_some() || succeeded(&r));
        connection_ok(Platform::Lazada, outcome)
    }

    async fn get_orders(&self, filter: &OrderFilter) -> Result<Vec<NormalizedOrder>, AdapterError> {
        let mut params = self.account_params();
        params.insert("limit".into(), filter.limit.to_string());
        params.insert("offset".into(), filter.offset.to_string());
        if let Some(start) = filter.start_date {
            params.insert("createdAfter".into(), start.format(TIMESTAMP_FORMAT).to_string());
        }
        if let Some(end) = filter.end_date {
            params.insert("createdBefore".into(), end.format(TIMESTAMP_FORMAT).to_string());
        }
        let states: Vec<&str> = match &filter.status {
            Some(status) => vec![status.as_str()],
            None => DEFAULT_ORDER_STATES.to_vec(),
        };
        for (i, state) in states.into_iter().enumerate() {
            params.insert(format!("status.{}", i + 1), state.to_string());
        }
        let response = self.call(Method::GET, "/orders/get", params).await?;
        Ok(json::list_at(&response, &["data", "orders"]).into_iter().map(parse_order).collect())
    }

    async fn get_order(&self, order_id: &str) -> Result<NormalizedOrder, AdapterError> {
        let mut params = Params::new();
        params.insert("order_id".into(), order_id.to_string());
        let response = self.call(Method::GET, "/orders/get", params).await?;
        json::list_at(&response, &["data", "orders"])
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
        let Some(tracking) = shipment_tracking(Platform::Lazada, order_id, status, tracking_number) else {
            return Ok(false);
        };
        let mut params = Params::new();
        params.insert("order_id".into(), order_id.to_string());
        params.insert("delivery_type".into(), self.delivery_type.clone());
        params.insert("shipping_provider".into(), self.shipping_provider.clone());
        params.insert("tracking_number".into(), tracking.to_string());
        let response = self.call(Method::POST, "/order/rma/create", params).await?;
        Ok(succeeded(&response))
    }

    async fn get_products(&self, filter: &ProductFilter) -> Result<Vec<NormalizedProduct>, AdapterError> {
        let mut params = Params::new();
        params.insert("filter".into(), filter.status.clone().unwrap_or_else(|| "all".into()));
        params.insert("limit".into(), filter.limit.to_string());
        params.insert("offset".into(), filter.offset.to_string());
        if let Some(sku) = &filter.sku {
            params.insert("sku_seller_list".into(), format!("[\"{sku}\"]"));
        }
        let response = self.call(Method::GET, "/products/get", params).await?;
        Ok(json::list_at(&response, &["data", "products"]).into_iter().map(parse_product).collect())
    }

    async fn get_product(&self, product_id: &str) -> Result<NormalizedProduct, AdapterError> {
        let mut params = Params::new();
        params.insert("filter".into(), "all".into());
        params.insert("sku".into(), product_id.to_string());
        let response = self.call(Method::GET, "/products/get", params).await?;
        json::list_at(&response, &["data", "products"])
            .first()
            .map(|product| parse_product(product))
            .ok_or_else(|| AdapterError::NotFound(format!("product {product_id}")))
    }

    async fn create_product(&self, _draft: &ProductDraft) -> Result<NormalizedProduct, AdapterError> {
        Err(AdapterError::unsupported(Platform::Lazada, "create_product"))
    }

    async fn update_product(&self, _product_id: &str, _draft: &ProductDraft) -> Result<NormalizedProduct, AdapterError> {
        Err(AdapterError::unsupported(Platform::Lazada, "update_product"))
    }

    async fn delete_product(&self, _product_id: &str) -> Result<bool, AdapterError> {
        Err(AdapterError::unsupported(Platform::Lazada, "delete_product"))
    }

    async fn update_inventory(&self, sku: &str, quantity: u32) -> Result<bool, AdapterError> {
        let mut params = Params::new();
        params.insert("seller_sku".into(), sku.to_string());
        params.insert("quantity".into(), quantity.to_string());
        let response = self.call(Method::POST, "/product/quantity/update", params).await?;
        Ok(succeeded(&response))
    }
}

#[must_use]
pub fn map_order_status(raw: &str) -> OrderStatus {
    match raw {
        "canceled" | "failed" => OrderStatus::Cancelled,
        "paid" | "ready_to_ship" => OrderStatus::Paid,
        "shipped" => OrderStatus::Shipped,
        "delivered" => OrderStatus::Delivered,
        _ => OrderStatus::Pending,
    }
}

#[must_use]
pub fn map_product_status(raw: &str) -> ProductStatus {
    if raw == "active" {
        ProductStatus::OnSale
    } else {
        ProductStatus::OffShelf
    }
}

pub(crate) fn parse_order(order: &Value) -> NormalizedOrder {
    let address = json::at(order, &["address_shipping"]);
    let status = json::list_at(order, &["statuses"])
        .first()
        .and_then(|s| json::text(s).or_else(|| json::text_at(s, &["status"])))
        .unwrap_or_else(|| "pending".into());
    NormalizedOrder {
        order_id: json::text_or(order, &["order_id"], ""),
        status: map_order_status(&status),
        amount: json::number_at(order, &["price"]),
        currency: json::text_or(order, &["currency"], "USD"),
        buyer_email: json::text_at(order, &["customer_email"]),
        buyer_name: json::text_at(order, &["address_billing", "first_name"]),
        buyer_phone: json::text_at(address, &["phone"]),
        shipping_address: ShippingAddress {
            address: json::text_or(address, &["address1"], ""),
            city: json::text_or(address, &["city"], ""),
            state: json::text_or(address, &["address3"], ""),
            country: json::text_or(address, &["country"], ""),
            postal_code: json::text_or(address, &["post_code"], ""),
        },
        created_at: json::text_at(order, &["created_at"]),
        items: json::list_at(order, &["items"])
            .into_iter()
            .map(|item| NormalizedOrderItem {
                sku: json::text_at(item, &["sku"]),
                product_name: json::text_at(item, &["name"]),
                quantity: json::count_at(item, &["quantity"]),
                unit_price: json::number_at(item, &["paid_price"]),
                product_id: json::text_at(item, &["item_id"]),
            })
            .collect(),
    }
}

/// Price, stock and SKU come from the first variant; a product without
/// variants is reported off-shelf with zero stock.
pub(crate) fn parse_product(product: &Value) -> NormalizedProduct {
    let id = json::text_or(product, &["item_id"], "");
    let name = json::text_or(product, &["attributes", "name"], "");
    let name = if name.is_empty() { json::text_or(product, &["name"], "") } else { name };
    let images = json::strings_at(product, &["images"], MAX_PRODUCT_IMAGES);

    match json::list_at(product, &["skus"]).first() {
        Some(variant) => NormalizedProduct {
            id,
            sku: json::text_or(variant, &["SellerSku"], ""),
            name,
            description: json::text_or(product, &["attributes", "short_description"], ""),
            price: json::number_at(variant, &["price"]),
            currency: json::text_or(variant, &["currency"], "USD"),
            stock: json::count_at(variant, &["quantity"]),
            status: map_product_status(&json::text_or(product, &["status"], "")),
            images,
        },
        None => NormalizedProduct {
            id,
            sku: String::new(),
            name,
            description: String::new(),
            price: 0.0,
            currency: "USD".into(),
            stock: 0,
            status: ProductStatus::OffShelf,
            images,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn adapter() -> LazadaAdapter {
        let config = AdapterConfig::new(Platform::Lazada)
            .with_app_credentials("K", "S")
            .with_seller_id("U");
        LazadaAdapter::new(&config).unwrap()
    }

    #[test]
    fn test_signature_wraps_pairs_in_secret() {
        let lazada = adapter();
        let mut params = lazada.account_params();
        params.insert("app_key".into(), "K".into());
        params.insert("timestamp".into(), "1700000000000".into());
        assert_eq!(lazada.sign(&params), "4c8067474954478ad1eb71b7c9d01a4f523c1f6da725d03d27ccf8b5e0757947");
    }

    #[test]
    fn test_country_defaults_to_malaysia() {
        assert_eq!(adapter().country, "my");
        let config = AdapterConfig::new(Platform::Lazada).with_app_credentials("K", "S").with_region("TH");
        assert_eq!(LazadaAdapter::new(&config).unwrap().country, "th");
    }

    #[test]
    fn test_status_table() {
        assert_eq!(map_order_status("pending"), OrderStatus::Pending);
        assert_eq!(map_order_status("canceled"), OrderStatus::Cancelled);
        assert_eq!(map_order_status("failed"), OrderStatus::Cancelled);
        assert_eq!(map_order_status("ready_to_ship"), OrderStatus::Paid);
        assert_eq!(map_order_status("shipped"), OrderStatus::Shipped);
        assert_eq!(map_order_status("delivered"), OrderStatus::Delivered);
        assert_eq!(map_order_status("returned"), OrderStatus::Pending);
    }

    #[test]
    fn test_order_status_from_first_status_entry() {
        let order = parse_order(&json!({"order_id": 7, "statuses": ["shipped"], "price": "10.00"}));
        assert_eq!(order.status, OrderStatus::Shipped);
        let order = parse_order(&json!({"order_id": 8, "statuses": [{"status": "canceled"}]}));
        assert_eq!(order.status, OrderStatus::Cancelled);
        assert_eq!(parse_order(&json!({"order_id": 9})).status, OrderStatus::Pending);
    }

    #[test]
    fn test_product_from_first_variant() {
        let product = parse_product(&json!({
            "item_id": 42, "status": "active", "attributes": {"name": "Kettle"},
            "skus": [{"SellerSku": "K-1", "price": "29.9", "quantity": 4}, {"SellerSku": "K-2"}]
        }));
        assert_eq!(product.sku, "K-1");
        assert_eq!(product.name, "Kettle");
        assert_eq!(product.stock, 4);
        assert_eq!(product.status, ProductStatus::OnSale);

        let bare = parse_product(&json!({"item_id": 43, "name": "Cup", "status": "active"}));
        assert_eq!(bare.status, ProductStatus::OffShelf);
        assert_eq!(bare.name, "Cup");
    }

    #[test]
    fn test_success_flag_forms() {
        assert!(succeeded(&json!({"success": true})));
        assert!(succeeded(&json!({"code": "0"})));
        assert!(!succeeded(&json!({"code": "IllegalAccessToken"})));
    }
}
