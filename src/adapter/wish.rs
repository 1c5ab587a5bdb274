// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Wish merchant API (v2).
//!
//! Credential: `app_key` (the merchant API key). Every request adds
//! `key=<api key>` and `sign`, the hex HMAC-SHA256 (keyed with the API key)
//! of the sorted `k=v&k=v` parameters. Writes are form-encoded. Success is
//! `code == 0`.

use super::http::{ApiRequest, HttpTransport};
use super::json;
use super::signing::{hmac_sha256_hex, join_pairs, Params};
use super::{
    connection_ok, shipment_tracking, AdapterConfig, AdapterError, NormalizedOrder, NormalizedOrderItem,
    NormalizedProduct, OrderFilter, OrderStatus, Platform, PlatformAdapter, ProductDraft, ProductFilter,
    ProductStatus, ShippingAddress,
};
use crate::adapter::types::MAX_PRODUCT_IMAGES;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct WishAdapter {
    http: HttpTransport,
    api_key: String,
    ship_note: String,
    delete_reason: String,
}

impl WishAdapter {
    pub fn new(config: &AdapterConfig) -> Result<Self, AdapterError> {
        Ok(Self {
            http: HttpTransport::new(config)?,
            api_key: config.require(&config.app_key, "app_key (API key)")?.to_string(),
            ship_note: config.extra_or("ship_note", "").to_string(),
            delete_reason: config.extra_or("delete_reason", "Other").to_string(),
        })
    }

    /// Adds `key` and `sign` to `params`.
    fn sign(&self, mut params: Params) -> Result<Params, AdapterError> {
        params.remove("sign");
        params.insert("key".into(), self.api_key.clone());
        let sign = hmac_sha256_hex(&self.api_key, &join_pairs(&params))?;
        params.insert("sign".into(), sign);
        Ok(params)
    }

    async fn call(&self, method: Method, path: &str, params: Params) -> Result<Value, AdapterError> {
        let params = self.sign(params)?;
        let request = if method == Method::GET {
            ApiRequest::get(path).query(params)
        } else {
            ApiRequest::new(method, path).form(params)
        };
        self.http.send(request).await
    }

    async fn write(&self, path: &str, params: Params) -> Result<bool, AdapterError> {
        let response = self.call(Method::POST, path, params).await?;
        Ok(json::code_is_zero(&response))
    }
}

fn ensure_ok(response: Value) -> Result<Value, AdapterError> {
    if json::code_is_zero(&response) || response.get("code").is_none() {
        Ok(response)
    } else {
        Err(AdapterError::Api {
            code: json::text_or(&response, &["code"], "unknown"),
            message: json::text_or(&response, &["message"], ""),
        })
    }
}

/// Form fields for create (`for_create`) or update.
fn draft_params(draft: &ProductDraft, for_create: bool) -> Params {
    let mut params = Params::new();
    if let Some(name) = &draft.name {
        params.insert("name".into(), name.clone());
    }
    if let Some(description) = &draft.description {
        params.insert("description".into(), description.clone());
    }
    if let Some(price) = draft.price {
        params.insert("price".into(), price.to_string());
    }
    match draft.stock {
        Some(stock) => {
            params.insert("inventory".into(), stock.to_string());
        }
        None if for_create => {
            params.insert("inventory".into(), ProductDraft::DEFAULT_STOCK.to_string());
        }
        None => {}
    }
    if let Some((main, extra)) = draft.images.split_first() {
        params.insert("main_image".into(), main.clone());
        let extra: Vec<&str> = extra.iter().map(String::as_str).take(MAX_PRODUCT_IMAGES).collect();
        if !extra.is_empty() {
            params.insert("extra_images".into(), extra.join(","));
        }
    }
    if let Some(sku) = &draft.sku {
        params.insert("sku".into(), sku.clone());
    }
    params
}

fn single(key: &str, value: &str) -> Params {
    let mut params = Params::new();
    params.insert(key.into(), value.into());
    params
}

#[async_trait]
impl PlatformAdapter for WishAdapter {
    fn platform(&self) -> Platform {
        Platform::Wish
    }

    async fn test_connection(&self) -> bool {
        let outcome = self
            .call(Method::GET, "/account", Params::new())
            .await
            .map(|r| json::code_is_zero(&r));
        connection_ok(Platform::Wish, outcome)
    }

    async fn get_orders(&self, filter: &OrderFilter) -> Result<Vec<NormalizedOrder>, AdapterError> {
        let mut params = Params::new();
        params.insert("limit".into(), filter.limit.to_string());
        params.insert("start".into(), filter.offset.to_string());
        if let Some(start) = filter.start_date {
            params.insert("start_time".into(), start.timestamp().to_string());
        }
        if let Some(end) = filter.end_date {
            params.insert("end_time".into(), end.timestamp().to_string());
        }
        let response = ensure_ok(self.call(Method::GET, "/order/multi-get", params).await?)?;
        Ok(json::list_at(&response, &["data"]).into_iter().map(parse_order).collect())
    }

    async fn get_order(&self, order_id: &str) -> Result<NormalizedOrder, AdapterError> {
        let response = ensure_ok(self.call(Method::GET, "/order/get", single("id", order_id)).await?)?;
        let order = json::at(&response, &["data"]);
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
        let Some(tracking) = shipment_tracking(Platform::Wish, order_id, status, tracking_number) else {
            return Ok(false);
        };
        let mut params = single("id", order_id);
        params.insert("tracking_number".into(), tracking.to_string());
        params.insert("ship_note".into(), self.ship_note.clone());
        self.write("/order/fulfill-one", params).await
    }

    async fn get_products(&self, filter: &ProductFilter) -> Result<Vec<NormalizedProduct>, AdapterError> {
        let mut params = Params::new();
        params.insert("limit".into(), filter.limit.to_string());
        params.insert("start".into(), filter.offset.to_string());
        let response = ensure_ok(self.call(Method::GET, "/product/multi-get", params).await?)?;
        Ok(json::list_at(&response, &["data"]).into_iter().map(parse_product).collect())
    }

    async fn get_product(&self, product_id: &str) -> Result<NormalizedProduct, AdapterError> {
        let response = ensure_ok(self.call(Method::GET, "/product/get", single("id", product_id)).await?)?;
        let product = json::at(&response, &["data"]);
        if product.is_null() {
            return Err(AdapterError::NotFound(format!("product {product_id}")));
        }
        Ok(parse_product(product))
    }

    async fn create_product(&self, draft: &ProductDraft) -> Result<NormalizedProduct, AdapterError> {
        let response = ensure_ok(self.call(Method::POST, "/product/add", draft_params(draft, true)).await?)?;
        Ok(parse_product(json::at(&response, &["data"])))
    }

    async fn update_product(&self, product_id: &str, draft: &ProductDraft) -> Result<NormalizedProduct, AdapterError> {
        let mut params = draft_params(draft, false);
        params.insert("id".into(), product_id.to_string());
        let response = ensure_ok(self.call(Method::POST, "/product/update", params).await?)?;
        let mut product = parse_product(json::at(&response, &["data"]));
        if product.id.is_empty() {
            product.id = product_id.to_string();
        }
        Ok(product)
    }

    /// Wish cannot delete listings; this disables the product.
    async fn delete_product(&self, product_id: &str) -> Result<bool, AdapterError> {
        let mut params = single("id", product_id);
        params.insert("reason".into(), self.delete_reason.clone());
        self.write("/product/disable", params).await
    }

    async fn update_inventory(&self, sku: &str, quantity: u32) -> Result<bool, AdapterError> {
        let mut params = single("sku", sku);
        params.insert("inventory".into(), quantity.to_string());
        self.write("/product/inventory/update", params).await
    }
}

#[must_use]
pub fn map_order_status(raw: &str) -> OrderStatus {
    match raw {
        "APPROVED" => OrderStatus::Pending,
        "IN_PROGRESS" => OrderStatus::Processing,
        "SHIPPED" => OrderStatus::Shipped,
        "COMPLETED" => OrderStatus::Delivered,
        "REFUNDED" => OrderStatus::Refunded,
        "CANCELLED" => OrderStatus::Cancelled,
        _ => OrderStatus::Pending,
    }
}

/// Wish reports `is_enabled` rather than a status string.
#[must_use]
pub fn map_product_status(is_enabled: &Value) -> ProductStatus {
    if json::truthy(is_enabled) {
        ProductStatus::OnSale
    } else {
        ProductStatus::OffShelf
    }
}

pub(crate) fn parse_order(order: &Value) -> NormalizedOrder {
    let shipping = json::at(order, &["shipping_detail"]);
    NormalizedOrder {
        order_id: json::text_at(order, &["order_id"])
            .or_else(|| json::text_at(order, &["transaction_id"]))
            .unwrap_or_default(),
        status: map_order_status(&json::text_or(order, &["state"], "")),
        amount: json::number_at(order, &["order_total"]),
        currency: json::text_or(order, &["currency"], "USD"),
        buyer_email: json::text_at(order, &["buyer_email"]),
        buyer_name: json::text_at(shipping, &["name"]),
        buyer_phone: json::text_at(shipping, &["phone_number"]),
        shipping_address: ShippingAddress {
            address: json::text_or(shipping, &["street_address1"], ""),
            city: json::text_or(shipping, &["city"], ""),
            state: json::text_or(shipping, &["state"], ""),
            country: json::text_or(shipping, &["country"], ""),
            postal_code: json::text_or(shipping, &["zipcode"], ""),
        },
        created_at: json::text_at(order, &["order_time"]),
        items: json::list_at(order, &["order_items"])
            .into_iter()
            .map(|item| NormalizedOrderItem {
                sku: json::text_at(item, &["sku"]),
                product_name: json::text_at(item, &["product_name"]),
                quantity: json::count_at(item, &["quantity"]),
                unit_price: json::number_at(item, &["price"]),
                product_id: json::text_at(item, &["product_id"]),
            })
            .collect(),
    }
}

pub(crate) fn parse_product(product: &Value) -> NormalizedProduct {
    let id = json::text_at(product, &["id"])
        .or_else(|| json::text_at(product, &["product_id"]))
        .unwrap_or_default();
    let mut images: Vec<String> = json::text_at(product, &["main_image"]).into_iter().collect();
    if let Some(extra) = json::text_at(product, &["extra_images"]) {
        images.extend(extra.split(',').filter(|s| !s.is_empty()).map(str::to_string));
    }
    images.truncate(MAX_PRODUCT_IMAGES);
    NormalizedProduct {
        sku: json::text_at(product, &["sku"]).unwrap_or_else(|| id.clone()),
        id,
        name: json::text_or(product, &["name"], ""),
        description: json::text_or(product, &["description"], ""),
        price: json::number_at(product, &["price"]),
        currency: json::text_or(product, &["currency"], "USD"),
        stock: json::count_at(product, &["inventory"]),
        status: map_product_status(json::at(product, &["is_enabled"])),
        images,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn adapter() -> WishAdapter {
        WishAdapter::new(&AdapterConfig::new(Platform::Wish).with_app_credentials("wk", "")).unwrap()
    }

    #[test]
    fn test_sign_adds_key_and_signature() {
        let mut params = Params::new();
        params.insert("limit".into(), "100".into());
        params.insert("start".into(), "0".into());
        let signed = adapter().sign(params).unwrap();
        assert_eq!(signed["key"], "wk");
        assert_eq!(signed["sign"], "a3b14a726c8d4499e07c9239825839ac5de0f07b13713dd596b05a77b8b681e8");
    }

    #[test]
    fn test_resigning_ignores_previous_signature() {
        let once = adapter().sign(single("id", "1")).unwrap();
        let twice = adapter().sign(once.clone()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_status_tables() {
        assert_eq!(map_order_status("APPROVED"), OrderStatus::Pending);
        assert_eq!(map_order_status("IN_PROGRESS"), OrderStatus::Processing);
        assert_eq!(map_order_status("SHIPPED"), OrderStatus::Shipped);
        assert_eq!(map_order_status("COMPLETED"), OrderStatus::Delivered);
        assert_eq!(map_order_status("REFUNDED"), OrderStatus::Refunded);
        assert_eq!(map_order_status("CANCELLED"), OrderStatus::Cancelled);
        assert_eq!(map_order_status("REQUIRE_REVIEW"), OrderStatus::Pending);
        assert_eq!(map_product_status(&json!("True")), ProductStatus::OnSale);
        assert_eq!(map_product_status(&json!(0)), ProductStatus::OffShelf);
    }

    #[test]
    fn test_parse_product_joins_images() {
        let raw = json!({
            "id": "w1", "name": "Hat", "inventory": "12", "is_enabled": true,
            "main_image": "m.jpg", "extra_images": "a.jpg,b.jpg,,c.jpg,d.jpg,e.jpg,f.jpg"
        });
        let product = parse_product(&raw);
        assert_eq!(product.sku, "w1");
        assert_eq!(product.stock, 12);
        assert_eq!(product.images, vec!["m.jpg", "a.jpg", "b.jpg", "c.jpg", "d.jpg", "e.jpg"]);
    }

    #[test]
    fn test_parse_order_falls_back_to_transaction_id() {
        let order = parse_order(&json!({"transaction_id": "tx9", "state": "SHIPPED", "order_total": "5"}));
        assert_eq!(order.order_id, "tx9");
        assert_eq!(order.status, OrderStatus::Shipped);
    }

    #[test]
    fn test_draft_params_split_images() {
        let mut draft = ProductDraft::named("Hat");
        draft.images = vec!["m.jpg".into(), "a.jpg".into(), "b.jpg".into()];
        let params = draft_params(&draft, true);
        assert_eq!(params["main_image"], "m.jpg");
        assert_eq!(params["extra_images"], "a.jpg,b.jpg");
        assert_eq!(params["inventory"], "100");
        assert!(!draft_params(&ProductDraft::named("Hat"), false).contains_key("inventory"));
    }
}
