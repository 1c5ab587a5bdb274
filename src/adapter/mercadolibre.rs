// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! MercadoLibre.
//!
//! OAuth bearer (`access_token`) plus `seller_id`; no request signing.
//! `region` holds the site id (MLB, MLM, ...) and only selects the default
//! currency, since every site shares one API host. Products are "items";
//! inventory is the item's `available_quantity`, so the SKU passed to
//! `update_inventory` is the item id.

use super::http::{ApiRequest, HttpTransport};
use super::json;
use super::signing::Params;
use super::{
    connection_ok, shipment_tracking, AdapterConfig, AdapterError, NormalizedOrder, NormalizedOrderItem,
    NormalizedProduct, OrderFilter, OrderStatus, Platform, PlatformAdapter, ProductDraft, ProductFilter,
    ProductStatus, ShippingAddress,
};
use crate::adapter::types::MAX_PRODUCT_IMAGES;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Map, Value};

#[derive(Debug, Clone)]
pub struct MercadoLibreAdapter {
    http: HttpTransport,
    access_token: String,
    seller_id: String,
    default_currency: &'static str,
    service_id: String,
}

impl MercadoLibreAdapter {
    pub fn new(config: &AdapterConfig) -> Result<Self, AdapterError> {
        let site = config.region.as_deref().unwrap_or("MLB").to_ascii_uppercase();
        Ok(Self {
            http: HttpTransport::new(config)?,
            access_token: config.require(&config.access_token, "access_token")?.to_string(),
            seller_id: config.require(&config.seller_id, "seller_id")?.to_string(),
            default_currency: site_currency(&site),
            service_id: config.extra_or("service_id", "1").to_string(),
        })
    }

    async fn call(&self, method: Method, path: &str, query: Params, body: Option<Value>) -> Result<Value, AdapterError> {
        let mut request = ApiRequest::new(method, path)
            .query(query)
            .header("Authorization", format!("Bearer {}", self.access_token));
        if let Some(body) = body {
            request = request.json(body);
        }
        self.http.send(request).await
    }

    fn item_body(&self, draft: &ProductDraft, for_create: bool) -> Map<String, Value> {
        let mut body = Map::new();
        if let Some(name) = &draft.name {
            body.insert("title".into(), json!(name));
        }
        if let Some(description) = &draft.description {
            body.insert("description".into(), json!(description));
        }
        if let Some(price) = draft.price {
            body.insert("price".into(), json!(price));
        }
        match draft.stock {
            Some(stock) => {
                body.insert("available_quantity".into(), json!(stock));
            }
            None if for_create => {
                body.insert("available_quantity".into(), json!(ProductDraft::DEFAULT_STOCK));
            }
            None => {}
        }
        if for_create {
            let pictures: Vec<Value> =
                draft.images.iter().take(MAX_PRODUCT_IMAGES).map(|src| json!({ "source": src })).collect();
            body.insert("pictures".into(), Value::Array(pictures));
            body.insert(
                "currency_id".into(),
                json!(draft.currency.as_deref().unwrap_or(self.default_currency)),
            );
            body.insert("condition".into(), json!("new"));
            body.insert("listing_type_id".into(), json!("gold_special"));
        }
        body
    }
}

fn site_currency(site: &str) -> &'static str {
    match site {
        "MLM" => "MXN",
        "MLA" => "ARS",
        "MLC" => "CLP",
        "MCO" => "COP",
        "MLU" => "UYU",
        "MLP" | "MPE" => "PEN",
        "MLV" => "VES",
        _ => "BRL",
    }
}

fn item_or_error(response: Value, what: &str) -> Result<Value, AdapterError> {
    if response.get("id").is_some() {
        Ok(response)
    } else {
        Err(AdapterError::Api {
            code: json::text_or(&response, &["error"], "unknown"),
            message: json::text_or(&response, &["message"], &format!("{what} returned no id")),
        })
    }
}

#[async_trait]
impl PlatformAdapter for MercadoLibreAdapter {
    fn platform(&self) -> Platform {
        Platform::MercadoLibre
    }

    async fn test_connection(&self) -> bool {
        let outcome = self
            .call(Method::GET, "/users/me", Params::new(), None)
            .await
            .map(|r| r.get("id").is_some());
        connection_ok(Platform::MercadoLibre, outcome)
    }

    async fn get_orders(&self, filter: &OrderFilter) -> Result<Vec<NormalizedOrder>, AdapterError> {
        let mut query = Params::new();
        query.insert("seller".into(), self.seller_id.clone());
        query.insert("limit".into(), filter.limit.to_string());
        query.insert("offset".into(), filter.offset.to_string());
        if let Some(status) = &filter.status {
            query.insert("order.status".into(), status.clone());
        }
        if let Some(start) = filter.start_date {
            query.insert("order.date_created.from".into(), start.format("%Y-%m-%dT%H:%M:%S%.3f-00:00").to_string());
        }
        if let Some(end) = filter.end_date {
            query.insert("order.date_created.to".into(), end.format("%Y-%m-%dT%H:%M:%S%.3f-00:00").to_string());
        }
        let response = self.call(Method::GET, "/orders/search", query, None).await?;
        Ok(json::list_at(&response, &["results"])
            .into_iter()
            .map(|order| parse_order(order, self.default_currency))
            .collect())
    }

    async fn get_order(&self, order_id: &str) -> Result<NormalizedOrder, AdapterError> {
        let response = self.call(Method::GET, &format!("/orders/{order_id}"), Params::new(), None).await?;
        let order = item_or_error(response, "order lookup")?;
        Ok(parse_order(&order, self.default_currency))
    }

    async fn update_order_status(
        &self,
        order_id: &str,
        status: OrderStatus,
        tracking_number: Option<&str>,
    ) -> Result<bool, AdapterError> {
        let Some(tracking) = shipment_tracking(Platform::MercadoLibre, order_id, status, tracking_number) else {
            return Ok(false);
        };
        let body = json!({ "tracking_number": tracking, "service_id": self.service_id });
        let path = format!("/orders/{order_id}/shipments");
        let response = self.call(Method::POST, &path, Params::new(), Some(body)).await?;
        Ok(response.get("id").is_some())
    }

    async fn get_products(&self, filter: &ProductFilter) -> Result<Vec<NormalizedProduct>, AdapterError> {
        let mut query = Params::new();
        query.insert("seller_id".into(), self.seller_id.clone());
        query.insert("limit".into(), filter.limit.to_string());
        query.insert("offset".into(), filter.offset.to_string());
        query.insert("status".into(), filter.status.clone().unwrap_or_else(|| "active".into()));
        if let Some(sku) = &filter.sku {
            query.insert("seller_sku".into(), sku.clone());
        }
        let response = self.call(Method::GET, "/users/me/items/search", query, None).await?;
        Ok(json::list_at(&response, &["results"])
            .into_iter()
            .map(|item| parse_product(item, self.default_currency))
            .collect())
    }

    async fn get_product(&self, product_id: &str) -> Result<NormalizedProduct, AdapterError> {
        let response = self.call(Method::GET, &format!("/items/{product_id}"), Params::new(), None).await?;
        let item = item_or_error(response, "item lookup")?;
        Ok(parse_product(&item, self.default_currency))
    }

    async fn create_product(&self, draft: &ProductDraft) -> Result<NormalizedProduct, AdapterError> {
        let body = Value::Object(self.item_body(draft, true));
        let response = self.call(Method::POST, "/items", Params::new(), Some(body)).await?;
        let item = item_or_error(response, "item create")?;
        Ok(parse_product(&item, self.default_currency))
    }

    async fn update_product(&self, product_id: &str, draft: &ProductDraft) -> Result<NormalizedProduct, AdapterError> {
        let body = Value::Object(self.item_body(draft, false));
        let path = format!("/items/{product_id}");
        let response = self.call(Method::PUT, &path, Params::new(), Some(body)).await?;
        let item = item_or_error(response, "item update")?;
        Ok(parse_product(&item, self.default_currency))
    }

    /// Items cannot be deleted; this pauses the listing.
    async fn delete_product(&self, product_id: &str) -> Result<bool, AdapterError> {
        let path = format!("/items/{product_id}");
        let response = self.call(Method::PUT, &path, Params::new(), Some(json!({ "status": "paused" }))).await?;
        Ok(json::text_at(&response, &["status"]).as_deref() == Some("paused"))
    }

    async fn update_inventory(&self, sku: &str, quantity: u32) -> Result<bool, AdapterError> {
        let path = format!("/items/{sku}");
        let body = json!({ "available_quantity": quantity });
        let response = self.call(Method::PUT, &path, Params::new(), Some(body)).await?;
        Ok(response.get("id").is_some())
    }
}

#[must_use]
pub fn map_order_status(raw: &str) -> OrderStatus {
    match raw {
        "payment_required" | "payment_in_process" => OrderStatus::Pending,
        "paid" | "confirmed" => OrderStatus::Paid,
        "handling" | "payment_received" => OrderStatus::Processing,
        "shipped" => OrderStatus::Shipped,
        "delivered" => OrderStatus::Delivered,
        "cancelled" => OrderStatus::Cancelled,
        "refunded" => OrderStatus::Refunded,
        _ => OrderStatus::Pending,
    }
}

/// Only `active` items are for sale; `paused` is what `delete_product` sets.
#[must_use]
pub fn map_product_status(raw: &str) -> ProductStatus {
    match raw {
        "active" => ProductStatus::OnSale,
        _ => ProductStatus::OffShelf,
    }
}

pub(crate) fn parse_order(order: &Value, default_currency: &str) -> NormalizedOrder {
    let address = json::at(order, &["shipping", "receiver_address"]);
    NormalizedOrder {
        order_id: json::text_or(order, &["id"], ""),
        status: map_order_status(&json::text_or(order, &["status"], "")),
        amount: json::number_at(order, &["total_amount"]),
        currency: json::text_or(order, &["currency_id"], default_currency),
        buyer_email: json::text_at(order, &["buyer", "email"]),
        buyer_name: json::text_at(address, &["receiver_name"]),
        buyer_phone: json::text_at(address, &["receiver_phone"]),
        shipping_address: ShippingAddress {
            address: json::text_or(address, &["address_line"], ""),
            city: json::text_or(address, &["city", "name"], ""),
            state: json::text_or(address, &["state", "name"], ""),
            country: json::text_or(address, &["country", "name"], ""),
            postal_code: json::text_or(address, &["zip_code"], ""),
        },
        created_at: json::text_at(order, &["date_created"]),
        items: json::list_at(order, &["order_items"])
            .into_iter()
            .map(|line| {
                let item = json::at(line, &["item"]);
                NormalizedOrderItem {
                    sku: json::text_at(item, &["id"]),
                    product_name: json::text_at(item, &["title"]),
                    quantity: json::count_at(line, &["quantity"]),
                    unit_price: json::number_at(line, &["unit_price"]),
                    product_id: json::text_at(item, &["id"]),
                }
            })
            .collect(),
    }
}

pub(crate) fn parse_product(item: &Value, default_currency: &str) -> NormalizedProduct {
    let id = json::text_or(item, &["id"], "");
    NormalizedProduct {
        sku: id.clone(),
        id,
        name: json::text_or(item, &["title"], ""),
        description: json::text_or(item, &["description"], ""),
        price: json::number_at(item, &["price"]),
        currency: json::text_or(item, &["currency_id"], default_currency),
        stock: json::count_at(item, &["available_quantity"]),
        status: map_product_status(&json::text_or(item, &["status"], "")),
        images: json::list_at(item, &["pictures"])
            .into_iter()
            .filter_map(|pic| json::text_at(pic, &["secure_url"]))
            .take(MAX_PRODUCT_IMAGES)
            .collect(),
    }
}
