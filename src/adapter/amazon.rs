// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Amazon Marketplace Web Service.
//!
//! Credentials: `seller_id`, `app_key` (AWS access key id), `app_secret`
//! (AWS secret key), optional `access_token` (MWS auth token) and
//! `marketplace_id`. Requests are signed with signature version 2: base64
//! HMAC-SHA256 over `METHOD\nhost\npath\ncanonical query`.
//!
//! Listings are managed through Feeds, which this adapter does not speak,
//! so product create/update/delete and order status pushes are reported as
//! unsupported. Inventory goes through the FBA supply endpoint.

use super::http::{ApiRequest, HttpTransport};
use super::json;
use super::signing::{canonical_query, hmac_sha256_base64, Params};
use super::{
    connection_ok, AdapterConfig, AdapterError, NormalizedOrder, NormalizedOrderItem, NormalizedProduct, OrderFilter,
    OrderStatus, Platform, PlatformAdapter, ProductDraft, ProductFilter, ProductStatus, ShippingAddress,
};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use serde_json::Value;
use tracing::warn;

const ORDERS_PATH: &str = "/Orders/2013-09-01";
const ORDERS_VERSION: &str = "2013-09-01";
const INVENTORY_PATH: &str = "/FBAInbound/v0";
const INVENTORY_VERSION: &str = "2010-10-01";
const PRODUCTS_PATH: &str = "/Products/2011-10-01";
const PRODUCTS_VERSION: &str = "2011-10-01";

/// Order states listed when the filter names none.
const DEFAULT_ORDER_STATES: [&str; 4] = ["Unshipped", "PartiallyShipped", "Shipped", "Canceled"];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

#[derive(Debug, Clone)]
pub struct AmazonAdapter {
    http: HttpTransport,
    seller_id: String,
    access_key_id: String,
    secret_key: String,
    auth_token: Option<String>,
    marketplace_id: Option<String>,
}

impl AmazonAdapter {
    pub fn new(config: &AdapterConfig) -> Result<Self, AdapterError> {
        Ok(Self {
            http: HttpTransport::new(config)?,
            seller_id: config.require(&config.seller_id, "seller_id")?.to_string(),
            access_key_id: config.require(&config.app_key, "app_key (AWS access key id)")?.to_string(),
            secret_key: config.require(&config.app_secret, "app_secret (AWS secret key)")?.to_string(),
            auth_token: config.access_token.clone(),
            marketplace_id: config.marketplace_id.clone(),
        })
    }

    fn action(name: &str, version: &str) -> Params {
        let mut params = Params::new();
        params.insert("Action".into(), name.into());
        params.insert("Version".into(), version.into());
        params
    }

    /// Add the credential and timestamp parameters `params` must carry.
    fn authorize(&self, params: &mut Params, timestamp: &str) {
        params.insert("AWSAccessKeyId".into(), self.access_key_id.clone());
        params.insert("SellerId".into(), self.seller_id.clone());
        params.insert("SignatureMethod".into(), "HmacSHA256".into());
        params.insert("SignatureVersion".into(), "2".into());
        params.insert("Timestamp".into(), timestamp.into());
        if let Some(token) = &self.auth_token {
            params.insert("MWSAuthToken".into(), token.clone());
        }
    }

    fn sign(&self, method: &Method, path: &str, params: &Params) -> Result<String, AdapterError> {
        let message = format!("{}\n{}\n{}\n{}", method.as_str(), self.http.host(), path, canonical_query(params));
        hmac_sha256_base64(&self.secret_key, &message)
    }

    async fn call(&self, method: Method, path: &str, mut params: Params) -> Result<Value, AdapterError> {
        let timestamp = Utc::now().format(TIMESTAMP_FORMAT).to_string();
        self.authorize(&mut params, &timestamp);
        let signature = self.sign(&method, path, &params)?;
        params.insert("Signature".into(), signature);

        let request = if method == Method::GET {
            ApiRequest::new(method, path).query(params)
        } else {
            ApiRequest::new(method, path).form(params)
        };
        self.http.send(request).await
    }
}

#[async_trait]
impl PlatformAdapter for AmazonAdapter {
    fn platform(&self) -> Platform {
        Platform::Amazon
    }

    async fn test_connection(&self) -> bool {
        let outcome = self
            .call(Method::GET, ORDERS_PATH, Self::action("GetServiceStatus", ORDERS_VERSION))
            .await
            .map(|r| r.get("GetServiceStatusResult").is_some());
        connection_ok(Platform::Amazon, outcome)
    }

    async fn get_orders(&self, filter: &OrderFilter) -> Result<Vec<NormalizedOrder>, AdapterError> {
        let mut params = Self::action("ListOrders", ORDERS_VERSION);
        match &filter.status {
            Some(status) => {
                params.insert("OrderStatus.Status.1".into(), status.clone());
            }
            None => {
                for (i, status) in DEFAULT_ORDER_STATES.iter().enumerate() {
                    params.insert(format!("OrderStatus.Status.{}", i + 1), (*status).to_string());
                }
            }
        }
        if let Some(marketplace) = &self.marketplace_id {
            params.insert("MarketplaceId.Id.1".into(), marketplace.clone());
        }
        if let Some(start) = filter.start_date {
            params.insert("CreatedAfter".into(), start.format(TIMESTAMP_FORMAT).to_string());
        }
        if let Some(end) = filter.end_date {
            params.insert("CreatedBefore".into(), end.format(TIMESTAMP_FORMAT).to_string());
        }
        params.insert("MaxResultsPerPage".into(), filter.limit.clamp(1, 100).to_string());

        let response = self.call(Method::GET, ORDERS_PATH, params).await?;
        Ok(json::list_at(&response, &["ListOrdersResult", "Orders", "Order"])
            .into_iter()
            .map(parse_order)
            .collect())
    }

    async fn get_order(&self, order_id: &str) -> Result<NormalizedOrder, AdapterError> {
        let mut params = Self::action("GetOrder", ORDERS_VERSION);
        params.insert("AmazonOrderId.Id.1".into(), order_id.to_string());
        let response = self.call(Method::GET, ORDERS_PATH, params).await?;
        first_order(&response)
            .map(parse_order)
            .ok_or_else(|| AdapterError::NotFound(format!("order {order_id}")))
    }

    async fn update_order_status(
        &self,
        order_id: &str,
        status: OrderStatus,
        _tracking_number: Option<&str>,
    ) -> Result<bool, AdapterError> {
        warn!(order_id, status = %status, "Amazon order status is driven by shipment feeds");
        Err(AdapterError::unsupported(Platform::Amazon, "update_order_status"))
    }

    async fn get_products(&self, filter: &ProductFilter) -> Result<Vec<NormalizedProduct>, AdapterError> {
        let mut params = Self::action("ListInventorySupply", INVENTORY_VERSION);
        params.insert("ResponseGroup".into(), "Detailed".into());
        if let Some(sku) = &filter.sku {
            params.insert("SellerSkus.member.1".into(), sku.clone());
        }
        let response = self.call(Method::GET, INVENTORY_PATH, params).await?;
        Ok(json::list_at(&response, &["ListInventorySupplyResult", "InventorySupplyList", "member"])
            .into_iter()
            .skip(filter.offset as usize)
            .take(filter.limit as usize)
            .map(parse_supply)
            .collect())
    }

    async fn get_product(&self, product_id: &str) -> Result<NormalizedProduct, AdapterError> {
        let mut params = Self::action("GetMatchingProductForId", PRODUCTS_VERSION);
        params.insert("IdType".into(), "ASIN".into());
        params.insert("IdList.Id.1".into(), product_id.to_string());
        if let Some(marketplace) = &self.marketplace_id {
            params.insert("MarketplaceId".into(), marketplace.clone());
        }
        let response = self.call(Method::GET, PRODUCTS_PATH, params).await?;
        json::list_at(&response, &["GetMatchingProductForIdResult", "Products", "Product"])
            .first()
            .map(|product| parse_catalog_product(product, product_id))
            .ok_or_else(|| AdapterError::NotFound(format!("product {product_id}")))
    }

    async fn create_product(&self, _draft: &ProductDraft) -> Result<NormalizedProduct, AdapterError> {
        Err(AdapterError::unsupported(Platform::Amazon, "create_product"))
    }

    async fn update_product(&self, _product_id: &str, _draft: &ProductDraft) -> Result<NormalizedProduct, AdapterError> {
        Err(AdapterError::unsupported(Platform::Amazon, "update_product"))
    }

    async fn delete_product(&self, _product_id: &str) -> Result<bool, AdapterError> {
        Err(AdapterError::unsupported(Platform::Amazon, "delete_product"))
    }

    async fn update_inventory(&self, sku: &str, quantity: u32) -> Result<bool, AdapterError> {
        let mut params = Self::action("UpdateInventorySupply", INVENTORY_VERSION);
        params.insert("Item.SellerSKU".into(), sku.to_string());
        params.insert("Item.Quantity".into(), quantity.to_string());
        let response = self.call(Method::POST, INVENTORY_PATH, params).await?;
        Ok(json::text_at(&response, &["ResponseMetadata", "StatusCode"]).as_deref() == Some("200"))
    }
}

/// `GetOrderResult` nests the order either directly or under `Orders`.
fn first_order(response: &Value) -> Option<&Value> {
    let result = json::at(response, &["GetOrderResult"]);
    json::list_at(result, &["Orders", "Order"])
        .into_iter()
        .chain(json::list_at(result, &["Order"]))
        .next()
}

#[must_use]
pub fn map_order_status(raw: &str) -> OrderStatus {
    match raw {
        "PendingAvailability" | "Pending" => OrderStatus::Pending,
        "Unshipped" | "PartiallyShipped" => OrderStatus::Paid,
        "Shipped" => OrderStatus::Shipped,
        "Canceled" => OrderStatus::Cancelled,
        _ => OrderStatus::Pending,
    }
}

pub(crate) fn parse_order(order: &Value) -> NormalizedOrder {
    let address = json::at(order, &["ShippingAddress"]);
    NormalizedOrder {
        order_id: json::text_or(order, &["AmazonOrderId"], ""),
        status: map_order_status(&json::text_or(order, &["OrderStatus"], "")),
        amount: json::number_at(order, &["OrderTotal", "Amount"]),
        currency: json::text_or(order, &["OrderTotal", "CurrencyCode"], "USD"),
        buyer_email: json::text_at(order, &["BuyerEmail"]),
        buyer_name: json::text_at(order, &["BuyerName"]),
        buyer_phone: json::text_at(address, &["Phone"]),
        shipping_address: ShippingAddress {
            address: json::text_or(address, &["AddressLine1"], ""),
            city: json::text_or(address, &["City"], ""),
            state: json::text_or(address, &["StateOrRegion"], ""),
            country: json::text_or(address, &["CountryCode"], ""),
            postal_code: json::text_or(address, &["PostalCode"], ""),
        },
        created_at: json::text_at(order, &["PurchaseDate"]),
        items: json::list_at(order, &["OrderItems", "OrderItem"])
            .into_iter()
            .map(|item| NormalizedOrderItem {
                sku: json::text_at(item, &["SellerSKU"]),
                product_name: json::text_at(item, &["Title"]),
                quantity: json::count_at(item, &["QuantityOrdered"]),
                unit_price: json::number_at(item, &["ItemPrice", "Amount"]),
                product_id: json::text_at(item, &["ASIN"]),
            })
            .collect(),
    }
}

/// FBA supply rows carry stock but no catalog data.
pub(crate) fn parse_supply(member: &Value) -> NormalizedProduct {
    let sku = json::text_or(member, &["SellerSKU"], "");
    let stock = json::count_at(member, &["TotalSupplyQuantity"]);
    NormalizedProduct {
        id: json::text_or(member, &["ASIN"], &sku),
        name: sku.clone(),
        sku,
        description: String::new(),
        price: 0.0,
        currency: "USD".into(),
        stock,
        status: if stock > 0 { ProductStatus::OnSale } else { ProductStatus::OffShelf },
        images: Vec::new(),
    }
}

pub(crate) fn parse_catalog_product(product: &Value, asin: &str) -> NormalizedProduct {
    let attributes = json::at(product, &["AttributeSets", "ItemAttributes"]);
    NormalizedProduct {
        id: json::text_or(product, &["Identifiers", "MarketplaceASIN", "ASIN"], asin),
        sku: String::new(),
        name: json::text_or(attributes, &["Title"], ""),
        description: String::new(),
        price: json::number_at(attributes, &["ListPrice", "Amount"]),
        currency: json::text_or(attributes, &["ListPrice", "CurrencyCode"], "USD"),
        stock: 0,
        status: ProductStatus::OffShelf,
        images: json::text_at(attributes, &["SmallImage", "URL"]).into_iter().collect(),
    }
}
