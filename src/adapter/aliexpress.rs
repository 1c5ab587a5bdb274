// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! AliExpress open platform.
//!
//! Credentials: `app_key`, `app_secret`, `access_token` (sent as `session`)
//! and `refresh_token`. Every call carries the common TOP parameters and a
//! `sign`: upper-case MD5 of the sorted `k1v1k2v2...` concatenation with the
//! app secret appended. Listing writes go through the feeds API and are
//! reported as unsupported.

use super::http::{ApiRequest, HttpTransport};
use super::json;
use super::signing::{concat_pairs, md5_upper_hex, Params};
use super::{
    connection_ok, shipment_tracking, AdapterConfig, AdapterError, NormalizedOrder, NormalizedOrderItem,
    NormalizedProduct, OrderFilter, OrderStatus, Platform, PlatformAdapter, ProductDraft, ProductFilter,
    ProductStatus, ShippingAddress,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::Value;
use tracing::info;

const TOKEN_URL: &str = "https://oauth.aliexpress.com/token";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const ORDER_QUERY: (&str, &str) = ("aliexpress.solution.order.info.query", "/param2/1/aliexpress/solution/order/info/query");
const ORDER_DETAIL: (&str, &str) =
    ("aliexpress.solution.order.detail.query", "/param2/1/aliexpress/solution/order/detail/query");
const ORDER_SHIP: (&str, &str) =
    ("aliexpress.solution.order.info.seller.ship", "/param2/1/aliexpress/solution/order/info/seller/ship");
const PRODUCT_QUERY: (&str, &str) =
    ("aliexpress.solution.product.info.query", "/param2/1/aliexpress/solution/product/info/query");

/// Order states listed when the filter names none.
const DEFAULT_ORDER_STATES: [&str; 4] = ["place_order_success", "in_payment", "in_cancel", "wait_seller_send_goods"];

/// Tokens returned by a refresh grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
}

impl TokenGrant {
    /// Copy of `config` carrying the new tokens.
    #[must_use]
    pub fn apply(&self, config: &AdapterConfig) -> AdapterConfig {
        let mut refreshed = config.clone();
        refreshed.access_token = Some(self.access_token.clone());
        refreshed.refresh_token = Some(self.refresh_token.clone());
        refreshed
    }
}

#[derive(Debug, Clone)]
pub struct AliExpressAdapter {
    http: HttpTransport,
    app_key: String,
    app_secret: String,
    access_token: String,
    refresh_token: Option<String>,
    shipping_service: String,
}

impl AliExpressAdapter {
    pub fn new(config: &AdapterConfig) -> Result<Self, AdapterError> {
        Ok(Self {
            http: HttpTransport::new(config)?,
            app_key: config.require(&config.app_key, "app_key")?.to_string(),
            app_secret: config.require(&config.app_secret, "app_secret")?.to_string(),
            access_token: config.require(&config.access_token, "access_token")?.to_string(),
            refresh_token: config.refresh_token.clone(),
            shipping_service: config.extra_or("shipping_service", "other").to_string(),
        })
    }

    fn common_params(&self, method: &str, timestamp: DateTime<Utc>) -> Params {
        let mut params = Params::new();
        params.insert("method".into(), method.into());
        params.insert("app_key".into(), self.app_key.clone());
        params.insert("timestamp".into(), timestamp.format(TIMESTAMP_FORMAT).to_string());
        params.insert("format".into(), "json".into());
        params.insert("v".into(), "2.0".into());
        params.insert("sign_method".into(), "md5".into());
        params.insert("session".into(), self.access_token.clone());
        params
    }

    fn sign(&self, params: &Params) -> String {
        md5_upper_hex(&format!("{}{}", concat_pairs(params), self.app_secret))
    }

    async fn call(&self, http_method: Method, (api, path): (&str, &str), extra: Params) -> Result<Value, AdapterError> {
        let mut params = self.common_params(api, Utc::now());
        params.extend(extra);
        let sign = self.sign(&params);
        params.insert("sign".into(), sign);
        // access_token rides along unsigned
        params.insert("access_token".into(), self.access_token.clone());

        let request = if http_method == Method::GET {
            ApiRequest::new(http_method, path).query(params)
        } else {
            ApiRequest::new(http_method, path).form(params)
        };
        self.http.send(request).await
    }

    /// Exchange the refresh token for a new token pair.
    ///
    /// The adapter keeps using its current token; callers persist the grant
    /// (see [`TokenGrant::apply`]) and rebuild the adapter.
    pub async fn refresh_access_token(&self) -> Result<TokenGrant, AdapterError> {
        let refresh_token = self
            .refresh_token
            .clone()
            .ok_or_else(|| AdapterError::Config("aliexpress requires refresh_token to refresh".into()))?;
        let mut form = Params::new();
        form.insert("grant_type".into(), "refresh_token".into());
        form.insert("client_id".into(), self.app_key.clone());
        form.insert("client_secret".into(), self.app_secret.clone());
        form.insert("refresh_token".into(), refresh_token);
        form.insert("sp".into(), "ae".into());

        let response = self.http.send(ApiRequest::post(TOKEN_URL).form(form)).await?;
        let grant = parse_token_grant(&response)?;
        info!(platform = "aliexpress", "Access token refreshed");
        Ok(grant)
    }
}

fn parse_token_grant(response: &Value) -> Result<TokenGrant, AdapterError> {
    match (json::text_at(response, &["access_token"]), json::text_at(response, &["refresh_token"])) {
        (Some(access_token), Some(refresh_token)) => Ok(TokenGrant { access_token, refresh_token }),
        _ => Err(AdapterError::Auth(json::text_or(
            response,
            &["error_description"],
            "token refresh returned no tokens",
        ))),
    }
}

#[async_trait]
impl PlatformAdapter for AliExpressAdapter {
    fn platform(&self) -> Platform {
        Platform::AliExpress
    }

    async fn test_connection(&self) -> bool {
        let mut params = Params::new();
        params.insert("pageSize".into(), "1".into());
        let outcome = self.call(Method::GET, ORDER_QUERY, params).await.map(|r| r.get("result").is_some());
        connection_ok(Platform::AliExpress, outcome)
    }

    async fn get_orders(&self, filter: &OrderFilter) -> Result<Vec<NormalizedOrder>, AdapterError> {
        let mut params = Params::new();
        params.insert("pageSize".into(), filter.limit.to_string());
        params.insert("currentPage".into(), (filter.offset + 1).to_string());
        if let Some(start) = filter.start_date {
            params.insert("createDateStart".into(), start.format(TIMESTAMP_FORMAT).to_string());
        }
        if let Some(end) = filter.end_date {
            params.insert("createDateEnd".into(), end.format(TIMESTAMP_FORMAT).to_string());
        }
        let states: Vec<&str> = match &filter.status {
            Some(status) => vec![status.as_str()],
            None => DEFAULT_ORDER_STATES.to_vec(),
        };
        for (i, state) in states.into_iter().enumerate() {
            params.insert(format!("orderStatus.{}", i + 1), state.to_string());
        }
        let response = self.call(Method::GET, ORDER_QUERY, params).await?;
        Ok(json::list_at(&response, &["result", "targetList"]).into_iter().map(parse_order).collect())
    }

    async fn get_order(&self, order_id: &str) -> Result<NormalizedOrder, AdapterError> {
        let mut params = Params::new();
        params.insert("orderId".into(), order_id.to_string());
        let response = self.call(Method::GET, ORDER_DETAIL, params).await?;
        match response.get("result") {
            Some(order) if order.as_object().is_some_and(|fields| !fields.is_empty()) => Ok(parse_order(order)),
            _ => Err(AdapterError::NotFound(format!("order {order_id}"))),
        }
    }

    async fn update_order_status(
        &self,
        order_id: &str,
        status: OrderStatus,
        tracking_number: Option<&str>,
    ) -> Result<bool, AdapterError> {
        let Some(tracking) = shipment_tracking(Platform::AliExpress, order_id, status, tracking_number) else {
            return Ok(false);
        };
        let mut params = Params::new();
        params.insert("orderId".into(), order_id.to_string());
        params.insert("serviceName".into(), self.shipping_service.clone());
        params.insert("trackingNumber".into(), tracking.to_string());
        let response = self.call(Method::POST, ORDER_SHIP, params).await?;
        Ok(response.get("success").and_then(Value::as_bool) == Some(true))
    }

    async fn get_products(&self, filter: &ProductFilter) -> Result<Vec<NormalizedProduct>, AdapterError> {
        let mut params = Params::new();
        params.insert("pageSize".into(), filter.limit.to_string());
        params.insert("currentPage".into(), (filter.offset + 1).to_string());
        if let Some(status) = &filter.status {
            params.insert("productStatusType".into(), status.clone());
        }
        let response = self.call(Method::GET, PRODUCT_QUERY, params).await?;
        Ok(json::list_at(&response, &["result", "targetList"]).into_iter().map(parse_product).collect())
    }

    async fn get_product(&self, product_id: &str) -> Result<NormalizedProduct, AdapterError> {
        let mut params = Params::new();
        params.insert("productId".into(), product_id.to_string());
        let response = self.call(Method::GET, PRODUCT_QUERY, params).await?;
        json::list_at(&response, &["result", "targetList"])
            .first()
            .map(|product| parse_product(product))
            .ok_or_else(|| AdapterError::NotFound(format!("product {product_id}")))
    }

    async fn create_product(&self, _draft: &ProductDraft) -> Result<NormalizedProduct, AdapterError> {
        Err(AdapterError::unsupported(Platform::AliExpress, "create_product"))
    }

    async fn update_product(&self, _product_id: &str, _draft: &ProductDraft) -> Result<NormalizedProduct, AdapterError> {
        Err(AdapterError::unsupported(Platform::AliExpress, "update_product"))
    }

    async fn delete_product(&self, _product_id: &str) -> Result<bool, AdapterError> {
        Err(AdapterError::unsupported(Platform::AliExpress, "delete_product"))
    }

    async fn update_inventory(&self, _sku: &str, _quantity: u32) -> Result<bool, AdapterError> {
        Err(AdapterError::unsupported(Platform::AliExpress, "update_inventory"))
    }
}

#[must_use]
pub fn map_order_status(raw: &str) -> OrderStatus {
    match raw {
        "place_order_success" | "in_payment" => OrderStatus::Pending,
        "in_cancel" => OrderStatus::Cancelled,
        "wait_seller_send_goods" => OrderStatus::Paid,
        "wait_buyer_accept_goods" => OrderStatus::Shipped,
        "in_finish" => OrderStatus::Delivered,
        _ => OrderStatus::Pending,
    }
}

pub(crate) fn parse_order(order: &Value) -> NormalizedOrder {
    let address = json::at(order, &["logisticsAddress"]);
    NormalizedOrder {
        order_id: json::text_or(order, &["orderId"], ""),
        status: map_order_status(&json::text_or(order, &["orderStatus"], "")),
        amount: json::number_at(order, &["productAmount", "amount"]),
        currency: json::text_or(order, &["productAmount", "currencyCode"], "USD"),
        buyer_email: json::text_at(address, &["email"]),
        buyer_name: json::text_at(address, &["contactPerson"]),
        buyer_phone: json::text_at(address, &["mobileNo"]),
        shipping_address: ShippingAddress {
            address: json::text_or(address, &["address"], ""),
            city: json::text_or(address, &["city"], ""),
            state: json::text_or(address, &["province"], ""),
            country: json::text_or(address, &["country"], ""),
            postal_code: json::text_or(address, &["zip"], ""),
        },
        created_at: json::text_at(order, &["gmtCreate"]),
        items: json::list_at(order, &["childOrderList"])
            .into_iter()
            .map(|item| NormalizedOrderItem {
                sku: json::text_at(item, &["skuCode"]),
                product_name: json::text_at(item, &["productName"]),
                quantity: json::count_at(item, &["productCount"]),
                unit_price: json::number_at(item, &["productUnitPrice", "amount"]),
                product_id: json::text_at(item, &["productId"]),
            })
            .collect(),
    }
}

/// The listing query returns no SKU; the subject stands in for it.
pub(crate) fn parse_product(product: &Value) -> NormalizedProduct {
    let subject = json::text_or(product, &["subject"], "");
    let stock = json::count_at(product, &["wsDisplayNum"]);
    NormalizedProduct {
        id: json::text_or(product, &["productId"], ""),
        sku: subject.clone(),
        name: subject,
        description: String::new(),
        price: json::number_at(product, &["price", "amount"]),
        currency: json::text_or(product, &["price", "currencyCode"], "USD"),
        stock,
        status: if stock > 0 { ProductStatus::OnSale } else { ProductStatus::OffShelf },
        images: json::text_at(product, &["imageURL"]).into_iter().collect(),
    }
}
