// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Shared HTTP plumbing: one `reqwest::Client` per adapter, status to
//! [`AdapterError`] mapping, JSON decoding.

use super::config::AdapterConfig;
use super::error::AdapterError;
use super::signing::Params;
use super::types::Platform;
use reqwest::{Client, Method};
use serde_json::Value;
use std::time::Instant;
use tracing::debug;

/// Error bodies longer than this are cut before they land in an error.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Clone)]
pub(crate) enum Body {
    Json(Value),
    Form(Params),
}

/// A request relative to the adapter's base URL (or absolute, when the
/// path starts with `http`).
#[derive(Debug, Clone)]
pub(crate) struct ApiRequest {
    method: Method,
    path: String,
    query: Params,
    body: Option<Body>,
    headers: Vec<(&'static str, String)>,
}

impl ApiRequest {
    pub(crate) fn new(method: Method, path: impl Into<String>) -> Self {
        Self { method, path: path.into(), query: Params::new(), body: None, headers: Vec::new() }
    }

    pub(crate) fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub(crate) fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub(crate) fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub(crate) fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub(crate) fn query(mut self, params: Params) -> Self {
        self.query = params;
        self
    }

    pub(crate) fn json(mut self, body: Value) -> Self {
        self.body = Some(Body::Json(body));
        self
    }

    pub(crate) fn form(mut self, params: Params) -> Self {
        self.body = Some(Body::Form(params));
        self
    }

    pub(crate) fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }
}

/// HTTP client bound to one platform endpoint.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    platform: Platform,
}

impl HttpTransport {
    pub fn new(config: &AdapterConfig) -> Result<Self, AdapterError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("marketplace-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AdapterError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, base_url: config.endpoint(), platform: config.platform })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Host part of the base URL, for signature schemes that sign it.
    pub fn host(&self) -> &str {
        let rest = self.base_url.split_once("://").map_or(self.base_url.as_str(), |(_, r)| r);
        rest.split('/').next().unwrap_or(rest)
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    /// Send `request`, returning the decoded JSON body (`Null` when empty).
    ///
    /// Non-2xx responses become [`AdapterError::Http`]; a 2xx body that is
    /// not JSON becomes [`AdapterError::Decode`].
    pub(crate) async fn send(&self, request: ApiRequest) -> Result<Value, AdapterError> {
        let started = Instant::now();
        let ApiRequest { method, path, query, body, headers } = request;

        let mut builder = self
            .client
            .request(method.clone(), self.url(&path))
            .header(reqwest::header::ACCEPT, "application/json");
        if !query.is_empty() {
            builder = builder.query(&query);
        }
        for (name, value) in headers {
            builder = builder.header(name, value);
        }
        builder = match body {
            Some(Body::Json(value)) => builder.json(&value),
            Some(Body::Form(params)) => builder.form(&params),
            None => builder,
        };

        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;

        debug!(
            platform = %self.platform,
            method = %method,
            path = %path,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Marketplace API call"
        );

        if !status.is_success() {
            return Err(AdapterError::Http { status: status.as_u16(), body: truncate(&text) });
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| AdapterError::Decode(format!("{e}: {}", truncate(&text))))
    }
}

fn truncate(text: &str) -> String {
    if text.len() <= MAX_ERROR_BODY {
        return text.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_and_url_resolution() {
        let config = AdapterConfig::new(Platform::Amazon);
        let transport = HttpTransport::new(&config).unwrap();
        assert_eq!(transport.host(), "mws.amazonservices.com");
        assert_eq!(transport.url("/Orders/2013-09-01"), "https://mws.amazonservices.com/Orders/2013-09-01");
        assert_eq!(transport.url("https://oauth.example.com/token"), "https://oauth.example.com/token");

        let local = AdapterConfig::new(Platform::Temu).with_base_url("http://localhost:9000/api");
        let transport = HttpTransport::new(&local).unwrap();
        assert_eq!(transport.host(), "localhost:9000");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let long = "é".repeat(MAX_ERROR_BODY);
        let cut = truncate(&long);
        assert!(cut.ends_with("..."));
        assert!(cut.len() <= MAX_ERROR_BODY + 3);
        assert_eq!(truncate("short"), "short");
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        let config = AdapterConfig::new(Platform::Wish).with_base_url("http://127.0.0.1:9");
        let transport = HttpTransport::new(&config).unwrap();
        let err = transport.send(ApiRequest::get("/account")).await.unwrap_err();
        assert!(matches!(err, AdapterError::Transport(_) | AdapterError::Timeout(_)), "{err:?}");
    }
}
