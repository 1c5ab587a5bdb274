use super::error::AdapterError;
use super::types::Platform;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Credentials and endpoint for one marketplace account.
///
/// Field names are generic; each adapter documents which platform
/// credential it reads from which field (e.g. Amazon's AWS access key is
/// `app_key`, its MWS auth token is `access_token`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterConfig {
    pub platform: Platform,
    /// Local account identifier, used in logs only
    #[serde(default)]
    pub account_id: Option<String>,
    /// Overrides the platform's default endpoint
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub app_key: Option<String>,
    #[serde(default)]
    pub app_secret: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Seller / shop / merchant id
    #[serde(default)]
    pub seller_id: Option<String>,
    #[serde(default)]
    pub marketplace_id: Option<String>,
    /// Country or site code (Lazada country, MercadoLibre site)
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Optional platform settings (carrier names, ship notes, ...)
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

fn default_timeout_secs() -> u64 {
    30
}

impl AdapterConfig {
    #[must_use]
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            account_id: None,
            base_url: None,
            app_key: None,
            app_secret: None,
            access_token: None,
            refresh_token: None,
            seller_id: None,
            marketplace_id: None,
            region: None,
            timeout_secs: default_timeout_secs(),
            extra: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_app_credentials(mut self, key: impl Into<String>, secret: impl Into<String>) -> Self {
        self.app_key = Some(key.into());
        self.app_secret = Some(secret.into());
        self
    }

    #[must_use]
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_seller_id(mut self, id: impl Into<String>) -> Self {
        self.seller_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Configured endpoint, or the platform default, without a trailing slash.
    #[must_use]
    pub fn endpoint(&self) -> String {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| default_base_url(self.platform))
            .trim_end_matches('/')
            .to_string()
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    #[must_use]
    pub fn extra_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.extra.get(key).map(String::as_str).unwrap_or(default)
    }

    /// A non-empty credential, or `AdapterError::Config` naming it.
    pub(crate) fn require<'a>(&self, value: &'a Option<String>, name: &str) -> Result<&'a str, AdapterError> {
        match value.as_deref() {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(AdapterError::Config(format!("{} requires {name}", self.platform))),
        }
    }
}

#[must_use]
pub fn default_base_url(platform: Platform) -> &'static str {
    match platform {
        Platform::AliExpress => "https://gw.api.alibaba.com/openapi",
        Platform::Amazon => "https://mws.amazonservices.com",
        Platform::Lazada => "https://api.lazada.com/rest",
        Platform::TikTok => "https://open-api.tiktokglobalshop.com",
        Platform::Temu => "https://seller.kyruus.com/api",
        Platform::Wish => "https://merchant.wish.com/api/v2",
        Platform::MercadoLibre => "https://api.mercadolibre.com",
        Platform::Jumia => "https://sellercenter-api.jumia.com",
    }
}
