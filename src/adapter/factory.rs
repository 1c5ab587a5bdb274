// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Builds the adapter for an [`AdapterConfig`].

use super::aliexpress::AliExpressAdapter;
use super::amazon::AmazonAdapter;
use super::jumia::JumiaAdapter;
use super::lazada::LazadaAdapter;
use super::mercadolibre::MercadoLibreAdapter;
use super::temu::TemuAdapter;
use super::tiktok::TikTokAdapter;
use super::wish::WishAdapter;
use super::{AdapterConfig, AdapterError, Platform, PlatformAdapter};
use std::sync::Arc;
use tracing::debug;

/// Maps a platform to its adapter implementation.
///
/// Construction validates the credentials the platform needs; missing ones
/// surface as [`AdapterError::Config`] rather than at the first request.
#[derive(Debug, Default, Clone, Copy)]
pub struct AdapterFactory;

impl AdapterFactory {
    pub fn create(config: &AdapterConfig) -> Result<Box<dyn PlatformAdapter>, AdapterError> {
        debug!(
            platform = %config.platform,
            account = config.account_id.as_deref().unwrap_or("-"),
            endpoint = %config.endpoint(),
            "Creating platform adapter"
        );
        let adapter: Box<dyn PlatformAdapter> = match config.platform {
            Platform::AliExpress => Box::new(AliExpressAdapter::new(config)?),
            Platform::Amazon => Box::new(AmazonAdapter::new(config)?),
            Platform::Lazada => Box::new(LazadaAdapter::new(config)?),
            Platform::TikTok => Box::new(TikTokAdapter::new(config)?),
            Platform::Temu => Box::new(TemuAdapter::new(config)?),
            Platform::Wish => Box::new(WishAdapter::new(config)?),
            Platform::MercadoLibre => Box::new(MercadoLibreAdapter::new(config)?),
            Platform::Jumia => Box::new(JumiaAdapter::new(config)?),
        };
        Ok(adapter)
    }

    /// Same as [`create`](Self::create), shareable across tasks.
    pub fn create_shared(config: &AdapterConfig) -> Result<Arc<dyn PlatformAdapter>, AdapterError> {
        Self::create(config).map(Arc::from)
    }

    #[must_use]
    pub fn supported_platforms() -> &'static [Platform] {
        &Platform::ALL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_config(platform: Platform) -> AdapterConfig {
        AdapterConfig::new(platform)
            .with_app_credentials("key", "secret")
            .with_access_token("token")
            .with_seller_id("seller")
    }

    #[test]
    fn test_every_platform_builds_with_full_credentials() {
        for platform in AdapterFactory::supported_platforms() {
            let adapter = AdapterFactory::create(&full_config(*platform)).unwrap();
            assert_eq!(adapter.platform(), *platform);
        }
    }

    #[test]
    fn test_missing_credentials_fail_at_construction() {
        let err = AdapterFactory::create(&AdapterConfig::new(Platform::TikTok)).err().unwrap();
        assert!(matches!(err, AdapterError::Config(ref msg) if msg.contains("tiktok")));

        let err = AdapterFactory::create_shared(&AdapterConfig::new(Platform::MercadoLibre)).err().unwrap();
        assert!(matches!(err, AdapterError::Config(_)));
    }

    #[test]
    fn test_shared_adapter_reports_platform() {
        let adapter = AdapterFactory::create_shared(&full_config(Platform::Jumia)).unwrap();
        let clone = Arc::clone(&adapter);
        assert_eq!(clone.platform(), Platform::Jumia);
    }
}
