// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Write strategies and the business-scenario lookup.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a `set` reaches the two tiers.
///
/// | strategy        | L1          | L2                       |
/// |-----------------|-------------|--------------------------|
/// | `write_through` | synchronous | synchronous              |
/// | `write_back`    | synchronous | queued, background worker|
/// | `cache_aside`   | untouched   | synchronous              |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStrategy {
    WriteThrough,
    WriteBack,
    CacheAside,
}

impl CacheStrategy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WriteThrough => "write_through",
            Self::WriteBack => "write_back",
            Self::CacheAside => "cache_aside",
        }
    }

    /// Whether a `set` populates L1 immediately.
    #[must_use]
    pub fn writes_local(self) -> bool {
        !matches!(self, Self::CacheAside)
    }
}

impl fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cache type used for a business scenario (`product_detail`,
/// `order_list`, ...). `None` for scenarios with no dedicated type.
#[must_use]
pub fn cache_type_for_scenario(scenario: &str) -> Option<&'static str> {
    match scenario {
        "product_detail" | "product_list" => Some("product_info"),
        "inventory_status" => Some("inventory"),
        "order_detail" | "order_list" => Some("order_list"),
        "category_list" | "category_tree" => Some("category_list"),
        "shop_info" => Some("shop_info"),
        _ => None,
    }
}
