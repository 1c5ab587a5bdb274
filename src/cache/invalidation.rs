// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Domain event -> key patterns to invalidate.
//!
//! The table is static on purpose: a new event type needs a new row here,
//! and the whole mapping can be read in one place.

use serde_json::Value;

const EVENT_PATTERNS: &[(&str, &[&str])] = &[
    ("product_created", &["product:*"]),
    ("product_updated", &["product:*", "inventory:*"]),
    ("product_deleted", &["product:*", "inventory:*"]),
    ("inventory_updated", &["inventory:*", "product:*"]),
    ("stock_adjusted", &["inventory:*"]),
    ("order_created", &["order:*", "customer:*"]),
    ("order_updated", &["order:*"]),
    ("order_deleted", &["order:*"]),
    ("customer_created", &["customer:*"]),
    ("customer_updated", &["customer:*"]),
    ("customer_deleted", &["customer:*"]),
    ("supplier_created", &["supplier:*"]),
    ("supplier_updated", &["supplier:*"]),
    ("supplier_deleted", &["supplier:*"]),
    ("config_updated", &["system_config:*"]),
    ("category_updated", &["category:*", "product:*"]),
];

/// Whether `event` has a row in the table.
#[must_use]
pub fn is_known_event(event: &str) -> bool {
    EVENT_PATTERNS.iter().any(|(name, _)| *name == event)
}

/// Every event name the table knows, in table order.
pub fn known_events() -> impl Iterator<Item = &'static str> {
    EVENT_PATTERNS.iter().map(|(name, _)| *name)
}

/// Entity id from the payload; strings and integers are accepted.
fn entity_id(payload: &Value, field: &str) -> Option<String> {
    match payload.get(field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Patterns to invalidate for `event`. Unknown events yield nothing.
///
/// A `product_id` in the payload adds `product:{id}:*` and
/// `inventory:*:{id}:*`; a `customer_id` adds `customer:{id}:*` and
/// `order:*:{id}:*`. Duplicates are removed, table order is kept.
#[must_use]
pub fn patterns_for_event(event: &str, payload: &Value) -> Vec<String> {
    let Some((_, base)) = EVENT_PATTERNS.iter().find(|(name, _)| *name == event) else {
        return Vec::new();
    };

    let mut patterns: Vec<String> = base.iter().map(|p| (*p).to_string()).collect();
    if let Some(id) = entity_id(payload, "product_id") {
        patterns.push(format!("product:{id}:*"));
        patterns.push(format!("inventory:*:{id}:*"));
    }
    if let Some(id) = entity_id(payload, "customer_id") {
        patterns.push(format!("customer:{id}:*"));
        patterns.push(format!("order:*:{id}:*"));
    }

    let mut seen = std::collections::HashSet::new();
    patterns.retain(|p| seen.insert(p.clone()));
    patterns
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_product_updated_with_id() {
        let patterns = patterns_for_event("product_updated", &json!({"product_id": "P-9"}));
        assert_eq!(
            patterns,
            vec!["product:*", "inventory:*", "product:P-9:*", "inventory:*:P-9:*"]
        );
    }

    #[test]
    fn test_numeric_customer_id() {
        let patterns = patterns_for_event("order_created", &json!({"customer_id": 42}));
        assert_eq!(
            patterns,
            vec!["order:*", "customer:*", "customer:42:*", "order:*:42:*"]
        );
    }

    #[test]
    fn test_unknown_event_invalidates_nothing() {
        assert!(patterns_for_event("warehouse_moved", &json!({"product_id": 1})).is_empty());
        assert!(!is_known_event("warehouse_moved"));
    }

    #[test]
    fn test_every_known_event_has_patterns() {
        for event in known_events() {
            assert!(is_known_event(event));
            assert!(!patterns_for_event(event, &Value::Null).is_empty(), "{event}");
        }
        assert_eq!(known_events().count(), 16);
    }

    #[test]
    fn test_empty_id_ignored() {
        let patterns = patterns_for_event("stock_adjusted", &json!({"product_id": ""}));
        assert_eq!(patterns, vec!["inventory:*"]);
    }
}
