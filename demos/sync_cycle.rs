// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! One sync cycle end to end: exclusive job, batched inventory push, order
//! pull, cached catalogue reads and the resulting call statistics.
//!
//! Runs against an in-process store and marketplace by default; set
//! `REDIS_URL` to coordinate through a real Redis instead.
//!
//! ```bash
//! RUST_LOG=marketplace_sync=debug cargo run --example sync_cycle
//! REDIS_URL=redis://localhost:6379 cargo run --example sync_cycle
//! ```

use marketplace_sync::{
    InventoryUpdate, JobOutcome, MemoryAdapter, MemoryStore, NormalizedOrder, NormalizedProduct, OrderFilter,
    OrderStatus, Platform, PlatformAdapter, ProductDraft, ProductStatus, SyncConfig, SyncContext,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn seed(adapter: &MemoryAdapter) {
    for (i, sku) in ["MUG-1", "MUG-2", "TEE-1", "TEE-2", "CAP-1"].iter().enumerate() {
        adapter.insert_product(NormalizedProduct {
            id: format!("P{i}"),
            sku: (*sku).to_string(),
            name: format!("Item {sku}"),
            description: String::new(),
            price: 9.99 + i as f64,
            currency: "USD".into(),
            stock: 10,
            status: ProductStatus::OnSale,
            images: Vec::new(),
        });
    }
    for i in 0..12 {
        adapter.insert_order(NormalizedOrder {
            order_id: format!("ORD-{i:03}"),
            status: if i % 3 == 0 { OrderStatus::Pending } else { OrderStatus::Paid },
            amount: 20.0 + f64::from(i),
            currency: "USD".into(),
            ..NormalizedOrder::default()
        });
    }
    // one SKU the platform keeps rejecting, one order that times out once
    adapter.fail_always("TEE-2");
    adapter.fail_times("ORD-004", 1);
}

#[tokio::main]
async fn main() -> marketplace_sync::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut config = SyncConfig::default();
    config.retry.base_delay_secs = 0.05;
    config.retry.max_delay_secs = 0.5;
    config.batch.batch_sizes.inventory_update = 2;

    let ctx = match std::env::var("REDIS_URL") {
        Ok(url) => {
            config.redis_url = Some(url);
            config.key_prefix = Some("demo:".into());
            SyncContext::connect(config).await?
        }
        Err(_) => SyncContext::with_store(Arc::new(MemoryStore::new()), config),
    };

    let adapter = Arc::new(MemoryAdapter::new(Platform::TikTok).with_native_batch(true));
    seed(&adapter);
    let optimizer = ctx.optimizer(adapter.clone());

    // Inventory push, one worker at a time
    let updates: Vec<InventoryUpdate> = ["MUG-1", "MUG-2", "TEE-1", "TEE-2", "CAP-1"]
        .iter()
        .enumerate()
        .map(|(i, sku)| InventoryUpdate::new(*sku, (i as u32 + 1) * 5))
        .collect();
    let outcome = ctx
        .run_exclusive("inventory_sync:tiktok", Some(Duration::from_secs(2)), || {
            optimizer.batch_update_inventory(&updates, None)
        })
        .await?;
    match outcome {
        JobOutcome::Completed(report) => {
            println!(
                "inventory: {} succeeded, {} failed in {:?}",
                report.succeeded, report.failed, report.elapsed
            );
            for failure in report.failures() {
                println!("  {} -> {}", failure.key, failure.error.as_deref().unwrap_or("?"));
            }
        }
        JobOutcome::Skipped => println!("inventory: another worker holds the job, skipped"),
    }

    // New listings go through the same path
    let drafts = vec![
        ProductDraft::named("Enamel pin").with_sku("PIN-1").with_price(4.5),
        ProductDraft::named("Sticker pack").with_sku("STK-1").with_price(3.0).with_stock(250),
    ];
    let created = optimizer.batch_create_products(&drafts, None).await;
    for result in &created.results {
        println!("created {} as {}", result.key, result.product_id.as_deref().unwrap_or("-"));
    }

    // Order pull: list ids, then fetch each concurrently
    let filter = OrderFilter { limit: 50, ..OrderFilter::default() };
    let listed = ctx
        .call_adapter(Platform::TikTok, "get_orders", || adapter.get_orders(&filter))
        .await?;
    let ids: Vec<String> = listed.iter().map(|o| o.order_id.clone()).collect();
    let orders = optimizer.batch_sync_orders(&ids, Some(5)).await;
    let revenue: f64 = orders.orders.iter().map(|o| o.amount).sum();
    println!("orders: {} fetched, revenue {revenue:.2}", orders.orders.len());

    // Catalogue reads through the two-tier cache
    for _ in 0..3 {
        let product: NormalizedProduct = ctx
            .cache()
            .get_or_load("product:tiktok:P0", "product_info", || async {
                ctx.call_adapter(Platform::TikTok, "get_product", || adapter.get_product("P0")).await
            })
            .await?;
        println!("cached product {} stock {}", product.sku, product.stock);
    }
    println!("cache: {:?}", ctx.cache().stats());

    let stats = ctx.monitor().metrics(adapter.platform().as_str(), None, 1).await?;
    println!(
        "api calls: {} (success rate {:.0}%, avg {:.1} ms)",
        stats.count,
        stats.success_rate * 100.0,
        stats.avg_duration_ms
    );
    for status in ctx.rate_limit_status().await {
        println!("rate limit {}: {:.1}/{} tokens", status.platform, status.current_tokens, status.burst);
    }

    ctx.shutdown().await;
    Ok(())
}
