//! Bulk marketplace writes.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  optimizer.rs - BatchOperationOptimizer, BatchReport         │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod optimizer;

pub use optimizer::{BatchOperationOptimizer, BatchReport, OrderSyncReport};
