//! Storage Tier
//!
//! Cache-aside storage behind the web pool.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                            Storage Tier                                   │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │  ┌────────────────────┐        ┌──────────────────────────────────────┐  │
//! │  │ CacheServer        │  miss  │ Database Set                         │  │
//! │  │ (insertion-order   │ ─────▶ │  primary (writes, txn log)           │  │
//! │  │  bounded eviction) │        │     │  async replicate               │  │
//! │  └────────────────────┘        │     ▼                                │  │
//! │          ▲ invalidate on write │  replica(s) (read-only, eventually   │  │
//! │          └──────────────────── │              consistent)             │  │
//! │                                └──────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```

mod cache;
mod database;
#[cfg(test)]
mod proptest;

pub use cache::{CacheConfig, CacheServer, CacheStats, DEFAULT_CACHE_MAX_SIZE};
pub use database::{
    DatabaseConfig, DatabaseRole, DatabaseServer, DatabaseStats, StoreRecord, TransactionRecord,
    MISSING_VALUE,
};
