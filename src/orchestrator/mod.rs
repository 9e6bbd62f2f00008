//! Orchestration
//!
//! Single request path over the whole stack plus a synthetic load driver.
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────────────┐
//!   WorkUnit ───▶ │     Orchestrator     │ ───▶ MetricsCollector
//!                 └──────────┬───────────┘
//!                            │ next_server()
//!                 ┌──────────▼───────────┐
//!                 │     LoadBalancer     │
//!                 │  web-1  web-2  web-3 │
//!                 └──────────┬───────────┘
//!                            │ process()
//!            ┌───────────────┼────────────────────┐
//!            ▼               ▼                    ▼
//!      ┌──────────┐   ┌─────────────┐      ┌──────────────┐
//!      │ cache-1  │   │ db-primary  │ ───▶ │ db-replica-N │
//!      └──────────┘   └─────────────┘ async└──────────────┘
//!                                replicate
//! ```

mod engine;
mod load;

pub use engine::Orchestrator;
pub use load::{LoadGenerator, LoadReport};
