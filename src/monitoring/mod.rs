//! Observability
//!
//! Request metrics and health reporting for the serving path.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                          Observability                                    │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────────────────────────┐  ┌──────────────────────────────┐  │
//! │  │ MetricsCollector                 │  │ Health Checks                │  │
//! │  │  rolling window (latency/outcome)│  │  liveness / readiness        │  │
//! │  │  per-kind counters, histogram    │  │  web pool / database set     │  │
//! │  └──────────────────────────────────┘  └──────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```

mod collector;
mod health;

pub use collector::{
    Counter, Gauge, Histogram, HistogramBucket, KindSnapshot, MetricsCollector, MetricsConfig,
    MetricsSnapshot, Sample, SampleOutcome, DEFAULT_WINDOW_SIZE,
};
pub use health::{HealthCheck, HealthCheckResult, HealthResponse, HealthStatus};
