//! tierlab - Simulated Multi-Tier Serving Stack
//!
//! A load-balanced pool of web nodes fronting a primary/replica database set
//! with a cache-aside layer, driven by a synthetic load generator and observed
//! through a rolling-window metrics collector.
//!
//! # Architecture
//!
//! ```text
//! LoadGenerator → Orchestrator → LoadBalancer → WebServer
//!                      │
//!                      ├── CacheServer      (cache-aside reads, invalidate on write)
//!                      ├── DatabaseServer   (primary writes, async replica catch-up)
//!                      └── MetricsCollector (every outcome)
//! ```
//!
//! # Consistency
//!
//! Writes commit on the primary and invalidate the cache key before the
//! request completes. Replicas are caught up by background tasks after a
//! configurable delay, so replica-backed reads may be stale for that window.
//!
//! # Modules
//!
//! - [`balancer`] - Web node pool and round-robin routing with failover
//! - [`config`] - Aggregate configuration, YAML loading
//! - [`domain`] - Work units, lifecycle states and outcomes
//! - [`error`] - Error types
//! - [`monitoring`] - Metrics collector and health checks
//! - [`orchestrator`] - Request path and load driver
//! - [`random`] - Seedable shared random source
//! - [`storage`] - Cache and database instances

pub mod balancer;
pub mod config;
pub mod domain;
pub mod error;
pub mod monitoring;
pub mod orchestrator;
pub mod random;
pub mod storage;

// Re-export commonly used types
pub use balancer::{FailurePolicy, LoadBalancer, WebServer, WebServerConfig};
pub use config::{ReadRouting, SimulationConfig};
pub use domain::{Outcome, WorkKind, WorkState, WorkUnit};
pub use error::{Error, Result};
pub use monitoring::{HealthResponse, HealthStatus, MetricsCollector, MetricsSnapshot};
pub use orchestrator::{LoadGenerator, LoadReport, Orchestrator};
pub use random::SimRng;
pub use storage::{CacheServer, CacheStats, DatabaseServer, MISSING_VALUE};
