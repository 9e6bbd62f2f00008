//! Web Server - Compute Node
//!
//! Processes one unit of work at a time per call and derives its health from
//! in-flight load against declared capacity.
//!
//! # Admission Control
//!
//! - Healthy while `in_flight < 0.9 × capacity`, leaving headroom for bursts
//! - Above `0.8 × capacity` a call may be rejected with `Overloaded`,
//!   modelling cascading saturation
//! - The in-flight count is released by a drop guard, so it is restored on
//!   success, rejection and cancellation alike

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::domain::WorkUnit;
use crate::error::{Error, Result};
use crate::random::SimRng;

/// Default declared capacity per node
pub const DEFAULT_CAPACITY: u64 = 1000;

/// Load factor under which a node reports healthy
pub const HEALTHY_LOAD_FACTOR: f64 = 0.9;

/// Load factor above which a node may reject work
pub const OVERLOAD_LOAD_FACTOR: f64 = 0.8;

/// Decides whether a saturated node rejects a call
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "probability")]
pub enum FailurePolicy {
    /// Reject with the given probability (0.0 - 1.0)
    Probabilistic(f64),
    /// Never reject
    Never,
    /// Always reject once over the overload threshold
    Always,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        FailurePolicy::Probabilistic(0.1)
    }
}

/// Web server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebServerConfig {
    /// Declared concurrent capacity
    pub capacity: u64,
    /// Minimum simulated processing time (ms)
    pub processing_delay_min_ms: u64,
    /// Maximum simulated processing time (ms)
    pub processing_delay_max_ms: u64,
    /// Rejection behaviour when saturated
    pub failure_policy: FailurePolicy,
}

impl Default for WebServerConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            processing_delay_min_ms: 10,
            processing_delay_max_ms: 50,
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl WebServerConfig {
    /// Configuration with no processing delay
    pub fn instant(capacity: u64) -> Self {
        Self {
            capacity,
            processing_delay_min_ms: 0,
            processing_delay_max_ms: 0,
            ..Default::default()
        }
    }
}

/// A request-handling node
pub struct WebServer {
    name: String,
    config: WebServerConfig,
    rng: Arc<SimRng>,
    in_flight: AtomicU64,
    processed: AtomicU64,
    rejected: AtomicU64,
}

/// Holds one in-flight slot until dropped
pub(crate) struct InFlight<'a> {
    server: &'a WebServer,
    /// In-flight count including this slot
    pub(crate) level: u64,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.server.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

impl WebServer {
    pub fn new(name: impl Into<String>, config: WebServerConfig, rng: Arc<SimRng>) -> Self {
        Self {
            name: name.into(),
            config,
            rng,
            in_flight: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    #[cfg(test)]
    pub(crate) fn rng(&self) -> &Arc<SimRng> {
        &self.rng
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> u64 {
        self.config.capacity
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Acquire)
    }

    /// `in_flight < 0.9 × capacity`
    pub fn is_healthy(&self) -> bool {
        (self.in_flight() as f64) < HEALTHY_LOAD_FACTOR * self.config.capacity as f64
    }

    /// Current load as a fraction of capacity
    pub fn utilization(&self) -> f64 {
        if self.config.capacity == 0 {
            return 1.0;
        }
        self.in_flight() as f64 / self.config.capacity as f64
    }

    pub(crate) fn enter(&self) -> InFlight<'_> {
        let level = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        InFlight {
            server: self,
            level,
        }
    }

    /// Process one unit of work
    pub async fn process(&self, work: &WorkUnit) -> Result<()> {
        let slot = self.enter();

        let delay = self.rng.duration_between(
            Duration::from_millis(self.config.processing_delay_min_ms),
            Duration::from_millis(self.config.processing_delay_max_ms),
        );
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let saturated = slot.level as f64 > OVERLOAD_LOAD_FACTOR * self.config.capacity as f64;
        if saturated && self.should_reject() {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            debug!(server = %self.name, work_id = work.id, in_flight = slot.level, "rejecting work, overloaded");
            return Err(Error::Overloaded {
                server: self.name.clone(),
            });
        }

        self.processed.fetch_add(1, Ordering::Relaxed);
        trace!(server = %self.name, work_id = work.id, "processed");
        Ok(())
    }

    fn should_reject(&self) -> bool {
        match self.config.failure_policy {
            FailurePolicy::Never => false,
            FailurePolicy::Always => true,
            FailurePolicy::Probabilistic(p) => self.rng.chance(p),
        }
    }

    pub fn stats(&self) -> WebServerStats {
        WebServerStats {
            name: self.name.clone(),
            capacity: self.config.capacity,
            in_flight: self.in_flight(),
            healthy: self.is_healthy(),
            processed: self.processed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for WebServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebServer")
            .field("name", &self.name)
            .field("capacity", &self.config.capacity)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// Web server statistics
#[derive(Debug, Clone, Serialize)]
pub struct WebServerStats {
    pub name: String,
    pub capacity: u64,
    pub in_flight: u64,
    pub healthy: bool,
    pub processed: u64,
    pub rejected: u64,
}

// =============================================================================
// Tests
// =============================================================================
