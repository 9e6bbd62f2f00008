//! Health Checks
//!
//! Liveness/readiness of the serving stack plus component checks rolled up
//! into one [`HealthResponse`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// Fully operational
    Healthy,
    /// Operational with reduced headroom or redundancy
    Degraded,
    /// Not operational
    Unhealthy,
}

impl HealthStatus {
    /// Healthy or degraded
    pub fn is_operational(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }

    pub fn is_healthy(&self) -> bool {
        *self == HealthStatus::Healthy
    }

    fn severity(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 2,
        }
    }

    /// Roll up `available` out of `total` members: all up is healthy, none up
    /// is unhealthy, anything in between is degraded.
    pub fn from_availability(available: usize, total: usize) -> Self {
        if total == 0 || available == 0 {
            HealthStatus::Unhealthy
        } else if available < total {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "Healthy"),
            HealthStatus::Degraded => write!(f, "Degraded"),
            HealthStatus::Unhealthy => write!(f, "Unhealthy"),
        }
    }
}

/// Health check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub name: String,
    pub status: HealthStatus,
    pub message: Option<String>,
}

impl HealthCheckResult {
    pub fn healthy(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Healthy,
            message: None,
        }
    }

    pub fn degraded(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Degraded,
            message: Some(message.into()),
        }
    }

    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
        }
    }

    /// Check named `name` summarising `available` of `total` members
    pub fn availability(name: impl Into<String>, available: usize, total: usize) -> Self {
        let status = HealthStatus::from_availability(available, total);
        Self {
            name: name.into(),
            status,
            message: (!status.is_healthy())
                .then(|| format!("{} of {} available", available, total)),
        }
    }
}

/// Overall health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Worst status among the checks
    pub status: HealthStatus,
    pub checks: Vec<HealthCheckResult>,
    pub version: String,
    pub uptime_seconds: u64,
}

impl HealthResponse {
    pub fn new(checks: Vec<HealthCheckResult>, uptime: Duration) -> Self {
        let status = checks
            .iter()
            .map(|c| c.status)
            .max_by_key(HealthStatus::severity)
            .unwrap_or(HealthStatus::Healthy);

        Self {
            status,
            checks,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: uptime.as_secs(),
        }
    }

    /// Find a check by name
    pub fn check(&self, name: &str) -> Option<&HealthCheckResult> {
        self.checks.iter().find(|c| c.name == name)
    }
}

/// Liveness/readiness flags of the serving stack
pub struct HealthCheck {
    start_time: Instant,
    live: AtomicBool,
    ready: AtomicBool,
}

impl HealthCheck {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            live: AtomicBool::new(true),
            ready: AtomicBool::new(false),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Relaxed)
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    pub fn set_live(&self, live: bool) {
        self.live.store(live, Ordering::Relaxed);
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    pub fn liveness_check(&self) -> HealthCheckResult {
        if self.is_live() {
            HealthCheckResult::healthy("liveness")
        } else {
            HealthCheckResult::unhealthy("liveness", "stopped")
        }
    }

    pub fn readiness_check(&self) -> HealthCheckResult {
        if self.is_ready() {
            HealthCheckResult::healthy("readiness")
        } else {
            HealthCheckResult::unhealthy("readiness", "Service not ready")
        }
    }

    /// Liveness and readiness followed by the given component checks
    pub fn respond(&self, components: Vec<HealthCheckResult>) -> HealthResponse {
        let mut checks = vec![self.liveness_check(), self.readiness_check()];
        checks.extend(components);
        HealthResponse::new(checks, self.uptime())
    }
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
