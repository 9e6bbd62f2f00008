//! Load Balancer - Rotation with Failover
//!
//! Routes each unit of work to a healthy [`WebServer`]. Selection resumes at
//! the position after the last returned node and skips nodes that are marked
//! down in the health registry or report themselves unhealthy, wrapping at
//! most once around the pool.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::web_server::WebServer;
use crate::error::{Error, Result};
use crate::monitoring::HealthCheckResult;

/// Round-robin balancer over a pool of web servers
#[derive(Default)]
pub struct LoadBalancer {
    /// Registered nodes, in registration order
    servers: RwLock<Vec<Arc<WebServer>>>,
    /// server name -> routable
    registry: DashMap<String, bool>,
    /// Index of the last returned node
    cursor: Mutex<Option<usize>>,
}

impl LoadBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a candidate; it starts marked up
    pub fn add_server(&self, server: Arc<WebServer>) {
        info!(server = %server.name(), capacity = server.capacity(), "registering web server");
        self.registry.insert(server.name().to_string(), true);
        self.servers.write().push(server);
    }

    /// Pick the next routable node
    pub fn next_server(&self) -> Result<Arc<WebServer>> {
        // Held for the whole scan so concurrent callers advance the rotation one at a time
        let mut cursor = self.cursor.lock();
        let servers = self.servers.read();
        let n = servers.len();
        let start = cursor.map_or(0, |last| last + 1);

        for offset in 0..n {
            let idx = (start + offset) % n;
            let server = &servers[idx];
            if self.is_marked_up(server.name()) && server.is_healthy() {
                *cursor = Some(idx);
                return Ok(server.clone());
            }
        }

        warn!(candidates = n, "no healthy server available");
        Err(Error::NoHealthyServer)
    }

    /// Mark a node down. Returns false for unknown names.
    pub fn mark_down(&self, name: &str) -> bool {
        self.set_marked(name, false)
    }

    /// Mark a node up. Returns false for unknown names.
    pub fn mark_up(&self, name: &str) -> bool {
        self.set_marked(name, true)
    }

    fn set_marked(&self, name: &str, up: bool) -> bool {
        match self.registry.get_mut(name) {
            Some(mut entry) => {
                if *entry != up {
                    debug!(server = %name, up, "health registry updated");
                }
                *entry = up;
                true
            }
            None => false,
        }
    }

    /// Registry state for a node; unknown names count as down
    pub fn is_marked_up(&self, name: &str) -> bool {
        self.registry.get(name).map(|e| *e).unwrap_or(false)
    }

    /// Registered nodes in registration order
    pub fn servers(&self) -> Vec<Arc<WebServer>> {
        self.servers.read().clone()
    }

    pub fn len(&self) -> usize {
        self.servers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Nodes currently eligible for routing
    pub fn healthy_count(&self) -> usize {
        self.servers
            .read()
            .iter()
            .filter(|s| self.is_marked_up(s.name()) && s.is_healthy())
            .count()
    }

    /// One check per node: marked down is unhealthy, over threshold is degraded
    pub fn health_checks(&self) -> Vec<HealthCheckResult> {
        self.servers
            .read()
            .iter()
            .map(|s| {
                if !self.is_marked_up(s.name()) {
                    HealthCheckResult::unhealthy(s.name(), "marked down")
                } else if !s.is_healthy() {
                    HealthCheckResult::degraded(
                        s.name(),
                        format!("in-flight {} of capacity {}", s.in_flight(), s.capacity()),
                    )
                } else {
                    HealthCheckResult::healthy(s.name())
                }
            })
            .collect()
    }
}

impl std::fmt::Debug for LoadBalancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadBalancer")
            .field("servers", &self.len())
            .field("healthy", &self.healthy_count())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
