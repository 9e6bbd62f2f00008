//! Orchestrator Engine
//!
//! Wires the load balancer, web pool, cache and database set into a single
//! request path and records every outcome.
//!
//! # Request Lifecycle
//!
//! ```text
//! Created ──route──▶ Routed ──process──▶ Dispatched ──storage──▶ Completed
//!    │                  │                     │
//!    └──────────────────┴─────────────────────┴──────────────────▶ Failed
//! ```
//!
//! - Read: cache, then a routed database instance on miss, then repopulate
//! - Search: routed database instance, cache bypassed
//! - Write/Upload: primary only, synchronous invalidation, asynchronous
//!   best-effort replication to every replica

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, trace, warn};

use crate::balancer::{LoadBalancer, WebServer, WebServerStats};
use crate::config::{ReadRouting, SimulationConfig};
use crate::domain::{Outcome, Served, Source, WorkKind, WorkState, WorkUnit};
use crate::error::{Error, Result};
use crate::monitoring::{
    HealthCheck, HealthCheckResult, HealthResponse, MetricsCollector, MetricsSnapshot,
    SampleOutcome,
};
use crate::random::SimRng;
use crate::storage::{CacheServer, CacheStats, DatabaseServer, DatabaseStats};

// Random stream numbers; every component draws from its own generator
const ROUTING_STREAM: u64 = 0;
pub(crate) const LOAD_STREAM: u64 = 1;
const WEB_STREAM: u64 = 1_000;
const DATABASE_STREAM: u64 = 2_000;

/// Tracks the state of one work unit
struct Lifecycle {
    id: u64,
    state: WorkState,
}

impl Lifecycle {
    fn new(id: u64) -> Self {
        Self {
            id,
            state: WorkState::Created,
        }
    }

    fn advance(&mut self, next: WorkState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        trace!(work_id = self.id, from = %self.state, to = %next, "work state");
        self.state = next;
    }
}

/// The serving stack
pub struct Orchestrator {
    config: SimulationConfig,
    balancer: LoadBalancer,
    cache: CacheServer,
    databases: Vec<Arc<DatabaseServer>>,
    primary: Option<Arc<DatabaseServer>>,
    metrics: Arc<MetricsCollector>,
    rng: Arc<SimRng>,
    health: HealthCheck,
    replication: TaskTracker,
    next_id: AtomicU64,
}

impl Orchestrator {
    /// Build a stack from configuration: `servers` web nodes, one primary,
    /// `replicas` replicas, one cache and one metrics collector.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        let seed = config.seed;

        let balancer = LoadBalancer::new();
        for i in 1..=config.servers {
            balancer.add_server(Arc::new(WebServer::new(
                format!("web-{}", i),
                config.web.clone(),
                Arc::new(SimRng::stream(seed, WEB_STREAM + i as u64)),
            )));
        }

        let mut databases = vec![Arc::new(DatabaseServer::primary(
            "db-primary",
            config.database.clone(),
            Arc::new(SimRng::stream(seed, DATABASE_STREAM)),
        ))];
        for i in 1..=config.replicas {
            databases.push(Arc::new(DatabaseServer::replica(
                format!("db-replica-{}", i),
                config.database.clone(),
                Arc::new(SimRng::stream(seed, DATABASE_STREAM + i as u64)),
            )));
        }

        let cache = CacheServer::with_config("cache-1", config.cache.clone());
        let metrics = MetricsCollector::new(config.metrics.clone());
        let rng = Arc::new(SimRng::stream(seed, ROUTING_STREAM));

        Ok(Self::from_parts(config, balancer, cache, databases, metrics, rng))
    }

    /// Assemble a stack from already-built components
    pub fn from_parts(
        config: SimulationConfig,
        balancer: LoadBalancer,
        cache: CacheServer,
        databases: Vec<Arc<DatabaseServer>>,
        metrics: MetricsCollector,
        rng: Arc<SimRng>,
    ) -> Self {
        let primary = databases.iter().find(|db| db.is_primary()).cloned();
        if primary.is_none() {
            warn!("database set has no primary, writes will fail");
        }

        let health = HealthCheck::new();
        health.set_ready(true);

        Self {
            config,
            balancer,
            cache,
            databases,
            primary,
            metrics: Arc::new(metrics),
            rng,
            health,
            replication: TaskTracker::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate a work unit id
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Handle one work unit end to end. Never panics on storage or routing
    /// errors; they come back as a failed outcome.
    #[instrument(skip(self, work), fields(work_id = work.id, kind = %work.kind))]
    pub async fn handle(&self, work: WorkUnit) -> Outcome {
        let start = Instant::now();
        let mut lifecycle = Lifecycle::new(work.id);
        let mut server_name = None;

        let result = self.execute(&work, &mut lifecycle, &mut server_name).await;

        let latency = start.elapsed();
        let sample = match &result {
            Ok(_) => {
                lifecycle.advance(WorkState::Completed);
                SampleOutcome::Success
            }
            Err(err) => {
                lifecycle.advance(WorkState::Failed);
                debug!(error = %err, "work failed");
                SampleOutcome::Failure(err.kind())
            }
        };
        self.metrics.record(work.kind, latency, sample);

        Outcome {
            id: work.id,
            kind: work.kind,
            key: work.key,
            server: server_name,
            state: lifecycle.state,
            result,
            latency,
        }
    }

    async fn execute(
        &self,
        work: &WorkUnit,
        lifecycle: &mut Lifecycle,
        server_name: &mut Option<String>,
    ) -> Result<Served> {
        let server = self.balancer.next_server()?;
        *server_name = Some(server.name().to_string());
        lifecycle.advance(WorkState::Routed);

        server.process(work).await?;
        lifecycle.advance(WorkState::Dispatched);

        match work.kind {
            WorkKind::Read => self.read_through(&work.key).await,
            WorkKind::Search => self.search(&work.key).await,
            WorkKind::Write | WorkKind::Upload => {
                let value = match &work.payload {
                    Some(value) => value.clone(),
                    None => format!("{}-{:016x}", work.kind, self.rng.token()),
                };
                self.write_through(&work.key, &value).await
            }
        }
    }

    /// Cache-aside read
    async fn read_through(&self, key: &str) -> Result<Served> {
        if let Some(value) = self.cache.get(key) {
            return Ok(Served {
                source: Source::Cache,
                value: Some(value),
                version: None,
            });
        }

        let db = self.route_read()?;
        let value = db.read(key).await;
        self.cache.set(key, value.clone());

        Ok(Served {
            source: Source::Database(db.name().to_string()),
            value: Some(value),
            version: None,
        })
    }

    /// Database read that never touches the cache
    async fn search(&self, key: &str) -> Result<Served> {
        let db = self.route_read()?;
        let value = db.read(key).await;
        Ok(Served {
            source: Source::Database(db.name().to_string()),
            value: Some(value),
            version: None,
        })
    }

    /// Commit on the primary, invalidate, then replicate in the background
    async fn write_through(&self, key: &str, value: &str) -> Result<Served> {
        let primary = self.primary.as_ref().ok_or(Error::NoPrimary)?;
        let version = primary.write(key, value).await?;

        self.cache.invalidate(key);
        self.spawn_replication(primary, key);

        Ok(Served {
            source: Source::Database(primary.name().to_string()),
            value: None,
            version: Some(version),
        })
    }

    /// Fire-and-forget catch-up of every replica; failures are only logged and counted
    fn spawn_replication(&self, primary: &Arc<DatabaseServer>, key: &str) {
        for replica in self.databases.iter().filter(|db| !db.is_primary()) {
            let primary = primary.clone();
            let replica = replica.clone();
            let metrics = self.metrics.clone();
            let key = key.to_string();

            self.replication.spawn(async move {
                match replica.replicate_from(&primary, &key).await {
                    Ok(true) => metrics.counter("replication_applied_total").inc(),
                    Ok(false) => metrics.counter("replication_skipped_total").inc(),
                    Err(err) => {
                        warn!(replica = %replica.name(), key = %key, error = %err, "replication failed");
                        metrics.counter("replication_failures_total").inc();
                    }
                }
            });
        }
    }

    /// Pick the database instance for a read according to the routing policy
    fn route_read(&self) -> Result<&Arc<DatabaseServer>> {
        if self.databases.is_empty() {
            return Err(Error::NoDatabase);
        }

        match self.config.read_routing {
            ReadRouting::Random => Ok(&self.databases[self.rng.index(self.databases.len())]),
            ReadRouting::Primary => self.primary_ref(),
            ReadRouting::Replicas => {
                let replicas: Vec<&Arc<DatabaseServer>> =
                    self.databases.iter().filter(|db| !db.is_primary()).collect();
                if replicas.is_empty() {
                    self.primary_ref()
                } else {
                    Ok(replicas[self.rng.index(replicas.len())])
                }
            }
        }
    }

    fn primary_ref(&self) -> Result<&Arc<DatabaseServer>> {
        self.databases
            .iter()
            .find(|db| db.is_primary())
            .ok_or(Error::NoPrimary)
    }

    /// Wait until every replication task spawned so far has finished
    pub async fn drain_replication(&self) {
        self.replication.close();
        self.replication.wait().await;
        self.replication.reopen();
    }

    /// Replication tasks still running
    pub fn pending_replications(&self) -> usize {
        self.replication.len()
    }

    pub fn mark_down(&self, server: &str) -> bool {
        self.balancer.mark_down(server)
    }

    pub fn mark_up(&self, server: &str) -> bool {
        self.balancer.mark_up(server)
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub fn snapshot_cache(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn snapshot_metrics(&self) -> MetricsSnapshot {
        self.refresh_gauges();
        self.metrics.snapshot()
    }

    pub fn snapshot_databases(&self) -> Vec<DatabaseStats> {
        self.databases.iter().map(|db| db.stats()).collect()
    }

    pub fn snapshot_servers(&self) -> Vec<WebServerStats> {
        self.balancer.servers().iter().map(|s| s.stats()).collect()
    }

    /// Metrics in Prometheus text format
    pub fn export_metrics(&self) -> String {
        self.refresh_gauges();
        self.metrics.export_text()
    }

    fn refresh_gauges(&self) {
        self.metrics.gauge("cache_entries").set(self.cache.len() as u64);
        self.metrics
            .gauge("healthy_servers")
            .set(self.balancer.healthy_count() as u64);
        self.metrics
            .gauge("pending_replications")
            .set(self.replication.len() as u64);
    }

    /// Aggregate health: liveness, readiness, web pool and database set
    pub fn health(&self) -> HealthResponse {
        let pool = HealthCheckResult::availability(
            "web-pool",
            self.balancer.healthy_count(),
            self.balancer.len(),
        );
        let database = if self.primary.is_some() {
            HealthCheckResult::healthy("database-set")
        } else if self.databases.is_empty() {
            HealthCheckResult::unhealthy("database-set", "no database instance")
        } else {
            HealthCheckResult::degraded("database-set", "no primary, read-only")
        };
        self.health.respond(vec![pool, database])
    }

    /// Mark the stack stopped; liveness and readiness report unhealthy
    pub fn shutdown(&self) {
        info!("serving stack shutting down");
        self.health.set_ready(false);
        self.health.set_live(false);
    }

    /// Per-node health as seen by the balancer
    pub fn node_health(&self) -> Vec<HealthCheckResult> {
        self.balancer.health_checks()
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn balancer(&self) -> &LoadBalancer {
        &self.balancer
    }

    pub fn cache(&self) -> &CacheServer {
        &self.cache
    }

    pub fn databases(&self) -> &[Arc<DatabaseServer>] {
        &self.databases
    }

    pub fn primary(&self) -> Option<&Arc<DatabaseServer>> {
        self.primary.as_ref()
    }

    /// Replicas in configuration order
    pub fn replicas(&self) -> Vec<Arc<DatabaseServer>> {
        self.databases
            .iter()
            .filter(|db| !db.is_primary())
            .cloned()
            .collect()
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    #[cfg(test)]
    pub(crate) fn rng(&self) -> &Arc<SimRng> {
        &self.rng
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("balancer", &self.balancer)
            .field("databases", &self.databases.len())
            .field("cache_entries", &self.cache.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::HealthStatus;
    use crate::storage::{DatabaseConfig, MISSING_VALUE};
    use assert_matches::assert_matches;

    fn instant(routing: ReadRouting) -> Orchestrator {
        let config = SimulationConfig {
            read_routing: routing,
            seed: Some(17),
            ..SimulationConfig::instant()
        };
        Orchestrator::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_default_topology() {
        let orch = instant(ReadRouting::Random);
        assert_eq!(orch.balancer().len(), 3);
        assert_eq!(orch.databases().len(), 2);
        assert_eq!(orch.primary().unwrap().name(), "db-primary");
        assert_eq!(orch.replicas()[0].name(), "db-replica-1");
        assert_eq!(orch.cache().max_size(), 10_000);
    }

    #[tokio::test]
    async fn test_components_draw_from_separate_generators() {
        let orch = instant(ReadRouting::Random);

        let mut generators: Vec<Arc<SimRng>> = vec![orch.rng().clone()];
        generators.extend(orch.balancer().servers().iter().map(|s| s.rng().clone()));
        generators.extend(orch.databases().iter().map(|db| db.rng().clone()));
        assert_eq!(generators.len(), 6);

        for (i, a) in generators.iter().enumerate() {
            for b in &generators[i + 1..] {
                assert!(!Arc::ptr_eq(a, b));
            }
        }
    }

    #[tokio::test]
    async fn test_same_seed_same_routing() {
        let a = instant(ReadRouting::Random);
        let b = instant(ReadRouting::Random);

        for id in 0..20 {
            let key = format!("key-{}", id);
            let left = a.handle(WorkUnit::search(id, key.clone())).await;
            let right = b.handle(WorkUnit::search(id, key)).await;
            assert_eq!(left.source(), right.source());
        }
    }

    #[tokio::test]
    async fn test_read_miss_then_hit() {
        let orch = instant(ReadRouting::Primary);
        orch.handle(WorkUnit::write(1, "a", "v1")).await;

        let first = orch.handle(WorkUnit::read(2, "a")).await;
        assert_eq!(first.state, WorkState::Completed);
        assert_eq!(first.value(), Some("v1"));
        assert_eq!(first.source(), Some(&Source::Database("db-primary".into())));

        let second = orch.handle(WorkUnit::read(3, "a")).await;
        assert_eq!(second.source(), Some(&Source::Cache));
        assert_eq!(second.value(), Some("v1"));
    }

    #[tokio::test]
    async fn test_write_invalidates_cache() {
        let orch = instant(ReadRouting::Primary);
        orch.handle(WorkUnit::write(1, "a", "v1")).await;
        orch.handle(WorkUnit::read(2, "a")).await;
        assert!(orch.cache().contains("a"));

        let write = orch.handle(WorkUnit::write(3, "a", "v2")).await;
        assert!(write.is_success());
        assert_eq!(write.version(), Some(2));
        assert!(!orch.cache().contains("a"));

        let read = orch.handle(WorkUnit::read(4, "a")).await;
        assert_eq!(read.value(), Some("v2"));
    }

    #[tokio::test]
    async fn test_search_bypasses_cache() {
        let orch = instant(ReadRouting::Primary);
        let outcome = orch.handle(WorkUnit::search(1, "q")).await;
        assert_eq!(outcome.value(), Some(MISSING_VALUE));
        assert!(orch.cache().is_empty());
        assert_eq!(orch.cache().hits() + orch.cache().misses(), 0);
    }

    #[tokio::test]
    async fn test_upload_generates_payload() {
        let orch = instant(ReadRouting::Primary);
        let outcome = orch
            .handle(WorkUnit::new(1, WorkKind::Upload, "blob"))
            .await;
        assert!(outcome.is_success());

        let stored = orch.primary().unwrap().peek("blob").unwrap();
        assert!(stored.value.starts_with("upload-"));
    }

    #[tokio::test]
    async fn test_replication_reaches_replica() {
        let orch = instant(ReadRouting::Replicas);
        orch.handle(WorkUnit::write(1, "a", "v1")).await;
        orch.drain_replication().await;

        let replica = &orch.replicas()[0];
        assert_eq!(replica.peek("a").unwrap().value, "v1");
        assert_eq!(
            orch.snapshot_metrics().counters.get("replication_applied_total"),
            Some(&1)
        );
    }

    #[tokio::test]
    async fn test_all_servers_down_fails_request() {
        let orch = instant(ReadRouting::Random);
        for name in ["web-1", "web-2", "web-3"] {
            assert!(orch.mark_down(name));
        }

        let outcome = orch.handle(WorkUnit::read(1, "a")).await;
        assert_eq!(outcome.state, WorkState::Failed);
        assert!(outcome.server.is_none());
        assert_matches!(outcome.error(), Some(Error::NoHealthyServer));

        let metrics = orch.snapshot_metrics();
        assert_eq!(metrics.total_errors, 1);
        assert_eq!(metrics.counters.get("errors_total_no_healthy_server"), Some(&1));
        assert_eq!(orch.health().status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_write_without_primary_fails() {
        let config = SimulationConfig::instant();
        let rng = Arc::new(SimRng::seeded(1));
        let balancer = LoadBalancer::new();
        balancer.add_server(Arc::new(WebServer::new("web-1", config.web.clone(), rng.clone())));
        let replica = Arc::new(DatabaseServer::replica(
            "db-replica-1",
            DatabaseConfig::instant(),
            rng.clone(),
        ));

        let orch = Orchestrator::from_parts(
            config,
            balancer,
            CacheServer::new("cache-1"),
            vec![replica],
            MetricsCollector::default_config(),
            rng,
        );

        let outcome = orch.handle(WorkUnit::write(1, "a", "v")).await;
        assert_eq!(outcome.server.as_deref(), Some("web-1"));
        assert_matches!(outcome.error(), Some(Error::NoPrimary));

        // Reads still work against the replica
        let read = orch.handle(WorkUnit::read(2, "a")).await;
        assert_eq!(read.value(), Some(MISSING_VALUE));
        assert_eq!(orch.health().status, HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn test_metrics_record_every_outcome() {
        let orch = instant(ReadRouting::Primary);
        orch.handle(WorkUnit::write(1, "a", "1")).await;
        orch.handle(WorkUnit::read(2, "a")).await;
        orch.handle(WorkUnit::search(3, "a")).await;

        let snapshot = orch.snapshot_metrics();
        assert_eq!(snapshot.total_requests, 3);
        assert_eq!(snapshot.kind(WorkKind::Write).succeeded, 1);
        assert_eq!(snapshot.kind(WorkKind::Search).succeeded, 1);
        assert_eq!(snapshot.window_len, 3);
    }

    #[tokio::test]
    async fn test_health_healthy_by_default() {
        let orch = instant(ReadRouting::Random);
        let health = orch.health();
        assert_eq!(health.status, HealthStatus::Healthy);
        assert!(health.check("web-pool").is_some());

        orch.mark_down("web-2");
        assert_eq!(orch.health().status, HealthStatus::Degraded);
        assert_eq!(orch.node_health()[1].status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_shutdown_reports_not_live() {
        let orch = instant(ReadRouting::Random);
        orch.shutdown();

        let health = orch.health();
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert!(!health.status.is_operational());
        assert_eq!(health.check("liveness").unwrap().status, HealthStatus::Unhealthy);
        assert_eq!(health.check("readiness").unwrap().status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_export_metrics() {
        let orch = instant(ReadRouting::Primary);
        orch.handle(WorkUnit::read(1, "a")).await;
        let text = orch.export_metrics();
        assert!(text.contains("cache_entries 1"));
        assert!(text.contains("healthy_servers 3"));
    }
}
