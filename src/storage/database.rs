//! Database Server - Primary/Replica Key/Value Store
//!
//! One instance of a replicated data partition. The primary accepts writes,
//! assigns versions and keeps a transaction log. Replicas are read-only and
//! catch up asynchronously through [`DatabaseServer::replicate_from`], so they
//! may serve a stale value for a bounded window after a write.
//!
//! # Invariants
//!
//! - Versions handed out by a primary strictly increase
//! - A replica applies a record only if it is newer than what it holds, so it
//!   never exposes a value newer than the primary's current one
//! - Simulated delays are awaited before the state lock is taken

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::random::SimRng;

/// Value returned by reads of a key that was never written
pub const MISSING_VALUE: &str = "<missing>";

/// Role of a database instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseRole {
    Primary,
    Replica,
}

impl std::fmt::Display for DatabaseRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseRole::Primary => write!(f, "primary"),
            DatabaseRole::Replica => write!(f, "replica"),
        }
    }
}

/// Database timing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Minimum simulated read latency (ms)
    pub read_delay_min_ms: u64,
    /// Maximum simulated read latency (ms)
    pub read_delay_max_ms: u64,
    /// Minimum simulated write latency (ms)
    pub write_delay_min_ms: u64,
    /// Maximum simulated write latency (ms)
    pub write_delay_max_ms: u64,
    /// Upper bound of the replication propagation window (ms)
    pub replication_delay_ms: u64,
    /// Probability that a replication attempt is dropped (0.0 - 1.0)
    pub replication_failure_probability: f64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            read_delay_min_ms: 1,
            read_delay_max_ms: 5,
            write_delay_min_ms: 5,
            write_delay_max_ms: 15,
            replication_delay_ms: 100,
            replication_failure_probability: 0.0,
        }
    }
}

impl DatabaseConfig {
    /// Configuration with every delay set to zero
    pub fn instant() -> Self {
        Self {
            read_delay_min_ms: 0,
            read_delay_max_ms: 0,
            write_delay_min_ms: 0,
            write_delay_max_ms: 0,
            replication_delay_ms: 0,
            replication_failure_probability: 0.0,
        }
    }

    pub fn replication_delay(&self) -> Duration {
        Duration::from_millis(self.replication_delay_ms)
    }
}

/// A versioned key/value record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreRecord {
    pub key: String,
    pub value: String,
    pub version: u64,
}

/// Entry of the primary's transaction log
#[derive(Debug, Clone, Serialize)]
pub struct TransactionRecord {
    pub version: u64,
    pub key: String,
    pub value: String,
    pub committed_at: DateTime<Utc>,
}

#[derive(Default)]
struct DbState {
    records: HashMap<String, StoreRecord>,
    log: Vec<TransactionRecord>,
    last_version: u64,
}

/// A single database instance
pub struct DatabaseServer {
    name: String,
    role: DatabaseRole,
    config: DatabaseConfig,
    rng: Arc<SimRng>,
    state: RwLock<DbState>,
    reads: AtomicU64,
    writes: AtomicU64,
    replications_applied: AtomicU64,
    replications_skipped: AtomicU64,
    replications_failed: AtomicU64,
}

impl DatabaseServer {
    pub fn new(
        name: impl Into<String>,
        role: DatabaseRole,
        config: DatabaseConfig,
        rng: Arc<SimRng>,
    ) -> Self {
        Self {
            name: name.into(),
            role,
            config,
            rng,
            state: RwLock::new(DbState::default()),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            replications_applied: AtomicU64::new(0),
            replications_skipped: AtomicU64::new(0),
            replications_failed: AtomicU64::new(0),
        }
    }

    pub fn primary(name: impl Into<String>, config: DatabaseConfig, rng: Arc<SimRng>) -> Self {
        Self::new(name, DatabaseRole::Primary, config, rng)
    }

    pub fn replica(name: impl Into<String>, config: DatabaseConfig, rng: Arc<SimRng>) -> Self {
        Self::new(name, DatabaseRole::Replica, config, rng)
    }

    #[cfg(test)]
    pub(crate) fn rng(&self) -> &Arc<SimRng> {
        &self.rng
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> DatabaseRole {
        self.role
    }

    pub fn is_primary(&self) -> bool {
        self.role == DatabaseRole::Primary
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Read a key. Missing keys yield [`MISSING_VALUE`], never an error.
    pub async fn read(&self, key: &str) -> String {
        self.simulate(self.config.read_delay_min_ms, self.config.read_delay_max_ms)
            .await;

        self.reads.fetch_add(1, Ordering::Relaxed);
        self.state
            .read()
            .records
            .get(key)
            .map(|r| r.value.clone())
            .unwrap_or_else(|| MISSING_VALUE.to_string())
    }

    /// Commit a write. Only the primary accepts writes.
    #[instrument(skip(self, value), fields(db = %self.name))]
    pub async fn write(&self, key: &str, value: &str) -> Result<u64> {
        if !self.is_primary() {
            return Err(Error::WriteNotAllowed {
                server: self.name.clone(),
            });
        }

        self.simulate(self.config.write_delay_min_ms, self.config.write_delay_max_ms)
            .await;

        let version = {
            let mut state = self.state.write();
            state.last_version += 1;
            let version = state.last_version;
            state.records.insert(
                key.to_string(),
                StoreRecord {
                    key: key.to_string(),
                    value: value.to_string(),
                    version,
                },
            );
            state.log.push(TransactionRecord {
                version,
                key: key.to_string(),
                value: value.to_string(),
                committed_at: Utc::now(),
            });
            version
        };

        self.writes.fetch_add(1, Ordering::Relaxed);
        debug!(version, "write committed");
        Ok(version)
    }

    /// Copy the primary's current record for `key` into this replica after the
    /// propagation delay. Returns whether the replica changed.
    #[instrument(skip(self, primary), fields(replica = %self.name))]
    pub async fn replicate_from(&self, primary: &DatabaseServer, key: &str) -> Result<bool> {
        if self.is_primary() {
            return Err(Error::Config(format!(
                "{} is a primary and cannot be a replication target",
                self.name
            )));
        }
        if !primary.is_primary() {
            return Err(Error::NoPrimary);
        }

        tokio::time::sleep(self.config.replication_delay()).await;

        if self.rng.chance(self.config.replication_failure_probability) {
            self.replications_failed.fetch_add(1, Ordering::Relaxed);
            return Err(Error::ReplicationFailed {
                replica: self.name.clone(),
                key: key.to_string(),
            });
        }

        let Some(record) = primary.peek(key) else {
            self.replications_skipped.fetch_add(1, Ordering::Relaxed);
            return Ok(false);
        };

        Ok(self.apply(record))
    }

    /// Apply a record if it is newer than the held copy.
    fn apply(&self, record: StoreRecord) -> bool {
        let mut state = self.state.write();
        let newer = state
            .records
            .get(&record.key)
            .map_or(true, |held| record.version > held.version);

        if newer {
            state.last_version = state.last_version.max(record.version);
            state.records.insert(record.key.clone(), record);
            self.replications_applied.fetch_add(1, Ordering::Relaxed);
        } else {
            self.replications_skipped.fetch_add(1, Ordering::Relaxed);
        }
        newer
    }

    /// Current record without delay or read accounting
    pub fn peek(&self, key: &str) -> Option<StoreRecord> {
        self.state.read().records.get(key).cloned()
    }

    /// Version currently held for `key`
    pub fn version(&self, key: &str) -> Option<u64> {
        self.state.read().records.get(key).map(|r| r.version)
    }

    /// Snapshot of the transaction log (empty on replicas)
    pub fn transaction_log(&self) -> Vec<TransactionRecord> {
        self.state.read().log.clone()
    }

    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> DatabaseStats {
        let state = self.state.read();
        DatabaseStats {
            name: self.name.clone(),
            role: self.role,
            records: state.records.len(),
            last_version: state.last_version,
            reads: self.reads(),
            writes: self.writes(),
            replications_applied: self.replications_applied.load(Ordering::Relaxed),
            replications_skipped: self.replications_skipped.load(Ordering::Relaxed),
            replications_failed: self.replications_failed.load(Ordering::Relaxed),
        }
    }

    async fn simulate(&self, min_ms: u64, max_ms: u64) {
        let delay = self
            .rng
            .duration_between(Duration::from_millis(min_ms), Duration::from_millis(max_ms));
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

impl std::fmt::Debug for DatabaseServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseServer")
            .field("name", &self.name)
            .field("role", &self.role)
            .finish()
    }
}

/// Database statistics
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseStats {
    pub name: String,
    pub role: DatabaseRole,
    pub records: usize,
    pub last_version: u64,
    pub reads: u64,
    pub writes: u64,
    pub replications_applied: u64,
    pub replications_skipped: u64,
    pub replications_failed: u64,
}

// =============================================================================
// Tests
// =============================================================================
