//! Simulation Configuration
//!
//! Aggregate configuration for one serving stack. Every section carries its
//! documented defaults, so a YAML file only needs the fields it overrides:
//!
//! ```yaml
//! servers: 3
//! replicas: 1
//! seed: 42
//! web:
//!   capacity: 1000
//!   failure_policy: { mode: probabilistic, probability: 0.1 }
//! database:
//!   replication_delay_ms: 100
//! cache:
//!   max_size: 10000
//! metrics:
//!   window_size: 1000
//! read_routing: random
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::balancer::{FailurePolicy, WebServerConfig};
use crate::domain::WorkKind;
use crate::error::{Error, Result};
use crate::monitoring::MetricsConfig;
use crate::storage::{CacheConfig, DatabaseConfig};

/// Which database instance serves cache misses and searches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadRouting {
    /// Uniformly random over every instance, primary included
    #[default]
    Random,
    /// Always the primary
    Primary,
    /// Random replica, falling back to the primary when there is none
    Replicas,
}

/// Relative weights of each work kind in generated load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KindMix {
    pub read: u32,
    pub write: u32,
    pub search: u32,
    pub upload: u32,
}

impl Default for KindMix {
    fn default() -> Self {
        Self {
            read: 1,
            write: 1,
            search: 1,
            upload: 1,
        }
    }
}

impl KindMix {
    pub fn weight(&self, kind: WorkKind) -> u32 {
        match kind {
            WorkKind::Read => self.read,
            WorkKind::Write => self.write,
            WorkKind::Search => self.search,
            WorkKind::Upload => self.upload,
        }
    }

    pub fn total(&self) -> u64 {
        WorkKind::ALL.iter().map(|k| self.weight(*k) as u64).sum()
    }

    /// Map a ticket in `0..total()` onto a kind
    pub fn pick(&self, ticket: u64) -> WorkKind {
        let mut remaining = ticket;
        for kind in WorkKind::ALL {
            let weight = self.weight(kind) as u64;
            if remaining < weight {
                return kind;
            }
            remaining -= weight;
        }
        WorkKind::Read
    }
}

/// Synthetic load settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    /// Keys are drawn from `key-0 .. key-{key_space - 1}`
    pub key_space: u64,
    pub mix: KindMix,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            key_space: 1000,
            mix: KindMix::default(),
        }
    }
}

/// Configuration of a whole serving stack
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Web server pool size
    pub servers: usize,
    pub web: WebServerConfig,
    /// Replicas alongside the single primary
    pub replicas: usize,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub metrics: MetricsConfig,
    pub read_routing: ReadRouting,
    pub load: LoadConfig,
    /// Seed for every random choice; entropy when unset
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            servers: 3,
            web: WebServerConfig::default(),
            replicas: 1,
            database: DatabaseConfig::default(),
            cache: CacheConfig::default(),
            metrics: MetricsConfig::default(),
            read_routing: ReadRouting::default(),
            load: LoadConfig::default(),
            seed: None,
        }
    }
}

impl SimulationConfig {
    /// Defaults with every simulated delay removed and overload failures off
    pub fn instant() -> Self {
        Self {
            web: WebServerConfig {
                failure_policy: FailurePolicy::Never,
                ..WebServerConfig::instant(crate::balancer::DEFAULT_CAPACITY)
            },
            database: DatabaseConfig::instant(),
            ..Default::default()
        }
    }

    /// Parse from YAML text
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text)
            .map_err(|e| Error::Config(format!("invalid YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_yaml(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.servers == 0 {
            return Err(Error::Config("servers must be at least 1".into()));
        }
        if self.web.capacity == 0 {
            return Err(Error::Config("web.capacity must be positive".into()));
        }
        if self.web.processing_delay_min_ms > self.web.processing_delay_max_ms {
            return Err(Error::Config(
                "web.processing_delay_min_ms exceeds processing_delay_max_ms".into(),
            ));
        }
        if let FailurePolicy::Probabilistic(p) = self.web.failure_policy {
            check_probability("web.failure_policy.probability", p)?;
        }
        if self.database.read_delay_min_ms > self.database.read_delay_max_ms
            || self.database.write_delay_min_ms > self.database.write_delay_max_ms
        {
            return Err(Error::Config("database delay min exceeds max".into()));
        }
        check_probability(
            "database.replication_failure_probability",
            self.database.replication_failure_probability,
        )?;
        if self.load.key_space == 0 {
            return Err(Error::Config("load.key_space must be positive".into()));
        }
        if self.load.mix.total() == 0 {
            return Err(Error::Config("load.mix needs at least one non-zero weight".into()));
        }
        Ok(())
    }
}

fn check_probability(field: &str, p: f64) -> Result<()> {
    if (0.0..=1.0).contains(&p) {
        Ok(())
    } else {
        Err(Error::Config(format!("{} must be within 0.0 - 1.0, got {}", field, p)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_defaults() {
        let config = SimulationConfig::default();
        assert_eq!(config.servers, 3);
        assert_eq!(config.web.capacity, 1000);
        assert_eq!(config.replicas, 1);
        assert_eq!(config.cache.max_size, 10_000);
        assert_eq!(config.metrics.window_size, 1000);
        assert_eq!(config.read_routing, ReadRouting::Random);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml() {
        let config = SimulationConfig::from_yaml(
            r#"
servers: 5
seed: 9
web:
  capacity: 50
  failure_policy: { mode: always }
database:
  replication_delay_ms: 250
read_routing: replicas
"#,
        )
        .unwrap();

        assert_eq!(config.servers, 5);
        assert_eq!(config.seed, Some(9));
        assert_eq!(config.web.capacity, 50);
        assert_eq!(config.web.failure_policy, FailurePolicy::Always);
        assert_eq!(config.web.processing_delay_max_ms, 50);
        assert_eq!(config.database.replication_delay_ms, 250);
        assert_eq!(config.database.read_delay_max_ms, 5);
        assert_eq!(config.read_routing, ReadRouting::Replicas);
        assert_eq!(config.cache.max_size, 10_000);
    }

    #[test]
    fn test_validation_errors() {
        assert_matches!(
            SimulationConfig::from_yaml("servers: 0"),
            Err(Error::Config(msg)) if msg.contains("servers")
        );
        assert_matches!(
            SimulationConfig::from_yaml("web: { failure_policy: { mode: probabilistic, probability: 1.5 } }"),
            Err(Error::Config(_))
        );
        assert_matches!(
            SimulationConfig::from_yaml("load: { mix: { read: 0, write: 0, search: 0, upload: 0 } }"),
            Err(Error::Config(_))
        );
        assert_matches!(SimulationConfig::from_yaml("servers: [1"), Err(Error::Config(_)));
    }

    #[test]
    fn test_kind_mix_pick() {
        let mix = KindMix {
            read: 2,
            write: 1,
            search: 0,
            upload: 1,
        };
        assert_eq!(mix.total(), 4);
        assert_eq!(mix.pick(0), WorkKind::Read);
        assert_eq!(mix.pick(1), WorkKind::Read);
        assert_eq!(mix.pick(2), WorkKind::Write);
        assert_eq!(mix.pick(3), WorkKind::Upload);
    }

    #[test]
    fn test_missing_file() {
        assert_matches!(
            SimulationConfig::from_file("/nonexistent/tierlab.yaml"),
            Err(Error::Config(_))
        );
    }
}
