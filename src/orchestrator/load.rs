//! Synthetic Load Driver
//!
//! Issues randomly-kinded work units at a fixed rate against a shared
//! [`Orchestrator`] and summarises what came back.
//!
//! ```text
//!  interval tick ──▶ spawn handle(work) ──▶ tally
//!        │                                     │
//!   cancelled? ── yes ──▶ drain in-flight ──▶ LoadReport
//! ```
//!
//! Stopping is cooperative: once the duration elapses (or the caller cancels)
//! no new work is issued, but units already dispatched run to completion.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use super::engine::{Orchestrator, LOAD_STREAM};
use crate::config::LoadConfig;
use crate::domain::{Outcome, WorkKind, WorkUnit};
use crate::monitoring::KindSnapshot;
use crate::random::SimRng;

/// Summary of one load run
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    /// Work units issued and completed
    pub requests: u64,
    /// Units that ended in `Failed`
    pub errors: u64,
    /// Percentage of successful units, 0 when nothing was issued
    pub success_rate: f64,
    /// Units issued per second of dispatch time
    pub actual_rate: f64,
    pub requested_rate: u32,
    /// Mean end-to-end latency of this run's units
    pub avg_latency_ms: f64,
    /// Dispatch time, excluding the drain
    pub duration_secs: f64,
    pub per_kind: BTreeMap<String, KindSnapshot>,
}

impl LoadReport {
    pub fn error_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.errors as f64 / self.requests as f64 * 100.0
        }
    }
}

#[derive(Default)]
struct Tally {
    per_kind: [KindSnapshot; 4],
    latency_total: Duration,
}

impl Tally {
    fn add(&mut self, outcome: &Outcome) {
        let entry = &mut self.per_kind[outcome.kind.index()];
        entry.total += 1;
        if outcome.is_success() {
            entry.succeeded += 1;
        } else {
            entry.failed += 1;
        }
        self.latency_total += outcome.latency;
    }

    fn report(&self, requested_rate: u32, elapsed: Duration) -> LoadReport {
        let requests: u64 = self.per_kind.iter().map(|k| k.total).sum();
        let errors: u64 = self.per_kind.iter().map(|k| k.failed).sum();
        let secs = elapsed.as_secs_f64();

        let (success_rate, avg_latency_ms) = if requests == 0 {
            (0.0, 0.0)
        } else {
            (
                (requests - errors) as f64 / requests as f64 * 100.0,
                self.latency_total.as_secs_f64() * 1000.0 / requests as f64,
            )
        };

        LoadReport {
            requests,
            errors,
            success_rate,
            actual_rate: if secs > 0.0 { requests as f64 / secs } else { 0.0 },
            requested_rate,
            avg_latency_ms,
            duration_secs: secs,
            per_kind: WorkKind::ALL
                .iter()
                .map(|kind| (kind.to_string(), self.per_kind[kind.index()]))
                .collect(),
        }
    }
}

/// Rate-driven work generator
pub struct LoadGenerator {
    orchestrator: Arc<Orchestrator>,
    config: LoadConfig,
    rng: SimRng,
    cancel: CancellationToken,
}

impl LoadGenerator {
    pub fn new(orchestrator: Arc<Orchestrator>, config: LoadConfig) -> Self {
        let rng = SimRng::stream(orchestrator.config().seed, LOAD_STREAM);
        Self {
            orchestrator,
            config,
            rng,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop early when `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Draw the next work unit from the configured mix and key space
    pub fn next_work(&self) -> WorkUnit {
        let rng = &self.rng;
        let id = self.orchestrator.next_id();
        let mix = &self.config.mix;
        let kind = mix.pick(rng.index(mix.total().max(1) as usize) as u64);
        let key = format!("key-{}", rng.index(self.config.key_space.max(1) as usize));

        let work = WorkUnit::new(id, kind, key);
        if kind.is_mutation() {
            work.with_payload(format!("value-{:016x}", rng.token()))
        } else {
            work
        }
    }

    /// Issue `rate` units per second for `duration`, then wait for every
    /// dispatched unit to finish.
    pub async fn run(&self, duration: Duration, rate: u32) -> LoadReport {
        let tally = Arc::new(Mutex::new(Tally::default()));
        if rate == 0 || duration.is_zero() {
            return tally.lock().report(rate, Duration::ZERO);
        }

        info!(duration_secs = duration.as_secs_f64(), rate, "starting load run");

        let stop = self.cancel.child_token();
        let timer = {
            let stop = stop.clone();
            tokio::spawn(async move {
                tokio::time::sleep(duration).await;
                stop.cancel();
            })
        };

        let tracker = TaskTracker::new();
        let mut interval = tokio::time::interval(Duration::from_secs_f64(1.0 / rate as f64));
        interval.set_missed_tick_behavior(MissedTickBehavior::Burst);

        let start = Instant::now();
        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = interval.tick() => {
                    let work = self.next_work();
                    let orchestrator = self.orchestrator.clone();
                    let tally = tally.clone();
                    tracker.spawn(async move {
                        let outcome = orchestrator.handle(work).await;
                        tally.lock().add(&outcome);
                    });
                }
            }
        }
        let elapsed = start.elapsed();
        timer.abort();

        debug!(in_flight = tracker.len(), "draining load tasks");
        tracker.close();
        tracker.wait().await;

        let report = tally.lock().report(rate, elapsed);
        info!(
            requests = report.requests,
            errors = report.errors,
            actual_rate = report.actual_rate,
            "load run finished"
        );
        report
    }
}

impl Orchestrator {
    /// Drive synthetic load using the configured mix and key space
    pub async fn run_load(self: &Arc<Self>, duration: Duration, rate: u32) -> LoadReport {
        LoadGenerator::new(self.clone(), self.config().load.clone())
            .run(duration, rate)
            .await
    }
}
