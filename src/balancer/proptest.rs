//! Property-Based Tests for the Web Tier
//!
//! 1. **In-flight floor**: the in-flight count returns to zero after any mix of
//!    accepted and rejected calls, and every call is accounted exactly once
//! 2. **Fairness**: N healthy nodes are each returned once per N picks
//! 3. **Failover**: a marked-down node is never returned

#![cfg(test)]

use std::sync::Arc;

use proptest::prelude::*;

use super::load_balancer::LoadBalancer;
use super::web_server::{FailurePolicy, WebServer, WebServerConfig};
use crate::domain::WorkUnit;
use crate::error::Error;
use crate::random::SimRng;

fn pool(n: usize, seed: u64) -> LoadBalancer {
    let rng = Arc::new(SimRng::seeded(seed));
    let lb = LoadBalancer::new();
    for i in 0..n {
        let config = WebServerConfig {
            failure_policy: FailurePolicy::Never,
            ..WebServerConfig::instant(1000)
        };
        lb.add_server(Arc::new(WebServer::new(format!("web-{}", i), config, rng.clone())));
    }
    lb
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_in_flight_restored_after_failures(
        capacity in 1u64..20,
        held in 0u64..25,
        calls in 1usize..40,
        probability in 0.0f64..=1.0,
        seed in any::<u64>(),
    ) {
        let config = WebServerConfig {
            failure_policy: FailurePolicy::Probabilistic(probability),
            ..WebServerConfig::instant(capacity)
        };
        let server = WebServer::new("web-prop", config, Arc::new(SimRng::seeded(seed)));
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();

        let slots: Vec<_> = (0..held).map(|_| server.enter()).collect();
        let mut rejected = 0u64;
        for i in 0..calls {
            let result = runtime.block_on(server.process(&WorkUnit::read(i as u64, "k")));
            if let Err(err) = result {
                prop_assert!(
                    matches!(err, Error::Overloaded { .. }),
                    "unexpected error {:?}",
                    err
                );
                rejected += 1;
            }
            prop_assert_eq!(server.in_flight(), held);
        }
        drop(slots);

        let stats = server.stats();
        prop_assert_eq!(server.in_flight(), 0);
        prop_assert_eq!(stats.rejected, rejected);
        prop_assert_eq!(stats.processed + stats.rejected, calls as u64);
    }

    #[test]
    fn prop_rotation_returns_each_server_once(n in 1usize..8, rounds in 1usize..4) {
        let lb = pool(n, 9);
        for _ in 0..rounds {
            let picked: Vec<String> = (0..n)
                .map(|_| lb.next_server().unwrap().name().to_string())
                .collect();
            let expected: Vec<String> = (0..n).map(|i| format!("web-{}", i)).collect();
            prop_assert_eq!(picked, expected);
        }
    }

    #[test]
    fn prop_marked_down_never_returned(
        n in 1usize..8,
        down in prop::collection::vec(any::<bool>(), 8),
    ) {
        let lb = pool(n, 13);
        for (i, is_down) in down.iter().take(n).enumerate() {
            if *is_down {
                lb.mark_down(&format!("web-{}", i));
            }
        }
        let all_down = down.iter().take(n).all(|d| *d);

        for _ in 0..(2 * n) {
            match lb.next_server() {
                Ok(server) => {
                    prop_assert!(!all_down);
                    let idx: usize = server.name()["web-".len()..].parse().unwrap();
                    prop_assert!(!down[idx]);
                }
                Err(err) => {
                    prop_assert!(all_down);
                    prop_assert_eq!(err, Error::NoHealthyServer);
                }
            }
        }
    }
}
