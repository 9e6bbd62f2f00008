//! Property-Based Tests for the Cache
//!
//! 1. **Bound**: size never exceeds `max_size` after any sequence of sets
//! 2. **Round-trip**: `set(k, v)` then `get(k)` returns `v` with no eviction in between
//! 3. **Idempotence**: invalidating twice equals invalidating once

#![cfg(test)]

use proptest::prelude::*;

use super::cache::{CacheConfig, CacheServer};

#[derive(Debug, Clone)]
enum CacheOp {
    Set(u8, u8),
    Get(u8),
    Invalidate(u8),
}

fn op_strategy() -> impl Strategy<Value = CacheOp> {
    prop_oneof![
        3 => (any::<u8>(), any::<u8>()).prop_map(|(k, v)| CacheOp::Set(k, v)),
        1 => any::<u8>().prop_map(CacheOp::Get),
        1 => any::<u8>().prop_map(CacheOp::Invalidate),
    ]
}

fn cache(max_size: usize) -> CacheServer {
    CacheServer::with_config("prop-cache", CacheConfig { max_size })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_size_never_exceeds_max(
        max_size in 0usize..32,
        ops in prop::collection::vec(op_strategy(), 0..300),
    ) {
        let cache = cache(max_size);
        for op in ops {
            match op {
                CacheOp::Set(k, v) => cache.set(k.to_string(), v.to_string()),
                CacheOp::Get(k) => { cache.get(&k.to_string()); }
                CacheOp::Invalidate(k) => { cache.invalidate(&k.to_string()); }
            }
            prop_assert!(cache.len() <= max_size);
        }
    }

    #[test]
    fn prop_set_then_get_round_trips(
        prefill in prop::collection::vec(any::<u8>(), 0..64),
        key in "[a-z]{1,8}",
        value in ".*",
    ) {
        let cache = cache(16);
        for k in prefill {
            cache.set(format!("pre-{}", k), "x");
        }
        cache.set(key.clone(), value.clone());
        prop_assert_eq!(cache.get(&key), Some(value));
    }

    #[test]
    fn prop_invalidate_idempotent(keys in prop::collection::vec(any::<u8>(), 1..50), target in any::<u8>()) {
        let once = cache(64);
        let twice = cache(64);
        for k in &keys {
            once.set(k.to_string(), "v");
            twice.set(k.to_string(), "v");
        }

        once.invalidate(&target.to_string());
        twice.invalidate(&target.to_string());
        let second = twice.invalidate(&target.to_string());

        prop_assert!(!second);
        prop_assert_eq!(once.len(), twice.len());
        prop_assert_eq!(once.contains(&target.to_string()), twice.contains(&target.to_string()));
    }
}
