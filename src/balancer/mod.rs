//! Web Tier
//!
//! Load-balanced pool of compute nodes.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                            LoadBalancer                                   │
//! │   rotation cursor (own lock)      health registry (name -> up/down)      │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │  ┌────────────────┐   ┌────────────────┐   ┌────────────────┐            │
//! │  │ WebServer      │   │ WebServer      │   │ WebServer      │   ...      │
//! │  │ in_flight/cap  │   │ in_flight/cap  │   │ in_flight/cap  │            │
//! │  └────────────────┘   └────────────────┘   └────────────────┘            │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A node is routable when it is marked up in the registry and its own
//! health predicate (`in_flight < 0.9 × capacity`) holds.

mod load_balancer;
#[cfg(test)]
mod proptest;
mod web_server;

pub use load_balancer::LoadBalancer;
pub use web_server::{
    FailurePolicy, WebServer, WebServerConfig, WebServerStats, DEFAULT_CAPACITY,
    HEALTHY_LOAD_FACTOR, OVERLOAD_LOAD_FACTOR,
};
