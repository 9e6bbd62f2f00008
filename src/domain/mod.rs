//! Domain Layer
//!
//! Value types shared by every component of the serving path:
//!
//! - **Work** (`work.rs`) - work units, their lifecycle and terminal outcomes

pub mod work;

pub use work::{Outcome, Served, Source, WorkKind, WorkState, WorkUnit};
