//! Work Units and Outcomes
//!
//! A [`WorkUnit`] is created per request, never mutated, and discarded once
//! the orchestrator produces its terminal [`Outcome`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Kind of work carried by a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkKind {
    Read,
    Write,
    Search,
    Upload,
}

impl WorkKind {
    /// Every kind, in a stable order.
    pub const ALL: [WorkKind; 4] = [
        WorkKind::Read,
        WorkKind::Write,
        WorkKind::Search,
        WorkKind::Upload,
    ];

    /// Kinds that go to the primary and invalidate the cache.
    pub fn is_mutation(&self) -> bool {
        matches!(self, WorkKind::Write | WorkKind::Upload)
    }

    /// Position in [`WorkKind::ALL`].
    pub fn index(&self) -> usize {
        match self {
            WorkKind::Read => 0,
            WorkKind::Write => 1,
            WorkKind::Search => 2,
            WorkKind::Upload => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkKind::Read => "read",
            WorkKind::Write => "write",
            WorkKind::Search => "search",
            WorkKind::Upload => "upload",
        }
    }
}

impl std::fmt::Display for WorkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single request flowing through the serving path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    pub id: u64,
    pub kind: WorkKind,
    pub key: String,
    /// Value carried by writes and uploads.
    pub payload: Option<String>,
}

impl WorkUnit {
    pub fn new(id: u64, kind: WorkKind, key: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            key: key.into(),
            payload: None,
        }
    }

    pub fn read(id: u64, key: impl Into<String>) -> Self {
        Self::new(id, WorkKind::Read, key)
    }

    pub fn search(id: u64, key: impl Into<String>) -> Self {
        Self::new(id, WorkKind::Search, key)
    }

    pub fn write(id: u64, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(id, WorkKind::Write, key).with_payload(value)
    }

    pub fn upload(id: u64, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(id, WorkKind::Upload, key).with_payload(value)
    }

    /// Attach a payload.
    pub fn with_payload(mut self, value: impl Into<String>) -> Self {
        self.payload = Some(value.into());
        self
    }
}

/// Lifecycle of a work unit inside the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WorkState {
    Created,
    Routed,
    Dispatched,
    Completed,
    Failed,
}

impl WorkState {
    /// Whether the state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkState::Completed | WorkState::Failed)
    }

    /// Whether `next` is a legal successor of this state.
    pub fn can_transition_to(&self, next: WorkState) -> bool {
        use WorkState::*;
        matches!(
            (self, next),
            (Created, Routed)
                | (Created, Failed)
                | (Routed, Dispatched)
                | (Routed, Failed)
                | (Dispatched, Completed)
                | (Dispatched, Failed)
        )
    }
}

impl std::fmt::Display for WorkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkState::Created => write!(f, "Created"),
            WorkState::Routed => write!(f, "Routed"),
            WorkState::Dispatched => write!(f, "Dispatched"),
            WorkState::Completed => write!(f, "Completed"),
            WorkState::Failed => write!(f, "Failed"),
        }
    }
}

/// Where a completed unit was served from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Source {
    Cache,
    /// Named database instance.
    Database(String),
}

/// Payload of a completed unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Served {
    pub source: Source,
    /// Value returned by reads and searches.
    pub value: Option<String>,
    /// Version committed by writes and uploads.
    pub version: Option<u64>,
}

/// Terminal result of handling one work unit.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub id: u64,
    pub kind: WorkKind,
    pub key: String,
    /// Web server the unit was routed to, if routing succeeded.
    pub server: Option<String>,
    pub state: WorkState,
    pub result: std::result::Result<Served, Error>,
    pub latency: Duration,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error(&self) -> Option<&Error> {
        self.result.as_ref().err()
    }

    pub fn value(&self) -> Option<&str> {
        self.result.as_ref().ok().and_then(|s| s.value.as_deref())
    }

    pub fn version(&self) -> Option<u64> {
        self.result.as_ref().ok().and_then(|s| s.version)
    }

    pub fn source(&self) -> Option<&Source> {
        self.result.as_ref().ok().map(|s| &s.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_work_kind_display_and_index() {
        for (i, kind) in WorkKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
        assert_eq!(WorkKind::Upload.to_string(), "upload");
        assert!(WorkKind::Write.is_mutation());
        assert!(!WorkKind::Search.is_mutation());
    }

    #[test]
    fn test_work_unit_constructors() {
        let w = WorkUnit::write(7, "A", "v1");
        assert_eq!(w.kind, WorkKind::Write);
        assert_eq!(w.payload.as_deref(), Some("v1"));

        let r = WorkUnit::read(8, "A");
        assert!(r.payload.is_none());
    }

    #[test]
    fn test_state_transitions() {
        assert!(WorkState::Created.can_transition_to(WorkState::Routed));
        assert!(WorkState::Routed.can_transition_to(WorkState::Dispatched));
        assert!(WorkState::Dispatched.can_transition_to(WorkState::Completed));
        assert!(WorkState::Created.can_transition_to(WorkState::Failed));
        assert!(!WorkState::Created.can_transition_to(WorkState::Completed));
        assert!(!WorkState::Completed.can_transition_to(WorkState::Failed));
        assert!(WorkState::Failed.is_terminal());
    }

    #[test]
    fn test_kind_serialization() {
        let json = serde_json::to_string(&WorkKind::Search).unwrap();
        assert_eq!(json, "\"search\"");
    }
}
