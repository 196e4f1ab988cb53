use std::fmt;

use ingest_api::SinkError;

/// A supervised concurrent unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Unit {
    Monitor,
    Reader(usize),
    Writer(usize),
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unit::Monitor => f.write_str("monitor"),
            Unit::Reader(i) => write!(f, "reader-{i}"),
            Unit::Writer(i) => write!(f, "writer-{i}"),
        }
    }
}

/// Failure of a blocking enqueue. `accepted` records of the call were
/// queued before the failure; the rest were not.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("queue closed after accepting {accepted} records")]
    Closed { accepted: usize },

    #[error("queue full for longer than the enqueue timeout, {accepted} records accepted")]
    Timeout { accepted: usize },

    #[error("record of size {size} can never fit into capacity {capacity}")]
    Oversized { size: usize, capacity: usize },
}

impl QueueError {
    pub fn accepted(&self) -> usize {
        match self {
            QueueError::Closed { accepted } | QueueError::Timeout { accepted } => *accepted,
            QueueError::Oversized { .. } => 0,
        }
    }
}

/// Outcome of a non-blocking dequeue that returned nothing. Neither
/// variant is a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TryDequeueError {
    #[error("queue is empty")]
    Empty,

    #[error("queue is closed and drained")]
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("config: {0}")]
    Config(String),

    #[error("{unit}: enqueue: {source}")]
    Queue { unit: Unit, source: QueueError },

    #[error("{unit}: write batch: {source}")]
    Sink { unit: Unit, source: SinkError },

    #[error("target setup: {0}")]
    Target(SinkError),

    #[error("monitor stopped before the target was ready")]
    MonitorGone,

    #[error("{unit} panicked: {detail}")]
    Panicked { unit: Unit, detail: String },
}

impl PipelineError {
    /// Unit the failure originated from, when there is one.
    pub fn unit(&self) -> Option<Unit> {
        match self {
            PipelineError::Queue { unit, .. }
            | PipelineError::Sink { unit, .. }
            | PipelineError::Panicked { unit, .. } => Some(*unit),
            PipelineError::Target(_) | PipelineError::MonitorGone => Some(Unit::Monitor),
            PipelineError::Config(_) => None,
        }
    }
}
