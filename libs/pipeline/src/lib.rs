//! Bounded multi-producer ingestion pipeline.
//!
//! Readers pull record groups from their [`Source`](ingest_api::Source),
//! route each group by key to one of `writer_count` bounded queues, and
//! block while that queue is full. One writer per queue drains it in
//! batches into a shared [`Sink`](ingest_api::Sink). A monitor prepares the
//! target before anything is written and logs throughput afterwards.

pub mod config;
pub mod consumer;
pub mod error;
pub mod monitor;
pub mod producer;
pub mod queue;
pub mod stats;
pub mod supervisor;

pub use config::{BlockPolicy, CapacityUnit, FailurePolicy, PipelineConfig, ShutdownMode};
pub use error::{PipelineError, QueueError, TryDequeueError, Unit};
pub use monitor::{Throughput, ThroughputSample};
pub use queue::PartitionedQueueSet;
pub use stats::{ConsumerReport, ProducerReport, Progress, WorkerExit};
pub use supervisor::{Pipeline, PipelineReport, StopReason};
