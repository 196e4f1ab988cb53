use std::future::Future;
use std::pin::Pin;

mod error;
mod types;
mod util;

pub use error::{ErrorKind, SinkError};
pub use types::{PartitionKey, Record, RecordGroup};
pub use util::now_ms;

// ════════════════════════════════════════════════════════════════
//  Source
// ════════════════════════════════════════════════════════════════

/// Producer-side capability: an (unbounded or finite) stream of record
/// groups, each group belonging to one partition.
///
/// `next_group` is synchronous: generation is CPU work, not I/O.
/// `None` ends the stream.
pub trait Source: Send {
    fn next_group(&mut self) -> Option<RecordGroup>;
}

/// Any iterator of groups is a source.
impl<I> Source for I
where
    I: Iterator<Item = RecordGroup> + Send,
{
    fn next_group(&mut self) -> Option<RecordGroup> {
        self.next()
    }
}

// ════════════════════════════════════════════════════════════════
//  Sink
// ════════════════════════════════════════════════════════════════

/// Downstream store. One instance is shared by all writer workers and
/// the monitor, so implementations must be safe under concurrent calls.
///
/// Transient failures are the sink's own retry responsibility; an error
/// returned from `write_batch` is treated as fatal to the calling worker.
pub trait Sink: Send + Sync {
    /// Name for logging.
    fn name(&self) -> &str;

    /// Prepare the target namespace/schema. Must be idempotent.
    fn ensure_target(&self) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + '_>>;

    /// Persist one batch, in order.
    fn write_batch<'a>(
        &'a self,
        batch: &'a [Record],
    ) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>>;

    /// Cumulative number of records persisted so far (across all writers).
    fn current_count(&self) -> Pin<Box<dyn Future<Output = Result<u64, SinkError>> + Send + '_>>;
}
