use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use ingest_api::Source;

use crate::config::BlockPolicy;
use crate::error::{PipelineError, Unit};
use crate::queue::PartitionedQueueSet;
use crate::stats::{ProducerReport, Progress, WorkerExit};

/// Reader loop: pull a group from the source, route it by key, push it
/// into its queue, blocking while the queue is full.
///
/// On cancellation the reader stops pulling; a group that was waiting for
/// space is abandoned.
pub async fn run_producer(
    id: usize,
    mut source: Box<dyn Source>,
    queues: Arc<PartitionedQueueSet>,
    policy: BlockPolicy,
    progress: Arc<Progress>,
    token: CancellationToken,
) -> Result<ProducerReport, PipelineError> {
    let unit = Unit::Reader(id);
    tracing::debug!(%unit, "started");

    let mut groups = 0u64;
    let mut records = 0u64;

    let exit = loop {
        if token.is_cancelled() {
            break WorkerExit::Cancelled;
        }
        let Some(group) = source.next_group() else {
            break WorkerExit::Exhausted;
        };
        if group.is_empty() {
            continue;
        }

        let idx = queues.route(&group.key);
        let n = group.len() as u64;

        tokio::select! {
            biased;
            _ = token.cancelled() => break WorkerExit::Cancelled,
            res = queues.enqueue_many(idx, group.records, policy) => {
                if let Err(err) = res {
                    progress.record_produced(err.accepted() as u64);
                    return Err(PipelineError::Queue { unit, source: err });
                }
            }
        }

        groups += 1;
        records += n;
        progress.record_produced(n);
    };

    match exit {
        WorkerExit::Exhausted => tracing::info!(%unit, groups, records, "source exhausted"),
        _ => tracing::debug!(%unit, groups, records, "stopped"),
    }
    Ok(ProducerReport { groups, records, exit })
}
