use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use ingest_api::Sink;

use crate::error::{PipelineError, TryDequeueError, Unit};
use crate::queue::PartitionedQueueSet;
use crate::stats::{ConsumerReport, Progress, WorkerExit};

/// Per-writer settings.
#[derive(Debug, Clone, Copy)]
pub struct ConsumerSettings {
    /// Queue this writer owns (also its id).
    pub queue: usize,
    pub max_batch_size: usize,
    pub idle_backoff: Duration,
}

/// Writer loop: drain up to `max_batch_size` records from the owned
/// queue, hand them to the sink, repeat.
///
/// An empty queue is not an error: the writer waits until records arrive
/// or `idle_backoff` elapses, whichever comes first. A closed, drained
/// queue ends the loop. On cancellation an in-flight `write_batch` is
/// abandoned and the rest of the queue is left as is.
///
/// A sink error is fatal to this writer and returned to the supervisor.
pub async fn run_consumer(
    settings: ConsumerSettings,
    queues: Arc<PartitionedQueueSet>,
    sink: Arc<dyn Sink>,
    progress: Arc<Progress>,
    token: CancellationToken,
) -> Result<ConsumerReport, PipelineError> {
    let queue = settings.queue;
    let unit = Unit::Writer(queue);
    tracing::debug!(%unit, sink = %sink.name(), "started");

    let mut batches = 0u64;
    let mut records = 0u64;

    let exit = loop {
        if token.is_cancelled() {
            break WorkerExit::Cancelled;
        }

        match queues.try_dequeue_many(queue, settings.max_batch_size) {
            Ok(batch) => {
                let n = batch.len() as u64;
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        tracing::debug!(%unit, records = n, "abandoning in-flight batch");
                        break WorkerExit::Cancelled;
                    }
                    res = sink.write_batch(&batch) => {
                        if let Err(e) = res {
                            let lines: Vec<&str> = batch.iter().map(|r| &*r.line).collect();
                            tracing::debug!(%unit, ?lines, "failed batch");
                            return Err(PipelineError::Sink { unit, source: e });
                        }
                    }
                }
                batches += 1;
                records += n;
                progress.record_written(queue, n);
            }
            Err(TryDequeueError::Empty) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break WorkerExit::Cancelled,
                    _ = queues.readable(queue) => {}
                    _ = tokio::time::sleep(settings.idle_backoff) => {}
                }
            }
            Err(TryDequeueError::Closed) => break WorkerExit::Drained,
        }
    };

    tracing::debug!(%unit, batches, records, ?exit, "stopped");
    Ok(ConsumerReport { queue, batches, records, exit })
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;

    use ingest_api::{Record, SinkError};

    use super::*;
    use crate::config::{BlockPolicy, CapacityUnit};

    /// Records batch sizes; fails every batch once `fail` is set.
    #[derive(Default)]
    struct RecordingSink {
        batches: Mutex<Vec<usize>>,
        fail: bool,
    }

    impl Sink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }

        fn ensure_target(&self) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + '_>> {
            Box::pin(async { Ok(()) })
        }

        fn write_batch<'a>(
            &'a self,
            batch: &'a [Record],
        ) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>> {
            Box::pin(async move {
                if self.fail {
                    return Err(SinkError::rejected(0x216, "syntax error"));
                }
                self.batches.lock().unwrap().push(batch.len());
                Ok(())
            })
        }

        fn current_count(&self) -> Pin<Box<dyn Future<Output = Result<u64, SinkError>> + Send + '_>> {
            Box::pin(async { Ok(self.batches.lock().unwrap().iter().sum::<usize>() as u64) })
        }
    }

    fn settings(max_batch_size: usize) -> ConsumerSettings {
        ConsumerSettings { queue: 0, max_batch_size, idle_backoff: Duration::from_millis(10) }
    }

    async fn fill(queues: &PartitionedQueueSet, n: i64) {
        let records = (0..n).map(|i| Record::new(0u64, i, format!("d0,{i}"))).collect();
        queues.enqueue_many(0, records, BlockPolicy::Forever).await.unwrap();
    }

    #[tokio::test]
    async fn test_drains_greedily_in_capped_batches() {
        let queues = Arc::new(PartitionedQueueSet::new(1, 100, CapacityUnit::Items));
        fill(&queues, 25).await;
        queues.close();

        let sink = Arc::new(RecordingSink::default());
        let progress = Arc::new(Progress::new(1));
        let report = run_consumer(settings(10), queues, sink.clone(), progress.clone(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.exit, WorkerExit::Drained);
        assert_eq!(report.records, 25);
        assert_eq!(report.batches, 3);
        assert_eq!(*sink.batches.lock().unwrap(), vec![10, 10, 5]);
        assert_eq!(progress.written_per_queue(), vec![25]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_idle_writer_picks_up_late_records() {
        let queues = Arc::new(PartitionedQueueSet::new(1, 100, CapacityUnit::Items));
        let sink = Arc::new(RecordingSink::default());
        let token = CancellationToken::new();

        let handle = tokio::spawn(run_consumer(
            ConsumerSettings { idle_backoff: Duration::from_secs(30), ..settings(100) },
            queues.clone(),
            sink.clone(),
            Arc::new(Progress::new(1)),
            token.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(30)).await;
        fill(&queues, 7).await;

        // Woken by the enqueue, not by the 30s backoff.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while sink.batches.lock().unwrap().is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(*sink.batches.lock().unwrap(), vec![7]);

        token.cancel();
        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.exit, WorkerExit::Cancelled);
    }

    #[tokio::test]
    async fn test_sink_error_is_fatal() {
        let queues = Arc::new(PartitionedQueueSet::new(1, 100, CapacityUnit::Items));
        fill(&queues, 3).await;

        let sink = Arc::new(RecordingSink { fail: true, ..Default::default() });
        let err = run_consumer(settings(10), queues, sink, Arc::new(Progress::new(1)), CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            PipelineError::Sink { unit, source } => {
                assert_eq!(unit, Unit::Writer(0));
                assert_eq!(source.code(), Some(0x216));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
