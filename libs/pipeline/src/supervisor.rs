use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::{Id, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use ingest_api::{Sink, Source};

use crate::config::{FailurePolicy, PipelineConfig, ShutdownMode};
use crate::consumer::{ConsumerSettings, run_consumer};
use crate::error::{PipelineError, Unit};
use crate::monitor::run_monitor;
use crate::producer::run_producer;
use crate::queue::PartitionedQueueSet;
use crate::stats::{ConsumerReport, ProducerReport, Progress};

/// Why a run ended without a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// External cancellation (ctrl-c).
    Cancelled,
    /// The monitor stopped on its own.
    MonitorExited,
    /// Every reader and writer finished (drain mode).
    Completed,
}

#[derive(Debug)]
pub struct PipelineReport {
    pub stop: StopReason,
    /// Records accepted into queues.
    pub produced: u64,
    /// Records acknowledged by the sink.
    pub written: u64,
    pub batches: u64,
    pub per_queue: Vec<u64>,
    /// Failures tolerated under [`FailurePolicy::Isolate`], or seen while
    /// shutting down.
    pub failures: Vec<PipelineError>,
}

impl PipelineReport {
    fn new(stop: StopReason, progress: &Progress, failures: Vec<PipelineError>) -> Self {
        Self {
            stop,
            produced: progress.produced(),
            written: progress.written(),
            batches: progress.batches(),
            per_queue: progress.written_per_queue(),
            failures,
        }
    }
}

enum UnitOutput {
    Reader(ProducerReport),
    Writer(ConsumerReport),
}

type UnitResult = Result<UnitOutput, PipelineError>;

enum Halt {
    Stop(StopReason),
    Fatal(PipelineError),
}

/// Readers, per-writer queues, writers and the throughput monitor wired
/// around one sink.
pub struct Pipeline {
    config: PipelineConfig,
    sink: Arc<dyn Sink>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, sink: Arc<dyn Sink>) -> Self {
        Self { config, sink }
    }

    /// Runs until `token` is cancelled, the monitor exits, every unit has
    /// finished, or (fail-fast) a unit fails.
    ///
    /// `sources` supplies one source per reader.
    ///
    /// A fatal halt returns the failure that caused it. Units that fail
    /// while the rest are being stopped are logged, not returned.
    pub async fn run(
        &self,
        sources: Vec<Box<dyn Source>>,
        token: CancellationToken,
    ) -> Result<PipelineReport, PipelineError> {
        let cfg = &self.config;
        cfg.validate()?;
        if sources.len() != cfg.reader_count {
            return Err(PipelineError::Config(format!(
                "reader_count is {} but {} sources were given",
                cfg.reader_count,
                sources.len()
            )));
        }

        let progress = Arc::new(Progress::new(cfg.writer_count));

        // ── monitor first: writers may not start before the target exists ──
        let monitor_token = token.child_token();
        let (ready_tx, ready_rx) = oneshot::channel();
        let mut monitor = tokio::spawn(run_monitor(
            self.sink.clone(),
            cfg.monitor_interval(),
            ready_tx,
            monitor_token.clone(),
        ));

        tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::info!("cancelled before the target was ready");
                monitor_token.cancel();
                if let Err(e) = (&mut monitor).await {
                    tracing::warn!(error = %e, "monitor task failed");
                }
                return Ok(PipelineReport::new(StopReason::Cancelled, &progress, Vec::new()));
            }
            ready = ready_rx => {
                if ready.is_err() {
                    return match monitor.await {
                        Ok(Err(e)) => Err(e),
                        Ok(Ok(())) if token.is_cancelled() => {
                            Ok(PipelineReport::new(StopReason::Cancelled, &progress, Vec::new()))
                        }
                        Ok(Ok(())) => Err(PipelineError::MonitorGone),
                        Err(e) => Err(panicked(Unit::Monitor, e)),
                    };
                }
            }
        }

        // ── queues, writers, readers ──
        let queues = Arc::new(PartitionedQueueSet::new(
            cfg.writer_count,
            cfg.queue_capacity,
            cfg.capacity_unit,
        ));
        // Not tied to `token`: in drain mode writers outlive the external
        // cancellation until the queues are empty.
        let workers_token = CancellationToken::new();
        let readers_token = workers_token.child_token();

        let mut units: JoinSet<UnitResult> = JoinSet::new();
        let mut unit_ids: HashMap<Id, Unit> = HashMap::new();

        for queue in 0..cfg.writer_count {
            let settings = ConsumerSettings {
                queue,
                max_batch_size: cfg.max_batch_size,
                idle_backoff: cfg.idle_backoff(),
            };
            let fut = run_consumer(
                settings,
                queues.clone(),
                self.sink.clone(),
                progress.clone(),
                workers_token.clone(),
            );
            let handle = units.spawn(async move { fut.await.map(UnitOutput::Writer) });
            unit_ids.insert(handle.id(), Unit::Writer(queue));
        }

        for (id, source) in sources.into_iter().enumerate() {
            let fut = run_producer(
                id,
                source,
                queues.clone(),
                cfg.block_policy(),
                progress.clone(),
                readers_token.clone(),
            );
            let handle = units.spawn(async move { fut.await.map(UnitOutput::Reader) });
            unit_ids.insert(handle.id(), Unit::Reader(id));
        }

        tracing::info!(
            readers = cfg.reader_count,
            writers = cfg.writer_count,
            capacity = cfg.queue_capacity,
            unit = ?cfg.capacity_unit,
            "pipeline started"
        );

        // ── supervise ──
        let mut failures = Vec::new();
        let mut readers_left = cfg.reader_count;
        let mut monitor_done = false;

        let halt = loop {
            if units.is_empty() {
                break Halt::Stop(StopReason::Completed);
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => break Halt::Stop(StopReason::Cancelled),
                res = &mut monitor => {
                    monitor_done = true;
                    match res {
                        Ok(Ok(())) => {
                            tracing::warn!("monitor exited");
                            break Halt::Stop(StopReason::MonitorExited);
                        }
                        Ok(Err(e)) => break Halt::Fatal(e),
                        Err(e) => break Halt::Fatal(panicked(Unit::Monitor, e)),
                    }
                }
                Some(joined) = units.join_next_with_id() => {
                    let (unit, outcome) = match joined {
                        Ok((id, res)) => (unit_ids.remove(&id), res),
                        Err(e) => {
                            let unit = unit_ids.remove(&e.id());
                            match unit {
                                Some(unit) => (Some(unit), Err(panicked(unit, e))),
                                None => continue,
                            }
                        }
                    };

                    if matches!(unit, Some(Unit::Reader(_))) {
                        readers_left -= 1;
                    }

                    match outcome {
                        Ok(UnitOutput::Reader(r)) => {
                            tracing::debug!(?r, "reader finished");
                        }
                        Ok(UnitOutput::Writer(r)) => {
                            tracing::debug!(?r, "writer finished");
                        }
                        Err(e) => match cfg.failure_policy {
                            FailurePolicy::FailFast => break Halt::Fatal(e),
                            FailurePolicy::Isolate => {
                                tracing::error!(error = %e, "unit failed, continuing");
                                failures.push(e);
                            }
                        },
                    }

                    if readers_left == 0 && cfg.shutdown == ShutdownMode::Drain && !queues.is_closed() {
                        tracing::info!("all readers done, draining queues");
                        queues.close();
                    }
                }
            }
        };

        // ── shutdown: monitor, then units, then queues ──
        monitor_token.cancel();
        if !monitor_done {
            match monitor.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => failures.push(e),
                Err(e) if e.is_cancelled() => {}
                Err(e) => failures.push(panicked(Unit::Monitor, e)),
            }
        }

        let drain = cfg.shutdown == ShutdownMode::Drain && matches!(halt, Halt::Stop(_));
        if drain && !units.is_empty() {
            tracing::info!(units = units.len(), "stopping readers, draining queues");
            readers_token.cancel();
            queues.close();
            let deadline = cfg.shutdown_timeout();
            if tokio::time::timeout(deadline, collect(&mut units, &mut unit_ids, &mut failures))
                .await
                .is_err()
            {
                tracing::warn!(timeout_ms = cfg.shutdown_timeout_ms, "drain timed out, aborting");
            }
        }

        workers_token.cancel();
        units.abort_all();
        queues.close();
        collect(&mut units, &mut unit_ids, &mut failures).await;

        let stop = match halt {
            Halt::Stop(stop) => stop,
            Halt::Fatal(e) => {
                tracing::error!(
                    error = %e,
                    later_failures = failures.len(),
                    produced = progress.produced(),
                    written = progress.written(),
                    "pipeline failed"
                );
                return Err(e);
            }
        };

        let report = PipelineReport::new(stop, &progress, failures);
        tracing::info!(
            stop = ?report.stop,
            produced = report.produced,
            written = report.written,
            batches = report.batches,
            failures = report.failures.len(),
            "pipeline stopped"
        );
        Ok(report)
    }
}

/// Joins every remaining unit. Aborted units are not failures.
async fn collect(
    units: &mut JoinSet<UnitResult>,
    unit_ids: &mut HashMap<Id, Unit>,
    failures: &mut Vec<PipelineError>,
) {
    while let Some(joined) = units.join_next_with_id().await {
        match joined {
            Ok((id, Ok(_))) => {
                unit_ids.remove(&id);
            }
            Ok((id, Err(e))) => {
                unit_ids.remove(&id);
                tracing::error!(error = %e, "unit failed during shutdown");
                failures.push(e);
            }
            Err(e) if e.is_cancelled() => {
                unit_ids.remove(&e.id());
            }
            Err(e) => {
                if let Some(unit) = unit_ids.remove(&e.id()) {
                    failures.push(panicked(unit, e));
                }
            }
        }
    }
}

fn panicked(unit: Unit, e: JoinError) -> PipelineError {
    PipelineError::Panicked { unit, detail: e.to_string() }
}
