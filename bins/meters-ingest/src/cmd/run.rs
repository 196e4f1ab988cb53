use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use ingest_api::{Sink, now_ms};
use pipeline::{Pipeline, StopReason};
use storage_memory::MemorySink;
use storage_tdengine::TdengineSink;

use super::config::{Effective, SinkKind};
use super::domain::meter_sources;
use super::error::IngestError;

pub fn build_sink(eff: &Effective) -> Result<Arc<dyn Sink>, IngestError> {
    Ok(match eff.sink {
        SinkKind::Tdengine => Arc::new(TdengineSink::new(eff.tdengine.clone())?),
        SinkKind::Memory => Arc::new(MemorySink::new(eff.memory.clone())),
    })
}

pub async fn run(eff: &Effective) -> Result<(), IngestError> {
    let p = &eff.pipeline;
    tracing::info!(
        readers = p.reader_count,
        writers = p.writer_count,
        tables = p.table_count,
        queue_size = p.queue_capacity,
        capacity_unit = ?p.capacity_unit,
        max_batch = p.max_batch_size,
        failure_policy = ?p.failure_policy,
        shutdown = ?p.shutdown,
        max_rows = eff.max_rows,
        sink = ?eff.sink,
        "effective configuration"
    );
    if eff.sink == SinkKind::Tdengine {
        tracing::info!(
            url = %eff.tdengine.sql_url(),
            user = %eff.tdengine.user,
            database = %eff.tdengine.database,
            "tdengine target"
        );
    }

    let sink = build_sink(eff)?;
    let sources = meter_sources(p.reader_count, p.table_count, eff.max_rows, now_ms());

    let token = CancellationToken::new();
    tokio::spawn({
        let token = token.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutting down...");
                token.cancel();
            }
        }
    });

    let report = Pipeline::new(p.clone(), sink).run(sources, token).await?;

    for failure in &report.failures {
        tracing::warn!(error = %failure, "unit failure");
    }
    if report.stop == StopReason::MonitorExited {
        tracing::warn!("monitor exited, pipeline stopped");
    }
    tracing::info!(
        produced = report.produced,
        written = report.written,
        batches = report.batches,
        per_queue = ?report.per_queue,
        "done"
    );
    Ok(())
}
