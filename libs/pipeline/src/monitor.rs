use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use ingest_api::Sink;

use crate::error::PipelineError;

/// Sink row count observed at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThroughputSample {
    pub at: Instant,
    pub count: u64,
}

impl ThroughputSample {
    pub fn new(count: u64) -> Self {
        Self { at: Instant::now(), count }
    }

    /// Records per second between `prev` and `self`. A zero interval or a
    /// count that went backwards (target recreated) yields 0.
    pub fn rate_since(&self, prev: &ThroughputSample) -> f64 {
        let secs = self.at.saturating_duration_since(prev.at).as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.count.saturating_sub(prev.count) as f64 / secs
    }
}

/// Running rate between consecutive count samples.
#[derive(Debug)]
pub struct Throughput {
    prev: ThroughputSample,
}

impl Throughput {
    /// Starts from zero rows now, so the first observation reports the
    /// rate since the target was created.
    pub fn start() -> Self {
        Self { prev: ThroughputSample::new(0) }
    }

    /// Records `count` and returns records/s since the previous sample.
    pub fn observe(&mut self, count: u64) -> f64 {
        let sample = ThroughputSample::new(count);
        let speed = sample.rate_since(&self.prev);
        self.prev = sample;
        speed
    }
}

/// Prepares the target, signals `ready`, then samples the sink count every
/// `interval` until cancelled.
///
/// `ready` is dropped unsent when target setup fails or the run is
/// cancelled first; the supervisor observes that as "not ready".
pub async fn run_monitor(
    sink: Arc<dyn Sink>,
    interval: Duration,
    ready: oneshot::Sender<()>,
    token: CancellationToken,
) -> Result<(), PipelineError> {
    tracing::debug!(sink = %sink.name(), "preparing target");
    tokio::select! {
        biased;
        _ = token.cancelled() => return Ok(()),
        res = sink.ensure_target() => res.map_err(PipelineError::Target)?,
    }
    // Receiver gone means the supervisor already stopped waiting.
    let _ = ready.send(());
    tracing::info!(sink = %sink.name(), "target ready");

    let mut throughput = Throughput::start();
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let count = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            res = sink.current_count() => res,
        };

        match count {
            Ok(count) => {
                let speed = throughput.observe(count);
                tracing::info!(count, speed = (speed * 10.0).round() / 10.0, "throughput");
            }
            Err(e) => tracing::warn!(error = ?e, "count query failed, sample skipped"),
        }
    }

    tracing::debug!("monitor stopped");
    Ok(())
}
