use std::sync::atomic::{AtomicU64, Ordering};

/// Shared pipeline counters, updated by workers as they go so the
/// totals survive an aborted worker.
#[derive(Debug)]
pub struct Progress {
    produced: AtomicU64,
    batches: AtomicU64,
    written: Vec<AtomicU64>,
}

impl Progress {
    pub fn new(queues: usize) -> Self {
        Self {
            produced: AtomicU64::new(0),
            batches: AtomicU64::new(0),
            written: (0..queues).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    pub fn record_produced(&self, records: u64) {
        self.produced.fetch_add(records, Ordering::Relaxed);
    }

    pub fn record_written(&self, queue: usize, records: u64) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.written[queue].fetch_add(records, Ordering::Relaxed);
    }

    pub fn produced(&self) -> u64 {
        self.produced.load(Ordering::Relaxed)
    }

    pub fn batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    pub fn written(&self) -> u64 {
        self.written.iter().map(|w| w.load(Ordering::Relaxed)).sum()
    }

    pub fn written_per_queue(&self) -> Vec<u64> {
        self.written.iter().map(|w| w.load(Ordering::Relaxed)).collect()
    }
}

/// Why a worker loop ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Source exhausted (reader).
    Exhausted,
    /// Queue closed and empty (writer).
    Drained,
    /// Cancellation observed.
    Cancelled,
}

/// Summary returned by a reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProducerReport {
    pub groups: u64,
    pub records: u64,
    pub exit: WorkerExit,
}

/// Summary returned by a writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerReport {
    pub queue: usize,
    pub batches: u64,
    pub records: u64,
    pub exit: WorkerExit,
}
