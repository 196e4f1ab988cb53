use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::RwLock;

use ingest_api::{PartitionKey, Record, Sink, SinkError};

// ═══════════════════════════════════════════════════════════════
//  MemorySinkConfig
// ═══════════════════════════════════════════════════════════════

fn default_max_records() -> usize {
    100_000
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemorySinkConfig {
    /// How many of the most recent records are retained for inspection.
    /// The row count keeps growing past this.
    #[serde(default = "default_max_records")]
    pub max_records: usize,
    /// Artificial latency per `write_batch`, to emulate a slow target.
    #[serde(default)]
    pub write_delay_ms: u64,
}

impl Default for MemorySinkConfig {
    fn default() -> Self {
        Self {
            max_records: default_max_records(),
            write_delay_ms: 0,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemorySink
// ═══════════════════════════════════════════════════════════════

/// In-memory sink: an atomic row counter plus a ring buffer of the last
/// `max_records` records. Used for dry runs and tests.
pub struct MemorySink {
    count: AtomicU64,
    records: RwLock<VecDeque<Record>>,
    max_records: usize,
    write_delay: Duration,
}

impl MemorySink {
    pub fn new(config: MemorySinkConfig) -> Self {
        Self {
            count: AtomicU64::new(0),
            records: RwLock::new(VecDeque::with_capacity(config.max_records.min(65536))),
            max_records: config.max_records,
            write_delay: Duration::from_millis(config.write_delay_ms),
        }
    }

    /// Rows written so far, without going through the async API.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    /// Retained records, oldest first.
    pub async fn records(&self) -> Vec<Record> {
        self.records.read().await.iter().cloned().collect()
    }

    /// Retained records of one partition, in arrival order.
    pub async fn records_for(&self, key: &PartitionKey) -> Vec<Record> {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| r.key == *key)
            .cloned()
            .collect()
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new(MemorySinkConfig::default())
    }
}

impl Sink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    /// Resets the counter and drops retained records. Idempotent.
    fn ensure_target(&self) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + '_>> {
        Box::pin(async {
            let mut buf = self.records.write().await;
            buf.clear();
            self.count.store(0, Ordering::Release);
            Ok(())
        })
    }

    fn write_batch<'a>(
        &'a self,
        batch: &'a [Record],
    ) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>> {
        Box::pin(async move {
            if !self.write_delay.is_zero() {
                tokio::time::sleep(self.write_delay).await;
            }
            if self.max_records > 0 {
                let mut buf = self.records.write().await;
                for record in batch {
                    if buf.len() >= self.max_records {
                        buf.pop_front();
                    }
                    buf.push_back(record.clone());
                }
            }
            self.count.fetch_add(batch.len() as u64, Ordering::AcqRel);
            Ok(())
        })
    }

    fn current_count(&self) -> Pin<Box<dyn Future<Output = Result<u64, SinkError>> + Send + '_>> {
        Box::pin(async { Ok(self.count()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(key: u64, n: i64) -> Vec<Record> {
        (0..n).map(|i| Record::new(key, i, format!("d{key},{i}"))).collect()
    }

    #[tokio::test]
    async fn test_counts_and_retains_in_order() {
        let sink = MemorySink::default();
        sink.ensure_target().await.unwrap();
        sink.write_batch(&batch(1, 3)).await.unwrap();
        sink.write_batch(&batch(2, 2)).await.unwrap();
        sink.write_batch(&batch(1, 2)).await.unwrap();

        assert_eq!(sink.current_count().await.unwrap(), 7);
        let ts: Vec<i64> = sink.records_for(&PartitionKey::Id(1)).await.iter().map(|r| r.ts_ms).collect();
        assert_eq!(ts, vec![0, 1, 2, 0, 1]);
    }

    #[tokio::test]
    async fn test_ring_buffer_keeps_latest() {
        let sink = MemorySink::new(MemorySinkConfig { max_records: 3, ..Default::default() });
        sink.write_batch(&batch(1, 5)).await.unwrap();

        assert_eq!(sink.count(), 5);
        let ts: Vec<i64> = sink.records().await.iter().map(|r| r.ts_ms).collect();
        assert_eq!(ts, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn test_ensure_target_is_idempotent() {
        let sink = MemorySink::default();
        sink.write_batch(&batch(1, 4)).await.unwrap();

        sink.ensure_target().await.unwrap();
        sink.ensure_target().await.unwrap();

        assert_eq!(sink.current_count().await.unwrap(), 0);
        assert!(sink.records().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_delay() {
        let sink = MemorySink::new(MemorySinkConfig { write_delay_ms: 200, ..Default::default() });
        let start = tokio::time::Instant::now();
        sink.write_batch(&batch(1, 1)).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[test]
    fn test_config_defaults() {
        let cfg: MemorySinkConfig = toml::from_str("write_delay_ms = 5").unwrap();
        assert_eq!(cfg.max_records, 100_000);
        assert_eq!(cfg.write_delay_ms, 5);
    }
}
