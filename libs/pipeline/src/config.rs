use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::PipelineError;

// ═══════════════════════════════════════════════════════════════
//  Policies
// ═══════════════════════════════════════════════════════════════

/// Unit in which queue capacity is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacityUnit {
    /// Number of records.
    Items,
    /// Sum of serialized record sizes.
    #[default]
    Bytes,
}

/// How long a producer may wait for queue space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockPolicy {
    /// Block until space frees up, however long it takes.
    Forever,
    /// Give up once no space has freed up for this long.
    Timeout(Duration),
}

/// What the supervisor does when a worker fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop the whole pipeline and return the error.
    #[default]
    FailFast,
    /// Log the failure, keep the remaining workers running.
    Isolate,
}

/// How the pipeline stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownMode {
    /// Hard stop: abort every worker, release queues. In-flight batches
    /// may be lost.
    #[default]
    Abort,
    /// Close queues once producers are done and let writers drain them.
    Drain,
}

macro_rules! impl_from_str {
    ($ty:ty, $what:literal, { $($name:literal => $val:expr),+ $(,)? }) => {
        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
                    $($name => Ok($val),)+
                    other => Err(format!(concat!("unknown ", $what, ": {}"), other)),
                }
            }
        }
    };
}

impl_from_str!(CapacityUnit, "capacity unit", {
    "items" => CapacityUnit::Items,
    "bytes" => CapacityUnit::Bytes,
});

impl_from_str!(FailurePolicy, "failure policy", {
    "fail_fast" => FailurePolicy::FailFast,
    "isolate" => FailurePolicy::Isolate,
});

impl_from_str!(ShutdownMode, "shutdown mode", {
    "abort" => ShutdownMode::Abort,
    "drain" => ShutdownMode::Drain,
});

// ═══════════════════════════════════════════════════════════════
//  PipelineConfig
// ═══════════════════════════════════════════════════════════════

/// Pipeline configuration. Every field has a default, so a partial
/// `[pipeline]` table deserializes fine.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Number of producer (reader) units.
    pub reader_count: usize,
    /// Number of queues, one writer unit per queue.
    pub writer_count: usize,
    /// Number of tables spread over the readers. Not the queue count:
    /// records are routed over `writer_count` queues.
    pub table_count: usize,
    /// Per-queue capacity, in `capacity_unit`.
    pub queue_capacity: usize,
    pub capacity_unit: CapacityUnit,
    /// Max records a writer drains per iteration.
    pub max_batch_size: usize,
    /// Upper bound of a writer's idle wait on an empty queue.
    pub idle_backoff_ms: u64,
    /// Interval between throughput samples.
    pub monitor_interval_ms: u64,
    /// Producer wait limit on a full queue; absent = block forever.
    pub enqueue_timeout_ms: Option<u64>,
    pub failure_policy: FailurePolicy,
    pub shutdown: ShutdownMode,
    /// Drain mode only: how long writers get to empty the queues.
    pub shutdown_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            reader_count: 1,
            writer_count: 1,
            table_count: 1000,
            queue_capacity: 1_000_000,
            capacity_unit: CapacityUnit::Bytes,
            max_batch_size: 3000,
            idle_backoff_ms: 10,
            monitor_interval_ms: 10_000,
            enqueue_timeout_ms: None,
            failure_policy: FailurePolicy::FailFast,
            shutdown: ShutdownMode::Abort,
            shutdown_timeout_ms: 5000,
        }
    }
}

impl PipelineConfig {
    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn block_policy(&self) -> BlockPolicy {
        match self.enqueue_timeout_ms {
            Some(ms) => BlockPolicy::Timeout(Duration::from_millis(ms)),
            None => BlockPolicy::Forever,
        }
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let positive = [
            ("reader_count", self.reader_count as u64),
            ("writer_count", self.writer_count as u64),
            ("table_count", self.table_count as u64),
            ("queue_capacity", self.queue_capacity as u64),
            ("max_batch_size", self.max_batch_size as u64),
            ("monitor_interval_ms", self.monitor_interval_ms),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(PipelineError::Config(format!("{name} must be positive")));
            }
        }
        if self.table_count < self.reader_count {
            return Err(PipelineError::Config(format!(
                "table_count ({}) must be at least reader_count ({})",
                self.table_count, self.reader_count
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = PipelineConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.block_policy(), BlockPolicy::Forever);
        assert_eq!(cfg.idle_backoff(), Duration::from_millis(10));
    }

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let cfg: PipelineConfig = toml::from_str(
            r#"
            writer_count = 4
            table_count = 8
            capacity_unit = "items"
            enqueue_timeout_ms = 250
            failure_policy = "isolate"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.writer_count, 4);
        assert_eq!(cfg.table_count, 8);
        assert_eq!(cfg.capacity_unit, CapacityUnit::Items);
        assert_eq!(cfg.block_policy(), BlockPolicy::Timeout(Duration::from_millis(250)));
        assert_eq!(cfg.failure_policy, FailurePolicy::Isolate);
        assert_eq!(cfg.reader_count, 1);
        assert_eq!(cfg.max_batch_size, 3000);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let res: Result<PipelineConfig, _> = toml::from_str("writers = 4");
        assert!(res.is_err());

        // Queues follow writer_count; there is no separate partition count.
        let res: Result<PipelineConfig, _> = toml::from_str("partition_count = 8");
        assert!(res.is_err());
    }

    #[test]
    fn test_validate_rejects_zero() {
        let cfg = PipelineConfig { writer_count: 0, ..Default::default() };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("writer_count"));

        let cfg = PipelineConfig { reader_count: 4, table_count: 2, ..Default::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_policies_from_str() {
        assert_eq!("fail-fast".parse::<FailurePolicy>(), Ok(FailurePolicy::FailFast));
        assert_eq!("Drain".parse::<ShutdownMode>(), Ok(ShutdownMode::Drain));
        assert_eq!("items".parse::<CapacityUnit>(), Ok(CapacityUnit::Items));
        assert!("lots".parse::<CapacityUnit>().is_err());
    }
}
