use clap::{Args, ValueEnum};
use serde::Deserialize;

use pipeline::{CapacityUnit, FailurePolicy, PipelineConfig, ShutdownMode};
use storage_memory::MemorySinkConfig;
use storage_tdengine::TdengineConfig;

use super::error::IngestError;

/// Default bound on rows generated per reader.
pub const DEFAULT_MAX_ROWS: u64 = 1_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    #[default]
    Tdengine,
    Memory,
}

// ═══════════════════════════════════════════════════════════════
//  Config file (TOML)
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub sink: Option<SinkKind>,
    pub pipeline: PipelineConfig,
    pub source: SourceConfig,
    pub tdengine: TdengineConfig,
    pub memory: MemorySinkConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceConfig {
    pub max_rows: Option<u64>,
}

pub fn load_config(path: &str) -> Result<Config, IngestError> {
    let content =
        std::fs::read_to_string(path).map_err(|e| IngestError::Config(format!("cannot read config {path}: {e}")))?;
    parse_config(&content).map_err(|e| IngestError::Config(format!("bad config {path}: {e}")))
}

fn parse_config(content: &str) -> Result<Config, toml::de::Error> {
    toml::from_str(content)
}

// ═══════════════════════════════════════════════════════════════
//  CLI args
// ═══════════════════════════════════════════════════════════════

#[derive(Args, Clone, Debug, Default)]
pub struct IngestArgs {
    /// Number of reader tasks
    #[arg(value_name = "READERS")]
    pub readers: Option<usize>,

    /// Number of writer tasks (one queue each)
    #[arg(value_name = "WRITERS")]
    pub writers: Option<usize>,

    /// Number of sub-tables spread over the readers
    #[arg(value_name = "TABLES")]
    pub tables: Option<usize>,

    /// Per-queue capacity (bytes by default, see --capacity-unit)
    #[arg(value_name = "QUEUE_SIZE")]
    pub queue_size: Option<usize>,

    /// Max records per write batch
    #[arg(value_name = "MAX_BATCH")]
    pub max_batch: Option<usize>,

    /// Path to config.toml
    #[arg(long, default_value = "meters-ingest.toml", env = "METERS_INGEST_CONFIG")]
    pub config: String,

    /// Where records are written
    #[arg(long, value_enum, env = "METERS_INGEST_SINK")]
    pub sink: Option<SinkKind>,

    /// Queue capacity unit: items or bytes
    #[arg(long)]
    pub capacity_unit: Option<CapacityUnit>,

    /// fail-fast or isolate
    #[arg(long)]
    pub failure_policy: Option<FailurePolicy>,

    /// abort or drain
    #[arg(long)]
    pub shutdown: Option<ShutdownMode>,

    /// Give up on a full queue after this long (ms); blocks forever if unset
    #[arg(long)]
    pub enqueue_timeout_ms: Option<u64>,

    /// Throughput sampling interval (ms)
    #[arg(long)]
    pub monitor_interval_ms: Option<u64>,

    /// Stop each reader after this many rows
    #[arg(long)]
    pub max_rows: Option<u64>,

    /// TDengine REST endpoint, host:port
    #[arg(long, env = "TDENGINE_FIRST_EP")]
    pub tdengine_ep: Option<String>,

    #[arg(long, env = "TDENGINE_USER")]
    pub tdengine_user: Option<String>,

    #[arg(long, env = "TDENGINE_PASSWORD", hide_env_values = true)]
    pub tdengine_password: Option<String>,
}

// ═══════════════════════════════════════════════════════════════
//  Effective: merged config
// ═══════════════════════════════════════════════════════════════

/// Final configuration: defaults < config.toml < env/CLI.
#[derive(Debug)]
pub struct Effective {
    pub sink: SinkKind,
    pub pipeline: PipelineConfig,
    pub max_rows: u64,
    pub tdengine: TdengineConfig,
    pub memory: MemorySinkConfig,
}

impl Effective {
    pub fn new(args: &IngestArgs) -> Result<Self, IngestError> {
        let cfg = match load_config(&args.config) {
            Ok(c) => c,
            Err(e) => {
                if std::path::Path::new(&args.config).exists() {
                    return Err(e);
                }
                Config::default()
            }
        };
        Self::merge(cfg, args)
    }

    fn merge(cfg: Config, args: &IngestArgs) -> Result<Self, IngestError> {
        let mut pipeline = cfg.pipeline;
        override_with(&mut pipeline.reader_count, args.readers);
        override_with(&mut pipeline.writer_count, args.writers);
        override_with(&mut pipeline.table_count, args.tables);
        override_with(&mut pipeline.queue_capacity, args.queue_size);
        override_with(&mut pipeline.max_batch_size, args.max_batch);
        override_with(&mut pipeline.capacity_unit, args.capacity_unit);
        override_with(&mut pipeline.failure_policy, args.failure_policy);
        override_with(&mut pipeline.shutdown, args.shutdown);
        override_with(&mut pipeline.monitor_interval_ms, args.monitor_interval_ms);
        if args.enqueue_timeout_ms.is_some() {
            pipeline.enqueue_timeout_ms = args.enqueue_timeout_ms;
        }
        pipeline.validate()?;

        let mut tdengine = cfg.tdengine;
        if let Some(ep) = &args.tdengine_ep {
            tdengine.set_endpoint(ep)?;
        }
        override_with(&mut tdengine.user, args.tdengine_user.clone());
        override_with(&mut tdengine.password, args.tdengine_password.clone());

        let max_rows = args.max_rows.or(cfg.source.max_rows).unwrap_or(DEFAULT_MAX_ROWS);
        if max_rows == 0 {
            return Err(IngestError::Config("max_rows must be positive".into()));
        }

        Ok(Self {
            sink: args.sink.or(cfg.sink).unwrap_or_default(),
            pipeline,
            max_rows,
            tdengine,
            memory: cfg.memory,
        })
    }
}

fn override_with<T>(slot: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *slot = v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_file() {
        let args = IngestArgs { config: "/nonexistent/meters-ingest.toml".into(), ..Default::default() };
        let eff = Effective::new(&args).unwrap();

        assert_eq!(eff.sink, SinkKind::Tdengine);
        assert_eq!(eff.pipeline, PipelineConfig::default());
        assert_eq!(eff.max_rows, DEFAULT_MAX_ROWS);
        assert_eq!(eff.tdengine.sql_url(), "http://localhost:6041/rest/sql");
    }

    #[test]
    fn test_cli_overrides_file() {
        let cfg = parse_config(
            r#"
            sink = "memory"

            [pipeline]
            reader_count = 2
            writer_count = 2
            shutdown = "drain"

            [source]
            max_rows = 5000

            [tdengine]
            user = "ingest"
            database = "power"
            "#,
        )
        .unwrap();
        let args = IngestArgs {
            readers: Some(4),
            writers: Some(8),
            tables: Some(100),
            queue_size: Some(1000),
            max_batch: Some(500),
            capacity_unit: Some(CapacityUnit::Items),
            tdengine_ep: Some("td2:16041".into()),
            ..Default::default()
        };

        let eff = Effective::merge(cfg, &args).unwrap();
        assert_eq!(eff.sink, SinkKind::Memory);
        assert_eq!(eff.pipeline.reader_count, 4);
        assert_eq!(eff.pipeline.writer_count, 8);
        assert_eq!(eff.pipeline.table_count, 100);
        assert_eq!(eff.pipeline.queue_capacity, 1000);
        assert_eq!(eff.pipeline.max_batch_size, 500);
        assert_eq!(eff.pipeline.capacity_unit, CapacityUnit::Items);
        assert_eq!(eff.pipeline.shutdown, ShutdownMode::Drain);
        assert_eq!(eff.max_rows, 5000);
        assert_eq!(eff.tdengine.user, "ingest");
        assert_eq!(eff.tdengine.database, "power");
        assert_eq!(eff.tdengine.host, "td2");
        assert_eq!(eff.tdengine.port, 16041);
    }

    #[test]
    fn test_invalid_counts_rejected() {
        let args = IngestArgs { readers: Some(10), tables: Some(5), ..Default::default() };
        assert!(Effective::merge(Config::default(), &args).is_err());
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(parse_config("[pipeline]\nreaders = 3").is_err());
    }
}
