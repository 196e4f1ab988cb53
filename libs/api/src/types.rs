use std::fmt;
use std::sync::Arc;

use xxhash_rust::xxh3::xxh3_64;

// ════════════════════════════════════════════════════════════════
//  PartitionKey
// ════════════════════════════════════════════════════════════════

/// Entity identifier a record is partitioned by (table / device id).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PartitionKey {
    Id(u64),
    Name(String),
}

impl PartitionKey {
    /// Slot in `[0, n)` this key maps to.
    ///
    /// Integer ids map by `id mod n`, so ids congruent modulo `n` always
    /// share a slot. Names hash with xxh3, which is stable across runs and
    /// platforms (unlike `DefaultHasher`).
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn slot(&self, n: usize) -> usize {
        assert!(n > 0, "slot count must be positive");
        match self {
            PartitionKey::Id(id) => (*id % n as u64) as usize,
            PartitionKey::Name(name) => (xxh3_64(name.as_bytes()) % n as u64) as usize,
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionKey::Id(id) => write!(f, "{id}"),
            PartitionKey::Name(name) => f.write_str(name),
        }
    }
}

impl From<u64> for PartitionKey {
    fn from(id: u64) -> Self {
        PartitionKey::Id(id)
    }
}

impl From<&str> for PartitionKey {
    fn from(name: &str) -> Self {
        PartitionKey::Name(name.to_string())
    }
}

impl From<String> for PartitionKey {
    fn from(name: String) -> Self {
        PartitionKey::Name(name)
    }
}

// ════════════════════════════════════════════════════════════════
//  Record
// ════════════════════════════════════════════════════════════════

/// A single time-stamped record, already serialized to its wire line.
///
/// Cloning is cheap: the line is shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Partition key (entity the record belongs to).
    pub key: PartitionKey,
    /// Timestamp in milliseconds (Unix epoch).
    pub ts_ms: i64,
    /// Serialized record line, opaque to the pipeline.
    pub line: Arc<str>,
}

impl Record {
    pub fn new(key: impl Into<PartitionKey>, ts_ms: i64, line: impl Into<Arc<str>>) -> Self {
        Self {
            key: key.into(),
            ts_ms,
            line: line.into(),
        }
    }

    /// Size in bytes used for byte-capacity accounting.
    pub fn size(&self) -> usize {
        self.line.len()
    }
}

// ════════════════════════════════════════════════════════════════
//  RecordGroup
// ════════════════════════════════════════════════════════════════

/// Records of one partition, pulled from a source in one call.
///
/// Submitted to a queue as a unit so intra-partition order survives.
#[derive(Debug, Clone)]
pub struct RecordGroup {
    pub key: PartitionKey,
    pub records: Vec<Record>,
}

impl RecordGroup {
    pub fn new(key: impl Into<PartitionKey>, records: Vec<Record>) -> Self {
        Self {
            key: key.into(),
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
