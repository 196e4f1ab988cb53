use std::ops::Range;

use ingest_api::{PartitionKey, Record, RecordGroup, Source};

// ═══════════════════════════════════════════════════════════════
//  Meter presets
// ═══════════════════════════════════════════════════════════════

const LOCATIONS: [&str; 5] = [
    "California.LosAngeles",
    "California.SanDiego",
    "California.SanJose",
    "California.Campbell",
    "California.SanFrancisco",
];
const CURRENT: [f32; 5] = [8.8, 10.7, 9.9, 8.9, 9.4];
const VOLTAGE: [i32; 5] = [119, 116, 111, 113, 118];
const PHASE: [f32; 5] = [0.32, 0.34, 0.33, 0.329, 0.141];

/// Rows emitted per table per pull.
pub const ROWS_PER_GROUP: u64 = 100;
/// Timestamp step between consecutive rows.
const ROW_STEP_MS: i64 = 100;

// ═══════════════════════════════════════════════════════════════
//  MeterSource
// ═══════════════════════════════════════════════════════════════

/// Synthetic meter readings for a contiguous range of sub-tables.
///
/// Every pull yields [`ROWS_PER_GROUP`] rows of the next table, cycling
/// through the reader's tables. Rows are numbered across the whole source
/// and the stream ends once `max_rows` rows were produced.
pub struct MeterSource {
    reader: usize,
    tables: Range<u64>,
    /// Next table, relative to `tables.start`.
    cursor: u64,
    row: u64,
    max_rows: u64,
    start_ms: i64,
}

impl MeterSource {
    /// Source for reader `reader` of `readers`, owning its share of
    /// `table_count` tables.
    pub fn new(reader: usize, readers: usize, table_count: usize, max_rows: u64, now_ms: i64) -> Self {
        let (readers, tables, r) = (readers as u64, table_count as u64, reader as u64);
        let start_ms = now_ms.saturating_sub((max_rows as i64).saturating_mul(ROW_STEP_MS));
        Self {
            reader,
            tables: (r * tables / readers)..((r + 1) * tables / readers),
            cursor: 0,
            row: 0,
            max_rows,
            start_ms,
        }
    }

    pub fn tables(&self) -> Range<u64> {
        self.tables.clone()
    }

    fn table_name(&self, local: u64) -> String {
        format!("tb{}_{local}", self.reader)
    }
}

/// Group tag derived from a table's position within its reader.
fn group_id(local: u64) -> u64 {
    match local % 5 {
        0 => 0,
        m => m + 1,
    }
}

impl Iterator for MeterSource {
    type Item = RecordGroup;

    fn next(&mut self) -> Option<RecordGroup> {
        let span = self.tables.end - self.tables.start;
        if self.row >= self.max_rows || span == 0 {
            return None;
        }

        let local = self.cursor;
        self.cursor = (self.cursor + 1) % span;
        let key = PartitionKey::Id(self.tables.start + local);
        let table = self.table_name(local);
        let group = group_id(local);

        let n = ROWS_PER_GROUP.min(self.max_rows - self.row);
        let mut records = Vec::with_capacity(n as usize);
        for _ in 0..n {
            self.row += 1;
            let ts = self.start_ms + ROW_STEP_MS * self.row as i64;
            let i = (self.row % 5) as usize;
            let line = format!(
                "{table},{ts},{},{},{},{},{group}",
                CURRENT[i], VOLTAGE[i], PHASE[i], LOCATIONS[i]
            );
            records.push(Record::new(key.clone(), ts, line));
        }
        Some(RecordGroup::new(key, records))
    }
}

/// One source per configured reader.
pub fn meter_sources(readers: usize, table_count: usize, max_rows: u64, now_ms: i64) -> Vec<Box<dyn Source>> {
    (0..readers)
        .map(|r| Box::new(MeterSource::new(r, readers, table_count, max_rows, now_ms)) as Box<dyn Source>)
        .collect()
}
