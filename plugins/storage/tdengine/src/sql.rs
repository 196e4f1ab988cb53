//! SQL text for the meters schema.
//!
//! Record lines have the form
//! `table,ts_ms,current,voltage,phase,location,group_id`.

use std::collections::HashMap;

use ingest_api::SinkError;

const SQL_CREATE_STABLE: &str = include_str!("../sql/create_stable.sql");
const INSERT: &str = "INSERT INTO";
const CREATE: &str = "CREATE TABLE";

/// Escape a string for a single-quoted TDengine literal.
fn escape_td_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Plain identifier: ASCII letters, digits, `_`, not starting with a digit.
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// One parsed record line.
#[derive(Debug, Clone, PartialEq)]
pub struct MeterRow<'a> {
    pub table: &'a str,
    pub ts_ms: i64,
    pub current: f32,
    pub voltage: i32,
    pub phase: f32,
    pub location: &'a str,
    pub group_id: i32,
}

impl MeterRow<'_> {
    fn values(&self) -> String {
        format!("({},{},{},{})", self.ts_ms, self.current, self.voltage, self.phase)
    }

    fn tags(&self) -> String {
        format!("('{}',{})", escape_td_string(self.location), self.group_id)
    }
}

pub fn parse_line(line: &str) -> Result<MeterRow<'_>, SinkError> {
    let fields: Vec<&str> = line.split(',').collect();
    let &[table, ts, current, voltage, phase, location, group_id] = fields.as_slice() else {
        return Err(SinkError::format_err(format!(
            "expected 7 fields, got {}: {line}",
            fields.len()
        )));
    };
    if !is_identifier(table) {
        return Err(SinkError::format_err(format!("invalid table name '{table}'")));
    }
    let ctx = |what: &str| format!("{what} in '{line}'");
    Ok(MeterRow {
        table,
        ts_ms: ts.parse().map_err(|e| SinkError::from(e).with_context(ctx("ts")))?,
        current: current.parse().map_err(|e| SinkError::from(e).with_context(ctx("current")))?,
        voltage: voltage.parse().map_err(|e| SinkError::from(e).with_context(ctx("voltage")))?,
        phase: phase.parse().map_err(|e| SinkError::from(e).with_context(ctx("phase")))?,
        location,
        group_id: group_id.parse().map_err(|e| SinkError::from(e).with_context(ctx("group_id")))?,
    })
}

/// Rows grouped per table, tables in order of first appearance, rows in
/// line order.
pub struct TableBatch<'a> {
    tables: Vec<(&'a str, String, Vec<String>)>,
}

impl<'a> TableBatch<'a> {
    pub fn from_rows(rows: &[MeterRow<'a>]) -> Self {
        let mut index: HashMap<&str, usize> = HashMap::new();
        let mut tables: Vec<(&str, String, Vec<String>)> = Vec::new();
        for row in rows {
            let i = *index.entry(row.table).or_insert_with(|| {
                tables.push((row.table, row.tags(), Vec::new()));
                tables.len() - 1
            });
            tables[i].2.push(row.values());
        }
        Self { tables }
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// `INSERT INTO db.t1 VALUES (..) (..) db.t2 VALUES (..)` statements,
    /// each at most `max_len` bytes unless a single row is already larger.
    pub fn inserts(&self, db: &str, max_len: usize) -> Vec<String> {
        let mut builder = ChunkedStatements::new(INSERT, max_len);
        for (table, _, values) in &self.tables {
            let header = format!(" {db}.{table} VALUES");
            for v in values {
                builder.push(&header, v);
            }
        }
        builder.finish()
    }

    /// `CREATE TABLE IF NOT EXISTS db.t USING db.stable TAGS (..) ...`
    /// for every table in the batch.
    pub fn create_tables(&self, db: &str, stable: &str, max_len: usize) -> Vec<String> {
        let mut builder = ChunkedStatements::new(CREATE, max_len);
        for (table, tags, _) in &self.tables {
            let clause = format!(" IF NOT EXISTS {db}.{table} USING {db}.{stable} TAGS {tags}");
            builder.push_clause(&clause);
        }
        builder.finish()
    }
}

/// Accumulates `prefix` + clauses into statements bounded by `max_len`.
struct ChunkedStatements<'p> {
    prefix: &'p str,
    max_len: usize,
    out: Vec<String>,
    sql: String,
    /// Header currently open in `sql`, values may be appended to it.
    open: Option<String>,
}

impl<'p> ChunkedStatements<'p> {
    fn new(prefix: &'p str, max_len: usize) -> Self {
        Self {
            prefix,
            max_len,
            out: Vec::new(),
            sql: prefix.to_string(),
            open: None,
        }
    }

    fn has_content(&self) -> bool {
        self.sql.len() > self.prefix.len()
    }

    fn flush(&mut self) {
        if self.has_content() {
            let sql = std::mem::replace(&mut self.sql, self.prefix.to_string());
            self.out.push(sql);
        }
        self.open = None;
    }

    /// Appends one value under `header`, reopening the header in a new
    /// statement when the current one is full.
    fn push(&mut self, header: &str, value: &str) {
        let reopen = self.open.as_deref() != Some(header);
        let need = value.len() + 1 + if reopen { header.len() } else { 0 };
        if self.has_content() && self.sql.len() + need > self.max_len {
            self.flush();
        }
        if self.open.as_deref() != Some(header) {
            self.sql.push_str(header);
            self.open = Some(header.to_string());
        }
        self.sql.push(' ');
        self.sql.push_str(value);
    }

    fn push_clause(&mut self, clause: &str) {
        if self.has_content() && self.sql.len() + clause.len() > self.max_len {
            self.flush();
        }
        self.sql.push_str(clause);
    }

    fn finish(mut self) -> Vec<String> {
        self.flush();
        self.out
    }
}

pub fn drop_database(db: &str) -> String {
    format!("DROP DATABASE IF EXISTS {db}")
}

pub fn create_database(db: &str) -> String {
    format!("CREATE DATABASE IF NOT EXISTS {db}")
}

pub fn create_stable(db: &str, stable: &str) -> String {
    SQL_CREATE_STABLE
        .replace("{db}", db)
        .replace("{stable}", stable)
        .trim()
        .to_string()
}

pub fn count_rows(db: &str, stable: &str) -> String {
    format!("SELECT COUNT(*) FROM {db}.{stable}")
}
