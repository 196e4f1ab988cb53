use std::future::Future;
use std::pin::Pin;

use base64::Engine;

use ingest_api::{Record, Sink, SinkError};

use crate::config::TdengineConfig;
use crate::sql::{self, MeterRow, TableBatch};

/// Error codes TDengine returns when an insert names a sub-table that
/// does not exist yet.
const TABLE_NOT_EXIST: [i32; 3] = [0x2603, 0x2662, 0x0362];

pub fn is_table_missing(err: &SinkError) -> bool {
    err.code().is_some_and(|c| TABLE_NOT_EXIST.contains(&(c & 0xffff)))
}

/// Body of a `/rest/sql` response.
#[derive(Debug, serde::Deserialize)]
pub struct RestResponse {
    pub code: i32,
    #[serde(default)]
    pub desc: Option<String>,
    #[serde(default)]
    pub data: Vec<Vec<serde_json::Value>>,
    #[serde(default)]
    pub rows: u64,
}

/// Turns an HTTP status and body into a response or an error.
///
/// Transport-level failures (unparseable body on a non-2xx status) are
/// `Io` and retried; a body with a non-zero `code` is a server-side
/// rejection and is not.
pub fn parse_response(status: reqwest::StatusCode, body: &str) -> Result<RestResponse, SinkError> {
    let resp: RestResponse = match serde_json::from_str(body) {
        Ok(r) => r,
        Err(e) if status.is_success() => {
            return Err(SinkError::from(e).with_context(format!("TDengine response {body:?}")));
        }
        Err(_) => return Err(SinkError::io(format!("TDengine HTTP {status}: {body}"))),
    };
    if resp.code != 0 {
        let desc = resp.desc.as_deref().unwrap_or("unknown error");
        return Err(SinkError::rejected(resp.code, format!("TDengine [{:#06x}] {desc}", resp.code)));
    }
    Ok(resp)
}

/// First cell of a `SELECT COUNT(*)` result; no rows counts as zero.
pub fn first_count(resp: &RestResponse) -> Result<u64, SinkError> {
    let Some(cell) = resp.data.first().and_then(|row| row.first()) else {
        return Ok(0);
    };
    cell.as_u64()
        .ok_or_else(|| SinkError::format_err(format!("count is not an unsigned integer: {cell}")))
}

/// TDengine sink over the taosAdapter REST API.
///
/// Each `write_batch` parses the record lines, groups them per sub-table
/// and sends multi-table `INSERT` statements. Sub-tables are created on
/// demand from the super table the first time an insert hits a missing
/// one.
pub struct TdengineSink {
    http: reqwest::Client,
    url: String,
    auth: String,
    cfg: TdengineConfig,
}

impl TdengineSink {
    pub fn new(cfg: TdengineConfig) -> Result<Self, SinkError> {
        cfg.validate()?;
        let http = reqwest::Client::builder()
            .timeout(cfg.request_timeout())
            .build()
            .map_err(|e| SinkError::config(format!("HTTP client: {e}")))?;
        let token = base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", cfg.user, cfg.password));
        Ok(Self {
            http,
            url: cfg.sql_url(),
            auth: format!("Basic {token}"),
            cfg,
        })
    }

    async fn exec_once(&self, sql: &str) -> Result<RestResponse, SinkError> {
        let resp = self
            .http
            .post(&self.url)
            .header(reqwest::header::AUTHORIZATION, &self.auth)
            .body(sql.to_owned())
            .send()
            .await
            .map_err(|e| SinkError::io(format!("TDengine request: {e}")))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| SinkError::io(format!("TDengine read: {e}")))?;
        parse_response(status, &body)
    }

    /// Runs one statement, retrying transport failures with a linear
    /// backoff.
    async fn exec(&self, sql: &str) -> Result<RestResponse, SinkError> {
        let mut attempt = 0;
        loop {
            match self.exec_once(sql).await {
                Err(e) if e.is_transient() && attempt < self.cfg.retries => {
                    attempt += 1;
                    tracing::warn!(attempt, retries = self.cfg.retries, error = %e, "retrying TDengine request");
                    tokio::time::sleep(self.cfg.retry_backoff() * attempt).await;
                }
                res => return res,
            }
        }
    }

    async fn create_tables(&self, batch: &TableBatch<'_>) -> Result<(), SinkError> {
        tracing::debug!(tables = batch.table_count(), "creating sub-tables");
        for stmt in batch.create_tables(&self.cfg.database, &self.cfg.stable, self.cfg.max_sql_len) {
            self.exec(&stmt).await?;
        }
        Ok(())
    }
}

impl Sink for TdengineSink {
    fn name(&self) -> &str {
        "tdengine"
    }

    /// Recreates the database and the super table. Running it twice
    /// leaves the same empty schema.
    fn ensure_target(&self) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + '_>> {
        Box::pin(async move {
            let db = &self.cfg.database;
            let stmts = [
                sql::drop_database(db),
                sql::create_database(db),
                sql::create_stable(db, &self.cfg.stable),
            ];
            for stmt in &stmts {
                self.exec(stmt).await.map_err(|e| e.with_context(stmt))?;
            }
            tracing::info!(database = %db, stable = %self.cfg.stable, "TDengine schema created");
            Ok(())
        })
    }

    fn write_batch<'a>(
        &'a self,
        batch: &'a [Record],
    ) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>> {
        Box::pin(async move {
            if batch.is_empty() {
                return Ok(());
            }
            let rows = batch
                .iter()
                .map(|r| sql::parse_line(&r.line))
                .collect::<Result<Vec<MeterRow<'_>>, _>>()?;
            let tables = TableBatch::from_rows(&rows);

            for stmt in tables.inserts(&self.cfg.database, self.cfg.max_sql_len) {
                match self.exec(&stmt).await {
                    Ok(_) => {}
                    Err(e) if is_table_missing(&e) => {
                        self.create_tables(&tables).await?;
                        self.exec(&stmt).await?;
                    }
                    Err(e) => return Err(e),
                }
            }
            Ok(())
        })
    }

    fn current_count(&self) -> Pin<Box<dyn Future<Output = Result<u64, SinkError>> + Send + '_>> {
        Box::pin(async move {
            let resp = self.exec(&sql::count_rows(&self.cfg.database, &self.cfg.stable)).await?;
            first_count(&resp)
        })
    }
}
