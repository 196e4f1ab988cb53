use std::time::Duration;

use ingest_api::SinkError;

/// TDengine REST connection and target settings.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TdengineConfig {
    pub host: String,
    /// REST port of taosAdapter.
    pub port: u16,
    pub user: String,
    pub password: String,
    pub tls: bool,
    pub database: String,
    /// Super table every sub-table is created from.
    pub stable: String,
    /// Upper bound for one SQL statement, in bytes.
    pub max_sql_len: usize,
    /// Extra attempts for a request that failed on transport.
    pub retries: u32,
    pub retry_backoff_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for TdengineConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 6041,
            user: "root".into(),
            password: "taosdata".into(),
            tls: false,
            database: "test".into(),
            stable: "meters".into(),
            max_sql_len: 1_048_576,
            retries: 3,
            retry_backoff_ms: 200,
            request_timeout_ms: 30_000,
        }
    }
}

impl TdengineConfig {
    /// Overrides host and port from a `host:port` endpoint. The port is
    /// optional and keeps its current value when omitted.
    pub fn set_endpoint(&mut self, ep: &str) -> Result<(), SinkError> {
        let (host, port) = parse_endpoint(ep, self.port)?;
        self.host = host;
        self.port = port;
        Ok(())
    }

    pub fn sql_url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{scheme}://{}:{}/rest/sql", self.host, self.port)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), SinkError> {
        if self.host.is_empty() {
            return Err(SinkError::config("tdengine host is empty"));
        }
        for (what, name) in [("database", &self.database), ("stable", &self.stable)] {
            if !crate::sql::is_identifier(name) {
                return Err(SinkError::config(format!("invalid {what} name '{name}'")));
            }
        }
        if self.max_sql_len < 1024 {
            return Err(SinkError::config(format!("max_sql_len {} is too small", self.max_sql_len)));
        }
        Ok(())
    }
}

/// Splits `host[:port]`.
pub fn parse_endpoint(ep: &str, default_port: u16) -> Result<(String, u16), SinkError> {
    let ep = ep.trim();
    let (host, port) = match ep.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|e| SinkError::config(format!("endpoint '{ep}': bad port: {e}")))?;
            (host, port)
        }
        None => (ep, default_port),
    };
    if host.is_empty() {
        return Err(SinkError::config(format!("endpoint '{ep}': empty host")));
    }
    Ok((host.to_string(), port))
}
