/// Category of a sink error. Lets the pipeline and the sink's own retry
/// loop decide between retrying, skipping and failing the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid configuration. Permanent, fail at startup.
    Config,
    /// I/O or network error. Transient, may be retried.
    Io,
    /// Data format/parse error: bad input line.
    Format,
    /// The store rejected the request (SQL error, missing table, ...).
    Rejected,
    /// Logical error (invalid state, generic).
    Logic,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Config => f.write_str("config"),
            ErrorKind::Io => f.write_str("io"),
            ErrorKind::Format => f.write_str("format"),
            ErrorKind::Rejected => f.write_str("rejected"),
            ErrorKind::Logic => f.write_str("logic"),
        }
    }
}

/// Unified error type for all `Sink` methods.
///
/// Carries an `ErrorKind` for categorization, an optional store-specific
/// error code and a human-readable message. `From` impls assign the
/// appropriate kind automatically and allow ergonomic `?` in sink
/// implementations.
#[derive(Clone)]
pub struct SinkError {
    kind: ErrorKind,
    code: Option<i32>,
    message: String,
}

impl SinkError {
    /// Generic logic error (default kind).
    pub fn new(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Logic, code: None, message: msg.into() }
    }

    /// Configuration error, permanent.
    pub fn config(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Config, code: None, message: msg.into() }
    }

    /// I/O error, transient.
    pub fn io(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Io, code: None, message: msg.into() }
    }

    /// Format/parse error.
    pub fn format_err(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Format, code: None, message: msg.into() }
    }

    /// Request rejected by the store with its own error code.
    pub fn rejected(code: i32, msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Rejected, code: Some(code), message: msg.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> Option<i32> {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Transient errors are worth another attempt by the sink itself.
    pub fn is_transient(&self) -> bool {
        self.kind == ErrorKind::Io
    }

    /// Add context to the error, preserving kind and code.
    pub fn with_context(self, ctx: impl std::fmt::Display) -> Self {
        Self {
            kind: self.kind,
            code: self.code,
            message: format!("{ctx}: {}", self.message),
        }
    }
}

impl std::fmt::Debug for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "[{}:{code:#x}] {}", self.kind, self.message),
            None => write!(f, "[{}] {}", self.kind, self.message),
        }
    }
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for SinkError {}

impl From<String> for SinkError {
    fn from(s: String) -> Self { Self::new(s) }
}

impl From<&str> for SinkError {
    fn from(s: &str) -> Self { Self::new(s) }
}

impl From<std::io::Error> for SinkError {
    fn from(e: std::io::Error) -> Self { Self::io(e.to_string()) }
}

impl From<serde_json::Error> for SinkError {
    fn from(e: serde_json::Error) -> Self { Self::format_err(e.to_string()) }
}

impl From<std::num::ParseIntError> for SinkError {
    fn from(e: std::num::ParseIntError) -> Self { Self::format_err(e.to_string()) }
}

impl From<std::num::ParseFloatError> for SinkError {
    fn from(e: std::num::ParseFloatError) -> Self { Self::format_err(e.to_string()) }
}
