//! TDengine sink for meter records, talking to taosAdapter's REST
//! endpoint.

pub mod config;
pub mod sink;
pub mod sql;

pub use config::TdengineConfig;
pub use sink::TdengineSink;
