use ingest_api::SinkError;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("{0}")]
    Config(String),

    #[error("{0}")]
    Sink(#[from] SinkError),

    #[error("{0}")]
    Pipeline(#[from] pipeline::PipelineError),
}
