use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("catalog error: {0}")]
    Catalog(#[from] memoscope_catalog::CatalogError),

    #[error("gateway error: {0}")]
    Gateway(#[from] memoscope_gateway::GatewayError),

    #[error("capture error: {0}")]
    Capture(#[from] memoscope_capture::CaptureError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("watcher error: {0}")]
    Watch(#[from] notify::Error),
}

pub type Result<T> = std::result::Result<T, IngestError>;
