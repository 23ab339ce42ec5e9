use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("display capture failed: {0}")]
    Capture(String),

    #[error("image encode/decode error: {0}")]
    Image(#[from] image::ImageError),

    #[error("sidecar i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sidecar json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CaptureError>;
