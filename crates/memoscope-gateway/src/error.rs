use thiserror::Error;

/// Typed failures surfaced by the Model Gateway (`4.B`, `7`: "Transport").
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("transport error calling {capability}: {source}")]
    Transport {
        capability: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("backend returned an unparsable response: {0}")]
    BadResponse(String),

    #[error("request was cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, GatewayError>;
