use thiserror::Error;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("catalog error: {0}")]
    Catalog(#[from] memoscope_catalog::CatalogError),

    #[error("gateway error: {0}")]
    Gateway(#[from] memoscope_gateway::GatewayError),
}

pub type Result<T> = std::result::Result<T, SearchError>;
