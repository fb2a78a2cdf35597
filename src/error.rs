use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("GET {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("GET {url}: unexpected status {status}")]
    Status { url: String, status: u16 },
    #[error("GET {url}: connection pool closed")]
    PoolClosed { url: String },
}

impl FetchError {
    // Timeouts, connection errors and non-2xx statuses are all treated as transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Request { .. } | FetchError::Status { .. } => true,
            FetchError::PoolClosed { .. } => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("{url}: expected `{selector}` in page")]
    MissingContainer { url: String, selector: &'static str },
    #[error("invalid url {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

impl ExtractError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ExtractError::Fetch(err) => err.is_retryable(),
            ExtractError::MissingContainer { .. } | ExtractError::InvalidUrl { .. } => false,
        }
    }
}
