use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("unsupported export layout: missing column(s) {}", .missing.join(", "))]
    UnsupportedSchema { missing: Vec<String> },
    #[error("export has no header row")]
    MissingHeader,
    #[error("failed to read export: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{url} request failed: {message}")]
    Request { url: String, message: String },
    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },
    #[error("{url} returned an unreadable body: {message}")]
    Decode { url: String, message: String },
    #[error("chunk {symbol} [{start_ms}, {end_ms}) failed on primary ({primary}) and fallback ({fallback})")]
    ChunkFailed {
        symbol: String,
        start_ms: i64,
        end_ms: i64,
        primary: Box<FetchError>,
        fallback: Box<FetchError>,
    },
}
