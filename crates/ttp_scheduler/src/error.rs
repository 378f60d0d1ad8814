/// Custom error type for appointment source operations
#[derive(thiserror::Error, Debug)]
pub enum SourceError {
    /// Request could not be sent or the server answered with an error status
    #[error("HTTP error: {0}")]
    Http(String),

    /// Rate limited by the scheduler API
    #[error("Rate limited by scheduler API")]
    RateLimited,

    /// Unknown location
    #[error("Location not found")]
    NotFound,

    /// Body was not the expected JSON array
    #[error("Failed to decode scheduler response: {0}")]
    Decode(#[from] serde_json::Error),
}
