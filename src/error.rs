//! Error types for the search client.

use thiserror::Error;

/// Result type alias for search operations.
pub type Result<T> = std::result::Result<T, SearchError>;

/// Errors that can occur while running a paginated search.
#[derive(Error, Debug)]
pub enum SearchError {
    /// The in-flight request was aborted through its cancellation token.
    #[error("Request cancelled: {0}")]
    Cancelled(String),

    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status.
    #[error("Server returned status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body text, possibly empty.
        body: String,
    },

    /// Failed to parse response.
    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// Invalid query.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// `resume` was requested with no search to resume.
    #[error("No active search to resume")]
    NoActiveSearch,

    /// URL parsing error.
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Generic error.
    #[error("{0}")]
    Other(String),
}

impl SearchError {
    /// Returns true when this failure was caused by a cancellation request
    /// rather than by the server or the network.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SearchError::Cancelled(_))
    }
}

impl From<serde_json::Error> for SearchError {
    fn from(err: serde_json::Error) -> Self {
        SearchError::Parse(err.to_string())
    }
}
