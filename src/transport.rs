//! Transport abstraction for issuing page requests.

use async_trait::async_trait;
use reqwest::Method;
use tokio_util::sync::CancellationToken;

use crate::{Result, SearchPage};

/// One page request, fully resolved from a query and a cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// HTTP verb.
    pub method: Method,
    /// Endpoint plus query string. May be relative to the transport's base URL.
    pub url: String,
    /// Request body, sent verbatim.
    pub body: Option<String>,
    /// `Content-Type` header value.
    pub content_type: Option<String>,
}

/// Trait for sending page requests to the search endpoint.
///
/// Implementations must abort the request once `cancel` fires and report
/// the abort as [`SearchError::Cancelled`](crate::SearchError::Cancelled),
/// so the fetcher can tell it apart from server or network failures.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends the request and decodes the response as a page.
    async fn send(&self, request: PageRequest, cancel: CancellationToken) -> Result<SearchPage>;
}
