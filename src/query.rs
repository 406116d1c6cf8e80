//! Paginated search query representation.

use reqwest::Method;

use crate::transport::PageRequest;
use crate::{Result, SearchError};

/// Query-string key carrying the page size.
pub const SIZE_PARAM: &str = "size";
/// Query-string key carrying the offset of the first entry of a page.
pub const START_PARAM: &str = "start";

/// A request body sent verbatim with every page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestBody {
    /// Payload, sent as-is.
    pub data: String,
    /// Value of the `Content-Type` header, if any.
    pub content_type: Option<String>,
}

impl RequestBody {
    /// Creates a body with no content type.
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            content_type: None,
        }
    }

    /// Creates a JSON body.
    pub fn json(data: impl Into<String>) -> Self {
        Self::new(data).with_content_type("application/json")
    }

    /// Sets the content type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// A paginated search against a single endpoint.
///
/// The query is immutable once handed to a fetcher; only the fetcher's
/// cursor moves between pages.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    /// HTTP verb used for every page.
    pub method: Method,
    /// Target URL or path, without query string.
    pub endpoint: String,
    /// Extra query-string parameters, in order.
    pub query_params: Vec<(String, String)>,
    /// Optional request body.
    pub body: Option<RequestBody>,
    /// Entries requested per page.
    pub page_size: u32,
    /// Stop before requesting a page that would go past this many entries.
    pub item_limit: Option<u64>,
}

impl SearchQuery {
    /// Creates a query with the given method, endpoint and page size.
    pub fn new(method: Method, endpoint: impl Into<String>, page_size: u32) -> Self {
        Self {
            method,
            endpoint: endpoint.into(),
            query_params: Vec::new(),
            body: None,
            page_size,
            item_limit: None,
        }
    }

    /// Shorthand for a GET query.
    pub fn get(endpoint: impl Into<String>, page_size: u32) -> Self {
        Self::new(Method::GET, endpoint, page_size)
    }

    /// Shorthand for a POST query.
    pub fn post(endpoint: impl Into<String>, page_size: u32) -> Self {
        Self::new(Method::POST, endpoint, page_size)
    }

    /// Appends a query-string parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.push((key.into(), value.into()));
        self
    }

    /// Replaces all query-string parameters.
    pub fn with_params<K, V>(mut self, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.query_params = params
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    /// Sets the request body.
    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = Some(body);
        self
    }

    /// Sets the item limit.
    pub fn with_item_limit(mut self, limit: u64) -> Self {
        self.item_limit = Some(limit);
        self
    }

    /// Checks that the query can be executed.
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(SearchError::InvalidQuery(
                "page size must be positive".into(),
            ));
        }
        if self.endpoint.trim().is_empty() {
            return Err(SearchError::InvalidQuery("endpoint cannot be empty".into()));
        }
        Ok(())
    }

    /// Returns true if a page starting at `cursor` would go past the item limit.
    pub fn exceeds_limit(&self, cursor: u64) -> bool {
        match self.item_limit {
            Some(limit) => cursor + u64::from(self.page_size) > limit,
            None => false,
        }
    }

    /// Query-string parameters for the page starting at `cursor`.
    ///
    /// Caller parameters are merged over `size` and `start`: a caller key
    /// with the same name replaces the value but keeps its position.
    pub fn page_params(&self, cursor: u64) -> Vec<(String, String)> {
        let mut params = vec![
            (SIZE_PARAM.to_string(), self.page_size.to_string()),
            (START_PARAM.to_string(), cursor.to_string()),
        ];
        for (key, value) in &self.query_params {
            match params.iter_mut().find(|(k, _)| k == key) {
                Some(existing) => existing.1 = value.clone(),
                None => params.push((key.clone(), value.clone())),
            }
        }
        params
    }

    /// Full URL (endpoint plus encoded query string) for the page at `cursor`.
    pub fn page_url(&self, cursor: u64) -> String {
        let query_string = self
            .page_params(cursor)
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{}", self.endpoint, query_string)
    }

    /// Builds the transport request for the page at `cursor`.
    pub fn page_request(&self, cursor: u64) -> PageRequest {
        PageRequest {
            method: self.method.clone(),
            url: self.page_url(cursor),
            body: self.body.as_ref().map(|b| b.data.clone()),
            content_type: self.body.as_ref().and_then(|b| b.content_type.clone()),
        }
    }
}
