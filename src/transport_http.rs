//! HTTP transport using reqwest.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::config::ClientConfig;
use crate::transport::{PageRequest, Transport};
use crate::{Result, SearchError, SearchPage};

/// A transport that sends page requests over HTTP via reqwest.
///
/// Relative request URLs are resolved against the configured base URL.
/// Cancelling the token drops the in-flight request future, which aborts
/// the underlying connection.
pub struct HttpTransport {
    client: Client,
    base_url: Option<Url>,
}

impl HttpTransport {
    /// Creates a new `HttpTransport` with default settings and no base URL.
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: None,
        }
    }

    /// Creates an `HttpTransport` from a client configuration.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let mut builder = Client::builder().user_agent(config.user_agent.clone());
        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }
        let base_url = config.base_url.as_deref().map(Url::parse).transpose()?;
        Ok(Self {
            client: builder.build()?,
            base_url,
        })
    }

    /// Creates an `HttpTransport` with a custom reqwest client.
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            base_url: None,
        }
    }

    /// Sets the base URL relative request URLs are resolved against.
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self> {
        self.base_url = Some(Url::parse(base_url)?);
        Ok(self)
    }

    /// Resolves a request URL against the base URL, if any.
    pub fn resolve(&self, url: &str) -> Result<Url> {
        match &self.base_url {
            Some(base) => Ok(base.join(url)?),
            None => Ok(Url::parse(url)?),
        }
    }

    async fn execute(&self, url: Url, request: &PageRequest) -> Result<SearchPage> {
        let mut builder = self.client.request(request.method.clone(), url);
        if let Some(content_type) = &request.content_type {
            builder = builder.header(CONTENT_TYPE, content_type.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        SearchPage::from_slice(&bytes)
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: PageRequest, cancel: CancellationToken) -> Result<SearchPage> {
        let url = self.resolve(&request.url)?;
        debug!("{} {}", request.method, url);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SearchError::Cancelled("request aborted".into())),
            result = self.execute(url, &request) => result,
        }
    }
}
