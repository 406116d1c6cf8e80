//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Configuration for the HTTP transport and default paging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL that relative endpoints are resolved against.
    #[serde(default)]
    pub base_url: Option<String>,
    /// User agent sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Per-request timeout in seconds. `None` waits indefinitely.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Default page size for searches.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_user_agent() -> String {
    format!("archivehunter-search/{}", env!("CARGO_PKG_VERSION"))
}

fn default_page_size() -> u32 {
    20
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            user_agent: default_user_agent(),
            timeout_secs: None,
            page_size: default_page_size(),
        }
    }
}

impl ClientConfig {
    /// Parses a configuration from JSON, filling in defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Sets the base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Sets the user agent.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Sets the request timeout in seconds.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Sets the default page size.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Request timeout as a duration.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}
