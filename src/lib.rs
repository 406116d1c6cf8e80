//! # archivehunter-search
//!
//! Paginated, cancellable search client for the ArchiveHunter media archive.
//!
//! A search is a query against an endpoint that answers pages of the form
//! `{"entries": [...]}`. This library provides:
//!
//! - [`PageFetcher`]: walks one query page by page (`size`/`start` paging)
//!   and reports each page, the end of results, a cancellation or an error to
//!   a [`SearchHandler`]
//! - [`SearchSession`]: keeps at most one search active, cancelling and
//!   awaiting the old one before starting its replacement
//! - [`HttpTransport`]: the reqwest-backed transport with transport-level
//!   cancellation
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use archivehunter_search::{
//!     ChannelHandler, HttpTransport, RequestBody, SearchEvent, SearchQuery, SearchSession,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let transport = HttpTransport::new().with_base_url("http://localhost:9000")?;
//!     let session = SearchSession::new(Arc::new(transport));
//!
//!     let query = SearchQuery::post("/api/search/browser", 20)
//!         .with_body(RequestBody::json(r#"{"collection":"archive"}"#));
//!     let (handler, mut events) = ChannelHandler::new(100);
//!     let load = handler.load_target();
//!     session.start_new_search(query, Arc::new(handler)).await?;
//!
//!     while let Some(event) = events.recv().await {
//!         if let SearchEvent::Page { page, .. } = &event {
//!             println!("{} entries", page.len());
//!         }
//!         if event.is_terminal() || load.received() >= load.target() {
//!             break;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

mod config;
mod error;
mod fetcher;
mod handler;
mod page;
mod query;
mod session;
mod transport;
mod transport_http;

#[cfg(test)]
mod testing;

pub use config::ClientConfig;
pub use error::{Result, SearchError};
pub use fetcher::{FetchPhase, FetcherConfig, PageFetcher};
pub use handler::{ChannelHandler, FnHandler, LoadTarget, SearchEvent, SearchHandler};
pub use page::SearchPage;
pub use query::{RequestBody, SearchQuery, SIZE_PARAM, START_PARAM};
pub use session::{SearchSession, NEW_SEARCH_REASON};
pub use transport::{PageRequest, Transport};
pub use transport_http::HttpTransport;
