//! Callbacks driven by a running search.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

use crate::{SearchError, SearchPage};

/// Receives the outcome of each page request of a search.
///
/// Exactly one of `on_completed`, `on_cancelled` or `on_error` ends a search,
/// unless `on_page` returns `false` first. Callbacks are never invoked while
/// the fetcher holds its internal lock, so they may call back into it.
pub trait SearchHandler: Send + Sync {
    /// Called once per non-empty page. Return `true` to request the next page.
    fn on_page(&self, page: &SearchPage, search_id: &str) -> bool;

    /// Called when the server returns an empty page.
    fn on_completed(&self, search_id: &str) {
        debug!("Search {} completed", search_id);
    }

    /// Called when an in-flight request was aborted by cancellation.
    fn on_cancelled(&self, search_id: &str) {
        debug!("Search {} cancelled", search_id);
    }

    /// Called when a request fails for any reason other than cancellation.
    fn on_error(&self, error: &SearchError, search_id: &str) {
        warn!("Search {} failed: {}", search_id, error);
    }
}

type PageFn = Box<dyn Fn(&SearchPage, &str) -> bool + Send + Sync>;
type IdFn = Box<dyn Fn(&str) + Send + Sync>;
type ErrorFn = Box<dyn Fn(&SearchError, &str) + Send + Sync>;

/// A handler built from closures. Unset callbacks fall back to logging.
pub struct FnHandler {
    on_page: PageFn,
    on_completed: Option<IdFn>,
    on_cancelled: Option<IdFn>,
    on_error: Option<ErrorFn>,
}

impl FnHandler {
    /// Creates a handler with the given page callback.
    pub fn new<F>(on_page: F) -> Self
    where
        F: Fn(&SearchPage, &str) -> bool + Send + Sync + 'static,
    {
        Self {
            on_page: Box::new(on_page),
            on_completed: None,
            on_cancelled: None,
            on_error: None,
        }
    }

    /// Sets the completion callback.
    pub fn with_on_completed<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_completed = Some(Box::new(f));
        self
    }

    /// Sets the cancellation callback.
    pub fn with_on_cancelled<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_cancelled = Some(Box::new(f));
        self
    }

    /// Sets the error callback.
    pub fn with_on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&SearchError, &str) + Send + Sync + 'static,
    {
        self.on_error = Some(Box::new(f));
        self
    }
}

impl SearchHandler for FnHandler {
    fn on_page(&self, page: &SearchPage, search_id: &str) -> bool {
        (self.on_page)(page, search_id)
    }

    fn on_completed(&self, search_id: &str) {
        match &self.on_completed {
            Some(f) => f(search_id),
            None => debug!("Search {} completed", search_id),
        }
    }

    fn on_cancelled(&self, search_id: &str) {
        match &self.on_cancelled {
            Some(f) => f(search_id),
            None => debug!("Search {} cancelled", search_id),
        }
    }

    fn on_error(&self, error: &SearchError, search_id: &str) {
        match &self.on_error {
            Some(f) => f(error, search_id),
            None => warn!("Search {} failed: {}", search_id, error),
        }
    }
}

/// Event forwarded by a [`ChannelHandler`].
#[derive(Debug, Clone, PartialEq)]
pub enum SearchEvent {
    /// A non-empty page arrived.
    Page { search_id: String, page: SearchPage },
    /// The server returned an empty page.
    Completed { search_id: String },
    /// The search was cancelled.
    Cancelled { search_id: String },
    /// The search failed.
    Error { search_id: String, message: String },
}

impl SearchEvent {
    /// The id of the search this event belongs to.
    pub fn search_id(&self) -> &str {
        match self {
            SearchEvent::Page { search_id, .. }
            | SearchEvent::Completed { search_id }
            | SearchEvent::Cancelled { search_id }
            | SearchEvent::Error { search_id, .. } => search_id,
        }
    }

    /// True for events that end a search.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SearchEvent::Page { .. })
    }
}

#[derive(Debug, Default)]
struct LoadCounters {
    received: AtomicUsize,
    target: AtomicUsize,
}

/// Shared view of how many entries a [`ChannelHandler`] wants and has seen.
#[derive(Debug, Clone, Default)]
pub struct LoadTarget {
    counters: Arc<LoadCounters>,
}

impl LoadTarget {
    /// Creates a load target wanting `target` entries.
    pub fn new(target: usize) -> Self {
        let load = Self::default();
        load.counters.target.store(target, Ordering::SeqCst);
        load
    }

    /// Asks for `additional` more entries.
    ///
    /// Paging does not restart by itself; follow with
    /// [`SearchSession::resume_current_search`](crate::SearchSession::resume_current_search).
    pub fn raise(&self, additional: usize) -> usize {
        self.counters.target.fetch_add(additional, Ordering::SeqCst) + additional
    }

    /// Number of entries wanted.
    pub fn target(&self) -> usize {
        self.counters.target.load(Ordering::SeqCst)
    }

    /// Number of entries received so far.
    pub fn received(&self) -> usize {
        self.counters.received.load(Ordering::SeqCst)
    }

    fn record(&self, entries: usize) -> usize {
        self.counters.received.fetch_add(entries, Ordering::SeqCst) + entries
    }
}

/// A handler that forwards every callback as a [`SearchEvent`] over a channel
/// and keeps paging until the load target is reached.
pub struct ChannelHandler {
    tx: UnboundedSender<SearchEvent>,
    load: LoadTarget,
}

impl ChannelHandler {
    /// Creates a handler that pages until `target` entries have been received.
    pub fn new(target: usize) -> (Self, UnboundedReceiver<SearchEvent>) {
        Self::with_load_target(LoadTarget::new(target))
    }

    /// Creates a handler sharing an existing load target.
    pub fn with_load_target(load: LoadTarget) -> (Self, UnboundedReceiver<SearchEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, load }, rx)
    }

    /// Handle for raising the target from outside the search.
    pub fn load_target(&self) -> LoadTarget {
        self.load.clone()
    }

    fn forward(&self, event: SearchEvent) -> bool {
        if self.tx.send(event).is_err() {
            debug!("Event receiver dropped");
            return false;
        }
        true
    }
}

impl SearchHandler for ChannelHandler {
    fn on_page(&self, page: &SearchPage, search_id: &str) -> bool {
        let received = self.load.record(page.len());
        let delivered = self.forward(SearchEvent::Page {
            search_id: search_id.to_string(),
            page: page.clone(),
        });
        delivered && received < self.load.target()
    }

    fn on_completed(&self, search_id: &str) {
        self.forward(SearchEvent::Completed {
            search_id: search_id.to_string(),
        });
    }

    fn on_cancelled(&self, search_id: &str) {
        self.forward(SearchEvent::Cancelled {
            search_id: search_id.to_string(),
        });
    }

    fn on_error(&self, error: &SearchError, search_id: &str) {
        self.forward(SearchEvent::Error {
            search_id: search_id.to_string(),
            message: error.to_string(),
        });
    }
}
