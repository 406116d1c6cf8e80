//! Execution of a single paginated search.
//!
//! A [`PageFetcher`] walks one query page by page, handing each page to its
//! [`SearchHandler`] and stopping on an empty page, an error, a voluntary
//! stop from the handler, or a cancellation.
//!
//! `start` and `fetch_next_page` do their bookkeeping eagerly: by the time
//! they return, the request for the page is considered outstanding and a
//! concurrent [`PageFetcher::cancel`] will wait for it. The returned future
//! performs the I/O and must be awaited or spawned.

use std::fmt;
use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::transport::{PageRequest, Transport};
use crate::{Result, SearchHandler, SearchPage, SearchQuery};

/// Lifecycle of a fetcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPhase {
    /// Created, nothing requested yet.
    Idle,
    /// A page request is outstanding or its page is being handled.
    Fetching,
    /// The handler declined more pages; `fetch_next_page` resumes.
    Paused,
    /// The server returned an empty page, or the item limit was reached.
    Completed,
    /// A cancellation was observed.
    Cancelled,
    /// A request failed.
    Errored,
}

impl FetchPhase {
    /// True for phases no request can follow without a restart.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            FetchPhase::Completed | FetchPhase::Cancelled | FetchPhase::Errored
        )
    }
}

/// Everything a fetcher needs besides its transport.
pub struct FetcherConfig {
    /// Opaque id passed back to every callback.
    pub search_id: String,
    /// The query to page through.
    pub query: SearchQuery,
    /// Receives pages and the terminal outcome.
    pub handler: Arc<dyn SearchHandler>,
}

struct FetchState {
    cursor: u64,
    in_progress: bool,
    cancel_requested: bool,
    resume_requested: bool,
    cancel_reason: Option<String>,
    pending_acks: Vec<oneshot::Sender<()>>,
    phase: FetchPhase,
}

struct Inner {
    search_id: String,
    query: SearchQuery,
    handler: Arc<dyn SearchHandler>,
    transport: Arc<dyn Transport>,
    token: CancellationToken,
    state: Mutex<FetchState>,
}

/// What to do after the bookkeeping of one step.
enum Step {
    Dispatch(PageRequest),
    Cancelled(Vec<oneshot::Sender<()>>),
    Completed,
    Stop,
}

/// Runs one paginated query. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct PageFetcher {
    inner: Arc<Inner>,
}

impl PageFetcher {
    /// Creates an idle fetcher.
    pub fn new(config: FetcherConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(Inner {
                search_id: config.search_id,
                query: config.query,
                handler: config.handler,
                transport,
                token: CancellationToken::new(),
                state: Mutex::new(FetchState {
                    cursor: 0,
                    in_progress: false,
                    cancel_requested: false,
                    resume_requested: false,
                    cancel_reason: None,
                    pending_acks: Vec::new(),
                    phase: FetchPhase::Idle,
                }),
            }),
        }
    }

    /// The id passed to every callback.
    pub fn search_id(&self) -> &str {
        &self.inner.search_id
    }

    /// The query being paged through.
    pub fn query(&self) -> &SearchQuery {
        &self.inner.query
    }

    /// Offset of the next page to request.
    pub fn cursor(&self) -> u64 {
        self.inner.state.lock().cursor
    }

    /// True while a request is outstanding or its page is being handled.
    pub fn is_in_progress(&self) -> bool {
        self.inner.state.lock().in_progress
    }

    /// The last observed phase.
    pub fn phase(&self) -> FetchPhase {
        self.inner.state.lock().phase
    }

    /// Resets the cursor to 0 and requests the first page.
    ///
    /// Ignored while a request is outstanding and after a cancellation.
    pub fn start(&self) -> BoxFuture<'static, ()> {
        self.run(true)
    }

    /// Requests the page at the current cursor, then keeps paging while the
    /// handler asks for more.
    ///
    /// While a request is outstanding the call is queued: if the handler then
    /// declines the page, the next page is requested anyway. Ignored in
    /// terminal phases.
    pub fn fetch_next_page(&self) -> BoxFuture<'static, ()> {
        self.run(false)
    }

    /// Cancels the outstanding request, if any.
    ///
    /// The returned future resolves once the cancellation has been observed
    /// and `on_cancelled` has run. With nothing outstanding it resolves
    /// immediately and no callback fires.
    pub fn cancel(&self, reason: &str) -> BoxFuture<'static, ()> {
        let mut state = self.inner.state.lock();
        if !state.in_progress {
            debug!("Search {}: nothing to cancel", self.inner.search_id);
            return future::ready(()).boxed();
        }

        let (tx, rx) = oneshot::channel();
        state.cancel_requested = true;
        state.cancel_reason.get_or_insert_with(|| reason.to_string());
        state.pending_acks.push(tx);
        drop(state);

        debug!("Search {}: cancelling ({})", self.inner.search_id, reason);
        self.inner.token.cancel();
        async move {
            // A dropped sender means the fetcher is gone; nothing left to wait for.
            let _ = rx.await;
        }
        .boxed()
    }

    fn run(&self, restart: bool) -> BoxFuture<'static, ()> {
        match self.step(self.begin(restart)) {
            Some(request) => {
                let fetcher = self.clone();
                async move { fetcher.drive(request).await }.boxed()
            }
            None => future::ready(()).boxed(),
        }
    }

    async fn drive(self, mut request: PageRequest) {
        loop {
            let outcome = self
                .inner
                .transport
                .send(request, self.inner.token.clone())
                .await;
            let next = self.settle(outcome);
            match self.step(next) {
                Some(next_request) => request = next_request,
                None => return,
            }
        }
    }

    /// Entry bookkeeping for `start` and `fetch_next_page`.
    fn begin(&self, restart: bool) -> Step {
        let mut state = self.inner.state.lock();
        if state.in_progress {
            if restart {
                warn!(
                    "Search {}: a request is already outstanding",
                    self.inner.search_id
                );
            } else {
                debug!(
                    "Search {}: request outstanding, next page queued",
                    self.inner.search_id
                );
                state.resume_requested = true;
            }
            return Step::Stop;
        }
        if restart {
            if state.phase == FetchPhase::Cancelled {
                warn!("Search {}: cannot restart after cancellation", self.inner.search_id);
                return Step::Stop;
            }
            state.cursor = 0;
        } else if state.phase.is_terminal() {
            warn!(
                "Search {}: already finished ({:?})",
                self.inner.search_id, state.phase
            );
            return Step::Stop;
        }
        self.dispatch(&mut state)
    }

    fn dispatch(&self, state: &mut FetchState) -> Step {
        if self.inner.query.exceeds_limit(state.cursor) {
            debug!(
                "Search {}: item limit reached at {}",
                self.inner.search_id, state.cursor
            );
            state.in_progress = false;
            state.phase = FetchPhase::Completed;
            return Step::Completed;
        }
        state.in_progress = true;
        state.phase = FetchPhase::Fetching;
        debug!(
            "Search {}: requesting page at {}",
            self.inner.search_id, state.cursor
        );
        Step::Dispatch(self.inner.query.page_request(state.cursor))
    }

    fn cancelled(&self, state: &mut FetchState) -> Step {
        debug!(
            "Search {}: cancellation observed ({})",
            self.inner.search_id,
            state.cancel_reason.take().unwrap_or_default()
        );
        state.in_progress = false;
        state.cancel_requested = false;
        state.resume_requested = false;
        state.phase = FetchPhase::Cancelled;
        Step::Cancelled(std::mem::take(&mut state.pending_acks))
    }

    /// Handles the outcome of one request. Callbacks run without the lock held.
    fn settle(&self, outcome: Result<SearchPage>) -> Step {
        let mut state = self.inner.state.lock();
        // A latched cancellation wins over whatever the request produced.
        if state.cancel_requested {
            return self.cancelled(&mut state);
        }

        match outcome {
            Ok(page) if page.is_empty() => {
                state.in_progress = false;
                state.resume_requested = false;
                state.phase = FetchPhase::Completed;
                Step::Completed
            }
            Ok(page) => {
                drop(state);
                debug!(
                    "Search {}: received {} entries",
                    self.inner.search_id,
                    page.len()
                );
                let more = self.inner.handler.on_page(&page, &self.inner.search_id);

                let mut state = self.inner.state.lock();
                state.cursor += u64::from(self.inner.query.page_size);
                if state.cancel_requested {
                    return self.cancelled(&mut state);
                }
                // A resume queued while the page was handled counts as "more".
                let queued = std::mem::take(&mut state.resume_requested);
                if more || queued {
                    return self.dispatch(&mut state);
                }
                state.in_progress = false;
                state.phase = FetchPhase::Paused;
                Step::Stop
            }
            Err(err) if err.is_cancelled() => self.cancelled(&mut state),
            Err(err) => {
                state.in_progress = false;
                state.resume_requested = false;
                state.phase = FetchPhase::Errored;
                drop(state);
                self.inner.handler.on_error(&err, &self.inner.search_id);
                Step::Stop
            }
        }
    }

    /// Fires the callbacks a step implies; returns the next request, if any.
    fn step(&self, step: Step) -> Option<PageRequest> {
        match step {
            Step::Dispatch(request) => Some(request),
            Step::Cancelled(acks) => {
                self.inner.handler.on_cancelled(&self.inner.search_id);
                for ack in acks {
                    let _ = ack.send(());
                }
                None
            }
            Step::Completed => {
                self.inner.handler.on_completed(&self.inner.search_id);
                None
            }
            Step::Stop => None,
        }
    }
}

impl fmt::Debug for PageFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("PageFetcher")
            .field("search_id", &self.inner.search_id)
            .field("cursor", &state.cursor)
            .field("in_progress", &state.in_progress)
            .field("phase", &state.phase)
            .finish()
    }
}
