//! Scripted transport and recording handler shared by unit tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::transport::{PageRequest, Transport};
use crate::{Result, SearchError, SearchHandler, SearchPage};

/// What the scripted transport answers to the next request.
pub(crate) enum Reply {
    /// A page with this many entries.
    Entries(usize),
    /// A non-success status.
    Fail(u16),
    /// Never answers; only cancellation settles it.
    Hang,
    /// Answers with one entry once the notify fires, unless cancelled first.
    Gate(Arc<Notify>),
    /// Answers with one entry once the notify fires, ignoring cancellation.
    Late(Arc<Notify>),
}

#[derive(Default)]
pub(crate) struct ScriptedTransport {
    script: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<PageRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new(script: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn urls(&self) -> Vec<String> {
        self.requests.lock().iter().map(|r| r.url.clone()).collect()
    }

    pub(crate) fn requests(&self) -> Vec<PageRequest> {
        self.requests.lock().clone()
    }
}

pub(crate) fn page_of(n: usize) -> SearchPage {
    SearchPage::with_entries((0..n).map(|i| json!({ "id": i })).collect())
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: PageRequest, cancel: CancellationToken) -> Result<SearchPage> {
        self.requests.lock().push(request);
        let reply = self.script.lock().pop_front().unwrap_or(Reply::Entries(0));
        if let Reply::Late(gate) = reply {
            gate.notified().await;
            return Ok(page_of(1));
        }
        if cancel.is_cancelled() {
            return Err(SearchError::Cancelled("aborted".into()));
        }
        match reply {
            Reply::Entries(n) => Ok(page_of(n)),
            Reply::Fail(status) => Err(SearchError::Status {
                status,
                body: "kaboom".into(),
            }),
            Reply::Hang => {
                cancel.cancelled().await;
                Err(SearchError::Cancelled("aborted".into()))
            }
            Reply::Gate(gate) => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(SearchError::Cancelled("aborted".into())),
                    _ = gate.notified() => Ok(page_of(1)),
                }
            }
            Reply::Late(_) => unreachable!("answered above"),
        }
    }
}

/// Records every callback as a short string.
pub(crate) struct Recorder {
    events: Mutex<Vec<String>>,
    pages_wanted: Mutex<usize>,
    finished: Notify,
}

impl Recorder {
    /// Keeps asking for pages for as long as the server sends them.
    pub(crate) fn new() -> Arc<Self> {
        Self::stopping_after(usize::MAX)
    }

    /// Returns `false` from `on_page` once `pages` pages were seen.
    pub(crate) fn stopping_after(pages: usize) -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            pages_wanted: Mutex::new(pages),
            finished: Notify::new(),
        })
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub(crate) fn count(&self, prefix: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }

    /// Waits for a terminal callback, failing the test after a second.
    pub(crate) async fn wait_finished(&self) {
        tokio::time::timeout(Duration::from_secs(1), self.finished.notified())
            .await
            .expect("search did not finish");
    }

    fn push(&self, event: String) {
        self.events.lock().push(event);
    }
}

impl SearchHandler for Recorder {
    fn on_page(&self, page: &SearchPage, search_id: &str) -> bool {
        self.push(format!("page:{}:{}", search_id, page.len()));
        let mut wanted = self.pages_wanted.lock();
        *wanted = wanted.saturating_sub(1);
        let more = *wanted > 0;
        if !more {
            self.finished.notify_one();
        }
        more
    }

    fn on_completed(&self, search_id: &str) {
        self.push(format!("completed:{}", search_id));
        self.finished.notify_one();
    }

    fn on_cancelled(&self, search_id: &str) {
        self.push(format!("cancelled:{}", search_id));
        self.finished.notify_one();
    }

    fn on_error(&self, error: &SearchError, search_id: &str) {
        self.push(format!("error:{}:{}", search_id, error));
        self.finished.notify_one();
    }
}
