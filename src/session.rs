//! Search session: at most one active search at a time.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::fetcher::{FetcherConfig, PageFetcher};
use crate::transport::Transport;
use crate::{Result, SearchError, SearchHandler, SearchQuery};

/// Reason given to a search that is replaced by a new one.
pub const NEW_SEARCH_REASON: &str = "new search terms";

/// Serializes searches so that only one is ever delivering pages.
///
/// Starting a new search cancels the active one and waits until its
/// cancellation has been observed before the next search sends its first
/// request, so stale pages never reach a handler after its replacement has
/// started. Must be used from within a tokio runtime.
pub struct SearchSession {
    transport: Arc<dyn Transport>,
    active: Mutex<Option<PageFetcher>>,
}

impl SearchSession {
    /// Creates a session sending requests through `transport`.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            active: Mutex::new(None),
        }
    }

    /// Generates a fresh search identifier.
    pub fn generate_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Starts a new search, replacing the active one.
    ///
    /// Returns the new search's id once its first request has been issued.
    /// The search then drives itself through `handler`.
    pub async fn start_new_search(
        &self,
        query: SearchQuery,
        handler: Arc<dyn SearchHandler>,
    ) -> Result<String> {
        query.validate()?;
        let search_id = Self::generate_id();

        // Held across the cancellation wait so concurrent calls queue up.
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            info!("Replacing search {}", previous.search_id());
            previous.cancel(NEW_SEARCH_REASON).await;
        }

        let fetcher = PageFetcher::new(
            FetcherConfig {
                search_id: search_id.clone(),
                query,
                handler,
            },
            Arc::clone(&self.transport),
        );
        let task = fetcher.start();
        *active = Some(fetcher);
        tokio::spawn(task);

        info!("Started search {}", search_id);
        Ok(search_id)
    }

    /// Requests the next page of the active search.
    ///
    /// Returns [`SearchError::NoActiveSearch`] if no search was ever started
    /// or the last one was stopped.
    pub async fn resume_current_search(&self) -> Result<()> {
        let active = self.active.lock().await;
        match active.as_ref() {
            Some(fetcher) => {
                tokio::spawn(fetcher.fetch_next_page());
                Ok(())
            }
            None => {
                warn!("Cannot resume, no search is active");
                Err(SearchError::NoActiveSearch)
            }
        }
    }

    /// Cancels the active search without starting another one.
    ///
    /// Returns `false` if there was no active search.
    pub async fn stop_current_search(&self, reason: &str) -> bool {
        let mut active = self.active.lock().await;
        match active.take() {
            Some(fetcher) => {
                info!("Stopping search {}", fetcher.search_id());
                fetcher.cancel(reason).await;
                true
            }
            None => false,
        }
    }

    /// Id of the active search, if any.
    pub async fn current_search_id(&self) -> Option<String> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|f| f.search_id().to_string())
    }

    /// Handle to the active fetcher, if any.
    pub async fn current_fetcher(&self) -> Option<PageFetcher> {
        self.active.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::FetchPhase;
    use crate::testing::{Recorder, Reply, ScriptedTransport};
    use crate::{ChannelHandler, SearchEvent, SearchPage};
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_generate_id_is_uuid_v4() {
        let id = SearchSession::generate_id();
        let parsed = Uuid::parse_str(&id).unwrap();
        assert_eq!(parsed.get_version_num(), 4);
        assert_eq!(id.len(), 36);
        assert_ne!(id, SearchSession::generate_id());
    }

    #[tokio::test]
    async fn test_start_new_search_returns_id_and_runs() {
        let transport = ScriptedTransport::new(vec![Reply::Entries(2), Reply::Entries(0)]);
        let session = SearchSession::new(transport.clone());
        let recorder = Recorder::new();

        assert!(session.current_search_id().await.is_none());
        let id = assert_ok!(
            session
                .start_new_search(SearchQuery::get("/path/to/url", 100), recorder.clone())
                .await
        );
        assert_eq!(session.current_search_id().await, Some(id.clone()));

        recorder.wait_finished().await;
        assert_eq!(
            recorder.events(),
            vec![format!("page:{}:2", id), format!("completed:{}", id)]
        );
        assert_eq!(transport.urls()[0], "/path/to/url?size=100&start=0");
    }

    #[tokio::test]
    async fn test_new_search_cancels_previous_first() {
        let transport = ScriptedTransport::new(vec![Reply::Hang, Reply::Entries(0)]);
        let session = SearchSession::new(transport.clone());
        let first = Recorder::new();
        let second = Recorder::new();

        let first_id = session
            .start_new_search(SearchQuery::get("/a", 10), first.clone())
            .await
            .unwrap();
        let second_id = session
            .start_new_search(SearchQuery::get("/b", 10), second.clone())
            .await
            .unwrap();

        // The first search was fully cancelled before the second id came back.
        assert_eq!(first.events(), vec![format!("cancelled:{}", first_id)]);
        assert_eq!(session.current_search_id().await, Some(second_id.clone()));

        second.wait_finished().await;
        assert_eq!(second.events(), vec![format!("completed:{}", second_id)]);
        assert_eq!(first.count("cancelled"), 1);
        assert_eq!(first.events().len(), 1);
        assert_eq!(transport.urls(), vec!["/a?size=10&start=0", "/b?size=10&start=0"]);
    }

    #[tokio::test]
    async fn test_new_search_after_finished_search() {
        let transport = ScriptedTransport::new(vec![Reply::Entries(0), Reply::Entries(0)]);
        let session = SearchSession::new(transport.clone());
        let first = Recorder::new();
        let second = Recorder::new();

        session
            .start_new_search(SearchQuery::get("/a", 10), first.clone())
            .await
            .unwrap();
        first.wait_finished().await;
        session
            .start_new_search(SearchQuery::get("/b", 10), second.clone())
            .await
            .unwrap();
        second.wait_finished().await;

        assert_eq!(first.count("cancelled"), 0);
        assert_eq!(first.count("completed"), 1);
        assert_eq!(second.count("completed"), 1);
    }

    #[tokio::test]
    async fn test_resume_without_search_is_error() {
        let session = SearchSession::new(ScriptedTransport::new(vec![]));
        let err = assert_err!(session.resume_current_search().await);
        assert!(matches!(err, SearchError::NoActiveSearch));
    }

    #[tokio::test]
    async fn test_resume_fetches_next_page() {
        let transport = ScriptedTransport::new(vec![
            Reply::Entries(10),
            Reply::Entries(10),
            Reply::Entries(0),
        ]);
        let session = SearchSession::new(transport.clone());
        let recorder = Recorder::stopping_after(1);

        session
            .start_new_search(SearchQuery::get("/s", 10), recorder.clone())
            .await
            .unwrap();
        recorder.wait_finished().await;
        let fetcher = session.current_fetcher().await.unwrap();

        assert_ok!(session.resume_current_search().await);
        recorder.wait_finished().await;
        assert_ok!(session.resume_current_search().await);
        recorder.wait_finished().await;

        assert_eq!(
            transport.urls(),
            vec!["/s?size=10&start=0", "/s?size=10&start=10", "/s?size=10&start=20"]
        );
        assert_eq!(recorder.count("completed"), 1);
        assert_eq!(fetcher.phase(), FetchPhase::Completed);
    }

    /// Forwards pages, then lingers in the callback before answering.
    struct SlowPages(ChannelHandler);

    impl SearchHandler for SlowPages {
        fn on_page(&self, page: &SearchPage, search_id: &str) -> bool {
            let more = self.0.on_page(page, search_id);
            std::thread::sleep(Duration::from_millis(5));
            more
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_load_more_during_page_delivery_is_not_lost() {
        let transport = ScriptedTransport::new((0..12).map(|_| Reply::Entries(1)).collect());
        let session = SearchSession::new(transport.clone());
        let (handler, mut rx) = ChannelHandler::new(1);
        let load = handler.load_target();

        session
            .start_new_search(SearchQuery::get("/s", 1), Arc::new(SlowPages(handler)))
            .await
            .unwrap();

        for round in 0..10 {
            let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap_or_else(|_| panic!("no page after load more, round {}", round))
                .expect("event channel closed");
            assert!(matches!(event, SearchEvent::Page { .. }));
            // Reacting straight away lands inside the page callback.
            load.raise(1);
            assert_ok!(session.resume_current_search().await);
        }

        let last = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("last load more was lost")
            .expect("event channel closed");
        assert!(matches!(last, SearchEvent::Page { .. }));
        assert_eq!(transport.urls().len(), 11);
        assert_eq!(load.received(), 11);
    }

    #[tokio::test]
    async fn test_stop_current_search() {
        let transport = ScriptedTransport::new(vec![Reply::Hang]);
        let session = SearchSession::new(transport);
        let recorder = Recorder::new();

        assert!(!session.stop_current_search("nothing").await);
        let id = session
            .start_new_search(SearchQuery::get("/s", 10), recorder.clone())
            .await
            .unwrap();
        assert!(session.stop_current_search("user stop").await);

        assert_eq!(recorder.events(), vec![format!("cancelled:{}", id)]);
        assert!(session.current_search_id().await.is_none());
        assert!(matches!(
            session.resume_current_search().await,
            Err(SearchError::NoActiveSearch)
        ));
    }

    #[tokio::test]
    async fn test_invalid_query_keeps_active_search() {
        let transport = ScriptedTransport::new(vec![Reply::Hang]);
        let session = SearchSession::new(transport);
        let recorder = Recorder::new();

        let id = session
            .start_new_search(SearchQuery::get("/s", 10), recorder.clone())
            .await
            .unwrap();
        let result = session
            .start_new_search(SearchQuery::get("/s", 0), Recorder::new())
            .await;

        assert!(matches!(result, Err(SearchError::InvalidQuery(_))));
        assert_eq!(session.current_search_id().await, Some(id));
        assert!(recorder.events().is_empty());
        session.stop_current_search("cleanup").await;
    }
}
