use std::sync::Arc;

use tokio::sync::watch;

use super::{FetchCoordinator, FetchDecision, QueryData, QueryEntry, QueryError, QueryKey, QueryStatus};

/// What a view should render for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryView {
    /// Suspended: first load in progress or waiting on restore.
    Pending,
    /// Offline and nothing cached. Distinct from loading and from failure.
    PausedNoData,
    /// Last attempt failed. `data` is the last known good value, if any.
    Failed {
        error: QueryError,
        data: Option<Arc<QueryData>>,
    },
    Ready {
        data: Arc<QueryData>,
        is_fetching: bool,
        is_paused: bool,
    },
}

impl QueryView {
    pub fn from_entry(entry: &QueryEntry) -> Self {
        if entry.status == QueryStatus::Error {
            if let Some(error) = &entry.error {
                return QueryView::Failed {
                    error: error.clone(),
                    data: entry.data.clone(),
                };
            }
        }
        match &entry.data {
            Some(data) => QueryView::Ready {
                data: Arc::clone(data),
                is_fetching: entry.is_fetching,
                is_paused: entry.is_paused,
            },
            None if entry.is_paused => QueryView::PausedNoData,
            None => QueryView::Pending,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, QueryView::Pending)
    }

    pub fn data(&self) -> Option<&Arc<QueryData>> {
        match self {
            QueryView::Ready { data, .. } => Some(data),
            QueryView::Failed { data, .. } => data.as_ref(),
            _ => None,
        }
    }
}

/// A view's live subscription to one key.
///
/// Creating an observer registers interest and evaluates the key; dropping
/// it unregisters, so late responses no longer reach this view.
pub struct QueryObserver {
    key: QueryKey,
    rx: watch::Receiver<Arc<QueryEntry>>,
    coordinator: FetchCoordinator,
}

impl QueryObserver {
    pub(crate) fn new(coordinator: FetchCoordinator, key: QueryKey) -> Self {
        let rx = coordinator.store().subscribe(&key);
        coordinator.evaluate(&key);
        Self { key, rx, coordinator }
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn entry(&self) -> Arc<QueryEntry> {
        self.rx.borrow().clone()
    }

    pub fn view(&self) -> QueryView {
        QueryView::from_entry(&self.rx.borrow())
    }

    /// Explicit user-triggered refetch (the "Retry" button).
    pub fn refetch(&self) -> FetchDecision {
        self.coordinator.refetch(&self.key)
    }

    /// Wait for the next change. `None` once the slot is gone.
    pub async fn changed(&mut self) -> Option<Arc<QueryEntry>> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Wait until `predicate` holds for the entry and return it.
    pub async fn wait_for(&mut self, predicate: impl Fn(&QueryEntry) -> bool) -> Option<Arc<QueryEntry>> {
        loop {
            {
                let entry = self.rx.borrow_and_update();
                if predicate(&**entry) {
                    return Some(entry.clone());
                }
            }
            self.rx.changed().await.ok()?;
        }
    }

    /// Suspend until the key leaves the pending state.
    pub async fn resolve(&mut self) -> QueryView {
        match self.wait_for(|e| !QueryView::from_entry(e).is_pending()).await {
            Some(entry) => QueryView::from_entry(&entry),
            None => self.view(),
        }
    }

    /// Like `resolve`, but also waits out a background revalidation.
    pub async fn settled(&mut self) -> QueryView {
        match self
            .wait_for(|e| !e.is_fetching && !QueryView::from_entry(e).is_pending())
            .await
        {
            Some(entry) => QueryView::from_entry(&entry),
            None => self.view(),
        }
    }
}

impl Drop for QueryObserver {
    fn drop(&mut self) {
        self.coordinator.store().release(&self.key);
    }
}
