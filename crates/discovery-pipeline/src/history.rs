//! Paginated history collection.
//!
//! [`HistoryCollector::collect`] turns a [`HistorySource`] into a lazy
//! stream of plays for one listener. Every call starts from page 1. Pages
//! arrive most-recent-first, and the first play older than `since` ends
//! pagination: the cutoff is enforced here, not left to the source.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, Stream, TryStreamExt};
use tokio_util::sync::CancellationToken;

use discovery_core::{Listener, PlayRecord};

use crate::error::{PipelineError, PipelineResult};
use crate::resilience::RetryPolicy;
use crate::sources::HistorySource;

/// Progress notification emitted once per fetched page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTick {
    pub listener: Listener,
    pub page: u32,
    /// `None` when the source does not report a page count.
    pub total_pages: Option<u32>,
    /// Plays on this page that fell inside the window.
    pub records: usize,
}

type ProgressFn = Arc<dyn Fn(&PageTick) + Send + Sync>;

enum Cursor {
    Page(u32),
    Done,
}

/// Collects a listener's plays within a time window.
#[derive(Clone)]
pub struct HistoryCollector {
    source: Arc<dyn HistorySource>,
    policy: RetryPolicy,
    cancel: CancellationToken,
    progress: Option<ProgressFn>,
}

impl fmt::Debug for HistoryCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryCollector")
            .field("policy", &self.policy)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("progress", &self.progress.is_some())
            .finish_non_exhaustive()
    }
}

impl HistoryCollector {
    pub fn new(source: Arc<dyn HistorySource>, policy: RetryPolicy) -> Self {
        Self {
            source,
            policy,
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    /// Stop between pages once `cancel` fires.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Observe one [`PageTick`] per fetched page.
    #[must_use]
    pub fn with_progress(mut self, progress: impl Fn(&PageTick) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(progress));
        self
    }

    /// Lazily stream `listener`'s plays newer than `since`.
    ///
    /// The stream ends after the last page, after an empty page, or at the
    /// first play older than `since`. A page that still fails after the
    /// retry budget yields [`PipelineError::FetchFailed`]; rejected
    /// credentials yield [`PipelineError::UpstreamAuth`] without retrying.
    pub fn collect<'a>(
        &'a self,
        listener: &'a Listener,
        since: DateTime<Utc>,
    ) -> impl Stream<Item = PipelineResult<PlayRecord>> + Send + 'a {
        stream::try_unfold(Cursor::Page(1), move |cursor| async move {
            let Cursor::Page(page) = cursor else {
                return Ok::<_, PipelineError>(None);
            };
            if self.cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            let fetched = self
                .policy
                .run("history page", || self.source.fetch_page(listener, since, page))
                .await
                .map_err(|failure| {
                    if failure.error.is_auth() {
                        PipelineError::UpstreamAuth {
                            service: "listening history".to_string(),
                            message: failure.error.to_string(),
                        }
                    } else {
                        PipelineError::FetchFailed {
                            listener: listener.clone(),
                            attempts: failure.attempts,
                            message: failure.error.to_string(),
                        }
                    }
                })?;

            let fetched_len = fetched.records.len();
            let in_window: Vec<PlayRecord> = fetched
                .records
                .into_iter()
                .take_while(|record| record.timestamp >= since)
                .collect();
            let crossed_cutoff = in_window.len() < fetched_len;

            let tick = PageTick {
                listener: listener.clone(),
                page,
                total_pages: fetched.total_pages,
                records: in_window.len(),
            };
            log::debug!(
                "{}: page {}/{} ({} plays)",
                tick.listener,
                tick.page,
                tick.total_pages
                    .map_or_else(|| "?".to_string(), |total| total.to_string()),
                tick.records
            );
            if let Some(progress) = &self.progress {
                progress(&tick);
            }

            let last_page = fetched.total_pages.is_some_and(|total| page >= total);
            let next = if crossed_cutoff || fetched_len == 0 || last_page {
                Cursor::Done
            } else {
                Cursor::Page(page + 1)
            };
            Ok(Some((in_window, next)))
        })
        .map_ok(|records| stream::iter(records.into_iter().map(Ok::<_, PipelineError>)))
        .try_flatten()
    }

    /// Drain [`collect`](Self::collect) into a vector. Either the whole
    /// window is returned or an error; never a partial history.
    pub async fn collect_all(
        &self,
        listener: &Listener,
        since: DateTime<Utc>,
    ) -> PipelineResult<Vec<PlayRecord>> {
        let records: Vec<PlayRecord> = self.collect(listener, since).try_collect().await?;
        log::info!("{}: collected {} plays", listener, records.len());
        Ok(records)
    }
}
