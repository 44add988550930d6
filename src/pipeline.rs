//! One watcher run: index, diff against the store, then drive every
//! unfinished listing through details, filters, judgment and notification.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use futures::{StreamExt, TryStreamExt, stream};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::images::ImageStore;
use crate::matcher;
use crate::models::{Judgment, Listing, ListingId, ListingRef, ProcessingStatus, SearchCriteria, SearchParams};
use crate::plugins::traits::{ListingSource, Notification, Notifier, RelevanceClassifier};
use crate::store::ListingStore;
use crate::utils::error::{AppError, Result};

/// External collaborators of a run.
#[derive(Clone)]
pub struct PipelineContext {
    pub source: Arc<dyn ListingSource>,
    pub classifier: Arc<dyn RelevanceClassifier>,
    pub notifier: Arc<dyn Notifier>,
    pub images: Option<Arc<ImageStore>>,
}

/// Counts per outcome for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub indexed: usize,
    pub new: usize,
    pub skipped: usize,
    pub details_failed: usize,
    pub rejected: usize,
    pub irrelevant: usize,
    pub classify_failed: usize,
    pub notified: usize,
    pub notify_failed: usize,
}

impl RunSummary {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::AlreadyHandled => self.skipped += 1,
            Outcome::DetailsFailed => self.details_failed += 1,
            Outcome::Rejected => self.rejected += 1,
            Outcome::Irrelevant => self.irrelevant += 1,
            Outcome::ClassifyFailed => self.classify_failed += 1,
            Outcome::Notified => self.notified += 1,
            Outcome::NotifyFailed => self.notify_failed += 1,
        }
    }

    /// Listings left in a non-terminal state by a recoverable failure.
    pub fn failures(&self) -> usize {
        self.details_failed + self.classify_failed + self.notify_failed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    AlreadyHandled,
    DetailsFailed,
    Rejected,
    Irrelevant,
    ClassifyFailed,
    Notified,
    NotifyFailed,
}

pub struct Pipeline {
    ctx: PipelineContext,
    store: Mutex<ListingStore>,
    criteria: SearchCriteria,
    params: SearchParams,
    max_concurrency: usize,
}

impl Pipeline {
    pub fn new(
        ctx: PipelineContext,
        store: ListingStore,
        criteria: SearchCriteria,
        params: SearchParams,
        max_concurrency: usize,
    ) -> Self {
        Self {
            ctx,
            store: Mutex::new(store),
            criteria,
            params,
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub async fn run(&self) -> Result<RunSummary> {
        info!("Fetching listing index");
        let index = self
            .ctx
            .source
            .fetch_index(&self.params)
            .await
            .map_err(|e| AppError::IndexFetch(e.to_string()))?;

        let mut summary = RunSummary {
            indexed: index.len(),
            ..Default::default()
        };

        let work = self.diff(index, &mut summary).await?;
        info!(
            indexed = summary.indexed,
            new = summary.new,
            skipped = summary.skipped,
            pending = work.len(),
            "Index diffed against the store"
        );

        let outcomes: Vec<Outcome> = stream::iter(work)
            .map(|listing_ref| self.process(listing_ref))
            .buffer_unordered(self.max_concurrency)
            .try_collect()
            .await?;
        outcomes.into_iter().for_each(|outcome| summary.record(outcome));

        self.store.lock().await.flush_async().await?;

        info!(
            notified = summary.notified,
            rejected = summary.rejected,
            irrelevant = summary.irrelevant,
            failures = summary.failures(),
            "Run finished"
        );
        Ok(summary)
    }

    pub fn into_store(self) -> ListingStore {
        self.store.into_inner()
    }

    /// Records every indexed id and returns those that still need work, each id once.
    async fn diff(&self, index: Vec<ListingRef>, summary: &mut RunSummary) -> Result<Vec<ListingRef>> {
        let now = Utc::now();
        let mut store = self.store.lock().await;
        let mut queued = HashSet::new();
        let mut work = Vec::new();

        for listing_ref in index {
            if !queued.insert(listing_ref.id.clone()) {
                debug!(listing_id = %listing_ref.id, "Listed more than once in the index");
                continue;
            }
            if store.record_seen(&listing_ref.id, now) {
                summary.new += 1;
            }
            match store.status(&listing_ref.id) {
                Some(status) if status.is_terminal() => {
                    debug!(listing_id = %listing_ref.id, %status, "Already handled, skipping");
                    summary.skipped += 1;
                }
                _ => work.push(listing_ref),
            }
        }

        store.flush_async().await?;
        Ok(work)
    }

    async fn process(&self, listing_ref: ListingRef) -> Result<Outcome> {
        let id = listing_ref.id.clone();
        let (mut status, details, judgment) = {
            let store = self.store.lock().await;
            let record = store
                .get(&id)
                .ok_or_else(|| AppError::UnknownListing { id: id.clone() })?;
            (record.status, record.details.clone(), record.judgment.clone())
        };
        if status.is_terminal() {
            debug!(listing_id = %id, %status, "Already handled, skipping");
            return Ok(Outcome::AlreadyHandled);
        }
        debug!(listing_id = %id, %status, "Resuming listing");

        let listing = match details {
            Some(listing) => listing,
            None => match self.ctx.source.fetch_detail(&listing_ref).await {
                Ok(listing) => listing,
                Err(e) => {
                    self.fail(&id, "fetch details", e).await?;
                    return Ok(Outcome::DetailsFailed);
                }
            },
        };

        if status == ProcessingStatus::SeenOnly {
            if !matcher::matches(&listing, &self.criteria) {
                let reasons = matcher::rejection_reasons(&listing, &self.criteria);
                debug!(listing_id = %id, ?reasons, "Rejected by filters");
                self.commit(|store| store.advance(&id, ProcessingStatus::RejectedByFilters, Some(listing)))
                    .await?;
                return Ok(Outcome::Rejected);
            }
            self.commit(|store| store.advance(&id, ProcessingStatus::MatchedFilters, Some(listing.clone())))
                .await?;
            status = ProcessingStatus::MatchedFilters;
        }

        let judgment = if status == ProcessingStatus::MatchedFilters {
            match self.ctx.classifier.judge(&listing, &self.criteria.interesting).await {
                Ok(judgment) => {
                    let relevant = judgment.relevant;
                    self.commit(|store| store.advance_judged(&id, judgment.clone())).await?;
                    if !relevant {
                        debug!(listing_id = %id, "Judged irrelevant");
                        return Ok(Outcome::Irrelevant);
                    }
                    judgment
                }
                Err(e) => {
                    self.fail(&id, "classify", e).await?;
                    return Ok(Outcome::ClassifyFailed);
                }
            }
        } else {
            judgment.unwrap_or_else(|| Judgment {
                relevant: true,
                title: None,
                summary: None,
            })
        };

        self.notify(&id, &listing, &judgment).await
    }

    async fn notify(&self, id: &ListingId, listing: &Listing, judgment: &Judgment) -> Result<Outcome> {
        let images = match &self.ctx.images {
            Some(images) => images.fetch(listing).await,
            None => Vec::new(),
        };
        let notification = Notification::new(listing, Some(judgment), images);

        match self.ctx.notifier.send(&notification).await {
            Ok(true) => {
                self.commit(|store| store.advance(id, ProcessingStatus::Notified, None))
                    .await?;
                info!(listing_id = %id, title = %notification.title, "Listing notified");
                Ok(Outcome::Notified)
            }
            Ok(false) => {
                self.fail(id, "notify", AppError::Notifier("notification was not accepted".to_string()))
                    .await?;
                Ok(Outcome::NotifyFailed)
            }
            Err(e) => {
                self.fail(id, "notify", e).await?;
                Ok(Outcome::NotifyFailed)
            }
        }
    }

    /// Applies one store change and persists it before returning.
    async fn commit<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut ListingStore) -> Result<()>,
    {
        let mut store = self.store.lock().await;
        change(&mut store)?;
        store.flush_async().await
    }

    /// Records a per-listing failure, or propagates it when it must stop the run.
    async fn fail(&self, id: &ListingId, step: &str, error: AppError) -> Result<()> {
        if error.is_fatal() {
            return Err(error);
        }
        warn!(listing_id = %id, step, error = %error, "Listing step failed, will retry next run");
        self.commit(|store| store.record_failure(id, format!("{}: {}", step, error)))
            .await
    }
}
