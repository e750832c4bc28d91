//! Bounded-concurrency batch resolution
//!
//! [`run_batch`] drives one future per input with at most `concurrency` in
//! flight. Outcomes come out in completion order and carry the index of their
//! input, so callers that need input order can sort on it afterwards.

use crate::{ContentResolver, Metrics, ResolveError, ResolvedContent, Session};
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result of one batch item. A failure never affects its siblings.
#[derive(Debug, Clone)]
pub struct BatchOutcome<I, T, E> {
    pub index: usize,
    pub item: I,
    pub result: Result<T, E>,
}

impl<I, T, E> BatchOutcome<I, T, E> {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Runs `operation` over `items` with at most `concurrency` calls outstanding.
///
/// A concurrency of 0 is treated as 1. Every item yields exactly one outcome.
pub fn run_batch<'a, I, T, E, F, Fut>(
    items: Vec<I>,
    concurrency: usize,
    operation: F,
) -> impl Stream<Item = BatchOutcome<I, T, E>> + 'a
where
    I: Clone + 'a,
    T: 'a,
    E: 'a,
    F: Fn(I) -> Fut + 'a,
    Fut: Future<Output = Result<T, E>> + 'a,
{
    let limit = concurrency.max(1);

    stream::iter(items.into_iter().enumerate())
        .map(move |(index, item)| {
            let pending = operation(item.clone());
            async move {
                BatchOutcome {
                    index,
                    item,
                    result: pending.await,
                }
            }
        })
        .buffer_unordered(limit)
}

/// Collects every outcome of [`run_batch`] in completion order.
pub async fn collect_batch<I, T, E, F, Fut>(
    items: Vec<I>,
    concurrency: usize,
    operation: F,
) -> Vec<BatchOutcome<I, T, E>>
where
    I: Clone,
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    run_batch(items, concurrency, operation).collect().await
}

pub type LinkOutcome = BatchOutcome<String, ResolvedContent, ResolveError>;

/// Resolves batches of links against one shared session.
pub struct BatchProcessor<S> {
    resolver: ContentResolver<S>,
    concurrency: usize,
    metrics: Metrics,
    batch_id: Uuid,
}

impl<S: Session> BatchProcessor<S> {
    pub fn new(resolver: ContentResolver<S>, concurrency: usize) -> Self {
        Self {
            resolver,
            concurrency: concurrency.max(1),
            metrics: Metrics::new(),
            batch_id: Uuid::new_v4(),
        }
    }

    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    /// Streams link outcomes as they complete, updating `progress` for each.
    pub fn process_links<'a>(
        &'a self,
        links: Vec<String>,
        progress: &'a ProgressTracker,
    ) -> impl Stream<Item = LinkOutcome> + 'a {
        info!(
            batch = %self.batch_id,
            "Processing batch of {} links ({} concurrent)",
            links.len(),
            self.concurrency
        );

        run_batch(links, self.concurrency, move |link: String| async move {
            self.metrics.link_started();
            let started = Instant::now();
            let result = self.resolver.resolve(&link).await;
            let elapsed = started.elapsed();

            match &result {
                Ok(content) => {
                    self.metrics.record_link(elapsed, content.media.len());
                    debug!(link = %link, media = content.media.len(), "Link resolved in {:?}", elapsed);
                }
                Err(e) => {
                    self.metrics.record_failure(elapsed, e);
                    warn!(link = %link, kind = e.kind(), "Link failed: {}", e);
                }
            }

            progress.record_completion(result.is_ok());
            result
        })
    }

    pub async fn process_batch(&self, links: Vec<String>) -> Vec<LinkOutcome> {
        let progress = ProgressTracker::new(links.len());
        let outcomes: Vec<LinkOutcome> = self.process_links(links, &progress).collect().await;

        let summary = progress.get_progress();
        info!(
            batch = %self.batch_id,
            "Batch processing completed. Resolved: {}, Errors: {}",
            summary.success,
            summary.errors
        );

        outcomes
    }
}

/// One line of batch output.
#[derive(Debug, Clone, Serialize)]
pub struct OutcomeRecord {
    pub batch_id: Uuid,
    pub index: usize,
    pub link: String,
    pub completed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<ResolvedContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
}

impl OutcomeRecord {
    pub fn new(batch_id: Uuid, outcome: LinkOutcome) -> Self {
        let (content, error, error_kind) = match outcome.result {
            Ok(content) => (Some(content), None, None),
            Err(e) => (None, Some(e.to_string()), Some(e.kind())),
        };

        Self {
            batch_id,
            index: outcome.index,
            link: outcome.item,
            completed_at: Utc::now(),
            content,
            error,
            error_kind,
        }
    }
}

pub struct ProgressTracker {
    total: usize,
    completed: AtomicUsize,
    errors: AtomicUsize,
    start_time: Instant,
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            completed: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_completion(&self, success: bool) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn get_progress(&self) -> ProgressInfo {
        let completed = self.completed.load(Ordering::Relaxed);
        let errors = self.errors.load(Ordering::Relaxed);
        let elapsed = self.start_time.elapsed();
        let seconds = elapsed.as_secs_f64();

        let rate = if seconds > 0.0 {
            completed as f64 / seconds
        } else {
            0.0
        };

        let eta = if completed > 0 && rate > 0.0 {
            let remaining = self.total.saturating_sub(completed);
            Some(Duration::from_secs_f64(remaining as f64 / rate))
        } else {
            None
        };

        ProgressInfo {
            total: self.total,
            completed,
            errors,
            success: completed.saturating_sub(errors),
            elapsed,
            rate,
            eta,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completed.load(Ordering::Relaxed) >= self.total
    }
}

#[derive(Debug, Clone)]
pub struct ProgressInfo {
    pub total: usize,
    pub completed: usize,
    pub errors: usize,
    pub success: usize,
    pub elapsed: Duration,
    pub rate: f64,
    pub eta: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_every_item_yields_one_outcome() {
        let outcomes = collect_batch(vec![1u32, 2, 3, 4, 5], 2, |n| async move {
            if n % 2 == 0 {
                Err(format!("{n} is even"))
            } else {
                Ok(n * 10)
            }
        })
        .await;

        assert_eq!(outcomes.len(), 5);
        let mut indices: Vec<usize> = outcomes.iter().map(|o| o.index).collect();
        indices.sort_unstable();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);

        for outcome in &outcomes {
            assert_eq!(outcome.index as u32 + 1, outcome.item);
            match outcome.item % 2 {
                0 => assert!(outcome.result.is_err()),
                _ => assert_eq!(outcome.result, Ok(outcome.item * 10)),
            }
        }
    }

    #[tokio::test]
    async fn test_zero_concurrency_runs_one_at_a_time() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let outcomes = collect_batch(vec!["a", "b", "c"], 0, |_| {
            let active = active.clone();
            let peak = peak.clone();
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, ()>(())
            }
        })
        .await;

        assert_eq!(outcomes.len(), 3);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let outcomes = collect_batch(Vec::<u8>::new(), 4, |_| async { Ok::<_, ()>(()) }).await;
        assert!(outcomes.is_empty());
    }

    #[test]
    fn test_progress_tracker() {
        let tracker = ProgressTracker::new(3);
        tracker.record_completion(true);
        tracker.record_completion(false);

        let progress = tracker.get_progress();
        assert_eq!(progress.completed, 2);
        assert_eq!(progress.errors, 1);
        assert_eq!(progress.success, 1);
        assert!(!tracker.is_complete());

        tracker.record_completion(true);
        assert!(tracker.is_complete());
    }

    #[test]
    fn test_outcome_record_serialization() {
        let batch_id = Uuid::new_v4();
        let failed: LinkOutcome = BatchOutcome {
            index: 2,
            item: "https://www.instagram.com/p/x/".to_string(),
            result: Err(ResolveError::NoMediaFound),
        };

        let record = serde_json::to_value(OutcomeRecord::new(batch_id, failed)).unwrap();
        assert_eq!(record["index"], 2);
        assert_eq!(record["error"], "no media found");
        assert_eq!(record["error_kind"], "no_media");
        assert!(record.get("content").is_none());
        assert_eq!(record["batch_id"], batch_id.to_string());
    }
}
