//! Shared pagination and batching drivers.
//!
//! Every source walks pages with one of three protocols (opaque
//! continuation token, numeric page counter, offset window); the loop
//! mechanics, retry handling, and termination rules are identical, so
//! they live here and fetchers only supply a "fetch one page" closure.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use medrelay_common::retry::{classify, ErrorClass, RetryPolicy};
use medrelay_common::RelayError;

use crate::models::{FetchResult, PageChunk, PageCursor, Record};

/// Identifier batches resolved per request in batched-identifier fetches.
pub const DEFAULT_BATCH_SIZE: usize = 20;

/// Fixed politeness gap between successive requests to the same source.
pub const COURTESY_DELAY: Duration = Duration::from_millis(300);

/// Drives a paginated fetch to completion.
///
/// `fetch_page` receives the cursor to resume from (`None` = start) and
/// returns one parsed [`PageChunk`]. The loop ends when:
/// - the chunk carries no continuation cursor,
/// - a page comes back with zero records,
/// - the running total reaches the source-reported total, or
/// - `max_pages` pages have been consumed.
///
/// Failed page requests are retried per `policy` when transient; retry
/// exhaustion stops the loop early and returns the records accumulated so
/// far tagged partial. A non-retryable failure (auth, malformed query)
/// aborts with zero records and the partial flag set.
pub async fn collect_pages<F, Fut>(
    max_pages: usize,
    policy: &RetryPolicy,
    mut fetch_page: F,
) -> FetchResult
where
    F: FnMut(Option<PageCursor>) -> Fut,
    Fut: Future<Output = Result<PageChunk, RelayError>>,
{
    let mut records: Vec<Record> = Vec::new();
    let mut cursor: Option<PageCursor> = None;
    let mut reported_total: Option<usize> = None;
    let mut partial = false;

    'pages: for page in 0..max_pages {
        if page > 0 {
            tokio::time::sleep(COURTESY_DELAY).await;
        }

        let chunk = {
            let mut attempt = 0u32;
            loop {
                match fetch_page(cursor.clone()).await {
                    Ok(chunk) => break chunk,
                    Err(err) => match classify(&err) {
                        ErrorClass::Transient if attempt + 1 < policy.max_attempts => {
                            let delay = policy.delay_for(attempt);
                            warn!(
                                page = page + 1,
                                attempt = attempt + 1,
                                delay_secs = delay.as_secs(),
                                error = %err,
                                "page request failed, retrying after backoff"
                            );
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                        }
                        ErrorClass::Transient => {
                            warn!(
                                page = page + 1,
                                error = %err,
                                "page request failed after retries, stopping early"
                            );
                            partial = true;
                            break 'pages;
                        }
                        ErrorClass::Auth | ErrorClass::Malformed => {
                            warn!(
                                page = page + 1,
                                error = %err,
                                "non-retryable failure, aborting fetch"
                            );
                            return FetchResult::empty_partial();
                        }
                    },
                }
            }
        };

        if let Some(total) = chunk.total_count {
            reported_total = Some(total);
        }
        let page_records = chunk.records.len();
        records.extend(chunk.records);
        cursor = chunk.next_cursor;

        if page_records == 0 {
            break;
        }
        if let Some(total) = reported_total {
            if records.len() >= total {
                break;
            }
        }
        if cursor.is_none() {
            break;
        }
    }

    let total_count = reported_total.unwrap_or(records.len());
    FetchResult {
        records,
        total_count,
        next_cursor: cursor,
        partial,
    }
}

/// Resolves a known identifier list to records through fixed-size batch
/// requests.
///
/// Each batch is retried per `policy` with backoff; a batch that still
/// fails is skipped (never aborting the remaining batches) and the result
/// is tagged partial. Returns accumulated records plus the partial flag.
pub async fn fetch_in_batches<F, Fut>(
    ids: &[String],
    batch_size: usize,
    policy: &RetryPolicy,
    mut fetch_batch: F,
) -> (Vec<Record>, bool)
where
    F: FnMut(Vec<String>) -> Fut,
    Fut: Future<Output = Result<Vec<Record>, RelayError>>,
{
    let mut records: Vec<Record> = Vec::new();
    let mut partial = false;

    for (index, batch) in ids.chunks(batch_size.max(1)).enumerate() {
        if index > 0 {
            tokio::time::sleep(COURTESY_DELAY).await;
        }

        let mut attempt = 0u32;
        loop {
            match fetch_batch(batch.to_vec()).await {
                Ok(mut batch_records) => {
                    records.append(&mut batch_records);
                    break;
                }
                Err(err) if attempt + 1 < policy.max_attempts => {
                    let delay = policy.delay_for(attempt);
                    warn!(
                        batch = index + 1,
                        attempt = attempt + 1,
                        delay_secs = delay.as_secs(),
                        error = %err,
                        "batch request failed, retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    warn!(
                        batch = index + 1,
                        size = batch.len(),
                        error = %err,
                        "batch failed after retries, skipping"
                    );
                    partial = true;
                    break;
                }
            }
        }
    }

    (records, partial)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::record_from;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn records(n: usize, label: &str) -> Vec<Record> {
        (0..n)
            .map(|i| record_from(json!({ "id": format!("{label}-{i}") })))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_loop_stops_when_token_absent() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let result = collect_pages(10, &policy, |cursor| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                match n {
                    0 => {
                        assert_eq!(cursor, None);
                        Ok(PageChunk {
                            records: records(2, "a"),
                            total_count: None,
                            next_cursor: Some(PageCursor::Token("t2".into())),
                        })
                    }
                    1 => {
                        assert_eq!(cursor, Some(PageCursor::Token("t2".into())));
                        Ok(PageChunk {
                            records: records(2, "b"),
                            total_count: None,
                            next_cursor: None,
                        })
                    }
                    _ => panic!("fetched past the final page"),
                }
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(result.records.len(), 4);
        assert_eq!(result.total_count, 4);
        assert!(!result.partial);
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_loop_bounded_by_max_pages() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let result = collect_pages(3, &policy, |_cursor| {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                Ok(PageChunk {
                    records: records(1, "x"),
                    total_count: None,
                    next_cursor: Some(PageCursor::Token("more".into())),
                })
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.records.len(), 3);
        assert_eq!(result.next_cursor, Some(PageCursor::Token("more".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_total_performs_exactly_one_request() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let result = collect_pages(5, &policy, |_cursor| {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                Ok(PageChunk {
                    records: Vec::new(),
                    total_count: Some(0),
                    next_cursor: Some(PageCursor::Page(2)),
                })
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(result.records.is_empty());
        assert_eq!(result.total_count, 0);
        assert!(!result.partial);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_once_running_total_reaches_reported_total() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let result = collect_pages(10, &policy, |cursor| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                let page = match cursor {
                    Some(PageCursor::Page(p)) => p,
                    None => 1,
                    other => panic!("unexpected cursor {other:?}"),
                };
                assert_eq!(page as usize, n + 1);
                Ok(PageChunk {
                    records: records(2, "p"),
                    total_count: Some(4),
                    next_cursor: Some(PageCursor::Page(page + 1)),
                })
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(result.records.len(), 4);
        assert_eq!(result.total_count, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion_returns_accumulated_partial() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let result = collect_pages(5, &policy, |_cursor| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Ok(PageChunk {
                        records: records(3, "ok"),
                        total_count: Some(30),
                        next_cursor: Some(PageCursor::Offset(3)),
                    })
                } else {
                    Err(RelayError::Other(anyhow::anyhow!("upstream flapping")))
                }
            }
        })
        .await;

        // 1 good page + 3 attempts at the second page
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(result.records.len(), 3);
        assert!(result.partial);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_aborts_with_empty_partial() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let result = collect_pages(5, &policy, |_cursor| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(RelayError::Auth("key rejected".into())) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(result.records.is_empty());
        assert!(result.partial);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_partition_and_skip_failed_batch() {
        let policy = RetryPolicy::default();
        let ids: Vec<String> = (1..=45).map(|i| i.to_string()).collect();
        let batch_sizes = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sizes = batch_sizes.clone();

        let (records, partial) = fetch_in_batches(&ids, 20, &policy, |batch| {
            sizes.lock().unwrap().push(batch.len());
            async move {
                // the middle batch (starting at id 21) always fails
                if batch[0] == "21" {
                    Err(RelayError::Other(anyhow::anyhow!("batch timeout")))
                } else {
                    Ok(batch
                        .iter()
                        .map(|id| record_from(json!({ "id": id })))
                        .collect())
                }
            }
        })
        .await;

        // batches of 20, 20, 5; the failed one retried 3 times
        assert_eq!(*batch_sizes.lock().unwrap(), vec![20, 20, 20, 20, 5]);
        assert_eq!(records.len(), 25);
        assert!(partial);
        assert_eq!(records[0]["id"], "1");
        assert_eq!(records[20]["id"], "41");
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_all_successful_not_partial() {
        let policy = RetryPolicy::default();
        let ids: Vec<String> = (1..=10).map(|i| i.to_string()).collect();

        let (records, partial) = fetch_in_batches(&ids, 4, &policy, |batch| async move {
            Ok(batch
                .iter()
                .map(|id| record_from(json!({ "id": id })))
                .collect())
        })
        .await;

        assert_eq!(records.len(), 10);
        assert!(!partial);
    }
}
