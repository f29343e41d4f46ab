//! Common interface for all source clients.

use async_trait::async_trait;

use crate::models::{FetchResult, SourceKind};

/// Uniform fetch contract each source client satisfies.
///
/// Implementations walk their own pagination protocol and apply the shared
/// degradation policy internally: transient failures are retried with
/// backoff, retry exhaustion returns whatever was accumulated (tagged
/// partial), and auth or malformed-query rejections return an empty
/// partial result. A hard `Err` is reserved for failures before any
/// request could be issued; callers treat it like an empty result.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Which source this fetcher serves.
    fn kind(&self) -> SourceKind;

    /// Fetch records matching `query`, consuming at most `max_pages` pages
    /// of `page_size` records each.
    async fn fetch(
        &self,
        query: &str,
        max_pages: usize,
        page_size: usize,
    ) -> anyhow::Result<FetchResult>;
}
