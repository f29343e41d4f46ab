//! USPTO ds-api client (enriched cited reference metadata).
//!
//! Endpoint: https://developer.uspto.gov/ds-api/enriched_cited_reference_metadata/v3/records
//!
//! Offset-window pagination: the caller advances `start` by `rows` per
//! request; the loop ends on an empty page or once the running total meets
//! the reported `numFound`. Documents are passed through as raw records;
//! the endpoint's schema is unstable, so nothing is flattened here and the
//! generic keyword strategy picks its fields downstream.

use async_trait::async_trait;
use serde_json::Value;
use tracing::instrument;

use medrelay_common::net::AllowlistedClient as Client;
use medrelay_common::retry::RetryPolicy;
use medrelay_common::RelayError;

use crate::fetcher::SourceFetcher;
use crate::models::{FetchResult, PageChunk, PageCursor, Record, SourceKind};
use crate::paging::collect_pages;

const USPTO_URL: &str =
    "https://developer.uspto.gov/ds-api/enriched_cited_reference_metadata/v3/records";

/// The ds-api rejects row counts above 100.
const MAX_ROWS: usize = 100;

pub struct UsptoFetcher {
    client: Client,
    policy: RetryPolicy,
}

impl UsptoFetcher {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            policy: RetryPolicy::default(),
        }
    }

    async fn fetch_page(
        &self,
        query: &str,
        page_size: usize,
        cursor: Option<PageCursor>,
    ) -> Result<PageChunk, RelayError> {
        let start = match cursor {
            Some(PageCursor::Offset(offset)) => offset,
            _ => 0,
        };
        let rows = page_size.min(MAX_ROWS).max(1);

        let form = [
            ("criteria", build_criteria(query)),
            ("start", start.to_string()),
            ("rows", rows.to_string()),
        ];

        let body: Value = self
            .client
            .post(USPTO_URL)?
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        parse_response(body, start, rows)
    }
}

#[async_trait]
impl SourceFetcher for UsptoFetcher {
    fn kind(&self) -> SourceKind {
        SourceKind::Uspto
    }

    #[instrument(skip(self))]
    async fn fetch(
        &self,
        query: &str,
        max_pages: usize,
        page_size: usize,
    ) -> anyhow::Result<FetchResult> {
        Ok(collect_pages(max_pages, &self.policy, |cursor| {
            self.fetch_page(query, page_size, cursor)
        })
        .await)
    }
}

/// Build a Lucene OR-criteria over comma-separated keywords.
fn build_criteria(query: &str) -> String {
    let parts: Vec<String> = query
        .split(',')
        .map(str::trim)
        .filter(|kw| !kw.is_empty())
        .map(|kw| format!("*:{kw}*"))
        .collect();
    format!("({})", parts.join(" OR "))
}

/// Parse a ds-api response body. The endpoint occasionally returns the
/// JSON document wrapped in a string; unwrap that before reading docs.
fn parse_response(body: Value, start: usize, rows: usize) -> Result<PageChunk, RelayError> {
    let body = match body {
        Value::String(inner) => serde_json::from_str(&inner)?,
        other => other,
    };

    let docs = body["response"]["docs"]
        .as_array()
        .or_else(|| body["docs"].as_array())
        .cloned()
        .unwrap_or_default();

    let records: Vec<Record> = docs
        .into_iter()
        .filter_map(|doc| match doc {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .collect();

    let total_count = body["response"]["numFound"].as_u64().map(|n| n as usize);

    Ok(PageChunk {
        records,
        total_count,
        next_cursor: Some(PageCursor::Offset(start + rows)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_criteria_splits_on_commas() {
        assert_eq!(
            build_criteria("dermatitis, sphingosine"),
            "(*:dermatitis* OR *:sphingosine*)"
        );
        assert_eq!(build_criteria("single"), "(*:single*)");
    }

    #[test]
    fn test_parse_response_reads_docs_and_total() {
        let body = json!({
            "response": {
                "numFound": 250,
                "docs": [
                    { "patentTitle": "A", "publicationDate": "2022-01-01" },
                    { "patentTitle": "B" }
                ]
            }
        });
        let chunk = parse_response(body, 0, 100).unwrap();
        assert_eq!(chunk.records.len(), 2);
        assert_eq!(chunk.total_count, Some(250));
        assert_eq!(chunk.next_cursor, Some(PageCursor::Offset(100)));
        assert_eq!(chunk.records[0]["patentTitle"], "A");
    }

    #[test]
    fn test_parse_response_unwraps_string_wrapped_json() {
        let inner = r#"{"response":{"numFound":1,"docs":[{"patentTitle":"C"}]}}"#;
        let chunk = parse_response(Value::String(inner.to_string()), 100, 100).unwrap();
        assert_eq!(chunk.records.len(), 1);
        assert_eq!(chunk.next_cursor, Some(PageCursor::Offset(200)));
    }

    #[test]
    fn test_parse_response_rejects_garbage_string() {
        let result = parse_response(Value::String("<html>".to_string()), 0, 100);
        assert!(result.is_err());
    }
}
