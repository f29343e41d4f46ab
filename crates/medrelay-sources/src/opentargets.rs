//! Open Targets Platform GraphQL client.
//!
//! Endpoint: https://api.platform.opentargets.org/api/v4/graphql
//!
//! The query shape depends on the input: an ontology identifier
//! (EFO_/MONDO_/Orphanet_) runs the disease–target association query,
//! paged by numeric index over `associatedTargets.rows`; free text runs
//! the disease search and returns the best hit so the next step can use
//! its id.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use medrelay_common::net::AllowlistedClient as Client;
use medrelay_common::retry::{with_retry, RetryPolicy};
use medrelay_common::RelayError;

use crate::fetcher::SourceFetcher;
use crate::models::{
    is_ontology_id, record_from, FetchResult, PageChunk, PageCursor, Record, SourceKind,
};
use crate::paging::collect_pages;

const OT_GRAPHQL_URL: &str = "https://api.platform.opentargets.org/api/v4/graphql";

const SEARCH_QUERY: &str = r#"
    query Search($queryString: String!) {
        search(queryString: $queryString, entityNames: ["disease"], page: { size: 1, index: 0 }) {
            hits {
                id
                name
            }
        }
    }
"#;

const ASSOCIATIONS_QUERY: &str = r#"
    query DiseaseAssociations($efoId: String!, $size: Int!, $index: Int!) {
        disease(efoId: $efoId) {
            id
            name
            associatedTargets(page: { size: $size, index: $index }) {
                count
                rows {
                    target {
                        id
                        approvedSymbol
                        approvedName
                    }
                    score
                }
            }
        }
    }
"#;

pub struct OpenTargetsFetcher {
    client: Client,
    policy: RetryPolicy,
}

impl OpenTargetsFetcher {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            policy: RetryPolicy::default(),
        }
    }

    async fn graphql(&self, query: &str, variables: Value) -> Result<Value, RelayError> {
        let body: Value = self
            .client
            .post(OT_GRAPHQL_URL)?
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(errors) = body["errors"].as_array() {
            if !errors.is_empty() {
                return Err(RelayError::MalformedResponse(format!(
                    "GraphQL errors: {errors:?}"
                )));
            }
        }
        Ok(body)
    }

    /// Free-text disease search; returns the best hit as a single record.
    async fn search_disease(&self, name: &str) -> Result<Vec<Record>, RelayError> {
        let body = self
            .graphql(SEARCH_QUERY, json!({ "queryString": name }))
            .await?;

        let hits = body["data"]["search"]["hits"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        debug!(n = hits.len(), "Open Targets disease search hits");

        Ok(hits
            .iter()
            .take(1)
            .map(|hit| {
                record_from(json!({
                    "id": hit["id"].as_str().unwrap_or(""),
                    "name": hit["name"].as_str().unwrap_or(""),
                }))
            })
            .collect())
    }

    /// One page of gene associations for a disease id.
    async fn association_page(
        &self,
        efo_id: &str,
        page_size: usize,
        cursor: Option<PageCursor>,
    ) -> Result<PageChunk, RelayError> {
        let index = match cursor {
            Some(PageCursor::Page(p)) => p,
            _ => 0,
        };
        let body = self
            .graphql(
                ASSOCIATIONS_QUERY,
                json!({ "efoId": efo_id, "size": page_size, "index": index }),
            )
            .await?;

        let targets = &body["data"]["disease"]["associatedTargets"];
        let records = targets["rows"]
            .as_array()
            .map(|rows| {
                rows.iter()
                    .map(|row| {
                        record_from(json!({
                            "gene_id": row["target"]["id"].as_str().unwrap_or(""),
                            "symbol": row["target"]["approvedSymbol"].as_str().unwrap_or(""),
                            "name": row["target"]["approvedName"].as_str().unwrap_or(""),
                            "score": row["score"].as_f64().unwrap_or(0.0),
                            "disease_id": efo_id,
                        }))
                    })
                    .collect()
            })
            .unwrap_or_default();
        let total_count = targets["count"].as_u64().map(|n| n as usize);

        Ok(PageChunk {
            records,
            total_count,
            next_cursor: Some(PageCursor::Page(index + 1)),
        })
    }
}

#[async_trait]
impl SourceFetcher for OpenTargetsFetcher {
    fn kind(&self) -> SourceKind {
        SourceKind::OpenTargets
    }

    #[instrument(skip(self))]
    async fn fetch(
        &self,
        query: &str,
        max_pages: usize,
        page_size: usize,
    ) -> anyhow::Result<FetchResult> {
        if is_ontology_id(query) {
            return Ok(collect_pages(max_pages, &self.policy, |cursor| {
                self.association_page(query, page_size, cursor)
            })
            .await);
        }

        let records =
            match with_retry(&self.policy, "opentargets search", || self.search_disease(query))
                .await
            {
                Ok(records) => records,
                Err(err) => {
                    warn!(error = %err, "Open Targets search failed, returning empty result");
                    return Ok(FetchResult::empty_partial());
                }
            };

        let total_count = records.len();
        Ok(FetchResult {
            records,
            total_count,
            next_cursor: None,
            partial: false,
        })
    }
}
