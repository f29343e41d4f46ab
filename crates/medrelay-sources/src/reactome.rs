//! Reactome ContentService search client.
//!
//! Endpoint: https://reactome.org/ContentService/search/query
//!
//! The query may be a comma-separated list of entities (gene symbols from
//! an association step); each entity is searched sequentially, pathway
//! entries are deduplicated by stId, and the result is capped at 20
//! pathways. A failing entity lookup is skipped, not fatal.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, instrument, warn};

use medrelay_common::net::AllowlistedClient as Client;
use medrelay_common::retry::{with_retry, RetryPolicy};
use medrelay_common::RelayError;

use crate::fetcher::SourceFetcher;
use crate::models::{record_from, FetchResult, Record, SourceKind};
use crate::paging::COURTESY_DELAY;

const REACTOME_SEARCH_URL: &str = "https://reactome.org/ContentService/search/query";

/// Cap on pathways returned across all queried entities.
const MAX_PATHWAYS: usize = 20;

pub struct ReactomeFetcher {
    client: Client,
    policy: RetryPolicy,
}

impl ReactomeFetcher {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            policy: RetryPolicy::default(),
        }
    }

    /// Search one entity and return its pathway entries.
    async fn search_entity(&self, entity: &str) -> Result<Vec<Record>, RelayError> {
        let resp: Value = self
            .client
            .get(REACTOME_SEARCH_URL)?
            .query(&[("query", entity), ("cluster", "true")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let records = pathways_from_response(&resp, entity);
        debug!(entity, n = records.len(), "Reactome pathways for entity");
        Ok(records)
    }
}

#[async_trait]
impl SourceFetcher for ReactomeFetcher {
    fn kind(&self) -> SourceKind {
        SourceKind::Reactome
    }

    #[instrument(skip(self))]
    async fn fetch(
        &self,
        query: &str,
        _max_pages: usize,
        _page_size: usize,
    ) -> anyhow::Result<FetchResult> {
        let entities: Vec<&str> = query
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .collect();

        let mut records: Vec<Record> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut partial = false;

        for (index, entity) in entities.iter().copied().enumerate() {
            if index > 0 {
                tokio::time::sleep(COURTESY_DELAY).await;
            }

            match with_retry(&self.policy, "reactome search", || self.search_entity(entity))
                .await
            {
                Ok(pathways) => {
                    for record in pathways {
                        let st_id = record["st_id"].as_str().unwrap_or("").to_string();
                        if !seen.insert(st_id) {
                            continue;
                        }
                        records.push(record);
                        if records.len() >= MAX_PATHWAYS {
                            break;
                        }
                    }
                }
                Err(err) => {
                    warn!(entity, error = %err, "Reactome lookup failed, skipping entity");
                    partial = true;
                }
            }

            if records.len() >= MAX_PATHWAYS {
                break;
            }
        }

        let total_count = records.len();
        Ok(FetchResult {
            records,
            total_count,
            next_cursor: None,
            partial,
        })
    }
}

/// Extract pathway entries from a clustered search response, tagging each
/// with the entity that matched it.
fn pathways_from_response(resp: &Value, entity: &str) -> Vec<Record> {
    let mut records = Vec::new();
    for group in resp["results"].as_array().unwrap_or(&vec![]) {
        if group["typeName"].as_str() != Some("Pathway") {
            continue;
        }
        for entry in group["entries"].as_array().unwrap_or(&vec![]) {
            let st_id = entry["stId"].as_str().unwrap_or("");
            if st_id.is_empty() {
                continue;
            }
            records.push(record_from(serde_json::json!({
                "st_id": st_id,
                "name": entry["name"].as_str().unwrap_or(""),
                "species": entry["species"].clone(),
                "associated_gene": entity,
            })));
        }
    }
    records
}
