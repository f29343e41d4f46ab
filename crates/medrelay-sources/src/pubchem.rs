//! PubChem PUG REST client.
//!
//! Endpoint: https://pubchem.ncbi.nlm.nih.gov/rest/pug
//!
//! Batched-identifier fetch: the query (a compound name) is first resolved
//! to a CID list, then CIDs are resolved to property records in batches of
//! 20. A 404 on the name lookup means "no such compound" and yields an
//! empty, non-partial result.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, instrument, warn};
use url::Url;

use medrelay_common::net::AllowlistedClient as Client;
use medrelay_common::retry::{with_retry, RetryPolicy};
use medrelay_common::RelayError;

use crate::fetcher::SourceFetcher;
use crate::models::{record_from, FetchResult, Record, SourceKind};
use crate::paging::{fetch_in_batches, DEFAULT_BATCH_SIZE};

const PUG_BASE: &str = "https://pubchem.ncbi.nlm.nih.gov/rest/pug";

const PROPERTIES: &str = "IUPACName,CanonicalSMILES,MolecularFormula,MolecularWeight";

pub struct PubChemFetcher {
    client: Client,
    policy: RetryPolicy,
}

impl PubChemFetcher {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            policy: RetryPolicy::default(),
        }
    }

    /// Resolve a compound name to its CID list, capped at `limit`.
    async fn resolve_cids(&self, name: &str, limit: usize) -> Result<Vec<String>, RelayError> {
        let mut url = Url::parse(PUG_BASE)
            .map_err(|e| RelayError::Config(format!("bad PubChem base URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| RelayError::Config("PubChem base URL cannot take segments".into()))?
            .extend(["compound", "name", name, "cids", "JSON"]);

        let resp = self.client.get(url.as_str())?.send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let body: Value = resp.error_for_status()?.json().await?;

        let mut cids: Vec<String> = body["IdentifierList"]["CID"]
            .as_array()
            .unwrap_or(&vec![])
            .iter()
            .filter_map(|v| v.as_u64().map(|n| n.to_string()))
            .collect();
        cids.truncate(limit);

        debug!(name, n = cids.len(), "PubChem name resolved to CIDs");
        Ok(cids)
    }

    /// Fetch compound properties for one CID batch.
    async fn fetch_properties(&self, cids: Vec<String>) -> Result<Vec<Record>, RelayError> {
        let url = format!(
            "{PUG_BASE}/compound/cid/{}/property/{PROPERTIES}/JSON",
            cids.join(",")
        );
        let body: Value = self
            .client
            .get(&url)?
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let properties = body["PropertyTable"]["Properties"]
            .as_array()
            .cloned()
            .unwrap_or_default();

        Ok(properties.iter().map(property_to_record).collect())
    }
}

#[async_trait]
impl SourceFetcher for PubChemFetcher {
    fn kind(&self) -> SourceKind {
        SourceKind::PubChem
    }

    #[instrument(skip(self))]
    async fn fetch(
        &self,
        query: &str,
        max_pages: usize,
        page_size: usize,
    ) -> anyhow::Result<FetchResult> {
        let limit = max_pages.saturating_mul(page_size).max(1);
        let cids = match with_retry(&self.policy, "pubchem cid lookup", || {
            self.resolve_cids(query, limit)
        })
        .await
        {
            Ok(cids) => cids,
            Err(err) => {
                warn!(error = %err, "PubChem name resolution failed, returning empty result");
                return Ok(FetchResult::empty_partial());
            }
        };

        if cids.is_empty() {
            return Ok(FetchResult {
                records: Vec::new(),
                total_count: 0,
                next_cursor: None,
                partial: false,
            });
        }

        let total_count = cids.len();
        let (records, partial) =
            fetch_in_batches(&cids, DEFAULT_BATCH_SIZE, &self.policy, |batch| {
                self.fetch_properties(batch)
            })
            .await;

        Ok(FetchResult {
            records,
            total_count,
            next_cursor: None,
            partial,
        })
    }
}

fn property_to_record(property: &Value) -> Record {
    let cid = property["CID"].as_u64().unwrap_or(0);
    record_from(serde_json::json!({
        "cid": cid,
        "iupac_name": property["IUPACName"].as_str().unwrap_or(""),
        "smiles": property["CanonicalSMILES"].as_str().unwrap_or(""),
        "molecular_formula": property["MolecularFormula"].as_str().unwrap_or(""),
        "molecular_weight": property["MolecularWeight"].as_str().unwrap_or(""),
        "url": format!("https://pubchem.ncbi.nlm.nih.gov/compound/{cid}"),
    }))
}
