//! ClinicalTrials.gov v2 API client.
//!
//! API docs: https://clinicaltrials.gov/data-api/api
//! Endpoint: https://clinicaltrials.gov/api/v2/studies
//!
//! Pagination is driven by the server-issued `nextPageToken`; the token is
//! echoed back on every request after the first and the loop ends when a
//! response omits it.

use async_trait::async_trait;
use serde_json::Value;
use tracing::instrument;

use medrelay_common::net::AllowlistedClient as Client;
use medrelay_common::retry::RetryPolicy;
use medrelay_common::RelayError;

use crate::fetcher::SourceFetcher;
use crate::models::{record_from, FetchResult, PageChunk, PageCursor, Record, SourceKind};
use crate::paging::collect_pages;

const CT_API_URL: &str = "https://clinicaltrials.gov/api/v2/studies";

pub struct ClinicalTrialsFetcher {
    client: Client,
    policy: RetryPolicy,
}

impl ClinicalTrialsFetcher {
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
        let mut params = vec![
            ("format", "json".to_string()),
            ("pageSize", page_size.to_string()),
            ("countTotal", "true".to_string()),
            ("query.term", query.to_string()),
        ];
        if let Some(PageCursor::Token(token)) = cursor {
            params.push(("pageToken", token));
        }

        let resp: Value = self
            .client
            .get(CT_API_URL)?
            .query(&params)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let records = resp["studies"]
            .as_array()
            .map(|studies| studies.iter().map(study_to_record).collect())
            .unwrap_or_default();
        let total_count = resp["totalCount"].as_u64().map(|n| n as usize);
        let next_cursor = resp["nextPageToken"]
            .as_str()
            .map(|t| PageCursor::Token(t.to_string()));

        Ok(PageChunk {
            records,
            total_count,
            next_cursor,
        })
    }
}

#[async_trait]
impl SourceFetcher for ClinicalTrialsFetcher {
    fn kind(&self) -> SourceKind {
        SourceKind::ClinicalTrials
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

/// Flatten a study's `protocolSection` modules into one record.
fn study_to_record(study: &Value) -> Record {
    let proto = &study["protocolSection"];
    let id_mod = &proto["identificationModule"];
    let status_mod = &proto["statusModule"];
    let design_mod = &proto["designModule"];
    let cond_mod = &proto["conditionsModule"];
    let interv_mod = &proto["armsInterventionsModule"];
    let sponsor_mod = &proto["sponsorCollaboratorsModule"];
    let desc_mod = &proto["descriptionModule"];

    let nct_id = id_mod["nctId"].as_str().unwrap_or("");

    let phases: String = design_mod["phases"]
        .as_array()
        .map(|p| {
            p.iter()
                .filter_map(|v| v.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default();

    let conditions: String = cond_mod["conditions"]
        .as_array()
        .map(|c| {
            c.iter()
                .filter_map(|v| v.as_str())
                .collect::<Vec<_>>()
                .join("; ")
        })
        .unwrap_or_default();

    let interventions: String = interv_mod["interventions"]
        .as_array()
        .map(|iv| {
            iv.iter()
                .map(|i| {
                    format!(
                        "{}: {}",
                        i["type"].as_str().unwrap_or(""),
                        i["name"].as_str().unwrap_or("")
                    )
                })
                .collect::<Vec<_>>()
                .join("; ")
        })
        .unwrap_or_default();

    record_from(serde_json::json!({
        "nct_id": nct_id,
        "title": id_mod["briefTitle"].as_str().unwrap_or(""),
        "official_title": id_mod["officialTitle"].as_str().unwrap_or(""),
        "status": status_mod["overallStatus"].as_str().unwrap_or(""),
        "phases": phases,
        "study_type": design_mod["studyType"].as_str().unwrap_or(""),
        "conditions": conditions,
        "interventions": interventions,
        "sponsor": sponsor_mod["leadSponsor"]["name"].as_str().unwrap_or(""),
        "start_date": status_mod["startDateStruct"]["date"].as_str().unwrap_or(""),
        "completion_date": status_mod["completionDateStruct"]["date"].as_str().unwrap_or(""),
        "summary": desc_mod["briefSummary"].as_str().unwrap_or(""),
        "url": format!("https://clinicaltrials.gov/study/{nct_id}"),
    }))
}
