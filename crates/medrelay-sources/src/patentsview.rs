//! PatentsView search API client.
//!
//! Endpoint: https://search.patentsview.org/api/v1/patent/
//!
//! Page-number pagination: the caller increments `o.page` starting at 1
//! and the loop ends on a zero-record page or once the running total meets
//! the reported `total_patent_count`. The v1 API requires an `X-Api-Key`;
//! a missing key degrades to an empty partial result rather than failing
//! the pipeline.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::instrument;

use medrelay_common::net::AllowlistedClient as Client;
use medrelay_common::retry::RetryPolicy;
use medrelay_common::RelayError;

use crate::fetcher::SourceFetcher;
use crate::models::{record_from, FetchResult, PageChunk, PageCursor, Record, SourceKind};
use crate::paging::collect_pages;

const PV_API_URL: &str = "https://search.patentsview.org/api/v1/patent/";

/// The API caps page size at 100.
const MAX_PAGE_SIZE: usize = 100;

pub struct PatentsViewFetcher {
    client: Client,
    api_key: Option<String>,
    year_from: Option<i32>,
    year_to: Option<i32>,
    policy: RetryPolicy,
}

impl PatentsViewFetcher {
    pub fn new(client: Client, api_key: Option<String>) -> Self {
        Self {
            client,
            api_key,
            year_from: None,
            year_to: None,
            policy: RetryPolicy::default(),
        }
    }

    /// Restricts results to patents granted within a year range.
    pub fn with_year_range(mut self, from: Option<i32>, to: Option<i32>) -> Self {
        self.year_from = from;
        self.year_to = to;
        self
    }

    fn build_query_body(&self, keywords: &str, page: u32, size: usize) -> Value {
        let mut conditions = Vec::new();

        if let Some(from) = self.year_from {
            conditions.push(json!({ "_gte": { "patent_date": format!("{from}-01-01") } }));
        }
        if let Some(to) = self.year_to {
            conditions.push(json!({ "_lte": { "patent_date": format!("{to}-12-31") } }));
        }
        conditions.push(json!({
            "_or": [
                { "_text_any": { "patent_title": keywords } },
                { "_text_any": { "patent_abstract": keywords } },
                { "_text_any": { "assignees.assignee_organization": keywords } }
            ]
        }));

        let query = if conditions.len() > 1 {
            json!({ "_and": conditions })
        } else {
            conditions.remove(0)
        };

        json!({
            "q": query,
            "f": [
                "patent_id",
                "patent_title",
                "patent_date",
                "patent_abstract",
                "assignees.assignee_organization",
                "inventors.inventor_name_first",
                "inventors.inventor_name_last"
            ],
            "o": {
                "size": size.min(MAX_PAGE_SIZE),
                "page": page,
                "sort": [{ "patent_date": "desc" }]
            }
        })
    }

    async fn fetch_page(
        &self,
        keywords: &str,
        page_size: usize,
        cursor: Option<PageCursor>,
    ) -> Result<PageChunk, RelayError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| RelayError::Auth("PatentsView API key not configured".into()))?;

        let page = match cursor {
            Some(PageCursor::Page(p)) => p,
            _ => 1,
        };
        let body = self.build_query_body(keywords, page, page_size);

        let resp: Value = self
            .client
            .post(PV_API_URL)?
            .header("X-Api-Key", key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let records = resp["patents"]
            .as_array()
            .map(|patents| patents.iter().map(patent_to_record).collect())
            .unwrap_or_default();
        let total_count = resp["total_patent_count"].as_u64().map(|n| n as usize);

        Ok(PageChunk {
            records,
            total_count,
            next_cursor: Some(PageCursor::Page(page + 1)),
        })
    }
}

#[async_trait]
impl SourceFetcher for PatentsViewFetcher {
    fn kind(&self) -> SourceKind {
        SourceKind::PatentsView
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

fn patent_to_record(patent: &Value) -> Record {
    let patent_id = patent["patent_id"].as_str().unwrap_or("");
    let date = patent["patent_date"].as_str().unwrap_or("");

    let assignee = patent["assignees"]
        .as_array()
        .and_then(|a| a.first())
        .and_then(|a| a["assignee_organization"].as_str())
        .unwrap_or("");

    let inventors: String = patent["inventors"]
        .as_array()
        .map(|inv| {
            inv.iter()
                .map(|i| {
                    format!(
                        "{} {}",
                        i["inventor_name_first"].as_str().unwrap_or(""),
                        i["inventor_name_last"].as_str().unwrap_or("")
                    )
                    .trim()
                    .to_string()
                })
                .filter(|name| !name.is_empty())
                .collect::<Vec<_>>()
                .join("; ")
        })
        .unwrap_or_default();

    record_from(json!({
        "patent_id": patent_id,
        "patent_title": patent["patent_title"].as_str().unwrap_or(""),
        "patent_abstract": patent["patent_abstract"].as_str().unwrap_or(""),
        "date": date,
        "year": if date.len() >= 4 { &date[..4] } else { "" },
        "assignee": assignee,
        "inventors": inventors,
        "url": format!("https://patents.google.com/patent/US{patent_id}"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher_with_years() -> PatentsViewFetcher {
        PatentsViewFetcher::new(
            medrelay_common::net::AllowlistedClient::new().unwrap(),
            Some("test-key".into()),
        )
        .with_year_range(Some(2020), Some(2024))
    }

    #[test]
    fn test_query_body_includes_year_filters() {
        let body = fetcher_with_years().build_query_body("sphingosine", 1, 50);
        let conditions = body["q"]["_and"].as_array().unwrap();
        assert_eq!(conditions.len(), 3);
        assert_eq!(conditions[0]["_gte"]["patent_date"], "2020-01-01");
        assert_eq!(conditions[1]["_lte"]["patent_date"], "2024-12-31");
        assert_eq!(body["o"]["page"], 1);
        assert_eq!(body["o"]["size"], 50);
    }

    #[test]
    fn test_query_body_without_years_is_bare_text_query() {
        let fetcher = PatentsViewFetcher::new(
            medrelay_common::net::AllowlistedClient::new().unwrap(),
            Some("test-key".into()),
        );
        let body = fetcher.build_query_body("dermatitis", 2, 500);
        assert!(body["q"]["_and"].is_null());
        assert!(body["q"]["_or"].is_array());
        // page size is capped at the API maximum
        assert_eq!(body["o"]["size"], 100);
        assert_eq!(body["o"]["page"], 2);
    }

    #[test]
    fn test_patent_to_record() {
        let patent = serde_json::json!({
            "patent_id": "11234567",
            "patent_title": "S1P receptor modulators",
            "patent_abstract": "Compounds for treating inflammatory disease.",
            "patent_date": "2023-05-02",
            "assignees": [{ "assignee_organization": "Acme Pharma" }],
            "inventors": [
                { "inventor_name_first": "Ada", "inventor_name_last": "Lovelace" },
                { "inventor_name_first": "", "inventor_name_last": "" }
            ]
        });
        let record = patent_to_record(&patent);
        assert_eq!(record["patent_id"], "11234567");
        assert_eq!(record["year"], "2023");
        assert_eq!(record["assignee"], "Acme Pharma");
        assert_eq!(record["inventors"], "Ada Lovelace");
        assert_eq!(
            record["url"],
            "https://patents.google.com/patent/US11234567"
        );
    }
}
