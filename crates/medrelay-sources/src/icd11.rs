//! WHO ICD-11 entity search client.
//!
//! Endpoints:
//!   token:  https://icdaccessmanagement.who.int/connect/token (OAuth2
//!           client-credentials grant)
//!   search: https://id.who.int/icd/entity/search
//!
//! The bearer token is cached on the fetcher instance with an expiry and
//! refreshed when stale. Missing credentials degrade to an empty partial
//! result; they never crash the pipeline.

use async_trait::async_trait;
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use medrelay_common::net::AllowlistedClient as Client;
use medrelay_common::retry::{with_retry, RetryPolicy};
use medrelay_common::RelayError;

use crate::fetcher::SourceFetcher;
use crate::models::{record_from, FetchResult, Record, SourceKind};

const TOKEN_URL: &str = "https://icdaccessmanagement.who.int/connect/token";
const SEARCH_URL: &str = "https://id.who.int/icd/entity/search";

/// Refresh this long before the server-side expiry to avoid racing it.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

struct CachedToken {
    token: String,
    expires_at: Instant,
}

pub struct Icd11Fetcher {
    client: Client,
    client_id: Option<String>,
    client_secret: Option<String>,
    token: Mutex<Option<CachedToken>>,
    policy: RetryPolicy,
}

impl Icd11Fetcher {
    pub fn new(client: Client, client_id: Option<String>, client_secret: Option<String>) -> Self {
        Self {
            client,
            client_id,
            client_secret,
            token: Mutex::new(None),
            policy: RetryPolicy::default(),
        }
    }

    /// Returns a valid bearer token, fetching or refreshing as needed.
    async fn access_token(&self) -> Result<String, RelayError> {
        let mut guard = self.token.lock().await;
        if let Some(cached) = guard.as_ref() {
            if Instant::now() < cached.expires_at {
                return Ok(cached.token.clone());
            }
        }

        let (id, secret) = match (&self.client_id, &self.client_secret) {
            (Some(id), Some(secret)) => (id.as_str(), secret.as_str()),
            _ => return Err(RelayError::Auth("ICD-11 credentials not configured".into())),
        };

        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", id),
            ("client_secret", secret),
            ("scope", "icdapi_access"),
        ];
        let body: Value = self
            .client
            .post(TOKEN_URL)?
            .form(&form)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let token = body["access_token"]
            .as_str()
            .ok_or_else(|| RelayError::Auth("token endpoint returned no access_token".into()))?
            .to_string();
        let ttl = body["expires_in"].as_u64().unwrap_or(3600);
        let ttl = Duration::from_secs(ttl).saturating_sub(TOKEN_EXPIRY_MARGIN);

        debug!(ttl_secs = ttl.as_secs(), "ICD-11 token obtained");
        *guard = Some(CachedToken {
            token: token.clone(),
            expires_at: Instant::now() + ttl,
        });
        Ok(token)
    }

    async fn search(&self, query: &str) -> Result<Vec<Record>, RelayError> {
        let token = self.access_token().await?;

        let resp: Value = self
            .client
            .get(SEARCH_URL)?
            .bearer_auth(&token)
            .header("Accept", "application/json")
            .header("API-Version", "v2")
            .query(&[("q", query), ("useFlexisearch", "true")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let records = resp["destinationEntities"]
            .as_array()
            .map(|entities| entities.iter().map(entity_to_record).collect())
            .unwrap_or_default();

        Ok(records)
    }
}

#[async_trait]
impl SourceFetcher for Icd11Fetcher {
    fn kind(&self) -> SourceKind {
        SourceKind::Icd11
    }

    /// The search endpoint is single-shot; `max_pages`/`page_size` do not
    /// apply.
    #[instrument(skip(self))]
    async fn fetch(
        &self,
        query: &str,
        _max_pages: usize,
        _page_size: usize,
    ) -> anyhow::Result<FetchResult> {
        let records = match with_retry(&self.policy, "icd11 search", || self.search(query)).await {
            Ok(records) => records,
            Err(err) => {
                warn!(error = %err, "ICD-11 search failed, returning empty result");
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

fn entity_to_record(entity: &Value) -> Record {
    let title = entity["title"].as_str().unwrap_or("");
    record_from(serde_json::json!({
        "title": strip_markup(title),
        "code": entity["theCode"].as_str().unwrap_or(""),
        "score": entity["score"].as_f64().unwrap_or(0.0),
    }))
}

/// Drops the `<em class='found'>` match markup the search API embeds in
/// titles.
fn strip_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for ch in text.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}
