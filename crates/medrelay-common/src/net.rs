use reqwest::{Client, ClientBuilder};
use std::collections::HashSet;
use std::time::Duration;
use url::Url;

use crate::error::RelayError;

/// Per-request timeout applied to every outbound call, independent of how
/// long the surrounding pipeline has been running.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// An HTTP client capped to the research APIs this pipeline talks to.
/// Requests to any host outside the allowlist are refused before they
/// leave the process.
#[derive(Debug, Clone)]
pub struct AllowlistedClient {
    client: Client,
    allowlist: HashSet<String>,
}

impl AllowlistedClient {
    /// Creates a client allowing the default set of upstream API hosts.
    pub fn new() -> Result<Self, RelayError> {
        let mut allowlist = HashSet::new();
        let domains = vec![
            "eutils.ncbi.nlm.nih.gov",       // PubMed E-utilities
            "pubchem.ncbi.nlm.nih.gov",      // PubChem PUG REST
            "clinicaltrials.gov",            // ClinicalTrials.gov v2
            "search.patentsview.org",        // PatentsView
            "developer.uspto.gov",           // USPTO ds-api
            "id.who.int",                    // ICD-11 entity search
            "icdaccessmanagement.who.int",   // ICD-11 OAuth2 token
            "api.platform.opentargets.org",  // Open Targets GraphQL
            "reactome.org",                  // Reactome ContentService
            "localhost",
            "127.0.0.1",
        ];

        for d in domains {
            allowlist.insert(d.to_string());
        }

        let client = ClientBuilder::new()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RelayError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self { client, allowlist })
    }

    /// Appends an exact hostname to the allowlist.
    pub fn allow_domain(&mut self, domain: &str) {
        self.allowlist.insert(domain.to_string());
    }

    /// Whether a URL is permitted under the current allowlist.
    pub fn is_allowed(&self, url: &str) -> bool {
        if let Ok(parsed) = Url::parse(url) {
            if let Some(host) = parsed.host_str() {
                for allowed in &self.allowlist {
                    if host == allowed || host.ends_with(&format!(".{allowed}")) {
                        return true;
                    }
                }
            }
        }
        false
    }

    pub fn get(&self, url: &str) -> Result<reqwest::RequestBuilder, RelayError> {
        if !self.is_allowed(url) {
            return Err(RelayError::Security(format!(
                "host not in allowlist for URL {url}"
            )));
        }
        Ok(self.client.get(url))
    }

    pub fn post(&self, url: &str) -> Result<reqwest::RequestBuilder, RelayError> {
        if !self.is_allowed(url) {
            return Err(RelayError::Security(format!(
                "host not in allowlist for URL {url}"
            )));
        }
        Ok(self.client.post(url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_hosts_allowed() {
        let client = AllowlistedClient::new().unwrap();
        assert!(client.is_allowed("https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esearch.fcgi"));
        assert!(client.is_allowed("https://clinicaltrials.gov/api/v2/studies"));
        assert!(client.is_allowed("https://reactome.org/ContentService/search/query"));
    }

    #[test]
    fn test_unknown_host_refused() {
        let client = AllowlistedClient::new().unwrap();
        assert!(!client.is_allowed("https://example.com/anything"));
        assert!(client.get("https://example.com/anything").is_err());
    }

    #[test]
    fn test_subdomain_of_allowed_host() {
        let mut client = AllowlistedClient::new().unwrap();
        assert!(!client.is_allowed("https://ftp.ncbi.nlm.nih.gov/pub"));
        client.allow_domain("ncbi.nlm.nih.gov");
        assert!(client.is_allowed("https://ftp.ncbi.nlm.nih.gov/pub"));
    }
}
