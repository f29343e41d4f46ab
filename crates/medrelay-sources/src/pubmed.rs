//! PubMed E-utilities client.
//!
//! Endpoints used:
//!   esearch: https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esearch.fcgi
//!            (JSON; reports the total count and the matching PMID list)
//!   efetch:  https://eutils.ncbi.nlm.nih.gov/entrez/eutils/efetch.fcgi
//!            (XML; PMIDs resolved to article records in batches of 20)

use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use medrelay_common::net::AllowlistedClient as Client;
use medrelay_common::retry::{with_retry, RetryPolicy};
use medrelay_common::RelayError;

use crate::fetcher::SourceFetcher;
use crate::models::{FetchResult, Record, SourceKind};
use crate::paging::{fetch_in_batches, DEFAULT_BATCH_SIZE};

const ESEARCH_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esearch.fcgi";
const EFETCH_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/efetch.fcgi";

pub struct PubMedFetcher {
    client: Client,
    api_key: Option<String>,
    date_from: Option<String>,
    date_to: Option<String>,
    policy: RetryPolicy,
}

impl PubMedFetcher {
    pub fn new(client: Client, api_key: Option<String>) -> Self {
        Self {
            client,
            api_key,
            date_from: None,
            date_to: None,
            policy: RetryPolicy::default(),
        }
    }

    /// Restricts searches to a publication-date window (YYYY/MM/DD or YYYY).
    pub fn with_date_window(mut self, from: Option<String>, to: Option<String>) -> Self {
        self.date_from = from;
        self.date_to = to;
        self
    }

    fn base_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("db", "pubmed".to_string())];
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.clone()));
        }
        params
    }

    /// Search PubMed; returns the reported total and the PMID list.
    async fn esearch(&self, query: &str, retmax: usize) -> Result<(usize, Vec<String>), RelayError> {
        let mut params = self.base_params();
        params.push(("term", query.to_string()));
        params.push(("retmax", retmax.to_string()));
        params.push(("retmode", "json".to_string()));
        params.push(("usehistory", "n".to_string()));
        if self.date_from.is_some() || self.date_to.is_some() {
            params.push(("datetype", "pdat".to_string()));
        }
        if let Some(from) = &self.date_from {
            params.push(("mindate", from.clone()));
        }
        if let Some(to) = &self.date_to {
            params.push(("maxdate", to.clone()));
        }

        let resp: Value = self
            .client
            .get(ESEARCH_URL)?
            .query(&params)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let count = resp["esearchresult"]["count"]
            .as_str()
            .and_then(|c| c.parse().ok())
            .unwrap_or(0);
        let ids: Vec<String> = resp["esearchresult"]["idlist"]
            .as_array()
            .unwrap_or(&vec![])
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect();

        debug!(count, n = ids.len(), "PubMed esearch returned PMIDs");
        Ok((count, ids))
    }

    /// Fetch PubMed XML for one PMID batch and parse into records.
    async fn efetch_batch(&self, pmids: Vec<String>) -> Result<Vec<Record>, RelayError> {
        let mut params = self.base_params();
        params.push(("id", pmids.join(",")));
        params.push(("rettype", "abstract".to_string()));
        params.push(("retmode", "xml".to_string()));

        let xml = self
            .client
            .get(EFETCH_URL)?
            .query(&params)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        parse_pubmed_xml(&xml)
    }
}

#[async_trait]
impl SourceFetcher for PubMedFetcher {
    fn kind(&self) -> SourceKind {
        SourceKind::PubMed
    }

    #[instrument(skip(self))]
    async fn fetch(
        &self,
        query: &str,
        max_pages: usize,
        page_size: usize,
    ) -> anyhow::Result<FetchResult> {
        let retmax = max_pages.saturating_mul(page_size).max(1);
        let (count, pmids) =
            match with_retry(&self.policy, "pubmed esearch", || self.esearch(query, retmax)).await {
                Ok(r) => r,
                Err(err) => {
                    warn!(error = %err, "PubMed search failed, returning empty result");
                    return Ok(FetchResult::empty_partial());
                }
            };

        if pmids.is_empty() {
            return Ok(FetchResult {
                records: Vec::new(),
                total_count: count,
                next_cursor: None,
                partial: false,
            });
        }

        let (records, partial) =
            fetch_in_batches(&pmids, DEFAULT_BATCH_SIZE, &self.policy, |batch| {
                self.efetch_batch(batch)
            })
            .await;

        Ok(FetchResult {
            records,
            total_count: count,
            next_cursor: None,
            partial,
        })
    }
}

/// Parse PubMed XML (efetch abstract mode) into records.
/// Handles the `<PubmedArticleSet><PubmedArticle>` structure; an article
/// without a title is dropped and logged rather than failing the batch.
fn parse_pubmed_xml(xml: &str) -> Result<Vec<Record>, RelayError> {
    struct ArticleAcc {
        pmid: String,
        title: String,
        abstract_text: String,
        authors: Vec<String>,
        journal: String,
        year: String,
    }

    let mut records: Vec<Record> = Vec::new();
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut current: Option<ArticleAcc> = None;
    let mut in_pmid = false;
    let mut in_title = false;
    let mut in_abstract = false;
    let mut in_author = false;
    let mut in_last_name = false;
    let mut in_fore_name = false;
    let mut in_journal = false;
    let mut in_pub_date = false;
    let mut in_year = false;
    let mut current_last = String::new();
    let mut current_fore = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"PubmedArticle" => {
                    current = Some(ArticleAcc {
                        pmid: String::new(),
                        title: String::new(),
                        abstract_text: String::new(),
                        authors: Vec::new(),
                        journal: String::new(),
                        year: String::new(),
                    });
                }
                b"PMID" => in_pmid = true,
                b"ArticleTitle" => in_title = true,
                b"AbstractText" => in_abstract = true,
                b"Author" => {
                    in_author = true;
                    current_last.clear();
                    current_fore.clear();
                }
                b"LastName" => in_last_name = true,
                b"ForeName" => in_fore_name = true,
                b"Title" => in_journal = true,
                b"PubDate" => in_pub_date = true,
                b"Year" => in_year = true,
                _ => {}
            },
            Ok(Event::Text(ref e)) => {
                let text = e.unescape().unwrap_or_default().to_string();
                if let Some(ref mut article) = current {
                    if in_pmid && article.pmid.is_empty() {
                        article.pmid = text.clone();
                    }
                    if in_title {
                        article.title.push_str(&text);
                    }
                    if in_abstract {
                        if !article.abstract_text.is_empty() {
                            article.abstract_text.push(' ');
                        }
                        article.abstract_text.push_str(&text);
                    }
                    if in_last_name {
                        current_last = text.clone();
                    }
                    if in_fore_name {
                        current_fore = text.clone();
                    }
                    if in_journal && article.journal.is_empty() {
                        article.journal = text.clone();
                    }
                    if in_pub_date && in_year && article.year.is_empty() {
                        article.year = text.clone();
                    }
                }
            }
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"PMID" => in_pmid = false,
                b"ArticleTitle" => in_title = false,
                b"AbstractText" => in_abstract = false,
                b"LastName" => in_last_name = false,
                b"ForeName" => in_fore_name = false,
                b"Title" => in_journal = false,
                b"PubDate" => in_pub_date = false,
                b"Year" => in_year = false,
                b"Author" => {
                    if in_author {
                        if let Some(ref mut article) = current {
                            let name = if current_fore.is_empty() {
                                current_last.clone()
                            } else {
                                format!("{current_fore} {current_last}")
                            };
                            if !name.is_empty() {
                                article.authors.push(name);
                            }
                        }
                        in_author = false;
                    }
                }
                b"PubmedArticle" => {
                    if let Some(article) = current.take() {
                        if article.title.is_empty() {
                            warn!(pmid = %article.pmid, "skipping article with empty title");
                        } else {
                            let mut record = Record::new();
                            record.insert("pmid".into(), Value::String(article.pmid.clone()));
                            record.insert("title".into(), Value::String(article.title));
                            record.insert(
                                "abstract".into(),
                                Value::String(article.abstract_text),
                            );
                            record.insert(
                                "authors".into(),
                                Value::String(article.authors.join("; ")),
                            );
                            record.insert("journal".into(), Value::String(article.journal));
                            record.insert("pub_year".into(), Value::String(article.year));
                            record.insert(
                                "url".into(),
                                Value::String(format!(
                                    "https://pubmed.ncbi.nlm.nih.gov/{}/",
                                    article.pmid
                                )),
                            );
                            records.push(record);
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                if records.is_empty() {
                    return Err(RelayError::Xml(e.to_string()));
                }
                warn!("XML parse error after {} articles: {e}", records.len());
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<PubmedArticleSet>
  <PubmedArticle>
    <MedlineCitation>
      <PMID>12345678</PMID>
      <Article>
        <Journal>
          <Title>Nature</Title>
          <JournalIssue><PubDate><Year>2021</Year></PubDate></JournalIssue>
        </Journal>
        <ArticleTitle>Sphingosine-1-phosphate signalling in dermatitis</ArticleTitle>
        <Abstract><AbstractText>Background text.</AbstractText><AbstractText>Conclusion text.</AbstractText></Abstract>
        <AuthorList>
          <Author><LastName>Smith</LastName><ForeName>John</ForeName></Author>
          <Author><LastName>Doe</LastName><ForeName>Jane</ForeName></Author>
        </AuthorList>
      </Article>
    </MedlineCitation>
  </PubmedArticle>
</PubmedArticleSet>"#;

    #[test]
    fn test_parse_minimal_pubmed_xml() {
        let records = parse_pubmed_xml(SAMPLE).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["pmid"], "12345678");
        assert_eq!(
            records[0]["title"],
            "Sphingosine-1-phosphate signalling in dermatitis"
        );
        assert_eq!(records[0]["abstract"], "Background text. Conclusion text.");
        assert_eq!(records[0]["authors"], "John Smith; Jane Doe");
        assert_eq!(records[0]["journal"], "Nature");
        assert_eq!(records[0]["pub_year"], "2021");
        assert_eq!(
            records[0]["url"],
            "https://pubmed.ncbi.nlm.nih.gov/12345678/"
        );
    }

    #[test]
    fn test_article_without_title_is_dropped() {
        let xml = r#"<PubmedArticleSet>
  <PubmedArticle>
    <MedlineCitation><PMID>1</PMID><Article></Article></MedlineCitation>
  </PubmedArticle>
  <PubmedArticle>
    <MedlineCitation>
      <PMID>2</PMID>
      <Article><ArticleTitle>Kept</ArticleTitle></Article>
    </MedlineCitation>
  </PubmedArticle>
</PubmedArticleSet>"#;
        let records = parse_pubmed_xml(xml).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["pmid"], "2");
    }

    #[test]
    fn test_empty_document_yields_no_records() {
        let records = parse_pubmed_xml("<PubmedArticleSet></PubmedArticleSet>").unwrap();
        assert!(records.is_empty());
    }
}
