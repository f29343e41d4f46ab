//! Data model shared by all source clients.

use serde_json::Value;

/// A single result record exactly as a source shaped it. Field names are
/// source-dependent and never normalized beyond what keyword extraction
/// needs downstream.
pub type Record = serde_json::Map<String, Value>;

/// Builds a [`Record`] from a `serde_json::json!` object literal.
pub fn record_from(value: Value) -> Record {
    value.as_object().cloned().unwrap_or_default()
}

/// Resume position for a paginated fetch; `None` means start of results.
/// A cursor is only meaningful to the fetch invocation that produced it
/// and is never shared across sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCursor {
    /// Server-issued continuation token, echoed back verbatim.
    Token(String),
    /// Numeric page counter (base depends on the source's protocol).
    Page(u32),
    /// Record offset from the start of the result set.
    Offset(usize),
}

/// One page or batch of results as parsed by a fetcher.
#[derive(Debug, Clone, Default)]
pub struct PageChunk {
    pub records: Vec<Record>,
    /// Total matching records as reported by the source, when it reports one.
    pub total_count: Option<usize>,
    pub next_cursor: Option<PageCursor>,
}

/// Outcome of one logical fetch across all pages/batches.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub records: Vec<Record>,
    /// Total-count hint: the source-reported total where available,
    /// otherwise the number of records actually fetched.
    pub total_count: usize,
    pub next_cursor: Option<PageCursor>,
    /// True when the fetch stopped early (retry exhaustion, auth failure,
    /// skipped batches) and `records` may be incomplete.
    pub partial: bool,
}

impl FetchResult {
    /// The degraded result used when a fetch aborts before producing
    /// anything usable.
    pub fn empty_partial() -> Self {
        Self {
            records: Vec::new(),
            total_count: 0,
            next_cursor: None,
            partial: true,
        }
    }
}

/// The closed set of sources the pipeline can talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    PubMed,
    ClinicalTrials,
    PatentsView,
    Uspto,
    PubChem,
    Icd11,
    OpenTargets,
    Reactome,
}

impl SourceKind {
    /// Resolves a free-form step tag, case-insensitively. Unknown tags are
    /// `None`; callers decide whether that means "skip" (orchestrator) or
    /// "generic strategy" (keyword extraction).
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_lowercase().as_str() {
            "pubmed" => Some(SourceKind::PubMed),
            "clinicaltrials" | "clinical_trials" => Some(SourceKind::ClinicalTrials),
            "patentsview" => Some(SourceKind::PatentsView),
            "uspto" => Some(SourceKind::Uspto),
            "pubchem" => Some(SourceKind::PubChem),
            "icd11" => Some(SourceKind::Icd11),
            "opentargets" => Some(SourceKind::OpenTargets),
            "reactome" => Some(SourceKind::Reactome),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::PubMed => "pubmed",
            SourceKind::ClinicalTrials => "clinicaltrials",
            SourceKind::PatentsView => "patentsview",
            SourceKind::Uspto => "uspto",
            SourceKind::PubChem => "pubchem",
            SourceKind::Icd11 => "icd11",
            SourceKind::OpenTargets => "opentargets",
            SourceKind::Reactome => "reactome",
        }
    }
}

/// Whether a query string is an ontology identifier handle (the kind the
/// disease-association lookup takes as-is) rather than free text.
pub fn is_ontology_id(query: &str) -> bool {
    ["EFO_", "MONDO_", "Orphanet_"]
        .iter()
        .any(|prefix| query.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_tag_case_insensitive() {
        assert_eq!(SourceKind::from_tag("PubMed"), Some(SourceKind::PubMed));
        assert_eq!(SourceKind::from_tag(" ICD11 "), Some(SourceKind::Icd11));
        assert_eq!(
            SourceKind::from_tag("clinical_trials"),
            Some(SourceKind::ClinicalTrials)
        );
        assert_eq!(SourceKind::from_tag("scopus"), None);
    }

    #[test]
    fn test_tag_round_trip() {
        for kind in [
            SourceKind::PubMed,
            SourceKind::ClinicalTrials,
            SourceKind::PatentsView,
            SourceKind::Uspto,
            SourceKind::PubChem,
            SourceKind::Icd11,
            SourceKind::OpenTargets,
            SourceKind::Reactome,
        ] {
            assert_eq!(SourceKind::from_tag(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn test_ontology_id_prefixes() {
        assert!(is_ontology_id("EFO_0000384"));
        assert!(is_ontology_id("MONDO_0005148"));
        assert!(is_ontology_id("Orphanet_355"));
        assert!(!is_ontology_id("type 2 diabetes"));
        assert!(!is_ontology_id("efo_0000384"));
    }
}
