//! Keyword extraction: turns one step's records into the next step's
//! query string.
//!
//! Pure over `(records, source_id)`: no I/O, no clock, no randomness, so
//! a re-run over identical records always yields identical keywords.

use regex::Regex;
use std::collections::{HashMap, HashSet};

use medrelay_sources::models::{is_ontology_id, Record, SourceKind};

/// Keywords returned by the frequency and top-field strategies.
const TOP_KEYWORDS: usize = 5;

/// Field aliases for the generic strategy, covering both this pipeline's
/// snake_case records and the capitalized spellings older exports used.
const TITLE_FIELDS: &[&str] = &[
    "title",
    "Title",
    "brief_title",
    "official_title",
    "patent_title",
    "patentTitle",
    "iupac_name",
    "Molecule Name",
];
const ABSTRACT_FIELDS: &[&str] = &[
    "abstract",
    "Abstract",
    "patent_abstract",
    "patentAbstract",
    "summary",
    "abstractText",
];

/// Words too generic to carry a search forward.
const STOP_WORDS: &[&str] = &[
    "with", "this", "that", "from", "were", "which", "study", "using", "these", "results",
    "patent", "invention", "method", "system",
];

/// Extraction strategy, a pure function of the source kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    /// Designated field of the first record, verbatim.
    FirstField(&'static str),
    /// Designated field of up to the first five records, joined ", ".
    TopJoined(&'static str),
    /// Term frequency over title/abstract text.
    TermFrequency,
}

fn strategy_for(kind: Option<SourceKind>) -> Strategy {
    match kind {
        Some(SourceKind::Icd11) => Strategy::FirstField("title"),
        Some(SourceKind::Reactome) => Strategy::TopJoined("name"),
        Some(SourceKind::OpenTargets) => Strategy::TopJoined("symbol"),
        // free-text sources and unknown tags fall through to frequency
        _ => Strategy::TermFrequency,
    }
}

/// Derives a comma-joined keyword list from `records`; empty string when
/// nothing is extractable.
pub fn extract(records: &[Record], source_id: &str) -> String {
    if records.is_empty() {
        return String::new();
    }

    let kind = SourceKind::from_tag(source_id);

    // An Open Targets search hit carries an ontology id the next
    // association lookup takes as-is; check before the field strategies.
    if kind == Some(SourceKind::OpenTargets) {
        if let Some(id) = records[0].get("id").and_then(|v| v.as_str()) {
            if is_ontology_id(id) {
                return id.to_string();
            }
        }
    }

    match strategy_for(kind) {
        Strategy::FirstField(field) => first_field(records, field),
        Strategy::TopJoined(field) => top_joined(records, field, TOP_KEYWORDS),
        Strategy::TermFrequency => term_frequency(records, TOP_KEYWORDS),
    }
}

fn first_field(records: &[Record], field: &str) -> String {
    records
        .first()
        .and_then(|record| record.get(field))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

/// Collects `field` from up to the first `limit` records that carry it,
/// preserving result order.
fn top_joined(records: &[Record], field: &str, limit: usize) -> String {
    records
        .iter()
        .filter_map(|record| record.get(field).and_then(|v| v.as_str()))
        .filter(|value| !value.is_empty())
        .take(limit)
        .collect::<Vec<_>>()
        .join(", ")
}

fn first_non_empty<'a>(record: &'a Record, fields: &[&str]) -> Option<&'a str> {
    fields.iter().find_map(|field| {
        record
            .get(*field)
            .and_then(|v| v.as_str())
            .filter(|value| !value.trim().is_empty())
    })
}

fn token_regex() -> &'static Regex {
    use std::sync::OnceLock;
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[a-z]{4,}\b").unwrap())
}

/// Top distinct words by descending frequency over the records' title and
/// abstract text; ties broken by first occurrence in the corpus.
fn term_frequency(records: &[Record], limit: usize) -> String {
    let mut corpus = String::new();
    for record in records {
        if let Some(title) = first_non_empty(record, TITLE_FIELDS) {
            corpus.push_str(title);
            corpus.push(' ');
        }
        if let Some(abstract_text) = first_non_empty(record, ABSTRACT_FIELDS) {
            corpus.push_str(abstract_text);
            corpus.push(' ');
        }
    }
    let corpus = corpus.to_lowercase();

    let stops: HashSet<&str> = STOP_WORDS.iter().copied().collect();
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    let mut position = 0usize;
    for token in token_regex().find_iter(&corpus) {
        let word = token.as_str();
        if !stops.contains(word) {
            match counts.get_mut(word) {
                Some(entry) => entry.0 += 1,
                None => {
                    counts.insert(word, (1, position));
                }
            }
        }
        position += 1;
    }

    let mut ranked: Vec<(&str, usize, usize)> = counts
        .into_iter()
        .map(|(word, (count, first_seen))| (word, count, first_seen))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

    ranked
        .into_iter()
        .take(limit)
        .map(|(word, _, _)| word.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use medrelay_sources::models::record_from;
    use serde_json::json;

    fn records(values: Vec<serde_json::Value>) -> Vec<Record> {
        values.into_iter().map(record_from).collect()
    }

    #[test]
    fn test_frequency_orders_by_descending_count() {
        let records = records(vec![json!({
            "title": "alpha alpha beta beta beta gamma"
        })]);
        assert_eq!(extract(&records, "pubmed"), "beta, alpha, gamma");
    }

    #[test]
    fn test_frequency_ties_broken_by_first_occurrence() {
        let records = records(vec![json!({
            "title": "delta echo delta echo zulu"
        })]);
        assert_eq!(extract(&records, "pubmed"), "delta, echo, zulu");
    }

    #[test]
    fn test_frequency_drops_stop_words_and_short_tokens() {
        let records = records(vec![json!({
            "title": "study of TNF signalling",
            "abstract": "Results from this study show signalling with il6"
        })]);
        // "study", "this", "results", "from", "with" are stopped; "of" and
        // "tnf"/"il6" are under four letters or non-alphabetic
        assert_eq!(extract(&records, "pubmed"), "signalling, show");
    }

    #[test]
    fn test_frequency_uses_field_aliases() {
        let records = records(vec![json!({
            "patent_title": "sphingosine modulator",
            "patent_abstract": "sphingosine receptor compounds"
        })]);
        assert_eq!(
            extract(&records, "patentsview"),
            "sphingosine, modulator, receptor, compounds"
        );
    }

    #[test]
    fn test_frequency_empty_corpus_yields_empty_string() {
        let records = records(vec![json!({ "code": "5A11" })]);
        assert_eq!(extract(&records, "pubmed"), "");
    }

    #[test]
    fn test_single_best_hit_returns_first_title_verbatim() {
        let records = records(vec![
            json!({ "title": "Type 2 diabetes", "code": "5A11" }),
            json!({ "title": "Type 1 diabetes", "code": "5A10" }),
        ]);
        assert_eq!(extract(&records, "icd11"), "Type 2 diabetes");
    }

    #[test]
    fn test_single_best_hit_empty_records() {
        assert_eq!(extract(&[], "icd11"), "");
    }

    #[test]
    fn test_opentargets_search_hit_returns_ontology_id() {
        let records = records(vec![json!({ "id": "EFO_0000384", "name": "Crohn's disease" })]);
        assert_eq!(extract(&records, "opentargets"), "EFO_0000384");
    }

    #[test]
    fn test_opentargets_associations_return_top_symbols() {
        let records = records(vec![
            json!({ "symbol": "TNF", "score": 0.9 }),
            json!({ "symbol": "IL6", "score": 0.8 }),
            json!({ "score": 0.7 }),
            json!({ "symbol": "JAK1", "score": 0.6 }),
            json!({ "symbol": "JAK2", "score": 0.5 }),
            json!({ "symbol": "STAT3", "score": 0.4 }),
            json!({ "symbol": "IL13", "score": 0.3 }),
        ]);
        // the record without a symbol does not count against the limit
        assert_eq!(
            extract(&records, "opentargets"),
            "TNF, IL6, JAK1, JAK2, STAT3"
        );
    }

    #[test]
    fn test_reactome_returns_top_pathway_names() {
        let records = records(vec![
            json!({ "name": "Sphingolipid metabolism", "st_id": "R-HSA-1" }),
            json!({ "name": "Interleukin signaling", "st_id": "R-HSA-2" }),
        ]);
        assert_eq!(
            extract(&records, "reactome"),
            "Sphingolipid metabolism, Interleukin signaling"
        );
    }

    #[test]
    fn test_unknown_source_falls_back_to_frequency() {
        let records = records(vec![json!({ "title": "prion folding folding" })]);
        assert_eq!(extract(&records, "some-new-source"), "folding, prion");
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let records = records(vec![json!({
            "title": "kinase inhibitor",
            "abstract": "kinase selectivity profiling"
        })]);
        let first = extract(&records, "pubmed");
        let second = extract(&records, "pubmed");
        assert_eq!(first, second);
    }
}
