//! Result sinks: persistence of per-step artifacts.
//!
//! The orchestrator hands every successful step's raw records to a sink;
//! the default writes a JSON array plus a flattened CSV per step. Sink
//! failures are logged by the orchestrator and never fail a step.

use serde_json::Value;
use std::collections::BTreeSet;
use std::fs::File;
use std::path::PathBuf;
use tracing::debug;

use medrelay_sources::models::Record;

pub trait ResultSink: Send + Sync {
    fn persist(&self, step_index: usize, source_tag: &str, records: &[Record])
        -> anyhow::Result<()>;
}

/// Writes `step_{n}_{source}_output.json` and `.csv` into a directory.
pub struct DirectorySink {
    out_dir: PathBuf,
}

impl DirectorySink {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }
}

impl ResultSink for DirectorySink {
    fn persist(
        &self,
        step_index: usize,
        source_tag: &str,
        records: &[Record],
    ) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.out_dir)?;
        let stem = format!("step_{}_{}_output", step_index + 1, source_tag);

        let json_path = self.out_dir.join(format!("{stem}.json"));
        serde_json::to_writer_pretty(File::create(&json_path)?, records)?;

        let csv_path = self.out_dir.join(format!("{stem}.csv"));
        write_csv(&csv_path, records)?;

        debug!(
            json = %json_path.display(),
            csv = %csv_path.display(),
            n = records.len(),
            "step artifacts written"
        );
        Ok(())
    }
}

/// One row per record; columns are the sorted union of all field names
/// encountered. Nested values are JSON-stringified into their cell.
fn write_csv(path: &std::path::Path, records: &[Record]) -> anyhow::Result<()> {
    let mut columns: BTreeSet<String> = BTreeSet::new();
    for record in records {
        columns.extend(record.keys().cloned());
    }
    let columns: Vec<String> = columns.into_iter().collect();

    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(&columns)?;
    for record in records {
        let row: Vec<String> = columns
            .iter()
            .map(|column| record.get(column).map(cell_value).unwrap_or_default())
            .collect();
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

fn cell_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Records what was persisted without touching the filesystem; test double.
#[derive(Default)]
pub struct MemorySink {
    pub persisted: std::sync::Mutex<Vec<(usize, String, usize)>>,
}

impl ResultSink for MemorySink {
    fn persist(
        &self,
        step_index: usize,
        source_tag: &str,
        records: &[Record],
    ) -> anyhow::Result<()> {
        self.persisted
            .lock()
            .unwrap()
            .push((step_index, source_tag.to_string(), records.len()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medrelay_sources::models::record_from;
    use serde_json::json;

    #[test]
    fn test_directory_sink_writes_json_and_csv() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(dir.path());

        let records = vec![
            record_from(json!({ "title": "A, with comma", "score": 0.5 })),
            record_from(json!({ "title": "B", "code": "5A11" })),
        ];
        sink.persist(0, "icd11", &records).unwrap();

        let json_raw =
            std::fs::read_to_string(dir.path().join("step_1_icd11_output.json")).unwrap();
        let parsed: Vec<Record> = serde_json::from_str(&json_raw).unwrap();
        assert_eq!(parsed.len(), 2);

        let csv_raw = std::fs::read_to_string(dir.path().join("step_1_icd11_output.csv")).unwrap();
        let mut lines = csv_raw.lines();
        // sorted union of field names
        assert_eq!(lines.next(), Some("code,score,title"));
        assert_eq!(lines.next(), Some(",0.5,\"A, with comma\""));
        assert_eq!(lines.next(), Some("5A11,,B"));
    }

    #[test]
    fn test_csv_stringifies_nested_values() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(dir.path());

        let records = vec![record_from(json!({
            "title": "X",
            "tags": ["a", "b"]
        }))];
        sink.persist(2, "uspto", &records).unwrap();

        let csv_raw = std::fs::read_to_string(dir.path().join("step_3_uspto_output.csv")).unwrap();
        assert!(csv_raw.contains(r#""[""a"",""b""]""#));
    }

    #[test]
    fn test_memory_sink_counts_batches() {
        let sink = MemorySink::default();
        sink.persist(0, "pubmed", &[Record::new()]).unwrap();
        sink.persist(1, "icd11", &[]).unwrap();
        let persisted = sink.persisted.lock().unwrap();
        assert_eq!(persisted.len(), 2);
        assert_eq!(persisted[0], (0, "pubmed".to_string(), 1));
    }
}
