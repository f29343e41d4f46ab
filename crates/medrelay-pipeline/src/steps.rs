//! Step definition input.
//!
//! A pipeline is configured as an ordered CSV of `source_id,keywords`
//! rows. An empty `keywords` cell requests inheritance of the previous
//! step's extracted keywords.

use serde::Deserialize;
use std::io;
use std::path::Path;

use medrelay_common::RelayError;

/// One configured pipeline step. Immutable once loaded.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineStep {
    pub source_id: String,
    #[serde(default)]
    pub keywords: String,
}

impl PipelineStep {
    /// Literal query override for this step, if one was configured.
    /// Takes precedence over inherited keywords.
    pub fn static_query(&self) -> Option<&str> {
        let query = self.keywords.trim();
        (!query.is_empty()).then_some(query)
    }
}

/// Read the ordered step list from a CSV file.
pub fn read_steps(path: &Path) -> Result<Vec<PipelineStep>, RelayError> {
    let file = std::fs::File::open(path)
        .map_err(|e| RelayError::Config(format!("cannot open step file {}: {e}", path.display())))?;
    read_steps_from(file)
}

/// Read steps from any CSV reader (`source_id,keywords` header expected).
pub fn read_steps_from(input: impl io::Read) -> Result<Vec<PipelineStep>, RelayError> {
    let mut reader = csv::Reader::from_reader(input);
    let mut steps = Vec::new();
    for row in reader.deserialize() {
        let mut step: PipelineStep =
            row.map_err(|e| RelayError::Config(format!("bad step row: {e}")))?;
        step.source_id = step.source_id.trim().to_string();
        step.keywords = step.keywords.trim().to_string();
        steps.push(step);
    }
    Ok(steps)
}
