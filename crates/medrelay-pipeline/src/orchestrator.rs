//! Pipeline orchestrator.
//!
//! Drives the configured steps strictly in order, resolving each step's
//! query from its static keywords or the previous step's extraction,
//! invoking the matching source fetcher, persisting results, and carrying
//! the extracted keywords forward.
//!
//! Per-step state machine: `Pending -> Running -> {Success | Empty |
//! Skipped}`. A step with no resolvable query goes straight to `Skipped`
//! without a fetch; a fetch that yields nothing (including degraded
//! fetches) ends `Empty`. Either way the carried keywords reset to empty
//! rather than propagating stale data, and the pipeline always runs to
//! completion over all configured steps.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use medrelay_sources::fetcher::SourceFetcher;
use medrelay_sources::models::SourceKind;

use crate::extract::extract;
use crate::sink::ResultSink;
use crate::steps::PipelineStep;

/// Per-step lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Empty,
    Skipped,
}

/// Terminal outcome recorded for a step.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum StepOutcome {
    Success {
        record_count: usize,
        extracted_keywords: String,
    },
    Empty,
    Skipped {
        reason: String,
    },
}

impl StepOutcome {
    pub fn status(&self) -> StepStatus {
        match self {
            StepOutcome::Success { .. } => StepStatus::Success,
            StepOutcome::Empty => StepStatus::Empty,
            StepOutcome::Skipped { .. } => StepStatus::Skipped,
        }
    }
}

/// Mutable pipeline state, owned and mutated solely by the orchestrator's
/// single control flow.
#[derive(Debug, Default)]
pub struct PipelineState {
    pub step_index: usize,
    pub carried_keywords: String,
    pub step_outcomes: Vec<StepOutcome>,
}

/// What happened at one step, for the final report.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub source_id: String,
    /// The query the step ran with; `None` when it was skipped unqueried.
    pub query: Option<String>,
    #[serde(flatten)]
    pub outcome: StepOutcome,
    /// True when the fetch behind this step was degraded (retry
    /// exhaustion, auth failure, skipped batches).
    pub partial: bool,
}

#[derive(Debug, Serialize)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub steps: Vec<StepReport>,
}

/// Fetch ceilings applied to every step.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub max_pages: usize,
    pub page_size: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_pages: 2,
            page_size: 50,
        }
    }
}

pub struct Orchestrator {
    fetchers: HashMap<SourceKind, Arc<dyn SourceFetcher>>,
    sink: Arc<dyn ResultSink>,
    options: RunOptions,
}

impl Orchestrator {
    pub fn new(
        fetchers: HashMap<SourceKind, Arc<dyn SourceFetcher>>,
        sink: Arc<dyn ResultSink>,
        options: RunOptions,
    ) -> Self {
        Self {
            fetchers,
            sink,
            options,
        }
    }

    /// Runs every configured step in order and returns the full report.
    #[instrument(skip(self, steps), fields(n_steps = steps.len()))]
    pub async fn run(&self, steps: &[PipelineStep]) -> PipelineReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let t0 = Instant::now();
        info!(run_id = %run_id, n_steps = steps.len(), "starting pipeline run");

        let mut state = PipelineState::default();
        let mut reports = Vec::with_capacity(steps.len());

        for (index, step) in steps.iter().enumerate() {
            state.step_index = index;
            let (report, carried) = self.run_step(index, step, &state.carried_keywords).await;
            state.carried_keywords = carried;
            state.step_outcomes.push(report.outcome.clone());
            reports.push(report);
        }

        let report = PipelineReport {
            run_id,
            started_at,
            duration_ms: t0.elapsed().as_millis() as u64,
            steps: reports,
        };
        info!(
            run_id = %run_id,
            duration_ms = report.duration_ms,
            "pipeline run complete"
        );
        report
    }

    /// Executes one step; returns its report and the keywords carried into
    /// the next step.
    async fn run_step(
        &self,
        index: usize,
        step: &PipelineStep,
        carried: &str,
    ) -> (StepReport, String) {
        let skipped = |reason: &str| {
            (
                StepReport {
                    source_id: step.source_id.clone(),
                    query: None,
                    outcome: StepOutcome::Skipped {
                        reason: reason.to_string(),
                    },
                    partial: false,
                },
                String::new(),
            )
        };

        // Pending -> Skipped: no resolvable query
        let query = match step.static_query() {
            Some(q) => q.to_string(),
            None if !carried.is_empty() => carried.to_string(),
            None => {
                warn!(
                    step = index + 1,
                    source = %step.source_id,
                    "no keywords configured or inherited, skipping step"
                );
                return skipped("no query available");
            }
        };

        let Some(kind) = SourceKind::from_tag(&step.source_id) else {
            warn!(step = index + 1, source = %step.source_id, "unknown source tag, skipping step");
            return skipped("unknown source");
        };
        let Some(fetcher) = self.fetchers.get(&kind) else {
            warn!(step = index + 1, source = kind.as_str(), "no fetcher registered, skipping step");
            return skipped("no fetcher registered");
        };

        // Pending -> Running
        info!(step = index + 1, source = kind.as_str(), query = %query, "running step");
        let result = match fetcher
            .fetch(&query, self.options.max_pages, self.options.page_size)
            .await
        {
            Ok(result) => result,
            Err(err) => {
                warn!(
                    step = index + 1,
                    source = kind.as_str(),
                    error = %err,
                    "fetch failed, recording empty outcome"
                );
                return (
                    StepReport {
                        source_id: step.source_id.clone(),
                        query: Some(query),
                        outcome: StepOutcome::Empty,
                        partial: true,
                    },
                    String::new(),
                );
            }
        };

        // Running -> Empty
        if result.records.is_empty() {
            info!(
                step = index + 1,
                source = kind.as_str(),
                partial = result.partial,
                "no records returned"
            );
            return (
                StepReport {
                    source_id: step.source_id.clone(),
                    query: Some(query),
                    outcome: StepOutcome::Empty,
                    partial: result.partial,
                },
                String::new(),
            );
        }

        // Running -> Success
        let record_count = result.records.len();
        info!(
            step = index + 1,
            source = kind.as_str(),
            records = record_count,
            total = result.total_count,
            partial = result.partial,
            "records fetched"
        );

        if let Err(err) = self.sink.persist(index, kind.as_str(), &result.records) {
            warn!(step = index + 1, error = %err, "failed to persist step artifacts");
        }

        let keywords = extract(&result.records, &step.source_id);
        if keywords.is_empty() {
            info!(step = index + 1, "extraction produced no keywords");
        } else {
            info!(step = index + 1, keywords = %keywords, "extracted keywords for next step");
        }

        (
            StepReport {
                source_id: step.source_id.clone(),
                query: Some(query),
                outcome: StepOutcome::Success {
                    record_count,
                    extracted_keywords: keywords.clone(),
                },
                partial: result.partial,
            },
            keywords,
        )
    }
}
