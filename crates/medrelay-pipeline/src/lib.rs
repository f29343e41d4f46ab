//! Pipeline core: keyword extraction, step definitions, result sinks, and
//! the orchestrator that chains fetches across sources.

pub mod extract;
pub mod orchestrator;
pub mod sink;
pub mod steps;

pub use extract::extract;
pub use orchestrator::{
    Orchestrator, PipelineReport, PipelineState, RunOptions, StepOutcome, StepReport, StepStatus,
};
pub use sink::{DirectorySink, MemorySink, ResultSink};
pub use steps::{read_steps, read_steps_from, PipelineStep};
