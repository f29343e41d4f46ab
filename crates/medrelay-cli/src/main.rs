//! medrelay: sequential research pipeline across biomedical and patent
//! data sources. Entry point for the CLI binary.

mod config;

use std::path::Path;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use medrelay_pipeline::{read_steps, DirectorySink, Orchestrator, RunOptions, StepOutcome};
use medrelay_sources::default_fetchers;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("medrelay=debug,info")),
        )
        .init();

    info!("medrelay starting up");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = config::Config::load()?;

    let steps_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| config.pipeline.steps_file.clone());
    let steps = read_steps(Path::new(&steps_path))?;
    if steps.is_empty() {
        anyhow::bail!("no steps configured in {steps_path}");
    }
    info!(n_steps = steps.len(), steps_file = %steps_path, "step definitions loaded");

    let fetchers = default_fetchers(&config.source_settings())?;
    let sink = Arc::new(DirectorySink::new(&config.pipeline.output_dir));
    let orchestrator = Orchestrator::new(
        fetchers,
        sink,
        RunOptions {
            max_pages: config.pipeline.max_pages,
            page_size: config.pipeline.page_size,
        },
    );

    let report = orchestrator.run(&steps).await;

    println!();
    println!("Pipeline run {} ({} ms)", report.run_id, report.duration_ms);
    println!("{:<6} {:<16} {:<9} {:>8}  {}", "step", "source", "status", "records", "keywords");
    for (index, step) in report.steps.iter().enumerate() {
        let (status, records, keywords) = match &step.outcome {
            StepOutcome::Success {
                record_count,
                extracted_keywords,
            } => ("success", record_count.to_string(), extracted_keywords.as_str()),
            StepOutcome::Empty => ("empty", "0".to_string(), ""),
            StepOutcome::Skipped { reason } => ("skipped", "-".to_string(), reason.as_str()),
        };
        let partial = if step.partial { " (partial)" } else { "" };
        println!(
            "{:<6} {:<16} {:<9} {:>8}  {}{}",
            index + 1,
            step.source_id,
            status,
            records,
            keywords,
            partial
        );
    }

    Ok(())
}
