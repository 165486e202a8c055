use anyhow::Result;
use fh_config::RunnerConfig;
use fh_core::{JobClass, JobStatus};
use fh_store::{FileJobStore, JobFilter, JobStore};

use crate::cli::OutputFormat;

/// List jobs straight from the store file. Works whether or not a server
/// is running; the file lock keeps reads consistent with its writes.
pub(crate) async fn handle_jobs(
    config: &RunnerConfig,
    status: Option<JobStatus>,
    class: Option<JobClass>,
    format: OutputFormat,
) -> Result<()> {
    let store = FileJobStore::open(config.store.resolve_path());
    let jobs = store.list(&JobFilter { status, class }).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&jobs)?),
        OutputFormat::Text => {
            if jobs.is_empty() {
                eprintln!("No jobs in {}", store.path().display());
                return Ok(());
            }
            println!(
                "{:<26}  {:<4}  {:<9}  {:<20}  PROVIDERS",
                "ID", "CLASS", "STATUS", "UPDATED"
            );
            for job in &jobs {
                println!(
                    "{:<26}  {:<4}  {:<9}  {:<20}  {}",
                    job.id,
                    job.class.as_str(),
                    job.status.as_str(),
                    job.updated_at.format("%Y-%m-%d %H:%M:%S"),
                    job.providers.join(",")
                );
            }
        }
    }
    Ok(())
}
