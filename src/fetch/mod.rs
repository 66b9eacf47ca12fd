//! Implementation of the `fetch` subcommand.
//!
//! Expands the user's sample selection against the resource catalog into a
//! batch of download tasks and executes them with bounded concurrency. Task
//! failures never abort the batch; they are collected and listed in the
//! completion report.

pub mod catalog;
pub mod engine;
pub mod job;
pub mod progress;

use std::path::PathBuf;

use clap::Parser;

use crate::common;
use self::catalog::Catalog;
use self::job::{DownloadJob, JobOptions, ResourceChoice};
use self::progress::{ErrorLog, ProgressSink};

/// Command line arguments for the `fetch` subcommand.
#[derive(Parser, Debug)]
#[command(about = "Download sample files in a bounded-concurrency batch", long_about = None)]
pub struct Args {
    /// Path to the resource catalog JSON file.
    #[arg(long)]
    pub path_catalog: String,
    /// Path to the sample selection JSON file.
    #[arg(long)]
    pub path_samples: String,
    /// Local directory to download into.
    #[arg(long)]
    pub output_dir: String,
    /// Create a directory for each sample.
    #[arg(long, default_value_t = false)]
    pub sample_dirs: bool,
    /// Number of concurrent downloads.
    #[arg(
        long,
        default_value_t = job::DEFAULT_CONCURRENT as u32,
        value_parser = clap::value_parser!(u32).range(1..=job::MAX_CONCURRENT as i64)
    )]
    pub concurrent: u32,
    /// Download variants (VCF).
    #[arg(long, default_value_t = false)]
    pub vcf: bool,
    /// Download alignments (BAM, with BAI index).
    #[arg(long, default_value_t = false)]
    pub bam: bool,
    /// Report to download, by catalog name; may be given multiple times.
    #[arg(long)]
    pub report: Vec<String>,
}

/// Main entry point for the `fetch` subcommand.
pub fn run(common: &common::Args, args: &Args) -> Result<(), anyhow::Error> {
    tracing::info!("Starting `fetch` (highlander-fetch {})", common::VERSION);
    tracing::info!("  common = {:?}", common);
    tracing::info!("  args = {:?}", args);

    let path_catalog = shellexpand::tilde(&args.path_catalog).into_owned();
    let path_samples = shellexpand::tilde(&args.path_samples).into_owned();
    let output_dir = PathBuf::from(shellexpand::tilde(&args.output_dir).into_owned());

    let catalog = Catalog::load(path_catalog)?;
    let selections = catalog::load_selections(path_samples)?;
    let choice = ResourceChoice {
        vcf: args.vcf,
        bam: args.bam,
        reports: args.report.clone(),
    };
    let job = DownloadJob::build(
        &catalog,
        &selections,
        &choice,
        JobOptions {
            output_dir,
            sample_dirs: args.sample_dirs,
            concurrency: args.concurrent as usize,
        },
    )?;
    tracing::info!(
        "{} file(s) to download with concurrency {}",
        job.tasks.len(),
        job.options.concurrency
    );

    let sinks: Vec<ProgressSink> = job.tasks.iter().map(|_| ProgressSink::new()).collect();
    let errors = fetch_job(&job, &sinks)?;
    for (task, sink) in job.tasks.iter().zip(&sinks) {
        tracing::debug!("{}: {:?}", task.describe(), sink.snapshot());
    }

    // Completion report: output directory, then one line per failure.
    let term = console::Term::stderr();
    term.write_line(&format!(
        "Files available in {}",
        job.options.output_dir.display()
    ))?;
    if !errors.is_empty() {
        term.write_line("The following downloads have encountered a problem:")?;
        for entry in errors.entries() {
            term.write_line(&entry.to_string())?;
        }
        anyhow::bail!("{} of {} downloads failed", errors.len(), job.tasks.len());
    }

    Ok(())
}

/// Execute the batch on its own runtime.
#[tokio::main]
async fn fetch_job(job: &DownloadJob, sinks: &[ProgressSink]) -> Result<ErrorLog, anyhow::Error> {
    let client = reqwest::Client::builder().build()?;
    Ok(engine::run(&client, job, sinks).await)
}
