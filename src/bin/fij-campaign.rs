//! `fij-campaign` — the command-line front end for running and grading a
//! fault-injection campaign.
//!
//! Replaces the original `fij_runner/main.cpp`'s `argv[1] = CONFIG.json`
//! convention with a proper subcommand surface: `run` drives the full
//! baseline+injection campaign for every job in a configuration file,
//! `baseline-only` drives just the timing/no-injection phase (useful for
//! sizing `max_delay_ms` before committing to a full run), and `analyze`
//! re-grades an already-completed campaign directory without launching any
//! target.

use std::{path::PathBuf, process::ExitCode};

use clap::{Parser, Subcommand};
use fij_campaign::config::Job;
use fij_core::FijError;
use fij_engine::Amd64;
use tracing::{error, info};

/// A single-bit fault injection campaign runner.
#[derive(Parser)]
#[command(name = "fij-campaign", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full baseline+injection campaign for every job in a
    /// configuration file.
    Run {
        /// Path to the campaign JSON configuration.
        config: PathBuf,
        /// Directory under which each job's `<slug>/` campaign tree is
        /// created.
        #[arg(long, default_value = "fij-logs")]
        logs_root: PathBuf,
    },
    /// Run only the baseline (no-injection) phase of every job, skipping
    /// the injection phase entirely.
    BaselineOnly {
        /// Path to the campaign JSON configuration.
        config: PathBuf,
        #[arg(long, default_value = "fij-logs")]
        logs_root: PathBuf,
    },
    /// Re-classify an already-completed campaign directory from the
    /// per-iteration JSON records and captured output files already on
    /// disk, without launching any target.
    Analyze {
        /// Path to a campaign directory previously produced by `run`
        /// (the directory containing `no_inj/` and `diff/`).
        campaign_dir: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let outcome = match cli.command {
        Command::Run { config, logs_root } => run_jobs(&config, &logs_root, false),
        Command::BaselineOnly { config, logs_root } => run_jobs(&config, &logs_root, true),
        Command::Analyze { campaign_dir } => analyze(&campaign_dir),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "fij-campaign failed");
            ExitCode::FAILURE
        }
    }
}

fn run_jobs(config_path: &std::path::Path, logs_root: &std::path::Path, baseline_only: bool) -> Result<(), FijError> {
    let config = fij_campaign::config::load(config_path)?;
    let mut jobs = fij_campaign::config::build_jobs::<Amd64>(&config)?;

    if baseline_only {
        for job in &mut jobs {
            job.runs = 0;
        }
    }

    if jobs.is_empty() {
        info!("configuration produced no jobs");
        return Ok(());
    }

    let mut failures = 0u32;
    for job in &jobs {
        match fij_campaign::run_campaign::<Amd64>(job, logs_root) {
            Ok(result) => log_job_result(job, &result),
            Err(err) => {
                error!(path = %job.path, error = %err, "campaign job failed");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        Err(FijError::IoFailure("one or more campaign jobs failed"))
    } else {
        Ok(())
    }
}

fn log_job_result(job: &Job, result: &fij_campaign::CampaignResult) {
    info!(
        path = %job.path,
        campaign = %result.campaign_path.display(),
        baseline_success = result.baseline_success,
        baseline_runs = result.baseline_runs,
        max_delay_ms = result.max_delay_ms,
        injection_success = result.injection_success,
        injection_requested = result.injection_requested,
        "campaign finished"
    );
}

fn analyze(campaign_dir: &std::path::Path) -> Result<(), FijError> {
    let classified = fij_campaign::analyze_campaign(campaign_dir)?;
    info!(campaign = %campaign_dir.display(), classified, "analysis complete");
    Ok(())
}
