use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "surge",
    author,
    version,
    about = "Programmable HTTP load-generation engine",
    long_about = "surge runs programmatic load-test scenarios against an HTTP target under a \
                  three-phase load profile (ramp-up, plateau, ramp-down), records every request \
                  into a compact binary trace, and analyzes traces offline into percentiles, \
                  histograms and expectation verdicts.",
    after_help = "Examples:\n  \
                  surge run --users 50 --ramp-up 10 --plateau 60 --ramp-down 10 http://localhost:8080/\n  \
                  surge run --path /tmp/results http://localhost:8080/\n  \
                  surge report --path /tmp/results"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the registered scenarios and report on the results
    Run(RunArgs),

    /// Analyze a previously recorded report directory
    Report(ReportArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Number of looping users per scenario
    #[arg(long, default_value_t = 3)]
    pub users: u64,

    /// Ramp-up duration in seconds
    #[arg(long, default_value_t = 3)]
    pub ramp_up: u64,

    /// Plateau duration in seconds
    #[arg(long, default_value_t = 10)]
    pub plateau: u64,

    /// Ramp-down duration in seconds
    #[arg(long, default_value_t = 3)]
    pub ramp_down: u64,

    /// Report output directory
    #[arg(long, default_value = "surge-results")]
    pub path: PathBuf,

    /// Accept invalid TLS certificates
    #[arg(long)]
    pub skip_certificate_validation: bool,

    /// Proxy URL for all traffic
    #[arg(long)]
    pub proxy: Option<String>,

    /// Override the User-Agent header
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Inject a User-Loop diagnostic header into every request
    #[arg(long)]
    pub add_user_loop_header: bool,

    /// Inject a Scenario-Step diagnostic header into every request
    #[arg(long)]
    pub add_scenario_step_header: bool,

    /// Target base URL the scenario runners hit
    pub target: String,
}

#[derive(Debug, Args)]
pub struct ReportArgs {
    /// Report input directory
    #[arg(long, default_value = "surge-results")]
    pub path: PathBuf,
}
