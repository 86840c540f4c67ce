use anyhow::Context as _;

use surge_core::{Engine, Settings};

use crate::cli::{ReportArgs, RunArgs};
use crate::exit_codes::ExitCode;
use crate::scenarios;

pub async fn run(args: RunArgs) -> anyhow::Result<ExitCode> {
    let settings = Settings {
        add_user_loop_header: args.add_user_loop_header,
        add_scenario_step_header: args.add_scenario_step_header,
        skip_certificate_validation: args.skip_certificate_validation,
        proxy: args.proxy.clone(),
        user_agent: args.user_agent.clone(),
    };

    let mut engine = Engine::new(settings);
    scenarios::register(&mut engine, &args).context("invalid scenario configuration")?;

    engine
        .run(Some(&args.path))
        .await
        .context("load run failed")?;

    // The run's own directory is analyzed right away; distributed runs can
    // re-analyze merged directories later via `report`.
    summarize(&ReportArgs {
        path: args.path.clone(),
    })
}

pub fn summarize(args: &ReportArgs) -> anyhow::Result<ExitCode> {
    let summary =
        surge_report::generate_report(&args.path).context("report generation failed")?;
    if summary.has_unmet_expectation {
        tracing::warn!("unmet expectation");
        return Ok(ExitCode::UnmetExpectation);
    }
    Ok(ExitCode::Success)
}
