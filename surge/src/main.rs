mod cli;
mod exit_codes;
mod run;
mod scenarios;

use clap::Parser;

use exit_codes::ExitCode;

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = match cli::Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            use clap::error::ErrorKind;
            let _ = err.print();
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::Success,
                _ => ExitCode::InvalidInput,
            };
            std::process::exit(code.as_i32());
        }
    };

    let outcome = match cli.command {
        cli::Command::Run(args) => run::run(args).await,
        cli::Command::Report(args) => run::summarize(&args),
    };

    let code = match outcome {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::InvalidInput
        }
    };
    std::process::exit(code.as_i32());
}
