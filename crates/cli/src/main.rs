use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use omics_run_api::{AwsConfig, IamClient, OmicsClient};
use omics_run_engine::{EngineError, GENERIC_FAILURE_EXIT_CODE};
use tracing::{error, subscriber::DefaultGuard};
use tracing_subscriber::EnvFilter;

mod args;
mod submit;

use args::Args;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let code = args::usage_exit_code(&err);
            if code == 0 {
                err.exit();
            }
            let _ = err.print();
            return ExitCode::from(code);
        }
    };
    let _guard = init_tracing(args.debug);

    match run(&args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            let code = err
                .downcast_ref::<EngineError>()
                .map_or(GENERIC_FAILURE_EXIT_CODE, EngineError::exit_code);
            ExitCode::from(code)
        }
    }
}

/// Install a stderr subscriber for the lifetime of the returned guard, so
/// stdout carries only the JSON result.
fn init_tracing(debug: bool) -> DefaultGuard {
    let default_level = if debug { "debug" } else { "info" };
    let filter = match std::env::var("RUST_LOG") {
        Ok(spec) if !debug && !spec.trim().is_empty() => EnvFilter::new(spec),
        _ => EnvFilter::new(default_level),
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    tracing::subscriber::set_default(subscriber)
}

async fn run(args: &Args) -> Result<()> {
    args.validate()?;
    let config = AwsConfig::from_env(args.region.as_deref())?;
    let omics = OmicsClient::new(&config)?;
    let iam = IamClient::new(&config)?;

    let submission = submit::submit(args, &omics, &iam).await?;
    println!("{}", serde_json::to_string_pretty(&submission)?);
    Ok(())
}
