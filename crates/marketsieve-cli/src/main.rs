mod cli;
mod commands;
mod error;
mod output;
mod scoring;
mod universe;

use std::process::ExitCode;

use clap::Parser;

use crate::cli::Cli;
use crate::error::CliError;

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    match run().await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::from(error.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, CliError> {
    let cli = Cli::parse();

    let cancel = marketsieve_core::CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("interrupt received, finishing in-flight calls");
                cancel.cancel();
            }
        });
    }

    commands::run(&cli, &cancel).await?;
    Ok(ExitCode::SUCCESS)
}
