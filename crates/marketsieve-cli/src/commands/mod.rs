mod bars;
mod screen;
mod snapshot;

use std::sync::Arc;

use marketsieve_core::{
    CancelToken, DataSource, GatewayAdapter, NoopHttpClient, ReqwestHttpClient,
};

use crate::cli::{Cli, Command};
use crate::error::CliError;

pub async fn run(cli: &Cli, cancel: &CancelToken) -> Result<(), CliError> {
    let source = build_source(cli);
    match &cli.command {
        Command::Screen(args) => screen::run(cli, args, source, cancel).await,
        Command::Snapshot(args) => snapshot::run(cli, args, source, cancel).await,
        Command::Bars(args) => bars::run(cli, args, source, cancel).await,
    }
}

fn build_source(cli: &Cli) -> Arc<dyn DataSource> {
    let adapter = if cli.mock {
        GatewayAdapter::new(cli.gateway_url.clone(), Arc::new(NoopHttpClient))
    } else {
        GatewayAdapter::new(cli.gateway_url.clone(), Arc::new(ReqwestHttpClient::new()))
    };
    Arc::new(adapter.with_timeout_ms(cli.timeout_ms))
}
