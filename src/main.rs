use std::{io::Write, process, sync::Arc};

use aequitas::{
    application::{commands, error::AppError},
    cache::{CacheConfig, QueryClient},
    config::{self, Command},
    infra::{http::HttpFetcher, telemetry},
};
use tracing::{Dispatch, Level, debug, dispatcher, error};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(error.exit_code());
    }
}

fn report_application_error(error: &AppError) {
    let report = error.report();
    if dispatcher::has_been_set() {
        error!(error = %error, chain = ?report.messages, "command failed");
    } else {
        let subscriber = tracing_fmt()
            .with_max_level(Level::ERROR)
            .with_writer(std::io::stderr)
            .finish();
        let dispatch = Dispatch::new(subscriber);
        dispatcher::with_default(&dispatch, || {
            error!(error = %error, chain = ?report.messages, "command failed");
        });
    }
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;
    telemetry::init(&settings.logging)?;

    let command = cli_args.command.unwrap_or(Command::Dashboard);
    let fetcher = HttpFetcher::new(&settings.api)?;
    debug!(base_url = %fetcher.base_url(), "using API");

    let client = QueryClient::new(CacheConfig::from(&settings.cache), Arc::new(fetcher));
    let client = QueryClient::install(client)
        .map_err(|_| AppError::unexpected("query client installed twice"))?;

    let output = commands::execute(client, command).await?;
    let rendered = serde_json::to_string_pretty(&output)
        .map_err(|err| AppError::unexpected(format!("failed to render output: {err}")))?;

    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{rendered}").map_err(|err| AppError::Infra(err.into()))?;
    Ok(())
}
