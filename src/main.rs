use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    let cli = seriesharvest::cli::Cli::parse();
    seriesharvest::logging::init(cli.log_file.as_deref()).context("init logging")?;
    tracing::debug!(?cli, "parsed cli");

    let config = seriesharvest::config::RunConfig::from(&cli);
    seriesharvest::orchestrator::run(config)
        .await
        .context("scrape")?;

    Ok(())
}
