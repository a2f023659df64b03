use anyhow::Result;
use clap::Parser;
use log::info;
use pipedoctor::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    info!("Starting pipedoctor - CI/CD failure diagnosis");
    cli.execute().await?;

    Ok(())
}
