use clap::Parser;

use trustchain::cli::Cli;
use trustchain::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    Cli::parse().execute().await?;
    Ok(())
}
