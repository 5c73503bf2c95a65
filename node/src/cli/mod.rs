use clap::Parser;

mod crypto;
pub mod init;
pub mod query;
pub mod simulate;

#[derive(Parser, Debug, Clone)]
#[command()]
pub struct Cli {
    #[command(subcommand)]
    pub subcommand: Subcommand,
}

#[derive(Clone, Debug, clap::Subcommand)]
pub enum Subcommand {
    Init(init::InitCmd),
    GenerateKeypair(crypto::GenerateKeypairCmd),
    Statistics(query::StatisticsCmd),
    Blocks(query::BlocksCmd),
    Crawl(query::CrawlCmd),
    Graph(query::GraphCmd),
    Simulate(simulate::SimulateCmd),
}

impl Cli {
    pub async fn execute(self) -> anyhow::Result<()> {
        match self.subcommand {
            Subcommand::Init(init) => init.execute(),
            Subcommand::GenerateKeypair(cmd) => cmd.execute(),
            Subcommand::Statistics(cmd) => cmd.execute().await,
            Subcommand::Blocks(cmd) => cmd.execute().await,
            Subcommand::Crawl(cmd) => cmd.execute().await,
            Subcommand::Graph(cmd) => cmd.execute().await,
            Subcommand::Simulate(cmd) => cmd.execute().await,
        }
    }
}
