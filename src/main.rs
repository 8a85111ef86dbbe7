use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use swimview::commands;
use swimview::config::Config;

#[derive(Parser)]
#[command(name = "swimview", version, about = "FAA SWIM air traffic integration service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full service: feeds, merge pipeline, web server
    Run,
    /// Download and parse the current airspace cycle, then exit
    PullNasr,
    /// Decode one captured XML payload and print the partial updates
    Decode {
        /// Path to the XML file
        file: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    match cli.command {
        Command::Run => commands::run::handle_run(config).await,
        Command::PullNasr => commands::pull_nasr::handle_pull_nasr(config).await,
        Command::Decode { file } => commands::decode::handle_decode(&file),
    }
}
