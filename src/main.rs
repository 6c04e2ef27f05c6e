//! agentstore CLI entry point.

use clap::Parser;

use agentstore::cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json = cli.json;

    if let Err(err) = agentstore::cli::run(cli).await {
        agentstore::cli::handle_error(err, json);
    }
}
