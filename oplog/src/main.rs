//! oplog entry point

use clap::Parser;
use oplog::cli::{endpoints, logs, serve, Cli, Commands};
use oplog::logging;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = logging::init() {
        eprintln!("Error: failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    let result = match cli.command {
        Some(Commands::Serve(args)) => serve::execute(&args).await,
        Some(Commands::Logs(args)) => logs::execute(&args).await,
        Some(Commands::Endpoints(args)) => endpoints::execute(&args).await,
        // No subcommand - default to serve
        None => serve::execute(&serve::ServeArgs::default()).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
