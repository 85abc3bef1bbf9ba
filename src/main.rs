//! autopts: Bluetooth conformance test automation
//!
//! Drives an IUT over the Bluetooth Tester Protocol while answering the
//! test oracle's WIDs, one scenario per official test case.

use clap::Parser;
use autopts::common::{logging, paths};
use autopts::{cli, commands};
use commands::Commands;

#[derive(Parser)]
#[command(name = "autopts", about = "Bluetooth PTS conformance automation")]
#[command(version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Held until exit so the file writer flushes
    let _log_guard = match &cli.command {
        Commands::Run {
            verbose,
            log_file: true,
            ..
        } => match paths::log_dir() {
            Some(dir) => logging::init_with_file(&dir, *verbose),
            None => {
                logging::init_cli(*verbose);
                None
            }
        },
        Commands::Run { verbose, .. } => {
            logging::init_cli(*verbose);
            None
        }
        _ => {
            logging::init_cli(false);
            None
        }
    };

    if let Err(e) = cli::dispatch(cli.command).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
