mod cli;
mod commands;
mod error;
mod logging;

use clap::Parser;
use cli::{Cli, Commands};
use tracing::error;

fn main() {
    let cli = Cli::parse();

    if let Err(e) = logging::setup_logging(cli.verbose, cli.quiet, cli.log_file.clone()) {
        eprintln!("Failed to initialise logging: {e}");
        std::process::exit(2);
    }

    let result = match &cli.command {
        Commands::Md(args) => commands::md::run(args),
        Commands::Hessian(args) => commands::hessian::run(args),
        Commands::Sp(args) => commands::sp::run(args),
    };

    if let Err(e) = result {
        error!("{e}");
        std::process::exit(e.exit_code());
    }
}
