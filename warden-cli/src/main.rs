//! ## warden-cli
//! **Operator interface to the Warden jails**
//!
//! `warden run` starts every enabled jail against the simulated backends
//! and keeps them running until Ctrl-C (or `--duration`), then prints each
//! jail's status and persists the ban store. `warden check` validates a
//! configuration and previews how ban times escalate.

use clap::Parser;

mod commands;

use commands::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(run_args) => commands::run(cli.config, run_args).await,
        Commands::Check(check_args) => commands::check(cli.config, check_args),
    }
}
