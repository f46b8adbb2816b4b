//! tandem: continuous two-endpoint file synchronization.
//!
//! # Usage
//!
//! ```text
//! tandem daemon start|run|stop|logs
//! tandem create <alpha> <beta> [--sync-mode <mode>] [--ignore <pattern>]...
//! tandem list [--json]
//! tandem terminate <session>
//! ```
//!
//! When started with `TANDEM_PROMPTER` in the environment the binary acts
//! as an `SSH_ASKPASS` helper instead.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    create::CreateArgs, daemon::DaemonCommand, list::ListArgs, terminate::TerminateArgs,
};
use tandem_daemon::paths::PROMPTER_ENV;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "tandem",
    version,
    about = "Keep two directories in sync, locally or over SSH",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start, stop, or inspect the background daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },

    /// Create a synchronization session between two endpoints.
    Create(CreateArgs),

    /// List synchronization sessions.
    List(ListArgs),

    /// Terminate a synchronization session.
    Terminate(TerminateArgs),
}

fn main() -> Result<()> {
    if let Some(prompter) = std::env::var_os(PROMPTER_ENV) {
        return commands::askpass::run(&prompter.to_string_lossy());
    }

    let cli = Cli::parse();
    match cli.command {
        Commands::Daemon { command } => commands::daemon::run(command),
        Commands::Create(args) => args.run(),
        Commands::List(args) => args.run(),
        Commands::Terminate(args) => args.run(),
    }
}
