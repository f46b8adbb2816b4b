//! `tandem daemon`: background daemon lifecycle.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use tandem_daemon::paths::{stderr_log_path, stdout_log_path};
use tandem_daemon::{request_terminate, start_background, start_blocking, Client, StartOutcome};

use super::{block_on, home};

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Start the daemon in the background if it is not already running.
    Start,
    /// Run the daemon in the foreground.
    Run,
    /// Ask the running daemon to shut down.
    Stop,
    /// Print recent daemon log lines.
    Logs(DaemonLogsArgs),
}

#[derive(Args, Debug)]
pub struct DaemonLogsArgs {
    /// Number of trailing lines to show.
    #[arg(long, default_value_t = 100)]
    pub lines: usize,

    /// Show only stderr log file.
    #[arg(long)]
    pub stderr_only: bool,
}

pub fn run(command: DaemonCommand) -> Result<()> {
    let home = home()?;

    match command {
        DaemonCommand::Start => {
            let executable =
                std::env::current_exe().context("could not locate the tandem executable")?;
            match block_on(start_background(&home, &executable))?
                .context("failed to start daemon")?
            {
                StartOutcome::AlreadyRunning => println!("daemon already running"),
                StartOutcome::Started { pid } => println!("daemon started (pid {pid})"),
            }
        }
        DaemonCommand::Run => {
            start_blocking(&home).context("daemon exited with error")?;
        }
        DaemonCommand::Stop => {
            block_on(request_terminate(&Client::for_home(&home)))?
                .context("failed to stop daemon")?;
            println!("daemon stop requested");
        }
        DaemonCommand::Logs(args) => {
            if args.stderr_only {
                print_tail(&stderr_log_path(&home), args.lines)
                    .context("failed to read daemon stderr log")?;
            } else {
                print_tail(&stdout_log_path(&home), args.lines)
                    .context("failed to read daemon stdout log")?;
                print_tail(&stderr_log_path(&home), args.lines)
                    .context("failed to read daemon stderr log")?;
            }
        }
    }

    Ok(())
}

fn print_tail(path: &Path, lines: usize) -> Result<()> {
    if !path.exists() {
        println!("log file not found: {}", path.display());
        return Ok(());
    }

    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut tail = VecDeque::<String>::new();
    for line in reader.lines() {
        let line = line.with_context(|| format!("read {}", path.display()))?;
        if tail.len() == lines {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    println!("==> {} <==", path.display());
    for line in tail {
        println!("{line}");
    }
    Ok(())
}
