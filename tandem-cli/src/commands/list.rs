//! `tandem list`: show synchronization sessions.

use anyhow::{Context, Result};
use chrono::Local;
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use tandem_daemon::{list_sessions, Client, SessionState, SessionStatus};

use super::{block_on, home};

/// Arguments for `tandem list`.
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct SessionRow {
    #[tabled(rename = "session")]
    id: String,
    #[tabled(rename = "alpha")]
    alpha: String,
    #[tabled(rename = "beta")]
    beta: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "created")]
    created: String,
}

impl ListArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let sessions = block_on(list_sessions(&Client::for_home(&home)))?
            .context("failed to list sessions")?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&sessions).context("failed to render sessions JSON")?
            );
            return Ok(());
        }

        if sessions.is_empty() {
            println!("No sessions. Create one with `tandem create <alpha> <beta>`.");
            return Ok(());
        }

        print_table(&sessions);
        Ok(())
    }
}

fn print_table(sessions: &[SessionState]) {
    let connected = sessions
        .iter()
        .filter(|state| state.status == SessionStatus::Connected)
        .count();
    println!(
        "{} {} connected  {} {} disconnected",
        "■".green().bold(),
        connected,
        "■".yellow().bold(),
        sessions.len() - connected,
    );

    let rows: Vec<SessionRow> = sessions
        .iter()
        .map(|state| SessionRow {
            id: state.session.id.to_string(),
            alpha: state.session.alpha.to_string(),
            beta: state.session.beta.to_string(),
            status: state.status.to_string(),
            created: state
                .session
                .created_at
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M")
                .to_string(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}
