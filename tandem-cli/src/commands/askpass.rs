//! `SSH_ASKPASS` helper mode.
//!
//! `ssh` runs the helper with the prompt as its only argument and reads the
//! answer from stdout. The helper forwards the prompt to the daemon, which
//! routes it to the client that is creating the session.

use anyhow::{Context, Result};
use tandem_daemon::{relay_prompt, Challenge, Client};

use super::{block_on, home};

pub fn run(prompter: &str) -> Result<()> {
    let home = home()?;
    let prompt = std::env::args().nth(1).unwrap_or_default();
    let challenge = Challenge {
        message: String::new(),
        prompt,
    };

    let client = Client::for_home(&home);
    let answer = block_on(relay_prompt(&client, prompter, challenge))?
        .context("failed to relay prompt through the daemon")?;
    println!("{answer}");
    Ok(())
}
