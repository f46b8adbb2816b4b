//! `tandem terminate`: end a synchronization session.

use anyhow::{Context, Result};
use clap::Args;

use tandem_core::SessionId;
use tandem_daemon::{terminate_session, Client};

use super::{block_on, home};

/// Arguments for `tandem terminate`.
#[derive(Args, Debug)]
pub struct TerminateArgs {
    /// Identifier of the session to terminate, as shown by `tandem list`.
    pub session: String,
}

impl TerminateArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let id = SessionId::from(self.session);
        block_on(terminate_session(&Client::for_home(&home), &id))?
            .with_context(|| format!("failed to terminate session '{id}'"))?;
        println!("terminated session {id}");
        Ok(())
    }
}
