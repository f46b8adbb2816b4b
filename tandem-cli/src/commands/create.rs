//! `tandem create`: create a synchronization session.

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Args;
use colored::Colorize;

use tandem_core::{
    Configuration, ConfigurationSource, IgnoreVcsMode, PermissionExposureLevel, SymlinkMode,
    SynchronizationMode, Url, WatchMode,
};
use tandem_daemon::{create_session, Challenge, Client, DaemonError, Prompter};

use super::{block_on, home};

/// Arguments for `tandem create`.
#[derive(Args, Debug)]
pub struct CreateArgs {
    /// First endpoint: a local path, `[user@]host:path`, or
    /// `ssh://[user@]host[:port]/path`.
    pub alpha: String,

    /// Second endpoint, in the same forms as alpha.
    pub beta: String,

    /// Synchronization mode (two-way-safe, two-way-resolved, one-way-safe,
    /// one-way-replica).
    #[arg(long)]
    pub sync_mode: Option<String>,

    /// Ignore pattern for this session. Repeatable.
    #[arg(long = "ignore", value_name = "PATTERN")]
    pub ignores: Vec<String>,

    /// Ignore version control directories.
    #[arg(long, conflicts_with = "no_ignore_vcs")]
    pub ignore_vcs: bool,

    /// Propagate version control directories.
    #[arg(long)]
    pub no_ignore_vcs: bool,

    /// Symlink mode (ignore, portable, posix-raw).
    #[arg(long)]
    pub symlink_mode: Option<String>,

    /// Watch mode (portable, force-poll, no-watch).
    #[arg(long)]
    pub watch_mode: Option<String>,

    /// Filesystem polling interval in seconds.
    #[arg(long, value_name = "SECONDS")]
    pub watch_polling_interval: Option<u32>,

    /// Permission exposure level for both endpoints (user, group, other).
    #[arg(long)]
    pub permission_exposure_level: Option<String>,

    /// Permission exposure level for alpha only.
    #[arg(long)]
    pub alpha_permission_exposure_level: Option<String>,

    /// Permission exposure level for beta only.
    #[arg(long)]
    pub beta_permission_exposure_level: Option<String>,
}

impl CreateArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let cwd = std::env::current_dir().context("could not determine working directory")?;

        let mut alpha = Url::parse(&self.alpha)
            .with_context(|| format!("invalid alpha URL '{}'", self.alpha))?;
        alpha.make_absolute(&cwd);
        let mut beta =
            Url::parse(&self.beta).with_context(|| format!("invalid beta URL '{}'", self.beta))?;
        beta.make_absolute(&cwd);

        let configuration = self.configuration();
        configuration
            .ensure_valid(ConfigurationSource::Create)
            .context("invalid session configuration")?;

        let client = Client::for_home(&home);
        let result = block_on(create_session(
            &client,
            alpha,
            beta,
            configuration,
            &TerminalPrompter,
        ))?;
        let id = match result {
            Ok(id) => id,
            Err(err @ DaemonError::DaemonNotRunning { .. }) => {
                return Err(err).context("start the daemon with `tandem daemon start`");
            }
            Err(err) => return Err(err.into()),
        };

        println!("{} {}", "Created session".green().bold(), id);
        Ok(())
    }

    fn configuration(&self) -> Configuration {
        let ignore_vcs_mode = if self.ignore_vcs {
            IgnoreVcsMode::Ignore
        } else if self.no_ignore_vcs {
            IgnoreVcsMode::Propagate
        } else {
            IgnoreVcsMode::Default
        };

        Configuration {
            synchronization_mode: parse_or_default(&self.sync_mode, SynchronizationMode::parse),
            ignore_vcs_mode,
            ignores: self.ignores.clone(),
            symlink_mode: parse_or_default(&self.symlink_mode, SymlinkMode::parse),
            watch_mode: parse_or_default(&self.watch_mode, WatchMode::parse),
            watch_polling_interval: self.watch_polling_interval.unwrap_or_default(),
            permission_exposure_level: parse_or_default(
                &self.permission_exposure_level,
                PermissionExposureLevel::parse,
            ),
            alpha_permission_exposure_level: parse_or_default(
                &self.alpha_permission_exposure_level,
                PermissionExposureLevel::parse,
            ),
            beta_permission_exposure_level: parse_or_default(
                &self.beta_permission_exposure_level,
                PermissionExposureLevel::parse,
            ),
            ..Configuration::default()
        }
    }
}

fn parse_or_default<T: Default>(value: &Option<String>, parse: fn(&str) -> T) -> T {
    value.as_deref().map(parse).unwrap_or_default()
}

/// Answers challenges on the controlling terminal.
///
/// Input is read as a plain line; the terminal keeps echoing.
struct TerminalPrompter;

#[async_trait]
impl Prompter for TerminalPrompter {
    async fn prompt(&self, challenge: Challenge) -> Result<String, DaemonError> {
        tokio::task::spawn_blocking(move || read_answer(&challenge))
            .await
            .map_err(|err| DaemonError::Prompt(format!("prompt task failed: {err}")))?
            .map_err(|err| DaemonError::Prompt(err.to_string()))
    }
}

fn read_answer(challenge: &Challenge) -> io::Result<String> {
    let mut stderr = io::stderr().lock();
    if !challenge.message.is_empty() {
        writeln!(stderr, "{}", challenge.message)?;
    }
    write!(stderr, "{} ", challenge.prompt.trim_end())?;
    stderr.flush()?;

    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "no answer on standard input",
        ));
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
