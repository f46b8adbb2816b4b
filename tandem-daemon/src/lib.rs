//! tandem daemon: RPC transport, daemon lifecycle, prompt relay and
//! session services.
//!
//! - [`rpc`]: method invocation over the daemon socket
//! - [`runtime`]: lock, listener, termination race, shutdown
//! - [`control`]: `daemon.Terminate`
//! - [`prompt`]: challenges and the `prompt.Prompt` relay
//! - [`session`] / [`create`]: session management and the creation protocol
//! - [`endpoint`]: opening the two sides of a session
//! - [`client`]: starting a background daemon

pub mod client;
pub mod control;
pub mod create;
pub mod endpoint;
pub mod error;
pub mod lock;
pub mod paths;
pub mod prompt;
pub mod rpc;
pub mod runtime;
pub mod session;

pub use client::{start_background, StartOutcome};
pub use control::request_terminate;
pub use create::create_session;
pub use error::DaemonError;
pub use prompt::{relay_prompt, Challenge, Prompter};
pub use rpc::Client;
pub use runtime::{run, run_with, start_blocking};
pub use session::{list_sessions, terminate_session, SessionState, SessionStatus};
