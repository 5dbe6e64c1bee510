//! Mailbox framing and protocol codec.
//!
//! The app and the runner share no socket and no memory; they exchange
//! newline-delimited JSON records through append-only files in the app's
//! sandbox. This crate owns the framing rules for those files: what
//! counts as a complete line, how acknowledgements are matched to
//! requests, how a crashed session's position is reconstructed by
//! scanning backward, and how the signed configuration envelope is
//! verified.
//!
//! Nothing here performs I/O. Callers hand in file contents and get
//! typed records back; `sherlo-bridge` supplies the filesystem.

mod config;
mod frame;
mod time;

pub use config::{CONFIG_SIGNING_KEY, decode_config, sign_config};
pub use frame::{
    MailboxState, complete_lines, decode_runner_line, find_ack, last_complete_line,
    reconstruct_last_state,
};
pub use time::{iso_time, now_ms};

use std::error::Error;
use std::fmt;

/// Relative paths of every mailbox file, under the app's sandbox
/// directory.
pub mod paths {
    pub const PROTOCOL: &str = "protocol.sherlo";
    pub const LOG: &str = "log.sherlo";
    pub const STATE: &str = "state.sherlo";
    pub const CONFIG: &str = "config.sherlo";
    pub const CONFIG_SIGNATURE: &str = "config.sherlo.sig";
    pub const SNAPSHOTS_DIR: &str = "snapshots";
}

#[derive(Debug)]
pub enum WireError {
    /// A line that should hold a runner record did not parse.
    MalformedLine { context: &'static str, detail: String },
    /// A parsed record carried an action this side does not understand.
    UnknownAction(String),
    /// The config signature did not verify; testing cannot proceed.
    InvalidConfigSignature,
    /// The config payload itself did not parse.
    MalformedConfig(String),
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedLine { context, detail } => {
                write!(f, "malformed mailbox line while {context}: {detail}")
            }
            Self::UnknownAction(action) => write!(f, "unknown runner action: {action}"),
            Self::InvalidConfigSignature => write!(f, "invalid config signature"),
            Self::MalformedConfig(detail) => write!(f, "malformed config: {detail}"),
        }
    }
}

impl Error for WireError {}
