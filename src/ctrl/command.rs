use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::conn::{IdentityParseError, PeerIdentity};

pub const SETUP_IB: &str = "setup_ib";
pub const DISCONNECT_IB: &str = "disconnect_ib";
pub const SHUTDOWN: &str = "shutdown";

/// Reply to a command that carries no data.
pub const REPLY_OK: &str = "OK";
/// Reply to a command that failed or was not understood.
pub const REPLY_ERROR: &str = "ERROR";

/// A control-channel command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Set up an RDMA connection to the sender. The reply is another
    /// `setup_ib` line describing the replier.
    SetupIb(PeerIdentity),
    /// Release the connection set up earlier.
    DisconnectIb,
    /// End the control session.
    Shutdown,
}

/// Command parsing error type.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty command line")]
    Empty,

    #[error("unknown command `{0}`")]
    Unknown(String),

    #[error("`{0}` takes no arguments")]
    UnexpectedArgument(&'static str),

    #[error("bad `setup_ib` arguments")]
    Identity(#[from] IdentityParseError),
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::SetupIb(id) => write!(f, "{} {}", SETUP_IB, id),
            Command::DisconnectIb => f.write_str(DISCONNECT_IB),
            Command::Shutdown => f.write_str(SHUTDOWN),
        }
    }
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (keyword, rest) = s.split_once(char::is_whitespace).unwrap_or((s, ""));
        let no_args = |cmd, kw| {
            if rest.trim().is_empty() {
                Ok(cmd)
            } else {
                Err(CommandError::UnexpectedArgument(kw))
            }
        };
        match keyword {
            "" => Err(CommandError::Empty),
            SETUP_IB => Ok(Command::SetupIb(rest.parse()?)),
            DISCONNECT_IB => no_args(Command::DisconnectIb, DISCONNECT_IB),
            SHUTDOWN => no_args(Command::Shutdown, SHUTDOWN),
            other => Err(CommandError::Unknown(other.to_owned())),
        }
    }
}
