//! The TCP control channel: command lines, the `setup_ib` handshake, and
//! the server-side session that answers them.

pub mod channel;
pub mod command;
pub mod exchange;
pub mod session;

pub use self::channel::{connect_until_success, LineChannel};
pub use self::command::{Command, CommandError};
pub use self::exchange::{initiate, parse_reply, respond, ExchangeError};
pub use self::session::{Session, SessionEnd};
