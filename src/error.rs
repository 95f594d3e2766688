use thiserror::Error;

use crate::config::ConfigError;
use crate::conn::{HandshakeError, ResourceError, TeardownError, TransportError};
use crate::ctrl::{CommandError, ExchangeError};
use crate::kv::{ClientError, DispatchError};
use crate::proto::ProtoError;

/// Any error this crate reports.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Teardown(#[from] TeardownError),

    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Proto(#[from] ProtoError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
