//! The message protocol spoken over one-sided writes.

use thiserror::Error;

use crate::rdma::buf::BoundsError;

pub mod codec;
pub mod poll;
pub mod view;

pub use self::codec::{CodecError, GetResponse, Opcode, Request, RequestHeader, ResponseHeader};
pub use self::poll::{PollBudget, PollTimeout};
pub use self::view::{RequestView, ResponseView};

/// Error type of receiving or placing a message.
#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("malformed message")]
    Codec(#[from] CodecError),

    #[error("message exceeds its buffer")]
    Bounds(#[from] BoundsError),

    #[error("message did not arrive in time")]
    Timeout(#[from] PollTimeout),
}
