//! The `ibcached` prelude.
//!
//! The purpose of this module is to alleviate imports of the types most
//! programs need to set up and drive a connection.

pub use crate::config::{Config, GidIndexPolicy};
pub use crate::conn::{Connection, PeerIdentity, Role};
pub use crate::ctrl::{Command, LineChannel, Session};
pub use crate::kv::{Client, DispatchLoop, DispatchStats, MemStore, Shared, Store};
pub use crate::proto::{PollBudget, Request};
#[cfg(feature = "ibverbs")]
pub use crate::rdma::ib::IbVerbs;
pub use crate::rdma::sim::{SimFabric, SimVerbs};
pub use crate::rdma::verbs::Verbs;
