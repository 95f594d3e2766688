//! A one-sided RDMA transport for remote GET/SET/STOP against a key-value
//! store.
//!
//! Two peers exchange queue pair identities once over an ordinary TCP
//! control channel ([`ctrl`]). From then on every request and every response
//! is a single RDMA WRITE into a buffer the other side registered
//! beforehand; the receiver learns that a message has landed by polling
//! bytes of its own memory, never from a completion event ([`proto`]).
//!
//! The transport is written against the [`Verbs`](rdma::verbs::Verbs)
//! capability trait. [`SimFabric`](rdma::sim::SimFabric) implements it in
//! process, with controllable byte visibility; with the `ibverbs` feature,
//! [`IbVerbs`](rdma::ib::IbVerbs) implements it over libibverbs.
//!
//! # Example
//!
//! ```rust
//! use ibcached::prelude::*;
//! use std::thread;
//!
//! fn main() -> anyhow::Result<()> {
//!     let fabric = SimFabric::new();
//!     let config = Config {
//!         gid_index: GidIndexPolicy::Disabled,
//!         ..Config::default()
//!     };
//!
//!     let mut server = Connection::open(fabric.host("server"), config.clone(), Role::Server)?;
//!     let mut client = Connection::open(fabric.host("client"), config, Role::Client)?;
//!     let (s, c) = (server.local_identity()?, client.local_identity()?);
//!     server.connect(&c)?;
//!     client.connect(&s)?;
//!
//!     let dispatch = DispatchLoop::new(server, MemStore::default())?;
//!     let server = thread::spawn(move || dispatch.run());
//!
//!     let mut client = Client::new(client)?;
//!     client.set(b"k01", b"value")?;
//!     assert_eq!(client.get(b"k01")?.as_deref(), Some(&b"value"[..]));
//!     client.stop()?;
//!
//!     let stats = server.join().unwrap()?;
//!     assert_eq!(stats.sets, 1);
//!     Ok(())
//! }
//! ```

#[macro_use]
mod utils;

#[cfg(feature = "ibverbs")]
mod bindings;

pub mod config;
pub mod conn;
pub mod ctrl;
pub mod error;
pub mod kv;
pub mod prelude;
pub mod proto;
pub mod rdma;

pub use config::Config;
pub use error::{Error, Result};
