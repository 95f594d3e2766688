//! Remote GET/SET/STOP against a key-value store.

pub mod client;
pub mod mem;
pub mod server;
pub mod store;

pub use self::client::{Client, ClientError};
pub use self::mem::{MemItem, MemStore};
pub use self::server::{DispatchError, DispatchLoop, DispatchStats, Served};
pub use self::store::{Item, OutOfMemory, Shared, Store};
