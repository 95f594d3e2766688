//! Serving requests that peers write into a connection's inbound buffer.

use thiserror::Error;

use super::store::{Item, OutOfMemory, Store};
use crate::conn::{Connection, Role, TeardownError, TransportError};
use crate::proto::codec::{CodecError, Request, STATUS_NOT_STORED, STATUS_STORED};
use crate::proto::{ProtoError, RequestView, ResponseView};
use crate::rdma::verbs::Verbs;

/// Dispatch error type.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("connection is {0:?}-side, expected server-side")]
    Role(Role),

    #[error("connection is not bound to a peer")]
    NotConnected,

    #[error("request not received")]
    Proto(#[from] ProtoError),

    #[error("response not sent")]
    Transport(#[from] TransportError),

    #[error("connection teardown after STOP failed")]
    Teardown(#[from] TeardownError),

    #[error("dispatch loop panicked")]
    Panicked,
}

/// What a single [`DispatchLoop::serve_one`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Served {
    Set { stored: bool },
    Get { hit: bool },
    Stop,
    /// A malformed request was dropped.
    Skipped,
}

/// Counters of a finished [`DispatchLoop::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub sets: u64,
    pub set_failures: u64,
    pub gets: u64,
    pub get_hits: u64,
    pub unknown_opcodes: u64,
    pub malformed: u64,
}

/// Serves one connection's requests against a store, strictly one at a time
/// in arrival order.
pub struct DispatchLoop<V: Verbs, S: Store> {
    conn: Connection<V>,
    store: S,
    stats: DispatchStats,
}

impl<V: Verbs, S: Store> DispatchLoop<V, S> {
    /// `conn` must be a connected server-side connection.
    pub fn new(conn: Connection<V>, store: S) -> Result<Self, DispatchError> {
        if conn.role() != Role::Server {
            return Err(DispatchError::Role(conn.role()));
        }
        if conn.peer().is_none() {
            return Err(DispatchError::NotConnected);
        }
        Ok(Self {
            conn,
            store,
            stats: DispatchStats::default(),
        })
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn connection(&self) -> &Connection<V> {
        &self.conn
    }

    /// Serve requests until a STOP arrives, then tear the connection down.
    pub fn run(mut self) -> Result<DispatchStats, DispatchError> {
        loop {
            if self.serve_one()? == Served::Stop {
                break;
            }
        }
        log::info!("ibcached: STOP received after {:?}", self.stats);
        self.conn.destroy()?;
        Ok(self.stats)
    }

    /// Wait for one request and answer it. STOP is reported, not acted on.
    pub fn serve_one(&mut self) -> Result<Served, DispatchError> {
        let empty = Role::Server.empty_marker();
        let config = self.conn.config();
        let (idle, landing) = (config.idle_budget(), config.landing_budget());

        let inbound = self.conn.inbound().ok_or(TransportError::NotReady)?;
        let view = RequestView::new(inbound);
        let received = view.receive(empty, idle, landing, || self.conn.relax());
        // Consumed (or dropped) requests free the slot before any response
        // goes out, so the peer's next request cannot be mistaken for this one.
        if matches!(received, Ok(_) | Err(ProtoError::Codec(_))) {
            view.rearm(empty)?;
        }

        let request = match received {
            Ok(request) => request,
            Err(ProtoError::Codec(CodecError::UnknownOpcode(op))) => {
                log::warn!("ibcached: dropping request with unknown opcode {:#04x}", op);
                self.stats.unknown_opcodes += 1;
                return Ok(Served::Skipped);
            }
            Err(ProtoError::Codec(e)) => {
                log::warn!("ibcached: dropping malformed request: {}", e);
                self.stats.malformed += 1;
                return Ok(Served::Skipped);
            }
            Err(e) => return Err(e.into()),
        };
        log::debug!("ibcached: serving {:?}", request.opcode());

        match request {
            Request::Set { key, payload } => {
                let status = self.store_set(&key, &payload);
                let outbound = self.conn.outbound().ok_or(TransportError::NotReady)?;
                let len = ResponseView::new(outbound).put_status(status)?;
                self.conn.send(len)?;

                self.stats.sets += 1;
                let stored = status == STATUS_STORED;
                if !stored {
                    self.stats.set_failures += 1;
                }
                Ok(Served::Set { stored })
            }
            Request::Get { key } => {
                let item = self.store.get(&key);
                let outbound = self.conn.outbound().ok_or(TransportError::NotReady)?;
                let len = ResponseView::new(outbound).put_get(item.as_ref().map(Item::data))?;
                self.conn.send(len)?;

                self.stats.gets += 1;
                self.stats.get_hits += item.is_some() as u64;
                Ok(Served::Get {
                    hit: item.is_some(),
                })
            }
            Request::Stop => Ok(Served::Stop),
        }
    }

    /// Store `payload` under `key`, returning the status byte for the peer.
    fn store_set(&mut self, key: &[u8], payload: &[u8]) -> u8 {
        let hv = self.store.hash(key, 0);
        let item = self.store.alloc(key, 0, 0, payload.len());
        let old = self.store.get_by_hash(key, hv);

        let Some(mut item) = item else {
            if self.store.item_size_ok(key.len(), 0, payload.len()) {
                log::warn!("ibcached: out of memory storing object");
            } else {
                log::warn!("ibcached: object too large for cache");
            }
            self.evict(old);
            return STATUS_NOT_STORED;
        };

        item.data_mut().copy_from_slice(payload);
        let linked = match &old {
            Some(old) => self.store.replace(old, item, hv),
            None => self.store.link(item, hv),
        };
        match linked {
            Ok(()) => STATUS_STORED,
            Err(OutOfMemory) => {
                log::warn!("ibcached: out of memory storing object");
                self.evict(old);
                STATUS_NOT_STORED
            }
        }
    }

    /// A failed SET must not leave the previous value readable.
    fn evict(&mut self, stale: Option<S::Item>) {
        if let Some(stale) = stale {
            self.store.remove(&stale);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, GidIndexPolicy};
    use crate::kv::mem::{MemItem, MemStore, ITEM_OVERHEAD};
    use crate::kv::store::Shared;
    use crate::proto::codec::{HEADER_LEN, OFF_OPCODE};
    use crate::proto::PollBudget;
    use crate::rdma::sim::{SimFabric, SimVerbs};

    fn config() -> Config {
        Config {
            gid_index: GidIndexPolicy::Disabled,
            buf_size: 512,
            idle_timeout_ms: 200,
            ..Config::default()
        }
    }

    /// A server loop and the raw client connection feeding it.
    fn rig<S: Store>(store: S) -> (Connection<SimVerbs>, DispatchLoop<SimVerbs, S>) {
        let fabric = SimFabric::new();
        let mut client = Connection::open(fabric.host("client"), config(), Role::Client).unwrap();
        let mut server = Connection::open(fabric.host("server"), config(), Role::Server).unwrap();
        let (ic, is) = (client.local_identity().unwrap(), server.local_identity().unwrap());
        client.connect(&is).unwrap();
        server.connect(&ic).unwrap();
        (client, DispatchLoop::new(server, store).unwrap())
    }

    fn request(client: &mut Connection<SimVerbs>, req: &Request) {
        let len = RequestView::new(client.outbound().unwrap()).put(req).unwrap();
        client.send(len).unwrap();
    }

    fn status(client: &Connection<SimVerbs>) -> u8 {
        let view = ResponseView::new(client.inbound().unwrap());
        let status = view
            .receive_status(0xFF, PollBudget::spins(100), || client.relax())
            .unwrap();
        view.rearm(0xFF).unwrap();
        status
    }

    #[test]
    fn set_then_get() {
        let (mut client, mut server) = rig(MemStore::default());
        request(
            &mut client,
            &Request::Set {
                key: b"k01".to_vec(),
                payload: b"hello".to_vec(),
            },
        );
        assert_eq!(server.serve_one().unwrap(), Served::Set { stored: true });
        assert_eq!(status(&client), STATUS_STORED);
        assert_eq!(server.connection().inbound().unwrap().load(OFF_OPCODE).unwrap(), 0);

        request(&mut client, &Request::Get { key: b"k01".to_vec() });
        assert_eq!(server.serve_one().unwrap(), Served::Get { hit: true });
        let view = ResponseView::new(client.inbound().unwrap());
        let got = view
            .receive_get(0xFF, PollBudget::spins(100), PollBudget::spins(100), || client.relax())
            .unwrap();
        assert_eq!(got.as_deref(), Some(&b"hello"[..]));
    }

    #[test]
    fn failed_set_evicts_stale_value() {
        let (mut client, mut server) = rig(MemStore::new(ITEM_OVERHEAD + 16, 1 << 20));
        let set = |payload: Vec<u8>| Request::Set {
            key: b"k".to_vec(),
            payload,
        };

        request(&mut client, &set(vec![1; 8]));
        assert_eq!(server.serve_one().unwrap(), Served::Set { stored: true });
        assert_eq!(status(&client), STATUS_STORED);
        assert!(server.store().get(b"k").is_some());

        request(&mut client, &set(vec![2; 64]));
        assert_eq!(server.serve_one().unwrap(), Served::Set { stored: false });
        assert_eq!(status(&client), STATUS_NOT_STORED);
        assert!(server.store().get(b"k").is_none());

        // The connection stays usable.
        request(&mut client, &Request::Get { key: b"k".to_vec() });
        assert_eq!(server.serve_one().unwrap(), Served::Get { hit: false });
        assert_eq!(server.stats().set_failures, 1);
    }

    /// A shared engine where another connection links `rival` just before
    /// this loop links its `nth` item.
    struct Racing {
        store: Shared<MemStore>,
        nth: usize,
        rival: Option<(&'static [u8], usize)>,
    }

    impl Racing {
        fn race(&mut self) {
            if self.nth > 0 {
                self.nth -= 1;
                return;
            }
            if let Some((key, len)) = self.rival.take() {
                let mut other = self.store.clone();
                let item = other.alloc(key, 0, 0, len).unwrap();
                let hv = other.hash(key, 0);
                other.link(item, hv).unwrap();
            }
        }
    }

    impl Store for Racing {
        type Item = MemItem;

        fn item_size_ok(&self, key_len: usize, flags: u32, payload_len: usize) -> bool {
            self.store.item_size_ok(key_len, flags, payload_len)
        }

        fn alloc(&mut self, key: &[u8], flags: u32, exptime: u32, payload_len: usize) -> Option<MemItem> {
            self.store.alloc(key, flags, exptime, payload_len)
        }

        fn get_by_hash(&self, key: &[u8], hash: u32) -> Option<MemItem> {
            self.store.get_by_hash(key, hash)
        }

        fn link(&mut self, item: MemItem, hash: u32) -> Result<(), OutOfMemory> {
            self.race();
            self.store.link(item, hash)
        }

        fn replace(&mut self, old: &MemItem, new: MemItem, hash: u32) -> Result<(), OutOfMemory> {
            self.race();
            self.store.replace(old, new, hash)
        }

        fn remove(&mut self, item: &MemItem) {
            self.store.remove(item)
        }
    }

    #[test]
    fn set_losing_capacity_to_another_connection_fails() {
        let capacity = 200;
        let shared = Shared::new(MemStore::new(1024, capacity));
        let (mut client, mut server) = rig(Racing {
            store: shared.clone(),
            nth: 1,
            rival: Some((&b"r"[..], 70)),
        });
        let set = |payload: Vec<u8>| Request::Set {
            key: b"k".to_vec(),
            payload,
        };

        request(&mut client, &set(vec![1; 8]));
        assert_eq!(server.serve_one().unwrap(), Served::Set { stored: true });
        assert_eq!(status(&client), STATUS_STORED);

        // Allocation passes, but the rival's item is linked before ours.
        request(&mut client, &set(vec![2; 40]));
        assert_eq!(server.serve_one().unwrap(), Served::Set { stored: false });
        assert_eq!(status(&client), STATUS_NOT_STORED);

        assert!(shared.get(b"k").is_none());
        assert!(shared.get(b"r").is_some());
        assert_eq!(shared.lock().used_bytes(), ITEM_OVERHEAD + 71);
        assert!(shared.lock().used_bytes() <= capacity);
    }

    #[test]
    fn unknown_opcode_is_skipped() {
        let (mut client, mut server) = rig(MemStore::default());
        client
            .outbound()
            .unwrap()
            .write(0, &[0x7f, 1, 0, 0, 0, 0, b'x', b'x'])
            .unwrap();
        client.send(HEADER_LEN + 1).unwrap();
        assert_eq!(server.serve_one().unwrap(), Served::Skipped);
        assert_eq!(server.stats().unknown_opcodes, 1);
        assert_eq!(server.connection().inbound().unwrap().load(OFF_OPCODE).unwrap(), 0);

        request(&mut client, &Request::Stop);
        assert_eq!(server.serve_one().unwrap(), Served::Stop);
    }

    #[test]
    fn stop_ends_run() {
        let (mut client, mut server) = rig(MemStore::default());
        request(&mut client, &Request::Get { key: b"nope".to_vec() });
        assert_eq!(server.serve_one().unwrap(), Served::Get { hit: false });

        request(&mut client, &Request::Stop);
        let verbs = server.connection().verbs().clone();
        let stats = server.run().unwrap();
        assert_eq!((stats.gets, stats.get_hits), (1, 0));
        assert!(verbs.live().is_empty());
    }

    #[test]
    fn idle_timeout() {
        let (_client, mut server) = rig(MemStore::default());
        assert!(matches!(
            server.serve_one(),
            Err(DispatchError::Proto(ProtoError::Timeout(_)))
        ));
    }

    #[test]
    fn client_side_connection_is_rejected() {
        let fabric = SimFabric::new();
        let conn = Connection::open(fabric.host("a"), config(), Role::Client).unwrap();
        assert!(matches!(
            DispatchLoop::new(conn, MemStore::default()),
            Err(DispatchError::Role(Role::Client))
        ));
        let conn = Connection::open(fabric.host("b"), config(), Role::Server).unwrap();
        assert!(matches!(
            DispatchLoop::new(conn, MemStore::default()),
            Err(DispatchError::NotConnected)
        ));
    }
}
