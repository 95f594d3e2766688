//! Issuing requests over a connected client-side [`Connection`].

use thiserror::Error;

use crate::conn::{Connection, Role, TeardownError, TransportError};
use crate::proto::codec::{Request, STATUS_STORED};
use crate::proto::{ProtoError, RequestView, ResponseView};
use crate::rdma::verbs::Verbs;

/// Client error type.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection is {0:?}-side, expected client-side")]
    Role(Role),

    #[error("connection is not bound to a peer")]
    NotConnected,

    #[error("server did not store the object (status {0})")]
    NotStored(u8),

    #[error("response not received")]
    Proto(#[from] ProtoError),

    #[error("request not sent")]
    Transport(#[from] TransportError),

    #[error("connection teardown after STOP failed")]
    Teardown(#[from] TeardownError),
}

/// Drives SET, GET and STOP requests, one at a time.
pub struct Client<V: Verbs> {
    conn: Connection<V>,
}

impl<V: Verbs> Client<V> {
    /// `conn` must be a connected client-side connection.
    pub fn new(conn: Connection<V>) -> Result<Self, ClientError> {
        if conn.role() != Role::Client {
            return Err(ClientError::Role(conn.role()));
        }
        if conn.peer().is_none() {
            return Err(ClientError::NotConnected);
        }
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection<V> {
        &self.conn
    }

    fn post(&mut self, req: &Request) -> Result<(), ClientError> {
        let outbound = self.conn.outbound().ok_or(TransportError::NotReady)?;
        let len = RequestView::new(outbound).put(req)?;
        log::debug!("ibcached: sending {:?} ({} bytes)", req.opcode(), len);
        self.conn.send(len)?;
        Ok(())
    }

    /// Store `payload` under `key`.
    pub fn set(&mut self, key: &[u8], payload: &[u8]) -> Result<(), ClientError> {
        self.post(&Request::Set {
            key: key.to_vec(),
            payload: payload.to_vec(),
        })?;

        let empty = Role::Client.empty_marker();
        let budget = self.conn.config().response_budget();
        let inbound = self.conn.inbound().ok_or(TransportError::NotReady)?;
        let view = ResponseView::new(inbound);
        let status = view.receive_status(empty, budget, || self.conn.relax())?;
        view.rearm(empty)?;

        match status {
            STATUS_STORED => Ok(()),
            status => Err(ClientError::NotStored(status)),
        }
    }

    /// Fetch the value under `key`. `None` if the key is absent.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, ClientError> {
        self.post(&Request::Get { key: key.to_vec() })?;

        let empty = Role::Client.empty_marker();
        let config = self.conn.config();
        let (budget, landing) = (config.response_budget(), config.landing_budget());
        let inbound = self.conn.inbound().ok_or(TransportError::NotReady)?;
        let view = ResponseView::new(inbound);
        let payload = view.receive_get(empty, budget, landing, || self.conn.relax())?;
        view.rearm(empty)?;
        Ok(payload)
    }

    /// Tell the server to stop, wait for the STOP to be delivered, and tear
    /// the connection down.
    pub fn stop(mut self) -> Result<(), ClientError> {
        self.post(&Request::Stop)?;
        self.conn.quiesce()?;
        self.conn.destroy()?;
        Ok(())
    }
}
